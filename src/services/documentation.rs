use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Songbuzz Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::room::create_room,
        crate::routes::room::get_room,
        crate::routes::room::join_room,
        crate::routes::room::resume_session,
        crate::routes::room::leave_room,
        crate::routes::room::update_settings,
        crate::routes::round::start_game,
        crate::routes::round::next_song,
        crate::routes::round::validate_answer,
        crate::routes::round::reveal,
        crate::routes::round::end_game,
        crate::routes::round::restart_game,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::HealthStatus,
            crate::dto::common::RoomSnapshot,
            crate::dto::common::PlayerSummary,
            crate::dto::common::BuzzSummary,
            crate::dto::common::SettingsView,
            crate::dto::common::RevealedSong,
            crate::dto::common::PlaybackView,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::JoinRoomRequest,
            crate::dto::room::ResumeRequest,
            crate::dto::room::ValidateRequest,
            crate::dto::room::SettingsInput,
            crate::dto::room::MembershipResponse,
            crate::dto::events::RoomEvent,
            crate::dto::ws::ClientMessage,
            crate::dto::ws::ServerMessage,
            crate::state::state_machine::RoundPhase,
            crate::dao::models::RoomStatus,
            crate::dao::models::GuessMode,
            crate::dao::models::StartPosition,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "room", description = "Room lifecycle and membership"),
        (name = "round", description = "Host-only round control"),
        (name = "ws", description = "WebSocket live feed, buzzing and heartbeats"),
    )
)]
pub struct ApiDoc;

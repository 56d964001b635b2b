use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
};
use axum_valid::Valid;

use crate::{
    dto::{
        common::RoomSnapshot,
        room::{
            CreateRoomRequest, JoinCode, JoinRoomRequest, MembershipResponse, ResumeRequest,
            SettingsInput,
        },
    },
    error::AppError,
    routes::player_id,
    services::room_service,
    state::SharedState,
};

/// Routes handling room lifecycle and membership.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", post(create_room))
        .route("/rooms/{code}", get(get_room))
        .route("/rooms/{code}/join", post(join_room))
        .route("/rooms/{code}/resume", post(resume_session))
        .route("/rooms/{code}/leave", post(leave_room))
        .route("/rooms/{code}/settings", put(update_settings))
}

/// Create a room with the caller as host.
#[utoipa::path(
    post,
    path = "/rooms",
    tag = "room",
    request_body = CreateRoomRequest,
    responses(
        (status = 200, description = "Room created", body = MembershipResponse),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn create_room(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateRoomRequest>>,
) -> Result<Json<MembershipResponse>, AppError> {
    let membership = room_service::create_room(&state, payload).await?;
    Ok(Json(membership))
}

/// Fetch the current snapshot of a room.
#[utoipa::path(
    get,
    path = "/rooms/{code}",
    tag = "room",
    params(("code" = String, Path, description = "Join code of the room")),
    responses(
        (status = 200, description = "Room snapshot", body = RoomSnapshot),
        (status = 404, description = "No room with this code")
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Valid(Path(path)): Valid<Path<JoinCode>>,
) -> Result<Json<RoomSnapshot>, AppError> {
    let snapshot = room_service::get_room(&state, &path.code).await?;
    Ok(Json(snapshot))
}

/// Join an existing room by code.
#[utoipa::path(
    post,
    path = "/rooms/{code}/join",
    tag = "room",
    params(("code" = String, Path, description = "Join code of the room")),
    request_body = JoinRoomRequest,
    responses(
        (status = 200, description = "Joined", body = MembershipResponse),
        (status = 404, description = "No room with this code"),
        (status = 409, description = "Room full or game over")
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    Valid(Path(path)): Valid<Path<JoinCode>>,
    Valid(Json(payload)): Valid<Json<JoinRoomRequest>>,
) -> Result<Json<MembershipResponse>, AppError> {
    let membership = room_service::join_room(&state, &path.code, payload).await?;
    Ok(Json(membership))
}

/// Validate a stored session and return a fresh snapshot.
#[utoipa::path(
    post,
    path = "/rooms/{code}/resume",
    tag = "room",
    params(("code" = String, Path, description = "Join code of the room")),
    request_body = ResumeRequest,
    responses(
        (status = 200, description = "Session resumed", body = MembershipResponse),
        (status = 410, description = "Not a member anymore; rejoin required")
    )
)]
pub async fn resume_session(
    State(state): State<SharedState>,
    Valid(Path(path)): Valid<Path<JoinCode>>,
    Json(payload): Json<ResumeRequest>,
) -> Result<Json<MembershipResponse>, AppError> {
    let membership = room_service::resume_session(&state, &path.code, payload.player_id).await?;
    Ok(Json(membership))
}

/// Explicitly leave a room.
#[utoipa::path(
    post,
    path = "/rooms/{code}/leave",
    tag = "room",
    params(
        ("code" = String, Path, description = "Join code of the room"),
        ("x-player-id" = String, Header, description = "Identity of the leaving player")
    ),
    responses(
        (status = 204, description = "Left the room"),
        (status = 410, description = "Not a member anymore")
    )
)]
pub async fn leave_room(
    State(state): State<SharedState>,
    Valid(Path(path)): Valid<Path<JoinCode>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let actor = player_id(&headers)?;
    room_service::leave_room(&state, &path.code, actor).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Replace the room settings (host-only, lobby-only).
#[utoipa::path(
    put,
    path = "/rooms/{code}/settings",
    tag = "room",
    params(
        ("code" = String, Path, description = "Join code of the room"),
        ("x-player-id" = String, Header, description = "Identity of the acting host")
    ),
    request_body = SettingsInput,
    responses(
        (status = 200, description = "Settings updated", body = RoomSnapshot),
        (status = 401, description = "Caller is not the host"),
        (status = 409, description = "Game already started")
    )
)]
pub async fn update_settings(
    State(state): State<SharedState>,
    Valid(Path(path)): Valid<Path<JoinCode>>,
    headers: HeaderMap,
    Valid(Json(payload)): Valid<Json<SettingsInput>>,
) -> Result<Json<RoomSnapshot>, AppError> {
    let actor = player_id(&headers)?;
    let snapshot = room_service::update_settings(&state, &path.code, actor, payload).await?;
    Ok(Json(snapshot))
}

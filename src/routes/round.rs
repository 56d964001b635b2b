//! Host-only round control routes.
//!
//! The acting player travels in the `x-player-id` header; every handler
//! resolves it and lets the service compare it against the room's host seat.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
};
use axum_valid::Valid;

use crate::{
    dto::{
        common::RoomSnapshot,
        room::{JoinCode, ValidateRequest},
    },
    error::AppError,
    routes::player_id,
    services::{room_service, round_service},
    state::SharedState,
};

/// Routes driving the game rounds.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms/{code}/start", post(start_game))
        .route("/rooms/{code}/next-song", post(next_song))
        .route("/rooms/{code}/validate", post(validate_answer))
        .route("/rooms/{code}/reveal", post(reveal))
        .route("/rooms/{code}/end", post(end_game))
        .route("/rooms/{code}/restart", post(restart_game))
}

/// Start the game from the lobby.
#[utoipa::path(
    post,
    path = "/rooms/{code}/start",
    tag = "round",
    params(
        ("code" = String, Path, description = "Join code of the room"),
        ("x-player-id" = String, Header, description = "Identity of the acting host")
    ),
    responses(
        (status = 200, description = "Game started", body = RoomSnapshot),
        (status = 401, description = "Caller is not the host"),
        (status = 409, description = "Not enough players or wrong phase")
    )
)]
pub async fn start_game(
    State(state): State<SharedState>,
    Valid(Path(path)): Valid<Path<JoinCode>>,
    headers: HeaderMap,
) -> Result<Json<RoomSnapshot>, AppError> {
    let actor = player_id(&headers)?;
    let snapshot = room_service::start_game(&state, &path.code, actor).await?;
    Ok(Json(snapshot))
}

/// Load the next song, opening a fresh round.
#[utoipa::path(
    post,
    path = "/rooms/{code}/next-song",
    tag = "round",
    params(
        ("code" = String, Path, description = "Join code of the room"),
        ("x-player-id" = String, Header, description = "Identity of the acting host")
    ),
    responses(
        (status = 200, description = "Round opened on a new song", body = RoomSnapshot),
        (status = 401, description = "Caller is not the host"),
        (status = 409, description = "Wrong phase or no playable song left"),
        (status = 503, description = "Song catalog unreachable or exhausted")
    )
)]
pub async fn next_song(
    State(state): State<SharedState>,
    Valid(Path(path)): Valid<Path<JoinCode>>,
    headers: HeaderMap,
) -> Result<Json<RoomSnapshot>, AppError> {
    let actor = player_id(&headers)?;
    let snapshot = round_service::load_next_song(&state, &path.code, actor).await?;
    Ok(Json(snapshot))
}

/// Validate or refute the winning buzz.
#[utoipa::path(
    post,
    path = "/rooms/{code}/validate",
    tag = "round",
    params(
        ("code" = String, Path, description = "Join code of the room"),
        ("x-player-id" = String, Header, description = "Identity of the acting host")
    ),
    request_body = ValidateRequest,
    responses(
        (status = 200, description = "Validation applied", body = RoomSnapshot),
        (status = 401, description = "Caller is not the host"),
        (status = 409, description = "No winning buzz to validate")
    )
)]
pub async fn validate_answer(
    State(state): State<SharedState>,
    Valid(Path(path)): Valid<Path<JoinCode>>,
    headers: HeaderMap,
    Json(payload): Json<ValidateRequest>,
) -> Result<Json<RoomSnapshot>, AppError> {
    let actor = player_id(&headers)?;
    let snapshot =
        round_service::validate_answer(&state, &path.code, actor, payload.correct).await?;
    Ok(Json(snapshot))
}

/// Reveal the answer when nobody buzzed in time.
#[utoipa::path(
    post,
    path = "/rooms/{code}/reveal",
    tag = "round",
    params(
        ("code" = String, Path, description = "Join code of the room"),
        ("x-player-id" = String, Header, description = "Identity of the acting host")
    ),
    responses(
        (status = 200, description = "Answer revealed", body = RoomSnapshot),
        (status = 401, description = "Caller is not the host"),
        (status = 409, description = "A winning buzz is pending validation")
    )
)]
pub async fn reveal(
    State(state): State<SharedState>,
    Valid(Path(path)): Valid<Path<JoinCode>>,
    headers: HeaderMap,
) -> Result<Json<RoomSnapshot>, AppError> {
    let actor = player_id(&headers)?;
    let snapshot = round_service::reveal_without_answer(&state, &path.code, actor).await?;
    Ok(Json(snapshot))
}

/// End the game.
#[utoipa::path(
    post,
    path = "/rooms/{code}/end",
    tag = "round",
    params(
        ("code" = String, Path, description = "Join code of the room"),
        ("x-player-id" = String, Header, description = "Identity of the acting host")
    ),
    responses(
        (status = 200, description = "Game ended", body = RoomSnapshot),
        (status = 401, description = "Caller is not the host")
    )
)]
pub async fn end_game(
    State(state): State<SharedState>,
    Valid(Path(path)): Valid<Path<JoinCode>>,
    headers: HeaderMap,
) -> Result<Json<RoomSnapshot>, AppError> {
    let actor = player_id(&headers)?;
    let snapshot = room_service::end_game(&state, &path.code, actor).await?;
    Ok(Json(snapshot))
}

/// Spin up a fresh lobby after the game ended.
#[utoipa::path(
    post,
    path = "/rooms/{code}/restart",
    tag = "round",
    params(
        ("code" = String, Path, description = "Join code of the room"),
        ("x-player-id" = String, Header, description = "Identity of the acting host")
    ),
    responses(
        (status = 200, description = "Fresh lobby ready", body = RoomSnapshot),
        (status = 401, description = "Caller is not the host"),
        (status = 409, description = "Game is not over")
    )
)]
pub async fn restart_game(
    State(state): State<SharedState>,
    Valid(Path(path)): Valid<Path<JoinCode>>,
    headers: HeaderMap,
) -> Result<Json<RoomSnapshot>, AppError> {
    let actor = player_id(&headers)?;
    let snapshot = room_service::restart_game(&state, &path.code, actor).await?;
    Ok(Json(snapshot))
}

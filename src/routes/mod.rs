use axum::{Router, http::HeaderMap};
use uuid::Uuid;

use crate::{error::AppError, state::SharedState};

pub mod docs;
pub mod health;
pub mod room;
pub mod round;
pub mod websocket;

/// Header carrying the acting player's identity on REST calls.
pub(crate) const PLAYER_ID_HEADER: &str = "x-player-id";

/// Extract the acting player id from the request headers.
pub(crate) fn player_id(headers: &HeaderMap) -> Result<Uuid, AppError> {
    let raw = headers
        .get(PLAYER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(format!("missing `{PLAYER_ID_HEADER}` header")))?;
    Uuid::parse_str(raw)
        .map_err(|_| AppError::Unauthorized(format!("malformed `{PLAYER_ID_HEADER}` header")))
}

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(room::router())
        .merge(round::router())
        .merge(websocket::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}

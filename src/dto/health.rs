use serde::Serialize;
use utoipa::ToSchema;

/// Overall verdict returned by the `/healthcheck` route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Room store reachable; the full API is serving.
    Ok,
    /// No usable room store; writes fail fast until the supervisor recovers.
    Degraded,
}

/// Health payload: the verdict plus a cheap snapshot of what the server holds.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Overall verdict.
    pub status: HealthStatus,
    /// Number of live rooms, absent while storage is unreachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_rooms: Option<usize>,
}

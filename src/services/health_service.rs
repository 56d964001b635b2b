//! Health reporting for the HTTP surface.

use tracing::warn;

use crate::{
    dto::health::{HealthResponse, HealthStatus},
    state::SharedState,
};

/// Assemble the health payload, probing the room store along the way.
///
/// The room count doubles as the storage probe: a store that cannot list its
/// rooms reads as degraded even before the supervisor notices.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let active_rooms = match state.require_room_store().await {
        Ok(store) => match store.list_rooms().await {
            Ok(rooms) => Some(rooms.len()),
            Err(err) => {
                warn!(error = %err, "room store failed the health probe");
                None
            }
        },
        Err(_) => None,
    };

    let status = if state.is_degraded() || active_rooms.is_none() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    };

    HealthResponse {
        status,
        active_rooms,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::SyncConfig,
        dao::room_store::memory::MemoryRoomStore,
        services::catalog::stub::StubCatalog,
        state::AppState,
    };

    #[tokio::test]
    async fn reports_degraded_until_a_store_is_installed() {
        let (state, _presence_rx) = AppState::new(
            Arc::new(SyncConfig::default()),
            Arc::new(StubCatalog::new(&["s1"])),
        );

        let health = health_status(&state).await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.active_rooms.is_none());

        state
            .install_room_store(Arc::new(MemoryRoomStore::default()))
            .await;
        let health = health_status(&state).await;
        assert_eq!(health.status, HealthStatus::Ok);
        assert_eq!(health.active_rooms, Some(0));
    }
}

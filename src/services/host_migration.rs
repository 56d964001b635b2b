//! Host migration.
//!
//! When the host drops offline past the presence grace, authority moves to the
//! longest-tenured online player. The store's compare-and-swap on `host_id` is
//! what makes duplicate triggers harmless: the second observer's swap simply
//! fails its precondition and becomes a no-op.

use tracing::info;
use uuid::Uuid;

use crate::{
    dao::models::PlayerEntity,
    error::ServiceError,
    services::events,
    state::SharedState,
};

/// Pick the successor among `players` when `departing` gives up the host seat.
///
/// Tenure (earliest `joined_at_ms`) decides, so every observer picks the same
/// player without coordinating. With `require_online` the choice is restricted
/// to currently-online players; explicit leave relaxes that so a room never
/// keeps a departed host.
pub fn pick_successor(
    players: &[PlayerEntity],
    online: &[Uuid],
    departing: Uuid,
    require_online: bool,
) -> Option<Uuid> {
    let candidates = players.iter().filter(|p| p.id != departing);

    let best_online = candidates
        .clone()
        .filter(|p| online.contains(&p.id))
        .min_by_key(|p| (p.joined_at_ms, p.id))
        .map(|p| p.id);

    if require_online {
        best_online
    } else {
        best_online.or_else(|| {
            candidates
                .min_by_key(|p| (p.joined_at_ms, p.id))
                .map(|p| p.id)
        })
    }
}

/// React to the host going offline: migrate authority if anyone else is online.
///
/// Returns the new host id when a migration was committed by this call.
pub async fn handle_host_offline(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
) -> Result<Option<Uuid>, ServiceError> {
    let store = state.require_room_store().await?;
    let Some(room) = store.find_room(room_id).await? else {
        return Ok(None);
    };
    if room.host_id != player_id {
        return Ok(None);
    }

    let players = store.list_players(room_id).await?;
    let online = state.presence().online_players(room_id).await;
    let Some(successor) = pick_successor(&players, &online, player_id, true) else {
        // Nobody online to take over; the seat stays until someone returns.
        return Ok(None);
    };

    migrate(state, room_id, player_id, successor).await
}

/// Commit a host swap via the store CAS and broadcast the outcome.
///
/// Returns `None` when another observer already migrated (or the outgoing host
/// was not the host anymore), without touching anything.
pub async fn migrate(
    state: &SharedState,
    room_id: Uuid,
    outgoing: Uuid,
    successor: Uuid,
) -> Result<Option<Uuid>, ServiceError> {
    let store = state.require_room_store().await?;
    if !store.swap_host(room_id, outgoing, successor).await? {
        return Ok(None);
    }

    info!(%room_id, %outgoing, %successor, "host authority migrated");
    events::broadcast_host_changed(state, room_id, successor);
    events::broadcast_room_updated(state, room_id).await?;
    Ok(Some(successor))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::SyncConfig,
        dao::{models::now_ms, room_store::memory::MemoryRoomStore},
        dto::room::{CreateRoomRequest, JoinRoomRequest},
        services::{catalog::stub::StubCatalog, room_service},
        state::AppState,
    };

    fn player(room_id: Uuid, joined_at_ms: i64) -> PlayerEntity {
        PlayerEntity {
            id: Uuid::new_v4(),
            room_id,
            nickname: "p".into(),
            score: 0,
            is_host: false,
            joined_at_ms,
            last_seen_ms: now_ms(),
        }
    }

    #[test]
    fn successor_is_the_longest_tenured_online_player() {
        let room_id = Uuid::new_v4();
        let host = player(room_id, 10);
        let second = player(room_id, 20);
        let third = player(room_id, 30);
        let players = vec![host.clone(), second.clone(), third.clone()];

        // All online: earliest joiner after the host wins.
        let online = vec![host.id, second.id, third.id];
        assert_eq!(
            pick_successor(&players, &online, host.id, true),
            Some(second.id)
        );

        // Second is offline: third takes over instead.
        let online = vec![host.id, third.id];
        assert_eq!(
            pick_successor(&players, &online, host.id, true),
            Some(third.id)
        );
    }

    #[test]
    fn no_online_candidate_means_no_migration() {
        let room_id = Uuid::new_v4();
        let host = player(room_id, 10);
        let second = player(room_id, 20);
        let players = vec![host.clone(), second.clone()];

        assert_eq!(pick_successor(&players, &[], host.id, true), None);
        // Explicit leave still hands the seat over.
        assert_eq!(
            pick_successor(&players, &[], host.id, false),
            Some(second.id)
        );
    }

    #[test]
    fn lone_host_has_no_successor() {
        let room_id = Uuid::new_v4();
        let host = player(room_id, 10);
        let players = vec![host.clone()];
        assert_eq!(pick_successor(&players, &[host.id], host.id, false), None);
    }

    #[tokio::test]
    async fn offline_host_migrates_once_and_returns_as_regular_player() {
        let (state, _presence_rx) = AppState::new(
            Arc::new(SyncConfig::default()),
            Arc::new(StubCatalog::new(&["s1"])),
        );
        state
            .install_room_store(Arc::new(MemoryRoomStore::default()))
            .await;

        let created = room_service::create_room(&state, CreateRoomRequest {
            nickname: "Alice".into(),
            settings: None,
        })
        .await
        .unwrap();
        let code = created.room.code.clone();
        let room_id = created.room.id;
        let alice = created.player_id;
        let bob = room_service::join_room(&state, &code, JoinRoomRequest {
            nickname: "Bob".into(),
        })
        .await
        .unwrap()
        .player_id;

        state.presence().register(room_id, bob).await;

        let migrated = handle_host_offline(&state, room_id, alice).await.unwrap();
        assert_eq!(migrated, Some(bob));

        // A second observer reporting the same outage finds the seat moved.
        let duplicate = handle_host_offline(&state, room_id, alice).await.unwrap();
        assert_eq!(duplicate, None);

        let resumed = room_service::resume_session(&state, &code, alice)
            .await
            .unwrap();
        assert_eq!(resumed.room.host_id, bob);
        let alice_row = resumed
            .room
            .players
            .iter()
            .find(|p| p.id == alice)
            .unwrap();
        assert!(!alice_row.is_host);
    }
}

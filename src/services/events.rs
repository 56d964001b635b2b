//! Room event assembly and fan-out helpers.
//!
//! Every mutation path funnels through here so the broadcast vocabulary stays
//! in one place. Events are idempotent: the snapshot-bearing `room_updated`
//! always carries the whole room, so a client that missed incremental events
//! resynchronizes from the next one.

use uuid::Uuid;

use crate::{
    dao::models::{BuzzEntity, PlayerEntity, RoomEntity},
    dto::{
        common::{BuzzSummary, PlayerSummary, RoomSnapshot},
        events::RoomEvent,
    },
    error::ServiceError,
    state::SharedState,
};

/// Assemble the full snapshot of a room from store rows plus live presence.
pub async fn load_snapshot(
    state: &SharedState,
    room: RoomEntity,
) -> Result<RoomSnapshot, ServiceError> {
    let store = state.require_room_store().await?;
    let players = store.list_players(room.id).await?;
    let buzzes = store.list_buzzes(room.id, room.round).await?;
    let online = state.presence().online_players(room.id).await;
    Ok(RoomSnapshot::assemble(room, players, buzzes, online))
}

/// Reload a room and broadcast a fresh snapshot to its subscribers.
///
/// A room deleted since the mutation is not an error: subscribers of a dead
/// room are being torn down anyway.
pub async fn broadcast_room_updated(state: &SharedState, room_id: Uuid) -> Result<(), ServiceError> {
    let store = state.require_room_store().await?;
    let Some(room) = store.find_room(room_id).await? else {
        return Ok(());
    };
    let snapshot = load_snapshot(state, room).await?;
    state
        .broadcaster()
        .broadcast(room_id, RoomEvent::RoomUpdated { room: snapshot });
    Ok(())
}

/// Broadcast that a player joined the room.
pub fn broadcast_player_joined(state: &SharedState, room_id: Uuid, player: PlayerEntity) {
    state.broadcaster().broadcast(
        room_id,
        RoomEvent::PlayerJoined {
            player: PlayerSummary::from(player),
        },
    );
}

/// Broadcast an updated player row (score, host flag).
pub fn broadcast_player_updated(state: &SharedState, room_id: Uuid, player: PlayerEntity) {
    state.broadcaster().broadcast(
        room_id,
        RoomEvent::PlayerUpdated {
            player: PlayerSummary::from(player),
        },
    );
}

/// Broadcast that a player left the room for good.
pub fn broadcast_player_left(state: &SharedState, room_id: Uuid, player_id: Uuid) {
    state
        .broadcaster()
        .broadcast(room_id, RoomEvent::PlayerLeft { player_id });
}

/// Broadcast that host authority moved.
pub fn broadcast_host_changed(state: &SharedState, room_id: Uuid, host_id: Uuid) {
    state
        .broadcaster()
        .broadcast(room_id, RoomEvent::HostChanged { host_id });
}

/// Broadcast a recorded buzz attempt.
pub fn broadcast_buzz_recorded(state: &SharedState, room_id: Uuid, buzz: BuzzEntity) {
    state.broadcaster().broadcast(
        room_id,
        RoomEvent::BuzzRecorded {
            buzz: BuzzSummary::from(buzz),
        },
    );
}

/// Broadcast a single player's connectivity flip.
pub fn broadcast_presence(state: &SharedState, room_id: Uuid, player_id: Uuid, online: bool) {
    state
        .broadcaster()
        .broadcast(room_id, RoomEvent::Presence { player_id, online });
}

//! Abstraction over the persistence layer for rooms, players, and buzzes.

pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{BuzzEntity, PlayerEntity, RoomEntity, RoomStatus};
use crate::dao::storage::StorageResult;

/// Outcome of an attempted buzz insert, decided atomically by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuzzOutcome {
    /// The buzz was committed as the round's active winner.
    Won(BuzzEntity),
    /// Another buzz already holds the round; the attempt was recorded as late.
    Lost {
        /// Player owning the active winning buzz.
        winner_player_id: Uuid,
    },
    /// The player was already marked incorrect this round and may not buzz again.
    Closed,
}

/// Parameters for starting a new round in a single conditional write.
#[derive(Debug, Clone)]
pub struct BeginRound {
    /// Song to load.
    pub song_id: String,
    /// Shared clip start offset inside the track.
    pub song_offset_ms: i64,
    /// Synchronization anchor for the new round.
    pub started_at_ms: i64,
}

/// Persistence contract for the synchronization engine.
///
/// Conditional operations (`update_status`, `swap_host`, `insert_buzz`) are the
/// sole arbiters of cross-client races: callers must treat a losing write as an
/// ordinary outcome, never retry it into a blind overwrite.
pub trait RoomStore: Send + Sync {
    /// Persist a fresh room together with its host player.
    fn create_room(
        &self,
        room: RoomEntity,
        host: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Fetch a room by primary key.
    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;

    /// Fetch a room by its join code (caller normalizes case).
    fn find_room_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>>;

    /// List all rooms, used by the stale-room sweeper.
    fn list_rooms(&self) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>>;

    /// Compare-and-swap the room status. Returns `false` when the room was not
    /// in `from` anymore (someone else transitioned first).
    fn update_status(
        &self,
        room_id: Uuid,
        from: RoomStatus,
        to: RoomStatus,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    /// Replace the room settings.
    fn update_settings(
        &self,
        room_id: Uuid,
        settings: crate::dao::models::RoomSettingsEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Compare-and-swap host authority. Returns `false` when `expected` no
    /// longer holds the host seat, which makes duplicate migrations no-ops.
    fn swap_host(
        &self,
        room_id: Uuid,
        expected: Uuid,
        new_host: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    /// Load a new song: set song id, shared offset, and anchor, clear the
    /// revealed flag, append to the played list, and bump the round epoch.
    /// Buzz rows from previous rounds are cleared as part of the same call.
    /// Returns the new round number.
    fn begin_round(
        &self,
        room_id: Uuid,
        params: BeginRound,
    ) -> BoxFuture<'static, StorageResult<u32>>;

    /// Clear any current song and anchor (used when the game ends).
    fn clear_round(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;

    /// Reset a room to a fresh lobby: clear the round, the played-song history,
    /// all buzz rows, and every player's score. The round epoch keeps counting
    /// up so buzzes from the previous game can never resurface.
    fn reset_game(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;

    /// Mark the current round as revealed.
    fn set_revealed(&self, room_id: Uuid, revealed: bool) -> BoxFuture<'static, StorageResult<()>>;

    /// Delete a room and everything it owns. Returns `false` if absent.
    fn delete_room(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;

    /// Add a player row (join).
    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>>;

    /// Fetch a single player of a room.
    fn find_player(
        &self,
        room_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;

    /// All players of a room in join order.
    fn list_players(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;

    /// Remove a player row (explicit leave). Returns `false` if absent.
    fn delete_player(
        &self,
        room_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    /// Write the durable heartbeat timestamp for a player.
    fn touch_player(
        &self,
        room_id: Uuid,
        player_id: Uuid,
        last_seen_ms: i64,
    ) -> BoxFuture<'static, StorageResult<()>>;

    /// Add to a player's score, returning the updated player.
    fn add_score(
        &self,
        room_id: Uuid,
        player_id: Uuid,
        delta: i32,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;

    /// Commit a buzz attempt. The backend decides atomically whether it wins,
    /// loses, or is rejected because the player's round is closed.
    fn insert_buzz(&self, buzz: BuzzEntity) -> BoxFuture<'static, StorageResult<BuzzOutcome>>;

    /// All buzz rows of a round, earliest first.
    fn list_buzzes(
        &self,
        room_id: Uuid,
        round: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<BuzzEntity>>>;

    /// Mark a buzz as answered incorrectly, reopening the round for everyone
    /// else. Returns the updated buzz, or `None` if absent.
    fn mark_buzz_incorrect(
        &self,
        buzz_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<BuzzEntity>>>;

    /// Backend liveness probe.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;

    /// Attempt to re-establish the backend connection.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

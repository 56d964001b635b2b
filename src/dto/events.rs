//! Broadcast events fanned out to every live connection of a room.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::common::{BuzzSummary, PlayerSummary, RevealedSong, RoomSnapshot};

/// Event fanned out over a room's broadcast channel.
///
/// Row-level events exist for cheap incremental updates; [`RoomEvent::RoomUpdated`]
/// carries a full snapshot so clients can always resynchronize from one payload.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    /// Full room snapshot; emitted on every phase or settings change.
    RoomUpdated {
        /// The refreshed snapshot.
        room: RoomSnapshot,
    },
    /// A new player joined the room.
    PlayerJoined {
        /// The joining player.
        player: PlayerSummary,
    },
    /// A player row changed (score, nickname, host flag).
    PlayerUpdated {
        /// The updated player.
        player: PlayerSummary,
    },
    /// A player left the room for good.
    PlayerLeft {
        /// Identifier of the departed player.
        player_id: Uuid,
    },
    /// Host authority moved to another player.
    HostChanged {
        /// The new host.
        host_id: Uuid,
    },
    /// A buzz attempt was recorded, winning or not.
    BuzzRecorded {
        /// The recorded buzz.
        buzz: BuzzSummary,
    },
    /// The round's answer was revealed, by validation or by the host giving up.
    RoundRevealed {
        /// Resolved song metadata; `None` when the catalog no longer knows it.
        song: Option<RevealedSong>,
    },
    /// A single player's connectivity flipped.
    Presence {
        /// The player whose connectivity changed.
        player_id: Uuid,
        /// Whether the player is now considered online.
        online: bool,
    },
    /// Authoritative list of online players, sent to freshly connected clients.
    PresenceSync {
        /// Every player currently considered online.
        online: Vec<Uuid>,
    },
}

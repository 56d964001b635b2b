//! WebSocket wire messages for player connections.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::{common::RoomSnapshot, events::RoomEvent};

/// Messages accepted from player WebSocket clients.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message on a fresh socket: binds the connection to a membership.
    Identify {
        /// Join code of the room the player belongs to.
        room_code: String,
        /// Player identity stored client-side.
        player_id: Uuid,
    },
    /// Buzz attempt for the current round.
    Buzz,
    /// Liveness ping; also refreshes the durable `last_seen` marker.
    Heartbeat,
    /// Anything this version does not understand; ignored rather than fatal.
    #[serde(other)]
    Unknown,
}

/// Messages sent to player WebSocket clients.
#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledges identification and delivers the current snapshot.
    Welcome {
        /// The identified player.
        player_id: Uuid,
        /// Snapshot to rebuild client state from.
        snapshot: RoomSnapshot,
    },
    /// Room event forwarded from the broadcast channel.
    Event(RoomEvent),
    /// Direct outcome of this client's own buzz attempt.
    BuzzResult {
        /// Whether the buzz won the round.
        accepted: bool,
        /// The round's answering player, whoever it is.
        #[serde(skip_serializing_if = "Option::is_none")]
        winner_player_id: Option<Uuid>,
    },
    /// Terminal or recoverable error surfaced to the client.
    Error {
        /// Human-readable description.
        message: String,
    },
}

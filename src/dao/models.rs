use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// All persisted timestamps use this representation so the audio clock can do
/// plain integer arithmetic against the shared anchor.
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Lifecycle status of a room, the only persisted phase field.
///
/// The finer round sub-phases (loading/playing/buzzed/reveal) are derived from
/// the room snapshot, never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Lobby: players can join, the host can start once enough are present.
    Waiting,
    /// Game in progress; rounds are driven by the host.
    Playing,
    /// Game over; only a restart can follow.
    Ended,
}

/// How players are expected to answer once they win a buzz.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GuessMode {
    /// Players answer out loud; the host adjudicates.
    Spoken,
    /// Players type their answer for the host to read.
    Typed,
}

/// Where inside the track the shared clip should start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    /// Always start from the beginning of the track.
    Beginning,
    /// Pick a random offset when the song is loaded, shared by every client.
    Random,
}

/// Host-chosen settings applied to every round of a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomSettingsEntity {
    /// Answer adjudication mode.
    pub guess_mode: GuessMode,
    /// Length of the played clip in milliseconds.
    pub clip_duration_ms: u64,
    /// Optional countdown for answering; `None` means no timer.
    pub timer_duration_ms: Option<u64>,
    /// Clip start policy.
    pub start_position: StartPosition,
}

/// Aggregate room entity persisted by the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEntity {
    /// Primary key of the room.
    pub id: Uuid,
    /// Human-facing join code (6 uppercase alphanumeric characters).
    pub code: String,
    /// Player currently holding host authority.
    pub host_id: Uuid,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Host-chosen game settings.
    pub settings: RoomSettingsEntity,
    /// Round epoch marker, bumped each time a song is loaded so buzzes cannot
    /// leak across song transitions.
    pub round: u32,
    /// Identifier of the song currently playing, if any.
    pub current_song_id: Option<String>,
    /// Shared clip start offset inside the track, milliseconds.
    pub current_song_offset_ms: i64,
    /// Synchronization anchor: wall-clock instant the current song started.
    /// Invariant: `Some` iff `current_song_id` is `Some`.
    pub current_song_started_at_ms: Option<i64>,
    /// Whether the current round has been revealed by the host.
    pub revealed: bool,
    /// Songs already played in this room, excluded from random selection.
    pub played_song_ids: Vec<String>,
    /// Creation timestamp for auditing.
    pub created_at_ms: i64,
    /// When the game ended; set by the transition into `Ended` and cleared by
    /// any transition out of it. Drives the ended-room sweep.
    #[serde(default)]
    pub ended_at_ms: Option<i64>,
}

/// Participant of a room, created on join and deleted on explicit leave.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Stable identifier, the join key for presence and reconnection.
    pub id: Uuid,
    /// Owning room.
    pub room_id: Uuid,
    /// Display name chosen by the player.
    pub nickname: String,
    /// Current score; only validated-correct answers may increase it.
    pub score: i32,
    /// Whether this player holds host authority (exactly one per room).
    pub is_host: bool,
    /// Join timestamp; tenure order drives host migration.
    pub joined_at_ms: i64,
    /// Last durable heartbeat, written independently of the presence channel.
    pub last_seen_ms: i64,
}

/// A buzz attempt recorded for a round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuzzEntity {
    /// Primary key of the buzz.
    pub id: Uuid,
    /// Owning room.
    pub room_id: Uuid,
    /// Round epoch the buzz belongs to.
    pub round: u32,
    /// Player who buzzed.
    pub player_id: Uuid,
    /// Server-observed creation timestamp.
    pub created_at_ms: i64,
    /// Whether this buzz was accepted as the round's answering buzz.
    /// At most one buzz per (room, round) has `winner && !was_incorrect`.
    pub winner: bool,
    /// Set by host validation when the answer was wrong.
    pub was_incorrect: bool,
}

impl BuzzEntity {
    /// Whether this buzz currently holds the round (won and not yet refuted).
    pub fn is_active_winner(&self) -> bool {
        self.winner && !self.was_incorrect
    }
}

impl Default for RoomSettingsEntity {
    fn default() -> Self {
        Self {
            guess_mode: GuessMode::Spoken,
            clip_duration_ms: 30_000,
            timer_duration_ms: None,
            start_position: StartPosition::Beginning,
        }
    }
}

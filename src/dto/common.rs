use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{
        BuzzEntity, GuessMode, PlayerEntity, RoomEntity, RoomSettingsEntity, RoomStatus,
        StartPosition, now_ms,
    },
    services::audio_clock::{self, PlaybackPlan},
    state::state_machine::RoundPhase,
};

/// Player view shared across responses and broadcast events.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlayerSummary {
    /// Stable identifier, also the reconnection key.
    pub id: Uuid,
    /// Display name.
    pub nickname: String,
    /// Current score.
    pub score: i32,
    /// Whether this player currently holds host authority.
    pub is_host: bool,
    /// Join timestamp, milliseconds since epoch.
    pub joined_at_ms: i64,
}

impl From<PlayerEntity> for PlayerSummary {
    fn from(value: PlayerEntity) -> Self {
        Self {
            id: value.id,
            nickname: value.nickname,
            score: value.score,
            is_host: value.is_host,
            joined_at_ms: value.joined_at_ms,
        }
    }
}

/// Buzz attempt view; losing attempts are included for the "who also buzzed" UI.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BuzzSummary {
    /// Buzz identifier.
    pub id: Uuid,
    /// Player who buzzed.
    pub player_id: Uuid,
    /// Server-observed creation time.
    pub created_at_ms: i64,
    /// Whether this buzz was accepted as the answering buzz.
    pub winner: bool,
    /// Whether the host refuted the answer.
    pub was_incorrect: bool,
}

impl From<BuzzEntity> for BuzzSummary {
    fn from(value: BuzzEntity) -> Self {
        Self {
            id: value.id,
            player_id: value.player_id,
            created_at_ms: value.created_at_ms,
            winner: value.winner,
            was_incorrect: value.was_incorrect,
        }
    }
}

/// Room settings view.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SettingsView {
    /// Answer adjudication mode.
    pub guess_mode: GuessMode,
    /// Clip length, milliseconds.
    pub clip_duration_ms: u64,
    /// Optional answer countdown, milliseconds; absent means no timer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer_duration_ms: Option<u64>,
    /// Clip start policy.
    pub start_position: StartPosition,
}

impl From<RoomSettingsEntity> for SettingsView {
    fn from(value: RoomSettingsEntity) -> Self {
        Self {
            guess_mode: value.guess_mode,
            clip_duration_ms: value.clip_duration_ms,
            timer_duration_ms: value.timer_duration_ms,
            start_position: value.start_position,
        }
    }
}

/// Song metadata disclosed when a round is revealed.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RevealedSong {
    /// Catalog identifier.
    pub id: String,
    /// Track title.
    pub title: String,
    /// Performing artist.
    pub artist: String,
}

/// Server-computed playback instruction embedded in snapshots so reconnecting
/// clients can seek before their first local clock read.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PlaybackView {
    /// Song to have loaded.
    pub song_id: String,
    /// Position inside the track, milliseconds.
    pub position_ms: i64,
    /// Whether playback should currently be paused.
    pub paused: bool,
    /// Whether the clip window has fully elapsed.
    pub clip_ended: bool,
}

impl From<PlaybackPlan> for PlaybackView {
    fn from(value: PlaybackPlan) -> Self {
        Self {
            song_id: value.song_id,
            position_ms: value.position_ms,
            paused: value.paused,
            clip_ended: value.clip_ended,
        }
    }
}

/// Full idempotent room snapshot.
///
/// Clients rebuild their derived state from this whole payload each time: feed
/// ordering between row changes and presence can then never desynchronize them.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoomSnapshot {
    /// Room identifier.
    pub id: Uuid,
    /// Human-facing join code.
    pub code: String,
    /// Player currently holding host authority.
    pub host_id: Uuid,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Derived round sub-phase.
    pub phase: RoundPhase,
    /// Round epoch marker.
    pub round: u32,
    /// Current song, if a round is open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_song_id: Option<String>,
    /// Shared clip start offset inside the track.
    pub current_song_offset_ms: i64,
    /// Synchronization anchor for the audio clock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_song_started_at_ms: Option<i64>,
    /// Whether the current round is revealed.
    pub revealed: bool,
    /// Room settings.
    pub settings: SettingsView,
    /// All players in join order.
    pub players: Vec<PlayerSummary>,
    /// Buzz attempts of the current round, earliest first.
    pub buzzes: Vec<BuzzSummary>,
    /// Players currently considered online.
    pub online: Vec<Uuid>,
    /// Playback instruction at snapshot time, if a round is open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback: Option<PlaybackView>,
}

impl RoomSnapshot {
    /// Assemble a snapshot from store rows and the presence tracker's view.
    pub fn assemble(
        room: RoomEntity,
        players: Vec<PlayerEntity>,
        buzzes: Vec<BuzzEntity>,
        online: Vec<Uuid>,
    ) -> Self {
        let phase = RoundPhase::derive(&room, &buzzes);
        let playback = audio_clock::playback_plan(&room, &buzzes, now_ms(), false).map(Into::into);
        Self {
            id: room.id,
            code: room.code,
            host_id: room.host_id,
            status: room.status,
            phase,
            round: room.round,
            current_song_id: room.current_song_id,
            current_song_offset_ms: room.current_song_offset_ms,
            current_song_started_at_ms: room.current_song_started_at_ms,
            revealed: room.revealed,
            settings: room.settings.into(),
            players: players.into_iter().map(Into::into).collect(),
            buzzes: buzzes.into_iter().map(Into::into).collect(),
            online,
            playback,
        }
    }
}

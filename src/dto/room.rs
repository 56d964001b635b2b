use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{GuessMode, RoomSettingsEntity, StartPosition},
    dto::{
        common::RoomSnapshot,
        validation::{validate_join_code, validate_nickname},
    },
};

/// Room settings supplied at creation or later adjusted by the host.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct SettingsInput {
    /// Answer adjudication mode.
    pub guess_mode: GuessMode,
    /// Clip length, milliseconds.
    #[validate(range(min = 5_000, max = 120_000))]
    pub clip_duration_ms: u64,
    /// Optional answer countdown, milliseconds; omit for no timer.
    #[validate(range(min = 3_000, max = 60_000))]
    pub timer_duration_ms: Option<u64>,
    /// Clip start policy.
    pub start_position: StartPosition,
}

impl From<SettingsInput> for RoomSettingsEntity {
    fn from(value: SettingsInput) -> Self {
        Self {
            guess_mode: value.guess_mode,
            clip_duration_ms: value.clip_duration_ms,
            timer_duration_ms: value.timer_duration_ms,
            start_position: value.start_position,
        }
    }
}

/// Request body for creating a room.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRoomRequest {
    /// Nickname of the creating player, who becomes the host.
    #[validate(custom(function = "validate_nickname"))]
    pub nickname: String,
    /// Optional initial settings; defaults apply when omitted.
    #[validate(nested)]
    pub settings: Option<SettingsInput>,
}

/// Request body for joining an existing room by code.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct JoinRoomRequest {
    /// Nickname of the joining player.
    #[validate(custom(function = "validate_nickname"))]
    pub nickname: String,
}

/// Request body for resuming a previously stored session.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ResumeRequest {
    /// Player identity stored client-side alongside the room code.
    pub player_id: Uuid,
}

/// Request body for host answer validation.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ValidateRequest {
    /// Whether the winning buzz's answer was correct.
    pub correct: bool,
}

/// Response returned on create/join/resume: the snapshot plus the caller's identity.
#[derive(Debug, serde::Serialize, ToSchema)]
pub struct MembershipResponse {
    /// Identity to persist client-side for reconnection.
    pub player_id: Uuid,
    /// Current room snapshot.
    pub room: RoomSnapshot,
}

/// Path-level join code wrapper so the format is validated before any lookup.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct JoinCode {
    /// Human-entered room code, case-insensitive.
    #[validate(custom(function = "validate_join_code"))]
    pub code: String,
}

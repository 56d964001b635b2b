use thiserror::Error;

use crate::dao::models::{BuzzEntity, RoomEntity, RoomStatus};

/// Host-driven events that move a room through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomCommand {
    /// Host starts the game from the lobby (requires enough players).
    StartGame,
    /// Host loads the next song, opening a fresh round.
    LoadSong,
    /// Host validates the winning buzz (correct or incorrect).
    ValidateAnswer,
    /// Host reveals the answer with nobody having buzzed in time.
    RevealWithoutAnswer,
    /// Host ends the game.
    EndGame,
    /// Host spins up a fresh lobby after the game ended.
    RestartGame,
}

/// Error returned when a command cannot be applied to the room's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {command:?} cannot be applied while {status:?}")]
pub struct InvalidTransition {
    /// Status the room was in when the command arrived.
    pub status: RoomStatus,
    /// The rejected command.
    pub command: RoomCommand,
}

/// Compute the status a command transitions to, or reject it.
///
/// Only lifecycle gating lives here; finer preconditions (player counts, a
/// winning buzz existing) are checked by the services before they mutate.
pub fn next_status(
    status: RoomStatus,
    command: RoomCommand,
) -> Result<RoomStatus, InvalidTransition> {
    let next = match (status, command) {
        (RoomStatus::Waiting, RoomCommand::StartGame) => RoomStatus::Playing,
        (RoomStatus::Playing, RoomCommand::LoadSong) => RoomStatus::Playing,
        (RoomStatus::Playing, RoomCommand::ValidateAnswer) => RoomStatus::Playing,
        (RoomStatus::Playing, RoomCommand::RevealWithoutAnswer) => RoomStatus::Playing,
        (RoomStatus::Playing, RoomCommand::EndGame) => RoomStatus::Ended,
        (RoomStatus::Ended, RoomCommand::RestartGame) => RoomStatus::Waiting,
        (status, command) => return Err(InvalidTransition { status, command }),
    };

    Ok(next)
}

/// Client-derived sub-phase of a round while the room is `Playing`.
///
/// Never persisted: every client recomputes it from the room snapshot plus the
/// round's buzz rows, so feed ordering cannot desynchronize the views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// No song loaded yet (between rounds).
    Loading,
    /// Clip is playing, buzzers open.
    Playing,
    /// A buzz holds the round; playback pauses everywhere.
    Buzzed,
    /// Answer revealed; playback pauses everywhere.
    Reveal,
}

impl RoundPhase {
    /// Derive the sub-phase from a room snapshot and the round's buzzes.
    pub fn derive(room: &RoomEntity, buzzes: &[BuzzEntity]) -> Self {
        if room.current_song_id.is_none() {
            return RoundPhase::Loading;
        }
        if room.revealed {
            return RoundPhase::Reveal;
        }
        if buzzes.iter().any(BuzzEntity::is_active_winner) {
            return RoundPhase::Buzzed;
        }
        RoundPhase::Playing
    }

    /// Whether this phase implies paused playback, with no extra network
    /// round trip to coordinate it.
    pub fn should_pause(self) -> bool {
        matches!(self, RoundPhase::Buzzed | RoundPhase::Reveal)
    }
}

/// Find the buzz currently holding a round, if any.
pub fn active_winner(buzzes: &[BuzzEntity]) -> Option<&BuzzEntity> {
    buzzes.iter().find(|b| b.is_active_winner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::RoomSettingsEntity;
    use uuid::Uuid;

    fn room(status: RoomStatus) -> RoomEntity {
        RoomEntity {
            id: Uuid::new_v4(),
            code: "QWERTY".into(),
            host_id: Uuid::new_v4(),
            status,
            settings: RoomSettingsEntity::default(),
            round: 1,
            current_song_id: Some("s1".into()),
            current_song_offset_ms: 0,
            current_song_started_at_ms: Some(0),
            revealed: false,
            played_song_ids: vec!["s1".into()],
            created_at_ms: 0,
            ended_at_ms: None,
        }
    }

    fn buzz(winner: bool, was_incorrect: bool) -> BuzzEntity {
        BuzzEntity {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            round: 1,
            player_id: Uuid::new_v4(),
            created_at_ms: 0,
            winner,
            was_incorrect,
        }
    }

    #[test]
    fn full_happy_path_through_lifecycle() {
        let mut status = RoomStatus::Waiting;
        for command in [
            RoomCommand::StartGame,
            RoomCommand::LoadSong,
            RoomCommand::ValidateAnswer,
            RoomCommand::LoadSong,
            RoomCommand::RevealWithoutAnswer,
            RoomCommand::EndGame,
        ] {
            status = next_status(status, command).unwrap();
        }
        assert_eq!(status, RoomStatus::Ended);
        assert_eq!(
            next_status(status, RoomCommand::RestartGame).unwrap(),
            RoomStatus::Waiting
        );
    }

    #[test]
    fn lifecycle_rejects_out_of_phase_commands() {
        let err = next_status(RoomStatus::Waiting, RoomCommand::LoadSong).unwrap_err();
        assert_eq!(err.status, RoomStatus::Waiting);
        assert_eq!(err.command, RoomCommand::LoadSong);

        assert!(next_status(RoomStatus::Ended, RoomCommand::StartGame).is_err());
        assert!(next_status(RoomStatus::Waiting, RoomCommand::EndGame).is_err());
        assert!(next_status(RoomStatus::Playing, RoomCommand::RestartGame).is_err());
    }

    #[test]
    fn round_phase_derivation_matches_snapshot() {
        let mut snapshot = room(RoomStatus::Playing);
        snapshot.current_song_id = None;
        snapshot.current_song_started_at_ms = None;
        assert_eq!(RoundPhase::derive(&snapshot, &[]), RoundPhase::Loading);

        let snapshot = room(RoomStatus::Playing);
        assert_eq!(RoundPhase::derive(&snapshot, &[]), RoundPhase::Playing);

        let buzzes = vec![buzz(true, false), buzz(false, false)];
        assert_eq!(RoundPhase::derive(&snapshot, &buzzes), RoundPhase::Buzzed);

        // A refuted winner reopens play.
        let buzzes = vec![buzz(true, true)];
        assert_eq!(RoundPhase::derive(&snapshot, &buzzes), RoundPhase::Playing);

        let mut revealed = room(RoomStatus::Playing);
        revealed.revealed = true;
        assert_eq!(RoundPhase::derive(&revealed, &buzzes), RoundPhase::Reveal);
    }

    #[test]
    fn pause_is_derived_from_phase_alone() {
        assert!(!RoundPhase::Loading.should_pause());
        assert!(!RoundPhase::Playing.should_pause());
        assert!(RoundPhase::Buzzed.should_pause());
        assert!(RoundPhase::Reveal.should_pause());
    }
}

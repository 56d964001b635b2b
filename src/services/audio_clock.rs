//! Shared audio clock arithmetic.
//!
//! The server never streams audio; it publishes one anchor per round (song id,
//! start offset, wall-clock start instant) and every client derives its local
//! playback position from it. Pausing is not a stored flag either: it falls
//! out of the derived round phase, so a host validation pauses every client
//! without an extra message.

use crate::{
    dao::models::{BuzzEntity, RoomEntity},
    state::state_machine::RoundPhase,
};

/// Derived playback instruction for one client at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackPlan {
    /// Song to have loaded.
    pub song_id: String,
    /// Position inside the track, milliseconds.
    pub position_ms: i64,
    /// Whether playback should currently be paused.
    pub paused: bool,
    /// Whether the clip window has fully elapsed.
    pub clip_ended: bool,
}

/// Milliseconds elapsed since the anchor, clamped at zero for clients whose
/// clock sits slightly behind the server's.
pub fn elapsed_ms(started_at_ms: i64, now_ms: i64) -> i64 {
    (now_ms - started_at_ms).max(0)
}

/// Compute the playback plan for a room at `now_ms`.
///
/// Returns `None` when no song is loaded. The position is capped at the end
/// of the clip window so late joiners land on the final frame instead of
/// running past it. A client in "listen to the rest of the song" mode passes
/// `full_track = true`, which lifts the clip cap for that client alone.
pub fn playback_plan(
    room: &RoomEntity,
    buzzes: &[BuzzEntity],
    now_ms: i64,
    full_track: bool,
) -> Option<PlaybackPlan> {
    let song_id = room.current_song_id.clone()?;
    let started_at_ms = room.current_song_started_at_ms?;

    let clip_ms = room.settings.clip_duration_ms as i64;
    let elapsed = elapsed_ms(started_at_ms, now_ms);
    let clip_ended = !full_track && elapsed >= clip_ms;

    let position_ms = if full_track {
        room.current_song_offset_ms + elapsed
    } else {
        room.current_song_offset_ms + elapsed.min(clip_ms)
    };

    let phase = RoundPhase::derive(room, buzzes);
    Some(PlaybackPlan {
        song_id,
        position_ms,
        paused: phase.should_pause() || clip_ended,
        clip_ended,
    })
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::dao::models::{RoomSettingsEntity, RoomStatus, now_ms};

    fn playing_room(offset_ms: i64, started_at_ms: i64) -> RoomEntity {
        RoomEntity {
            id: Uuid::new_v4(),
            code: "AB12CD".into(),
            host_id: Uuid::new_v4(),
            status: RoomStatus::Playing,
            settings: RoomSettingsEntity::default(),
            round: 1,
            current_song_id: Some("song-1".into()),
            current_song_offset_ms: offset_ms,
            current_song_started_at_ms: Some(started_at_ms),
            revealed: false,
            played_song_ids: vec!["song-1".into()],
            created_at_ms: now_ms(),
            ended_at_ms: None,
        }
    }

    fn winning_buzz(room: &RoomEntity) -> BuzzEntity {
        BuzzEntity {
            id: Uuid::new_v4(),
            room_id: room.id,
            round: room.round,
            player_id: Uuid::new_v4(),
            created_at_ms: now_ms(),
            winner: true,
            was_incorrect: false,
        }
    }

    #[test]
    fn clients_with_skewed_clocks_stay_within_their_skew() {
        let anchor = 1_000_000;
        let room = playing_room(12_000, anchor);

        // Two clients evaluating the same anchor 500ms apart diverge by
        // exactly that much and no more.
        let early = playback_plan(&room, &[], anchor + 4_000, false).unwrap();
        let late = playback_plan(&room, &[], anchor + 4_500, false).unwrap();
        assert_eq!(late.position_ms - early.position_ms, 500);
        assert!(!early.paused);
    }

    #[test]
    fn position_is_offset_plus_elapsed() {
        let anchor = 1_000_000;
        let room = playing_room(12_000, anchor);

        let plan = playback_plan(&room, &[], anchor + 3_000, false).unwrap();
        assert_eq!(plan.song_id, "song-1");
        assert_eq!(plan.position_ms, 15_000);
        assert!(!plan.clip_ended);
    }

    #[test]
    fn position_caps_at_the_clip_window() {
        let anchor = 1_000_000;
        let room = playing_room(0, anchor);

        let plan = playback_plan(&room, &[], anchor + 90_000, false).unwrap();
        assert_eq!(plan.position_ms, 30_000);
        assert!(plan.clip_ended);
        assert!(plan.paused);
    }

    #[test]
    fn full_track_mode_lifts_the_clip_cap() {
        let anchor = 1_000_000;
        let room = playing_room(0, anchor);

        let plan = playback_plan(&room, &[], anchor + 90_000, true).unwrap();
        assert_eq!(plan.position_ms, 90_000);
        assert!(!plan.clip_ended);
        assert!(!plan.paused);
    }

    #[test]
    fn active_winner_pauses_playback() {
        let anchor = 1_000_000;
        let room = playing_room(0, anchor);
        let buzz = winning_buzz(&room);

        let plan = playback_plan(&room, &[buzz], anchor + 3_000, false).unwrap();
        assert!(plan.paused);
        assert!(!plan.clip_ended);
    }

    #[test]
    fn behind_clock_clamps_to_the_anchor() {
        let anchor = 1_000_000;
        let room = playing_room(5_000, anchor);

        let plan = playback_plan(&room, &[], anchor - 200, false).unwrap();
        assert_eq!(plan.position_ms, 5_000);
    }

    #[test]
    fn no_song_means_no_plan() {
        let mut room = playing_room(0, 1_000_000);
        room.current_song_id = None;
        room.current_song_started_at_ms = None;
        assert!(playback_plan(&room, &[], 2_000_000, false).is_none());
    }
}

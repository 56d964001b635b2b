//! Round control: song loading, buzz arbitration, answer validation, reveal.

use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{BuzzEntity, RoomEntity, RoomStatus, StartPosition, now_ms},
        room_store::{BeginRound, BuzzOutcome},
    },
    dto::{
        common::{RevealedSong, RoomSnapshot},
        events::RoomEvent,
    },
    error::ServiceError,
    services::{events, room_service},
    state::{
        SharedState,
        state_machine::{RoomCommand, active_winner, next_status},
    },
};

/// How many catalog picks to try before giving up on missing audio.
const SONG_PICK_ATTEMPTS: usize = 5;

/// Load the next song, opening a fresh round (host-only).
///
/// Picks a random unplayed song, verifies its audio resolves, computes the
/// shared start offset, and commits the new anchor in one store write. Songs
/// with missing audio are skipped and excluded from the retry.
pub async fn load_next_song(
    state: &SharedState,
    code: &str,
    actor: Uuid,
) -> Result<RoomSnapshot, ServiceError> {
    let store = state.require_room_store().await?;
    let room = room_service::find_room(state, code).await?;
    room_service::require_host(&room, actor)?;
    next_status(room.status, RoomCommand::LoadSong)?;

    let catalog = state.catalog();
    let mut exclude = room.played_song_ids.clone();

    for _ in 0..SONG_PICK_ATTEMPTS {
        let Some(song) = catalog.pick_song(exclude.clone()).await? else {
            // Running out of songs is the user-visible end state, not an
            // outage of the catalog.
            return Err(ServiceError::MediaUnavailable("no more songs".into()));
        };

        if !catalog.audio_available(song.clone()).await? {
            warn!(song_id = %song.id, "audio file missing; skipping song");
            exclude.push(song.id);
            continue;
        }

        let offset_ms = start_offset_ms(&room, song.duration_ms);
        let round = store
            .begin_round(
                room.id,
                BeginRound {
                    song_id: song.id.clone(),
                    song_offset_ms: offset_ms,
                    started_at_ms: now_ms(),
                },
            )
            .await?;
        info!(room_id = %room.id, song_id = %song.id, round, "round opened");

        events::broadcast_room_updated(state, room.id).await?;
        return room_service::get_room(state, code).await;
    }

    Err(ServiceError::MediaUnavailable(
        "gave up picking a playable song".into(),
    ))
}

/// Where inside the track the shared clip starts.
fn start_offset_ms(room: &RoomEntity, duration_ms: u64) -> i64 {
    match room.settings.start_position {
        StartPosition::Beginning => 0,
        StartPosition::Random => {
            let clip = room.settings.clip_duration_ms;
            let latest_start = duration_ms.saturating_sub(clip);
            if latest_start == 0 {
                0
            } else {
                rand::rng().random_range(0..latest_start) as i64
            }
        }
    }
}

/// Commit a buzz attempt for the current round, returning the winning buzz.
///
/// The store is the arbiter: whatever this function observed beforehand, the
/// conditional insert decides who won. Losing the race surfaces as
/// [`ServiceError::AlreadyWon`] to the buzzer alone; the late attempt is still
/// recorded and broadcast for the "who also buzzed" view.
pub async fn buzz(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
) -> Result<BuzzEntity, ServiceError> {
    let store = state.require_room_store().await?;
    let Some(room) = store.find_room(room_id).await? else {
        return Err(ServiceError::NotAMember);
    };
    if store.find_player(room_id, player_id).await?.is_none() {
        return Err(ServiceError::NotAMember);
    }

    if room.status != RoomStatus::Playing || room.current_song_id.is_none() {
        return Err(ServiceError::InvalidPhase("no round is open".into()));
    }
    if room.revealed {
        return Err(ServiceError::InvalidPhase(
            "the answer is already revealed".into(),
        ));
    }

    let attempt = BuzzEntity {
        id: Uuid::new_v4(),
        room_id,
        round: room.round,
        player_id,
        created_at_ms: now_ms(),
        winner: false,
        was_incorrect: false,
    };
    match store.insert_buzz(attempt).await? {
        BuzzOutcome::Won(buzz) => {
            info!(%room_id, %player_id, round = room.round, "buzz won the round");
            events::broadcast_buzz_recorded(state, room_id, buzz.clone());
            events::broadcast_room_updated(state, room_id).await?;
            Ok(buzz)
        }
        BuzzOutcome::Lost { winner_player_id } => {
            info!(%room_id, %player_id, winner = %winner_player_id, "late buzz recorded");
            events::broadcast_room_updated(state, room_id).await?;
            Err(ServiceError::AlreadyWon { winner_player_id })
        }
        BuzzOutcome::Closed => Err(ServiceError::RoundClosedForPlayer),
    }
}

/// Validate the winning buzz (host-only).
///
/// Correct: the winner scores one point and the round reveals. Incorrect: the
/// buzz is refuted, the round returns to playing, and that player stays locked
/// out for the rest of the round.
pub async fn validate_answer(
    state: &SharedState,
    code: &str,
    actor: Uuid,
    correct: bool,
) -> Result<RoomSnapshot, ServiceError> {
    let store = state.require_room_store().await?;
    let room = room_service::find_room(state, code).await?;
    room_service::require_host(&room, actor)?;
    next_status(room.status, RoomCommand::ValidateAnswer)?;

    let buzzes = store.list_buzzes(room.id, room.round).await?;
    let Some(winner) = active_winner(&buzzes) else {
        return Err(ServiceError::InvalidPhase(
            "no winning buzz to validate".into(),
        ));
    };

    if correct {
        if let Some(player) = store.add_score(room.id, winner.player_id, 1).await? {
            events::broadcast_player_updated(state, room.id, player);
        }
        store.set_revealed(room.id, true).await?;
        broadcast_revealed_song(state, &room).await;
        info!(room_id = %room.id, player_id = %winner.player_id, "answer validated");
    } else {
        store.mark_buzz_incorrect(winner.id).await?;
        info!(room_id = %room.id, player_id = %winner.player_id, "answer refuted; round reopens");
    }

    events::broadcast_room_updated(state, room.id).await?;
    room_service::get_room(state, code).await
}

/// Reveal the answer with nobody having buzzed in time (host-only).
pub async fn reveal_without_answer(
    state: &SharedState,
    code: &str,
    actor: Uuid,
) -> Result<RoomSnapshot, ServiceError> {
    let store = state.require_room_store().await?;
    let room = room_service::find_room(state, code).await?;
    room_service::require_host(&room, actor)?;
    next_status(room.status, RoomCommand::RevealWithoutAnswer)?;

    if room.current_song_id.is_none() {
        return Err(ServiceError::InvalidPhase("no round is open".into()));
    }
    let buzzes = store.list_buzzes(room.id, room.round).await?;
    if active_winner(&buzzes).is_some() {
        return Err(ServiceError::InvalidPhase(
            "a winning buzz is pending validation".into(),
        ));
    }

    store.set_revealed(room.id, true).await?;
    broadcast_revealed_song(state, &room).await;
    events::broadcast_room_updated(state, room.id).await?;
    room_service::get_room(state, code).await
}

/// Resolve the revealed song's metadata and fan it out.
///
/// A catalog outage never blocks the reveal itself; the event just carries no
/// metadata and clients fall back to the song id.
async fn broadcast_revealed_song(state: &SharedState, room: &RoomEntity) {
    let Some(song_id) = room.current_song_id.clone() else {
        return;
    };
    let song = match state.catalog().song(song_id.clone()).await {
        Ok(song) => song,
        Err(err) => {
            warn!(%song_id, error = %err, "failed to resolve revealed song metadata");
            None
        }
    };
    let song = song.map(|song| RevealedSong {
        id: song.id,
        title: song.title,
        artist: song.artist,
    });
    state
        .broadcaster()
        .broadcast(room.id, RoomEvent::RoundRevealed { song });
}

/// Record a durable heartbeat for a connected player.
pub async fn heartbeat(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
) -> Result<(), ServiceError> {
    let store = state.require_room_store().await?;
    store.touch_player(room_id, player_id, now_ms()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::SyncConfig,
        dao::room_store::memory::MemoryRoomStore,
        dto::room::{CreateRoomRequest, JoinRoomRequest},
        services::catalog::stub::StubCatalog,
        state::{AppState, state_machine::RoundPhase},
    };

    struct Scenario {
        state: SharedState,
        code: String,
        room_id: Uuid,
        host: Uuid,
        bob: Uuid,
        carol: Uuid,
    }

    /// Alice hosts, Bob and Carol join, the game starts.
    async fn playing_scenario(catalog: StubCatalog) -> Scenario {
        let (state, _presence_rx) =
            AppState::new(Arc::new(SyncConfig::default()), Arc::new(catalog));
        state
            .install_room_store(Arc::new(MemoryRoomStore::default()))
            .await;

        let created = room_service::create_room(
            &state,
            CreateRoomRequest {
                nickname: "Alice".into(),
                settings: None,
            },
        )
        .await
        .unwrap();
        let code = created.room.code.clone();
        let room_id = created.room.id;

        let bob = room_service::join_room(
            &state,
            &code,
            JoinRoomRequest {
                nickname: "Bob".into(),
            },
        )
        .await
        .unwrap()
        .player_id;
        let carol = room_service::join_room(
            &state,
            &code,
            JoinRoomRequest {
                nickname: "Carol".into(),
            },
        )
        .await
        .unwrap()
        .player_id;

        room_service::start_game(&state, &code, created.player_id)
            .await
            .unwrap();

        Scenario {
            state,
            code,
            room_id,
            host: created.player_id,
            bob,
            carol,
        }
    }

    #[tokio::test]
    async fn full_round_happy_path() {
        let s = playing_scenario(StubCatalog::new(&["s1", "s2"])).await;

        let snapshot = load_next_song(&s.state, &s.code, s.host).await.unwrap();
        assert_eq!(snapshot.current_song_id.as_deref(), Some("s1"));
        assert!(snapshot.current_song_started_at_ms.is_some());
        assert_eq!(snapshot.phase, RoundPhase::Playing);

        let winning = buzz(&s.state, s.room_id, s.bob).await.unwrap();
        assert_eq!(winning.player_id, s.bob);

        let snapshot = room_service::get_room(&s.state, &s.code).await.unwrap();
        assert_eq!(snapshot.phase, RoundPhase::Buzzed);

        let snapshot = validate_answer(&s.state, &s.code, s.host, true)
            .await
            .unwrap();
        assert_eq!(snapshot.phase, RoundPhase::Reveal);
        let bob_row = snapshot.players.iter().find(|p| p.id == s.bob).unwrap();
        assert_eq!(bob_row.score, 1);

        // Next song clears the round's buzzes and re-opens play.
        let snapshot = load_next_song(&s.state, &s.code, s.host).await.unwrap();
        assert_eq!(snapshot.current_song_id.as_deref(), Some("s2"));
        assert_eq!(snapshot.phase, RoundPhase::Playing);
        assert!(snapshot.buzzes.is_empty());
    }

    #[tokio::test]
    async fn second_buzz_loses_to_the_committed_winner() {
        let s = playing_scenario(StubCatalog::new(&["s1"])).await;
        load_next_song(&s.state, &s.code, s.host).await.unwrap();

        buzz(&s.state, s.room_id, s.bob).await.unwrap();
        match buzz(&s.state, s.room_id, s.carol).await.unwrap_err() {
            ServiceError::AlreadyWon { winner_player_id } => {
                assert_eq!(winner_player_id, s.bob);
            }
            other => panic!("expected a lost race, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refuted_player_is_locked_out_but_others_may_buzz() {
        let s = playing_scenario(StubCatalog::new(&["s1"])).await;
        load_next_song(&s.state, &s.code, s.host).await.unwrap();

        buzz(&s.state, s.room_id, s.bob).await.unwrap();
        let snapshot = validate_answer(&s.state, &s.code, s.host, false)
            .await
            .unwrap();
        // Refutation reopens the round.
        assert_eq!(snapshot.phase, RoundPhase::Playing);

        assert!(matches!(
            buzz(&s.state, s.room_id, s.bob).await.unwrap_err(),
            ServiceError::RoundClosedForPlayer
        ));
        let reopened = buzz(&s.state, s.room_id, s.carol).await.unwrap();
        assert_eq!(reopened.player_id, s.carol);
    }

    #[tokio::test]
    async fn validation_requires_host_and_a_winning_buzz() {
        let s = playing_scenario(StubCatalog::new(&["s1"])).await;
        load_next_song(&s.state, &s.code, s.host).await.unwrap();

        let err = validate_answer(&s.state, &s.code, s.bob, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let err = validate_answer(&s.state, &s.code, s.host, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidPhase(_)));
    }

    #[tokio::test]
    async fn reveal_without_answer_conflicts_with_a_pending_winner() {
        let s = playing_scenario(StubCatalog::new(&["s1"])).await;
        load_next_song(&s.state, &s.code, s.host).await.unwrap();

        buzz(&s.state, s.room_id, s.bob).await.unwrap();
        let err = reveal_without_answer(&s.state, &s.code, s.host)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidPhase(_)));

        validate_answer(&s.state, &s.code, s.host, false)
            .await
            .unwrap();
        let snapshot = reveal_without_answer(&s.state, &s.code, s.host)
            .await
            .unwrap();
        assert_eq!(snapshot.phase, RoundPhase::Reveal);
    }

    #[tokio::test]
    async fn reveal_discloses_the_song_metadata() {
        let s = playing_scenario(StubCatalog::new(&["s1"])).await;
        load_next_song(&s.state, &s.code, s.host).await.unwrap();
        let mut events = s.state.broadcaster().subscribe(s.room_id);

        reveal_without_answer(&s.state, &s.code, s.host)
            .await
            .unwrap();

        loop {
            match events.recv().await.unwrap() {
                RoomEvent::RoundRevealed { song } => {
                    let song = song.unwrap();
                    assert_eq!(song.id, "s1");
                    assert_eq!(song.title, "title s1");
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn buzzing_outside_an_open_round_is_rejected() {
        let s = playing_scenario(StubCatalog::new(&["s1"])).await;

        // Game started but no song loaded yet.
        let err = buzz(&s.state, s.room_id, s.bob).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidPhase(_)));

        let err = buzz(&s.state, s.room_id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotAMember));
    }

    #[tokio::test]
    async fn missing_audio_skips_to_the_next_song() {
        let catalog = StubCatalog::new(&["s1", "s2"]);
        catalog.break_audio("s1");
        let s = playing_scenario(catalog).await;

        let snapshot = load_next_song(&s.state, &s.code, s.host).await.unwrap();
        assert_eq!(snapshot.current_song_id.as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn exhausted_catalog_surfaces_the_end_state() {
        let s = playing_scenario(StubCatalog::new(&["s1"])).await;
        load_next_song(&s.state, &s.code, s.host).await.unwrap();

        let err = load_next_song(&s.state, &s.code, s.host).await.unwrap_err();
        assert!(matches!(err, ServiceError::MediaUnavailable(_)));
    }

    #[tokio::test]
    async fn broken_audio_everywhere_is_media_unavailable() {
        let catalog = StubCatalog::new(&["s1"]);
        catalog.break_audio("s1");
        let s = playing_scenario(catalog).await;

        let err = load_next_song(&s.state, &s.code, s.host).await.unwrap_err();
        assert!(matches!(err, ServiceError::MediaUnavailable(_)));
    }
}

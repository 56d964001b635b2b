//! Room lifecycle: create, join, resume, leave, lifecycle transitions, sweep.

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{PlayerEntity, RoomEntity, RoomSettingsEntity, RoomStatus, now_ms},
    dto::{
        common::RoomSnapshot,
        room::{CreateRoomRequest, JoinRoomRequest, MembershipResponse, SettingsInput},
        validation::JOIN_CODE_LENGTH,
    },
    error::ServiceError,
    services::{events, host_migration},
    state::{SharedState, state_machine::{RoomCommand, next_status}},
};

/// Join codes avoid glyphs that read ambiguously on a projected screen.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_GENERATION_ATTEMPTS: u32 = 16;

/// Normalize a human-entered join code for lookup.
pub fn normalize_code(code: &str) -> String {
    code.to_ascii_uppercase()
}

/// Resolve a room by join code, case-insensitively.
pub async fn find_room(state: &SharedState, code: &str) -> Result<RoomEntity, ServiceError> {
    let store = state.require_room_store().await?;
    store
        .find_room_by_code(normalize_code(code))
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("no room with code `{}`", normalize_code(code))))
}

/// Ensure `actor` holds host authority in `room`.
pub fn require_host(room: &RoomEntity, actor: Uuid) -> Result<(), ServiceError> {
    if room.host_id == actor {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized(
            "only the host may perform this action".into(),
        ))
    }
}

/// Create a room with the caller as host.
pub async fn create_room(
    state: &SharedState,
    request: CreateRoomRequest,
) -> Result<MembershipResponse, ServiceError> {
    let store = state.require_room_store().await?;

    let mut code = generate_code();
    let mut attempts = 1;
    while store.find_room_by_code(code.clone()).await?.is_some() {
        if attempts >= CODE_GENERATION_ATTEMPTS {
            return Err(ServiceError::ResourceUnavailable(
                "could not allocate a free join code".into(),
            ));
        }
        code = generate_code();
        attempts += 1;
    }

    let now = now_ms();
    let host_id = Uuid::new_v4();
    let settings = request
        .settings
        .map(RoomSettingsEntity::from)
        .unwrap_or_else(|| RoomSettingsEntity {
            clip_duration_ms: state.config().default_clip_duration_ms(),
            ..RoomSettingsEntity::default()
        });

    let room = RoomEntity {
        id: Uuid::new_v4(),
        code: code.clone(),
        host_id,
        status: RoomStatus::Waiting,
        settings,
        round: 0,
        current_song_id: None,
        current_song_offset_ms: 0,
        current_song_started_at_ms: None,
        revealed: false,
        played_song_ids: Vec::new(),
        created_at_ms: now,
        ended_at_ms: None,
    };
    let host = PlayerEntity {
        id: host_id,
        room_id: room.id,
        nickname: request.nickname,
        score: 0,
        is_host: true,
        joined_at_ms: now,
        last_seen_ms: now,
    };

    store.create_room(room.clone(), host).await?;
    info!(room_id = %room.id, %code, "room created");

    let snapshot = events::load_snapshot(state, room).await?;
    Ok(MembershipResponse {
        player_id: host_id,
        room: snapshot,
    })
}

/// Join an existing room by code.
pub async fn join_room(
    state: &SharedState,
    code: &str,
    request: JoinRoomRequest,
) -> Result<MembershipResponse, ServiceError> {
    let store = state.require_room_store().await?;
    let room = find_room(state, code).await?;

    if room.status == RoomStatus::Ended {
        return Err(ServiceError::InvalidPhase("this game is over".into()));
    }

    let players = store.list_players(room.id).await?;
    let max = state.config().max_players();
    if players.len() >= max {
        return Err(ServiceError::InvalidPhase(format!(
            "room is full ({max} players max)"
        )));
    }

    let now = now_ms();
    let player = PlayerEntity {
        id: Uuid::new_v4(),
        room_id: room.id,
        nickname: request.nickname,
        score: 0,
        is_host: false,
        joined_at_ms: now,
        last_seen_ms: now,
    };
    store.insert_player(player.clone()).await?;
    info!(room_id = %room.id, player_id = %player.id, "player joined");

    events::broadcast_player_joined(state, room.id, player.clone());

    let snapshot = events::load_snapshot(state, room).await?;
    Ok(MembershipResponse {
        player_id: player.id,
        room: snapshot,
    })
}

/// Validate a stored (code, player id) pair and return a fresh snapshot.
///
/// The player row is the membership proof: when it is gone (kicked, or the
/// room was swept away), the session is dead and the client re-enters the
/// join flow.
pub async fn resume_session(
    state: &SharedState,
    code: &str,
    player_id: Uuid,
) -> Result<MembershipResponse, ServiceError> {
    let store = state.require_room_store().await?;
    let room = match find_room(state, code).await {
        Ok(room) => room,
        Err(ServiceError::NotFound(_)) => return Err(ServiceError::NotAMember),
        Err(err) => return Err(err),
    };

    if store.find_player(room.id, player_id).await?.is_none() {
        return Err(ServiceError::NotAMember);
    }

    let snapshot = events::load_snapshot(state, room).await?;
    Ok(MembershipResponse {
        player_id,
        room: snapshot,
    })
}

/// Current snapshot of a room.
pub async fn get_room(state: &SharedState, code: &str) -> Result<RoomSnapshot, ServiceError> {
    let room = find_room(state, code).await?;
    events::load_snapshot(state, room).await
}

/// Explicitly leave a room, migrating host authority or deleting the room as
/// needed.
pub async fn leave_room(
    state: &SharedState,
    code: &str,
    player_id: Uuid,
) -> Result<(), ServiceError> {
    let store = state.require_room_store().await?;
    let room = find_room(state, code).await?;

    if !store.delete_player(room.id, player_id).await? {
        return Err(ServiceError::NotAMember);
    }
    state.presence().remove(room.id, player_id).await;
    events::broadcast_player_left(state, room.id, player_id);
    info!(room_id = %room.id, %player_id, "player left");

    let remaining = store.list_players(room.id).await?;
    if remaining.is_empty() {
        drop_room(state, room.id).await?;
        return Ok(());
    }

    if room.host_id == player_id {
        let online = state.presence().online_players(room.id).await;
        if let Some(successor) =
            host_migration::pick_successor(&remaining, &online, player_id, false)
        {
            host_migration::migrate(state, room.id, player_id, successor).await?;
        }
    }

    events::broadcast_room_updated(state, room.id).await
}

/// Replace the room settings (host-only, lobby-only).
pub async fn update_settings(
    state: &SharedState,
    code: &str,
    actor: Uuid,
    input: SettingsInput,
) -> Result<RoomSnapshot, ServiceError> {
    let store = state.require_room_store().await?;
    let room = find_room(state, code).await?;
    require_host(&room, actor)?;
    if room.status != RoomStatus::Waiting {
        return Err(ServiceError::InvalidPhase(
            "settings can only change in the lobby".into(),
        ));
    }

    store.update_settings(room.id, input.into()).await?;
    events::broadcast_room_updated(state, room.id).await?;
    get_room(state, code).await
}

/// Start the game (host-only, needs at least two players).
pub async fn start_game(
    state: &SharedState,
    code: &str,
    actor: Uuid,
) -> Result<RoomSnapshot, ServiceError> {
    let store = state.require_room_store().await?;
    let room = find_room(state, code).await?;
    require_host(&room, actor)?;

    let players = store.list_players(room.id).await?;
    if players.len() < 2 {
        return Err(ServiceError::InvalidPhase(
            "need at least 2 players to start".into(),
        ));
    }

    transition(state, &room, RoomCommand::StartGame).await?;
    get_room(state, code).await
}

/// End the game (host-only).
pub async fn end_game(
    state: &SharedState,
    code: &str,
    actor: Uuid,
) -> Result<RoomSnapshot, ServiceError> {
    let store = state.require_room_store().await?;
    let room = find_room(state, code).await?;
    require_host(&room, actor)?;
    transition(state, &room, RoomCommand::EndGame).await?;
    // An ended room keeps its scores but not a dangling audio anchor.
    store.clear_round(room.id).await?;
    events::broadcast_room_updated(state, room.id).await?;
    get_room(state, code).await
}

/// Spin up a fresh lobby after the game ended (host-only).
pub async fn restart_game(
    state: &SharedState,
    code: &str,
    actor: Uuid,
) -> Result<RoomSnapshot, ServiceError> {
    let store = state.require_room_store().await?;
    let room = find_room(state, code).await?;
    require_host(&room, actor)?;

    transition(state, &room, RoomCommand::RestartGame).await?;
    store.reset_game(room.id).await?;
    events::broadcast_room_updated(state, room.id).await?;
    get_room(state, code).await
}

/// Apply a lifecycle command through the state machine and the store CAS.
async fn transition(
    state: &SharedState,
    room: &RoomEntity,
    command: RoomCommand,
) -> Result<(), ServiceError> {
    let store = state.require_room_store().await?;
    let to = next_status(room.status, command)?;

    // The CAS makes concurrent transitions race safely: the loser observes a
    // stale `from` status and fails without mutating.
    if !store.update_status(room.id, room.status, to).await? {
        return Err(ServiceError::InvalidPhase(format!(
            "room is no longer {:?}",
            room.status
        )));
    }
    events::broadcast_room_updated(state, room.id).await
}

/// Delete a room and tear down its in-memory coordination state.
async fn drop_room(state: &SharedState, room_id: Uuid) -> Result<(), ServiceError> {
    let store = state.require_room_store().await?;
    store.delete_room(room_id).await?;
    state.broadcaster().remove(room_id);
    state.presence().forget_room(room_id).await;
    info!(%room_id, "room deleted");
    Ok(())
}

/// Delete rooms whose players have all gone silent.
///
/// The durable heartbeat (`last_seen_ms`) is the staleness signal: it keeps
/// refreshing while anyone is connected, so an active room never trips the
/// idle TTL. Ended rooms additionally expire once the game has been over for
/// the ended TTL, regardless of heartbeats.
pub async fn sweep_stale_rooms(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.require_room_store().await?;
    let idle_ttl = state.config().idle_room_ttl().as_millis() as i64;
    let ended_ttl = state.config().ended_room_ttl().as_millis() as i64;
    let now = now_ms();

    let mut swept = 0;
    for room in store.list_rooms().await? {
        let players = store.list_players(room.id).await?;
        let last_activity = players
            .iter()
            .map(|p| p.last_seen_ms)
            .max()
            .unwrap_or(room.created_at_ms);

        let idle_expired = now - last_activity > idle_ttl;
        let ended_expired = room
            .ended_at_ms
            .is_some_and(|ended_at| now - ended_at > ended_ttl);
        if idle_expired || ended_expired {
            info!(room_id = %room.id, code = %room.code, "sweeping stale room");
            drop_room(state, room.id).await?;
            swept += 1;
        }
    }
    Ok(swept)
}

/// Background task running the sweeper on the configured interval.
pub async fn run_sweeper(state: SharedState) {
    let interval = state.config().sweep_interval();
    loop {
        sleep(interval).await;
        if state.is_degraded() {
            continue;
        }
        match sweep_stale_rooms(&state).await {
            Ok(0) => {}
            Ok(swept) => info!(swept, "stale room sweep finished"),
            Err(err) => warn!(error = %err, "stale room sweep failed"),
        }
    }
}

fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..JOIN_CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::SyncConfig,
        dao::room_store::memory::MemoryRoomStore,
        services::catalog::stub::StubCatalog,
        state::AppState,
    };

    async fn test_state() -> SharedState {
        let (state, _presence_rx) = AppState::new(
            Arc::new(SyncConfig::default()),
            Arc::new(StubCatalog::new(&["s1", "s2"])),
        );
        state
            .install_room_store(Arc::new(MemoryRoomStore::default()))
            .await;
        state
    }

    fn create_request(nickname: &str) -> CreateRoomRequest {
        CreateRoomRequest {
            nickname: nickname.into(),
            settings: None,
        }
    }

    fn join_request(nickname: &str) -> JoinRoomRequest {
        JoinRoomRequest {
            nickname: nickname.into(),
        }
    }

    #[tokio::test]
    async fn create_then_join_by_lowercase_code() {
        let state = test_state().await;
        let created = create_room(&state, create_request("Alice")).await.unwrap();
        assert_eq!(created.room.status, RoomStatus::Waiting);
        assert_eq!(created.room.players.len(), 1);
        assert!(created.room.players[0].is_host);

        let joined = join_room(
            &state,
            &created.room.code.to_ascii_lowercase(),
            join_request("Bob"),
        )
        .await
        .unwrap();
        assert_eq!(joined.room.players.len(), 2);
        assert!(!joined.room.players[1].is_host);
    }

    #[tokio::test]
    async fn join_rejects_a_full_room() {
        let state = test_state().await;
        let created = create_room(&state, create_request("Alice")).await.unwrap();
        for i in 1..state.config().max_players() {
            join_room(&state, &created.room.code, join_request(&format!("p{i}")))
                .await
                .unwrap();
        }

        let err = join_room(&state, &created.room.code, join_request("overflow"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidPhase(_)));
    }

    #[tokio::test]
    async fn start_game_is_host_gated_and_needs_two_players() {
        let state = test_state().await;
        let created = create_room(&state, create_request("Alice")).await.unwrap();
        let code = created.room.code.clone();

        let err = start_game(&state, &code, created.player_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidPhase(_)));

        let bob = join_room(&state, &code, join_request("Bob")).await.unwrap();
        let err = start_game(&state, &code, bob.player_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let snapshot = start_game(&state, &code, created.player_id).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::Playing);
    }

    #[tokio::test]
    async fn host_leaving_hands_the_seat_to_the_next_player() {
        let state = test_state().await;
        let created = create_room(&state, create_request("Alice")).await.unwrap();
        let code = created.room.code.clone();
        let bob = join_room(&state, &code, join_request("Bob")).await.unwrap();
        let carol = join_room(&state, &code, join_request("Carol")).await.unwrap();

        leave_room(&state, &code, created.player_id).await.unwrap();

        let snapshot = get_room(&state, &code).await.unwrap();
        assert_eq!(snapshot.host_id, bob.player_id);
        assert_eq!(snapshot.players.len(), 2);
        assert!(snapshot.players.iter().any(|p| p.id == carol.player_id));
    }

    #[tokio::test]
    async fn last_player_leaving_deletes_the_room() {
        let state = test_state().await;
        let created = create_room(&state, create_request("Alice")).await.unwrap();
        let code = created.room.code.clone();

        leave_room(&state, &code, created.player_id).await.unwrap();
        let err = get_room(&state, &code).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn resume_session_rejects_unknown_members() {
        let state = test_state().await;
        let created = create_room(&state, create_request("Alice")).await.unwrap();

        let resumed = resume_session(&state, &created.room.code, created.player_id)
            .await
            .unwrap();
        assert_eq!(resumed.player_id, created.player_id);

        let err = resume_session(&state, &created.room.code, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotAMember));

        // A swept-away room reads the same as a lost membership.
        let err = resume_session(&state, "ZZZZZZ", created.player_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotAMember));
    }

    #[tokio::test]
    async fn restart_resets_scores_and_round_state() {
        let state = test_state().await;
        let created = create_room(&state, create_request("Alice")).await.unwrap();
        let code = created.room.code.clone();
        let bob = join_room(&state, &code, join_request("Bob")).await.unwrap();
        start_game(&state, &code, created.player_id).await.unwrap();

        let store = state.room_store().await.unwrap();
        store
            .add_score(created.room.id, bob.player_id, 3)
            .await
            .unwrap();
        end_game(&state, &code, created.player_id).await.unwrap();

        let snapshot = restart_game(&state, &code, created.player_id).await.unwrap();
        assert_eq!(snapshot.status, RoomStatus::Waiting);
        assert!(snapshot.players.iter().all(|p| p.score == 0));
        assert!(snapshot.current_song_id.is_none());
    }

    #[tokio::test]
    async fn sweeper_deletes_silent_rooms_only() {
        let state = test_state().await;
        let stale = create_room(&state, create_request("Ghost")).await.unwrap();
        let fresh = create_room(&state, create_request("Alive")).await.unwrap();

        // Backdate the only heartbeat of the stale room past the idle TTL.
        let store = state.room_store().await.unwrap();
        let two_hours_ago = now_ms() - 2 * 3_600 * 1_000;
        store
            .touch_player(stale.room.id, stale.player_id, two_hours_ago)
            .await
            .unwrap();

        let swept = sweep_stale_rooms(&state).await.unwrap();
        assert_eq!(swept, 1);
        assert!(get_room(&state, &stale.room.code).await.is_err());
        assert!(get_room(&state, &fresh.room.code).await.is_ok());
    }

    #[tokio::test]
    async fn ended_rooms_expire_on_time_since_ending_not_room_age() {
        let state = test_state().await;
        let store = state.room_store().await.unwrap();
        let now = now_ms();
        let day_ms = 24 * 3_600 * 1_000;

        let seed_ended = |code: &str, created_at_ms: i64, ended_at_ms: i64| {
            let host_id = Uuid::new_v4();
            let room = RoomEntity {
                id: Uuid::new_v4(),
                code: code.into(),
                host_id,
                status: RoomStatus::Ended,
                settings: RoomSettingsEntity::default(),
                round: 3,
                current_song_id: None,
                current_song_offset_ms: 0,
                current_song_started_at_ms: None,
                revealed: false,
                played_song_ids: Vec::new(),
                created_at_ms,
                ended_at_ms: Some(ended_at_ms),
            };
            let host = PlayerEntity {
                id: host_id,
                room_id: room.id,
                nickname: "host".into(),
                score: 0,
                is_host: true,
                joined_at_ms: created_at_ms,
                last_seen_ms: now,
            };
            (room, host)
        };

        // A two-day-old game that ended a minute ago, host still checking in.
        let (just_ended, host) = seed_ended("OLDNEW", now - 2 * day_ms, now - 60_000);
        store.create_room(just_ended.clone(), host).await.unwrap();
        // A game that has been over for two days.
        let (long_over, host) = seed_ended("OVRDUN", now - 3 * day_ms, now - 2 * day_ms);
        store.create_room(long_over.clone(), host).await.unwrap();

        let swept = sweep_stale_rooms(&state).await.unwrap();
        assert_eq!(swept, 1);
        assert!(get_room(&state, &just_ended.code).await.is_ok());
        assert!(get_room(&state, &long_over.code).await.is_err());
    }
}

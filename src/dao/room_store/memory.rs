//! In-memory [`RoomStore`] backend.
//!
//! One mutex around the whole dataset is the transaction boundary, which gives
//! the conditional-write semantics (winner uniqueness, host CAS) for free. Used
//! by tests and for store-less development runs.

use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dao::{
    models::{BuzzEntity, PlayerEntity, RoomEntity, RoomSettingsEntity, RoomStatus, now_ms},
    room_store::{BeginRound, BuzzOutcome, RoomStore},
    storage::{StorageError, StorageResult},
};

#[derive(Default)]
struct Inner {
    rooms: HashMap<Uuid, RoomRecord>,
    codes: HashMap<String, Uuid>,
}

struct RoomRecord {
    room: RoomEntity,
    /// Join order preserved; tenure order drives host migration.
    players: IndexMap<Uuid, PlayerEntity>,
    buzzes: Vec<BuzzEntity>,
}

/// Memory-backed store; cheap to clone, all clones share the same dataset.
#[derive(Clone, Default)]
pub struct MemoryRoomStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRoomStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing_room(room_id: Uuid) -> StorageError {
    StorageError::Conflict(format!("room `{room_id}` does not exist"))
}

impl RoomStore for MemoryRoomStore {
    fn create_room(
        &self,
        room: RoomEntity,
        host: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            if guard.codes.contains_key(&room.code) {
                return Err(StorageError::Conflict(format!(
                    "join code `{}` already in use",
                    room.code
                )));
            }
            guard.codes.insert(room.code.clone(), room.id);
            let mut players = IndexMap::new();
            players.insert(host.id, host);
            guard.rooms.insert(
                room.id,
                RoomRecord {
                    room,
                    players,
                    buzzes: Vec::new(),
                },
            );
            Ok(())
        })
    }

    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let guard = inner.lock().await;
            Ok(guard.rooms.get(&id).map(|record| record.room.clone()))
        })
    }

    fn find_room_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let guard = inner.lock().await;
            let Some(id) = guard.codes.get(&code) else {
                return Ok(None);
            };
            Ok(guard.rooms.get(id).map(|record| record.room.clone()))
        })
    }

    fn list_rooms(&self) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let guard = inner.lock().await;
            Ok(guard
                .rooms
                .values()
                .map(|record| record.room.clone())
                .collect())
        })
    }

    fn update_status(
        &self,
        room_id: Uuid,
        from: RoomStatus,
        to: RoomStatus,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            let record = guard.rooms.get_mut(&room_id).ok_or(missing_room(room_id))?;
            if record.room.status != from {
                return Ok(false);
            }
            record.room.status = to;
            record.room.ended_at_ms = (to == RoomStatus::Ended).then(now_ms);
            Ok(true)
        })
    }

    fn update_settings(
        &self,
        room_id: Uuid,
        settings: RoomSettingsEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            let record = guard.rooms.get_mut(&room_id).ok_or(missing_room(room_id))?;
            record.room.settings = settings;
            Ok(())
        })
    }

    fn swap_host(
        &self,
        room_id: Uuid,
        expected: Uuid,
        new_host: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            let record = guard.rooms.get_mut(&room_id).ok_or(missing_room(room_id))?;
            if record.room.host_id != expected {
                return Ok(false);
            }
            if !record.players.contains_key(&new_host) {
                return Ok(false);
            }
            record.room.host_id = new_host;
            for (id, player) in record.players.iter_mut() {
                player.is_host = *id == new_host;
            }
            Ok(true)
        })
    }

    fn begin_round(
        &self,
        room_id: Uuid,
        params: BeginRound,
    ) -> BoxFuture<'static, StorageResult<u32>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            let record = guard.rooms.get_mut(&room_id).ok_or(missing_room(room_id))?;
            record.room.round += 1;
            record.room.current_song_id = Some(params.song_id.clone());
            record.room.current_song_offset_ms = params.song_offset_ms;
            record.room.current_song_started_at_ms = Some(params.started_at_ms);
            record.room.revealed = false;
            record.room.played_song_ids.push(params.song_id);
            record.buzzes.clear();
            Ok(record.room.round)
        })
    }

    fn clear_round(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            let record = guard.rooms.get_mut(&room_id).ok_or(missing_room(room_id))?;
            record.room.current_song_id = None;
            record.room.current_song_offset_ms = 0;
            record.room.current_song_started_at_ms = None;
            record.room.revealed = false;
            record.buzzes.clear();
            Ok(())
        })
    }

    fn reset_game(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            let record = guard.rooms.get_mut(&room_id).ok_or(missing_room(room_id))?;
            record.room.current_song_id = None;
            record.room.current_song_offset_ms = 0;
            record.room.current_song_started_at_ms = None;
            record.room.revealed = false;
            record.room.played_song_ids.clear();
            record.buzzes.clear();
            for player in record.players.values_mut() {
                player.score = 0;
            }
            Ok(())
        })
    }

    fn set_revealed(&self, room_id: Uuid, revealed: bool) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            let record = guard.rooms.get_mut(&room_id).ok_or(missing_room(room_id))?;
            record.room.revealed = revealed;
            Ok(())
        })
    }

    fn delete_room(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            let Some(record) = guard.rooms.remove(&room_id) else {
                return Ok(false);
            };
            guard.codes.remove(&record.room.code);
            Ok(true)
        })
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            let record = guard
                .rooms
                .get_mut(&player.room_id)
                .ok_or(missing_room(player.room_id))?;
            record.players.insert(player.id, player);
            Ok(())
        })
    }

    fn find_player(
        &self,
        room_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let guard = inner.lock().await;
            Ok(guard
                .rooms
                .get(&room_id)
                .and_then(|record| record.players.get(&player_id).cloned()))
        })
    }

    fn list_players(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let guard = inner.lock().await;
            Ok(guard
                .rooms
                .get(&room_id)
                .map(|record| record.players.values().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn delete_player(
        &self,
        room_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            let record = guard.rooms.get_mut(&room_id).ok_or(missing_room(room_id))?;
            Ok(record.players.shift_remove(&player_id).is_some())
        })
    }

    fn touch_player(
        &self,
        room_id: Uuid,
        player_id: Uuid,
        last_seen_ms: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            if let Some(record) = guard.rooms.get_mut(&room_id)
                && let Some(player) = record.players.get_mut(&player_id)
            {
                player.last_seen_ms = last_seen_ms;
            }
            Ok(())
        })
    }

    fn add_score(
        &self,
        room_id: Uuid,
        player_id: Uuid,
        delta: i32,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            let record = guard.rooms.get_mut(&room_id).ok_or(missing_room(room_id))?;
            let Some(player) = record.players.get_mut(&player_id) else {
                return Ok(None);
            };
            player.score += delta;
            Ok(Some(player.clone()))
        })
    }

    fn insert_buzz(&self, buzz: BuzzEntity) -> BoxFuture<'static, StorageResult<BuzzOutcome>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            let record = guard
                .rooms
                .get_mut(&buzz.room_id)
                .ok_or(missing_room(buzz.room_id))?;

            // A buzz carrying a stale round epoch lost the transition race.
            if record.room.round != buzz.round {
                return Err(StorageError::Conflict(format!(
                    "round moved on (buzz for round {}, room at {})",
                    buzz.round, record.room.round
                )));
            }

            if record
                .buzzes
                .iter()
                .any(|b| b.player_id == buzz.player_id && b.round == buzz.round && b.was_incorrect)
            {
                return Ok(BuzzOutcome::Closed);
            }

            if let Some(existing) = record
                .buzzes
                .iter()
                .find(|b| b.round == buzz.round && b.is_active_winner())
            {
                let winner_player_id = existing.player_id;
                let mut late = buzz;
                late.winner = false;
                record.buzzes.push(late);
                return Ok(BuzzOutcome::Lost { winner_player_id });
            }

            let mut accepted = buzz;
            accepted.winner = true;
            record.buzzes.push(accepted.clone());
            Ok(BuzzOutcome::Won(accepted))
        })
    }

    fn list_buzzes(
        &self,
        room_id: Uuid,
        round: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<BuzzEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let guard = inner.lock().await;
            let Some(record) = guard.rooms.get(&room_id) else {
                return Ok(Vec::new());
            };
            let mut buzzes: Vec<BuzzEntity> = record
                .buzzes
                .iter()
                .filter(|b| b.round == round)
                .cloned()
                .collect();
            buzzes.sort_by_key(|b| b.created_at_ms);
            Ok(buzzes)
        })
    }

    fn mark_buzz_incorrect(
        &self,
        buzz_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<BuzzEntity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.lock().await;
            for record in guard.rooms.values_mut() {
                if let Some(buzz) = record.buzzes.iter_mut().find(|b| b.id == buzz_id) {
                    buzz.was_incorrect = true;
                    return Ok(Some(buzz.clone()));
                }
            }
            Ok(None)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::now_ms;

    fn sample_room(host_id: Uuid) -> RoomEntity {
        RoomEntity {
            id: Uuid::new_v4(),
            code: "AB12CD".into(),
            host_id,
            status: RoomStatus::Waiting,
            settings: RoomSettingsEntity::default(),
            round: 0,
            current_song_id: None,
            current_song_offset_ms: 0,
            current_song_started_at_ms: None,
            revealed: false,
            played_song_ids: Vec::new(),
            created_at_ms: now_ms(),
            ended_at_ms: None,
        }
    }

    fn sample_player(room_id: Uuid, nickname: &str, is_host: bool) -> PlayerEntity {
        PlayerEntity {
            id: Uuid::new_v4(),
            room_id,
            nickname: nickname.into(),
            score: 0,
            is_host,
            joined_at_ms: now_ms(),
            last_seen_ms: now_ms(),
        }
    }

    fn sample_buzz(room_id: Uuid, round: u32, player_id: Uuid) -> BuzzEntity {
        BuzzEntity {
            id: Uuid::new_v4(),
            room_id,
            round,
            player_id,
            created_at_ms: now_ms(),
            winner: false,
            was_incorrect: false,
        }
    }

    async fn seeded_store() -> (MemoryRoomStore, RoomEntity, PlayerEntity, PlayerEntity) {
        let store = MemoryRoomStore::new();
        let host_id = Uuid::new_v4();
        let mut room = sample_room(host_id);
        let mut host = sample_player(room.id, "alice", true);
        host.id = host_id;
        room.host_id = host_id;
        store.create_room(room.clone(), host.clone()).await.unwrap();
        let bob = sample_player(room.id, "bob", false);
        store.insert_player(bob.clone()).await.unwrap();
        (store, room, host, bob)
    }

    #[tokio::test]
    async fn code_lookup_finds_room() {
        let (store, room, ..) = seeded_store().await;
        let found = store
            .find_room_by_code("AB12CD".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, room.id);
    }

    #[tokio::test]
    async fn first_buzz_wins_second_loses() {
        let (store, room, host, bob) = seeded_store().await;
        let round = store
            .begin_round(
                room.id,
                BeginRound {
                    song_id: "s1".into(),
                    song_offset_ms: 0,
                    started_at_ms: now_ms(),
                },
            )
            .await
            .unwrap();

        let first = store
            .insert_buzz(sample_buzz(room.id, round, bob.id))
            .await
            .unwrap();
        assert!(matches!(first, BuzzOutcome::Won(_)));

        let second = store
            .insert_buzz(sample_buzz(room.id, round, host.id))
            .await
            .unwrap();
        assert_eq!(
            second,
            BuzzOutcome::Lost {
                winner_player_id: bob.id
            }
        );

        // The late attempt is retained for the UI.
        let buzzes = store.list_buzzes(room.id, round).await.unwrap();
        assert_eq!(buzzes.len(), 2);
        assert_eq!(buzzes.iter().filter(|b| b.is_active_winner()).count(), 1);
    }

    #[tokio::test]
    async fn concurrent_buzzes_produce_exactly_one_winner() {
        let (store, room, _host, _bob) = seeded_store().await;
        let mut contenders = Vec::new();
        for i in 0..16 {
            let player = sample_player(room.id, &format!("p{i}"), false);
            store.insert_player(player.clone()).await.unwrap();
            contenders.push(player.id);
        }
        let round = store
            .begin_round(
                room.id,
                BeginRound {
                    song_id: "s1".into(),
                    song_offset_ms: 0,
                    started_at_ms: now_ms(),
                },
            )
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for player_id in contenders {
            let store = store.clone();
            let room_id = room.id;
            tasks.push(tokio::spawn(async move {
                store
                    .insert_buzz(sample_buzz(room_id, round, player_id))
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if matches!(task.await.unwrap(), BuzzOutcome::Won(_)) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn incorrect_player_is_locked_out_until_next_round() {
        let (store, room, host, bob) = seeded_store().await;
        let round = store
            .begin_round(
                room.id,
                BeginRound {
                    song_id: "s1".into(),
                    song_offset_ms: 0,
                    started_at_ms: now_ms(),
                },
            )
            .await
            .unwrap();

        let BuzzOutcome::Won(won) = store
            .insert_buzz(sample_buzz(room.id, round, bob.id))
            .await
            .unwrap()
        else {
            panic!("expected a winning buzz");
        };
        store.mark_buzz_incorrect(won.id).await.unwrap().unwrap();

        // Bob is out for this round, but the slot reopened for others.
        let bob_again = store
            .insert_buzz(sample_buzz(room.id, round, bob.id))
            .await
            .unwrap();
        assert_eq!(bob_again, BuzzOutcome::Closed);

        let host_buzz = store
            .insert_buzz(sample_buzz(room.id, round, host.id))
            .await
            .unwrap();
        assert!(matches!(host_buzz, BuzzOutcome::Won(_)));

        // A new round clears the lockout.
        let next = store
            .begin_round(
                room.id,
                BeginRound {
                    song_id: "s2".into(),
                    song_offset_ms: 0,
                    started_at_ms: now_ms(),
                },
            )
            .await
            .unwrap();
        let fresh = store
            .insert_buzz(sample_buzz(room.id, next, bob.id))
            .await
            .unwrap();
        assert!(matches!(fresh, BuzzOutcome::Won(_)));
    }

    #[tokio::test]
    async fn stale_round_buzz_is_a_conflict() {
        let (store, room, _host, bob) = seeded_store().await;
        let round = store
            .begin_round(
                room.id,
                BeginRound {
                    song_id: "s1".into(),
                    song_offset_ms: 0,
                    started_at_ms: now_ms(),
                },
            )
            .await
            .unwrap();
        store
            .begin_round(
                room.id,
                BeginRound {
                    song_id: "s2".into(),
                    song_offset_ms: 0,
                    started_at_ms: now_ms(),
                },
            )
            .await
            .unwrap();

        let result = store.insert_buzz(sample_buzz(room.id, round, bob.id)).await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn swap_host_is_idempotent_under_duplicate_triggers() {
        let (store, room, host, bob) = seeded_store().await;
        let first = store.swap_host(room.id, host.id, bob.id).await.unwrap();
        assert!(first);
        // Second observer fires the same migration; host_id already moved.
        let second = store.swap_host(room.id, host.id, bob.id).await.unwrap();
        assert!(!second);

        let reloaded = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(reloaded.host_id, bob.id);
        let players = store.list_players(room.id).await.unwrap();
        assert!(
            players
                .iter()
                .all(|p| p.is_host == (p.id == bob.id))
        );
    }

    #[tokio::test]
    async fn begin_round_resets_reveal_and_tracks_played_songs() {
        let (store, room, ..) = seeded_store().await;
        store
            .begin_round(
                room.id,
                BeginRound {
                    song_id: "s1".into(),
                    song_offset_ms: 1_500,
                    started_at_ms: 42,
                },
            )
            .await
            .unwrap();
        store.set_revealed(room.id, true).await.unwrap();

        store
            .begin_round(
                room.id,
                BeginRound {
                    song_id: "s2".into(),
                    song_offset_ms: 0,
                    started_at_ms: 43,
                },
            )
            .await
            .unwrap();

        let reloaded = store.find_room(room.id).await.unwrap().unwrap();
        assert_eq!(reloaded.round, 2);
        assert!(!reloaded.revealed);
        assert_eq!(reloaded.current_song_id.as_deref(), Some("s2"));
        assert_eq!(reloaded.current_song_started_at_ms, Some(43));
        assert_eq!(reloaded.played_song_ids, vec!["s1", "s2"]);
    }
}

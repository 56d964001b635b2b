//! Mongo-backed [`RoomStore`].
//!
//! The at-most-one-winner guarantee rides on a partial unique index over
//! active winning buzzes: the first insert with `winner: true` commits, any
//! concurrent attempt hits a duplicate-key error and is recorded as late.
//! Host migration and status transitions use filtered updates as
//! compare-and-swap, never blind overwrites.

use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::{Bson, doc},
    error::{ErrorKind, WriteFailure},
    options::{IndexOptions, ReturnDocument},
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
};
use crate::dao::{
    models::{BuzzEntity, PlayerEntity, RoomEntity, RoomSettingsEntity, RoomStatus, now_ms},
    room_store::{BeginRound, BuzzOutcome, RoomStore},
    storage::{StorageError, StorageResult},
};

const ROOM_COLLECTION: &str = "rooms";
const PLAYER_COLLECTION: &str = "players";
const BUZZ_COLLECTION: &str = "buzzes";

const DUPLICATE_KEY_CODE: i32 = 11000;
const WINNER_INSERT_ATTEMPTS: u32 = 3;

/// MongoDB implementation of the room store.
#[derive(Clone)]
pub struct MongoRoomStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

fn status_str(status: RoomStatus) -> &'static str {
    match status {
        RoomStatus::Waiting => "waiting",
        RoomStatus::Playing => "playing",
        RoomStatus::Ended => "ended",
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoRoomStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        let rooms = database.collection::<RoomEntity>(ROOM_COLLECTION);
        for (keys, name, unique) in [
            (doc! {"id": 1}, "room_id_idx", true),
            (doc! {"code": 1}, "room_code_idx", true),
        ] {
            let index = mongodb::IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(name.to_owned()))
                        .unique(Some(unique))
                        .build(),
                )
                .build();
            rooms
                .create_index(index)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection: ROOM_COLLECTION,
                    index: "id/code",
                    source,
                })?;
        }

        let players = database.collection::<PlayerEntity>(PLAYER_COLLECTION);
        let player_index = mongodb::IndexModel::builder()
            .keys(doc! {"room_id": 1, "id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("player_room_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();
        players
            .create_index(player_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: PLAYER_COLLECTION,
                index: "room_id,id",
                source,
            })?;

        // The race arbiter: only one active winner per (room, round) can exist.
        let buzzes = database.collection::<BuzzEntity>(BUZZ_COLLECTION);
        let winner_index = mongodb::IndexModel::builder()
            .keys(doc! {"room_id": 1, "round": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("buzz_winner_idx".to_owned()))
                    .unique(Some(true))
                    .partial_filter_expression(Some(
                        doc! {"winner": true, "was_incorrect": false},
                    ))
                    .build(),
            )
            .build();
        buzzes
            .create_index(winner_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: BUZZ_COLLECTION,
                index: "room_id,round (active winner)",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn rooms(&self) -> Collection<RoomEntity> {
        self.database().await.collection(ROOM_COLLECTION)
    }

    async fn players(&self) -> Collection<PlayerEntity> {
        self.database().await.collection(PLAYER_COLLECTION)
    }

    async fn buzzes(&self) -> Collection<BuzzEntity> {
        self.database().await.collection(BUZZ_COLLECTION)
    }

    async fn find_room_inner(&self, filter: mongodb::bson::Document) -> MongoResult<Option<RoomEntity>> {
        self.rooms()
            .await
            .find_one(filter)
            .await
            .map_err(|source| MongoDaoError::LoadRoom { source })
    }

    async fn insert_buzz_inner(&self, buzz: BuzzEntity) -> StorageResult<BuzzOutcome> {
        let rooms = self.rooms().await;
        let buzzes = self.buzzes().await;

        // Reject buzzes carrying a stale round epoch: the song moved on.
        let room = rooms
            .find_one(doc! {"id": buzz.room_id.to_string()})
            .await
            .map_err(|source| MongoDaoError::LoadRoom { source })?
            .ok_or_else(|| StorageError::Conflict(format!("room `{}` does not exist", buzz.room_id)))?;
        if room.round != buzz.round {
            return Err(StorageError::Conflict(format!(
                "round moved on (buzz for round {}, room at {})",
                buzz.round, room.round
            )));
        }

        let closed = buzzes
            .find_one(doc! {
                "room_id": buzz.room_id.to_string(),
                "round": buzz.round as i64,
                "player_id": buzz.player_id.to_string(),
                "was_incorrect": true,
            })
            .await
            .map_err(|source| MongoDaoError::LoadBuzz { source })?;
        if closed.is_some() {
            return Ok(BuzzOutcome::Closed);
        }

        // Race for the winner slot; a duplicate-key rejection means somebody
        // else committed first and this attempt is recorded as late. The
        // retry loop covers the window where the committed winner is marked
        // incorrect between our failed insert and the lookup.
        let mut attempt = 0;
        loop {
            let mut candidate = buzz.clone();
            candidate.winner = true;
            match buzzes.insert_one(&candidate).await {
                Ok(_) => return Ok(BuzzOutcome::Won(candidate)),
                Err(err) if is_duplicate_key(&err) => {
                    let winner = buzzes
                        .find_one(doc! {
                            "room_id": buzz.room_id.to_string(),
                            "round": buzz.round as i64,
                            "winner": true,
                            "was_incorrect": false,
                        })
                        .await
                        .map_err(|source| MongoDaoError::LoadBuzz { source })?;

                    match winner {
                        Some(winning) => {
                            let mut late = buzz.clone();
                            late.winner = false;
                            buzzes.insert_one(&late).await.map_err(|source| {
                                MongoDaoError::WriteBuzz {
                                    id: late.id,
                                    source,
                                }
                            })?;
                            return Ok(BuzzOutcome::Lost {
                                winner_player_id: winning.player_id,
                            });
                        }
                        None => {
                            attempt += 1;
                            if attempt >= WINNER_INSERT_ATTEMPTS {
                                return Err(StorageError::Conflict(
                                    "winner slot kept moving during buzz insert".into(),
                                ));
                            }
                        }
                    }
                }
                Err(source) => {
                    return Err(MongoDaoError::WriteBuzz {
                        id: buzz.id,
                        source,
                    }
                    .into());
                }
            }
        }
    }
}

impl RoomStore for MongoRoomStore {
    fn create_room(
        &self,
        room: RoomEntity,
        host: PlayerEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let room_id = room.id;
            store
                .rooms()
                .await
                .insert_one(&room)
                .await
                .map_err(|source| {
                    if is_duplicate_key(&source) {
                        StorageError::Conflict(format!("join code `{}` already in use", room.code))
                    } else {
                        MongoDaoError::WriteRoom {
                            id: room_id,
                            source,
                        }
                        .into()
                    }
                })?;
            store
                .players()
                .await
                .insert_one(&host)
                .await
                .map_err(|source| MongoDaoError::WritePlayer {
                    id: host.id,
                    source,
                })?;
            Ok(())
        })
    }

    fn find_room(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_room_inner(doc! {"id": id.to_string()})
                .await
                .map_err(Into::into)
        })
    }

    fn find_room_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_room_inner(doc! {"code": code})
                .await
                .map_err(Into::into)
        })
    }

    fn list_rooms(&self) -> BoxFuture<'static, StorageResult<Vec<RoomEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let rooms: Vec<RoomEntity> = store
                .rooms()
                .await
                .find(doc! {})
                .await
                .map_err(|source| MongoDaoError::LoadRoom { source })?
                .try_collect()
                .await
                .map_err(|source| MongoDaoError::LoadRoom { source })?;
            Ok(rooms)
        })
    }

    fn update_status(
        &self,
        room_id: Uuid,
        from: RoomStatus,
        to: RoomStatus,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let ended_at_ms = if to == RoomStatus::Ended {
                Bson::Int64(now_ms())
            } else {
                Bson::Null
            };
            let result = store
                .rooms()
                .await
                .update_one(
                    doc! {"id": room_id.to_string(), "status": status_str(from)},
                    doc! {"$set": {"status": status_str(to), "ended_at_ms": ended_at_ms}},
                )
                .await
                .map_err(|source| MongoDaoError::WriteRoom {
                    id: room_id,
                    source,
                })?;
            Ok(result.matched_count > 0)
        })
    }

    fn update_settings(
        &self,
        room_id: Uuid,
        settings: RoomSettingsEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let settings = mongodb::bson::serialize_to_bson(&settings).map_err(|source| {
                StorageError::unavailable("failed to encode room settings".into(), source)
            })?;
            store
                .rooms()
                .await
                .update_one(
                    doc! {"id": room_id.to_string()},
                    doc! {"$set": {"settings": settings}},
                )
                .await
                .map_err(|source| MongoDaoError::WriteRoom {
                    id: room_id,
                    source,
                })?;
            Ok(())
        })
    }

    fn swap_host(
        &self,
        room_id: Uuid,
        expected: Uuid,
        new_host: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            // The filtered update is the CAS; duplicate migrations match zero
            // documents and fall through as no-ops.
            let result = store
                .rooms()
                .await
                .update_one(
                    doc! {"id": room_id.to_string(), "host_id": expected.to_string()},
                    doc! {"$set": {"host_id": new_host.to_string()}},
                )
                .await
                .map_err(|source| MongoDaoError::WriteRoom {
                    id: room_id,
                    source,
                })?;
            if result.matched_count == 0 {
                return Ok(false);
            }

            let players = store.players().await;
            players
                .update_many(
                    doc! {"room_id": room_id.to_string()},
                    doc! {"$set": {"is_host": false}},
                )
                .await
                .map_err(|source| MongoDaoError::WritePlayer {
                    id: new_host,
                    source,
                })?;
            players
                .update_one(
                    doc! {"room_id": room_id.to_string(), "id": new_host.to_string()},
                    doc! {"$set": {"is_host": true}},
                )
                .await
                .map_err(|source| MongoDaoError::WritePlayer {
                    id: new_host,
                    source,
                })?;
            Ok(true)
        })
    }

    fn begin_round(
        &self,
        room_id: Uuid,
        params: BeginRound,
    ) -> BoxFuture<'static, StorageResult<u32>> {
        let store = self.clone();
        Box::pin(async move {
            let updated = store
                .rooms()
                .await
                .find_one_and_update(
                    doc! {"id": room_id.to_string()},
                    doc! {
                        "$inc": {"round": 1},
                        "$set": {
                            "current_song_id": params.song_id.clone(),
                            "current_song_offset_ms": params.song_offset_ms,
                            "current_song_started_at_ms": params.started_at_ms,
                            "revealed": false,
                        },
                        "$push": {"played_song_ids": params.song_id},
                    },
                )
                .return_document(ReturnDocument::After)
                .await
                .map_err(|source| MongoDaoError::WriteRoom {
                    id: room_id,
                    source,
                })?
                .ok_or_else(|| {
                    StorageError::Conflict(format!("room `{room_id}` does not exist"))
                })?;

            // Old rows are cleanup only: the bumped round epoch already keeps
            // them out of the new round's winner constraint.
            store
                .buzzes()
                .await
                .delete_many(doc! {"room_id": room_id.to_string()})
                .await
                .map_err(|source| MongoDaoError::PurgeBuzzes { room_id, source })?;

            Ok(updated.round)
        })
    }

    fn clear_round(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .rooms()
                .await
                .update_one(
                    doc! {"id": room_id.to_string()},
                    doc! {"$set": {
                        "current_song_id": Bson::Null,
                        "current_song_offset_ms": 0_i64,
                        "current_song_started_at_ms": Bson::Null,
                        "revealed": false,
                    }},
                )
                .await
                .map_err(|source| MongoDaoError::WriteRoom {
                    id: room_id,
                    source,
                })?;
            store
                .buzzes()
                .await
                .delete_many(doc! {"room_id": room_id.to_string()})
                .await
                .map_err(|source| MongoDaoError::PurgeBuzzes { room_id, source })?;
            Ok(())
        })
    }

    fn reset_game(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .rooms()
                .await
                .update_one(
                    doc! {"id": room_id.to_string()},
                    doc! {"$set": {
                        "current_song_id": Bson::Null,
                        "current_song_offset_ms": 0_i64,
                        "current_song_started_at_ms": Bson::Null,
                        "revealed": false,
                        "played_song_ids": [],
                    }},
                )
                .await
                .map_err(|source| MongoDaoError::WriteRoom {
                    id: room_id,
                    source,
                })?;
            store
                .buzzes()
                .await
                .delete_many(doc! {"room_id": room_id.to_string()})
                .await
                .map_err(|source| MongoDaoError::PurgeBuzzes { room_id, source })?;
            store
                .players()
                .await
                .update_many(
                    doc! {"room_id": room_id.to_string()},
                    doc! {"$set": {"score": 0_i32}},
                )
                .await
                .map_err(|source| MongoDaoError::ResetPlayers { room_id, source })?;
            Ok(())
        })
    }

    fn set_revealed(&self, room_id: Uuid, revealed: bool) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .rooms()
                .await
                .update_one(
                    doc! {"id": room_id.to_string()},
                    doc! {"$set": {"revealed": revealed}},
                )
                .await
                .map_err(|source| MongoDaoError::WriteRoom {
                    id: room_id,
                    source,
                })?;
            Ok(())
        })
    }

    fn delete_room(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let result = store
                .rooms()
                .await
                .delete_one(doc! {"id": room_id.to_string()})
                .await
                .map_err(|source| MongoDaoError::WriteRoom {
                    id: room_id,
                    source,
                })?;
            store
                .players()
                .await
                .delete_many(doc! {"room_id": room_id.to_string()})
                .await
                .map_err(|source| MongoDaoError::PurgePlayers { room_id, source })?;
            store
                .buzzes()
                .await
                .delete_many(doc! {"room_id": room_id.to_string()})
                .await
                .map_err(|source| MongoDaoError::PurgeBuzzes { room_id, source })?;
            Ok(result.deleted_count > 0)
        })
    }

    fn insert_player(&self, player: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .players()
                .await
                .insert_one(&player)
                .await
                .map_err(|source| MongoDaoError::WritePlayer {
                    id: player.id,
                    source,
                })?;
            Ok(())
        })
    }

    fn find_player(
        &self,
        room_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .players()
                .await
                .find_one(doc! {"room_id": room_id.to_string(), "id": player_id.to_string()})
                .await
                .map_err(|source| MongoDaoError::LoadPlayer { source }.into())
        })
    }

    fn list_players(&self, room_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let players: Vec<PlayerEntity> = store
                .players()
                .await
                .find(doc! {"room_id": room_id.to_string()})
                .sort(doc! {"joined_at_ms": 1})
                .await
                .map_err(|source| MongoDaoError::LoadPlayer { source })?
                .try_collect()
                .await
                .map_err(|source| MongoDaoError::LoadPlayer { source })?;
            Ok(players)
        })
    }

    fn delete_player(
        &self,
        room_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let result = store
                .players()
                .await
                .delete_one(doc! {"room_id": room_id.to_string(), "id": player_id.to_string()})
                .await
                .map_err(|source| MongoDaoError::WritePlayer {
                    id: player_id,
                    source,
                })?;
            Ok(result.deleted_count > 0)
        })
    }

    fn touch_player(
        &self,
        room_id: Uuid,
        player_id: Uuid,
        last_seen_ms: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .players()
                .await
                .update_one(
                    doc! {"room_id": room_id.to_string(), "id": player_id.to_string()},
                    doc! {"$set": {"last_seen_ms": last_seen_ms}},
                )
                .await
                .map_err(|source| MongoDaoError::WritePlayer {
                    id: player_id,
                    source,
                })?;
            Ok(())
        })
    }

    fn add_score(
        &self,
        room_id: Uuid,
        player_id: Uuid,
        delta: i32,
    ) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .players()
                .await
                .find_one_and_update(
                    doc! {"room_id": room_id.to_string(), "id": player_id.to_string()},
                    doc! {"$inc": {"score": delta}},
                )
                .return_document(ReturnDocument::After)
                .await
                .map_err(|source| MongoDaoError::WritePlayer {
                    id: player_id,
                    source,
                }
                .into())
        })
    }

    fn insert_buzz(&self, buzz: BuzzEntity) -> BoxFuture<'static, StorageResult<BuzzOutcome>> {
        let store = self.clone();
        Box::pin(async move { store.insert_buzz_inner(buzz).await })
    }

    fn list_buzzes(
        &self,
        room_id: Uuid,
        round: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<BuzzEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let buzzes: Vec<BuzzEntity> = store
                .buzzes()
                .await
                .find(doc! {"room_id": room_id.to_string(), "round": round as i64})
                .sort(doc! {"created_at_ms": 1})
                .await
                .map_err(|source| MongoDaoError::LoadBuzz { source })?
                .try_collect()
                .await
                .map_err(|source| MongoDaoError::LoadBuzz { source })?;
            Ok(buzzes)
        })
    }

    fn mark_buzz_incorrect(
        &self,
        buzz_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<BuzzEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .buzzes()
                .await
                .find_one_and_update(
                    doc! {"id": buzz_id.to_string()},
                    doc! {"$set": {"was_incorrect": true}},
                )
                .return_document(ReturnDocument::After)
                .await
                .map_err(|source| MongoDaoError::WriteBuzz {
                    id: buzz_id,
                    source,
                }
                .into())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}

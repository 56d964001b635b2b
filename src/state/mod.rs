//! Shared application state and in-memory coordination primitives.

pub mod broadcast;
pub mod state_machine;

use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, watch};

use crate::{
    config::SyncConfig,
    dao::room_store::RoomStore,
    error::ServiceError,
    services::{
        catalog::SongCatalog,
        presence::{PresenceChange, PresenceTracker},
    },
};

pub use self::broadcast::ChangeBroadcaster;

/// Cheaply cloneable handle to the central application state.
pub type SharedState = Arc<AppState>;

/// Per-room broadcast channel capacity.
const BROADCAST_CAPACITY: usize = 64;

/// Central application state storing the storage handle, the song catalog and
/// the in-memory coordination layers.
pub struct AppState {
    room_store: RwLock<Option<Arc<dyn RoomStore>>>,
    catalog: Arc<dyn SongCatalog>,
    broadcaster: ChangeBroadcaster,
    presence: PresenceTracker,
    degraded: watch::Sender<bool>,
    config: Arc<SyncConfig>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is
    /// installed. The returned receiver carries presence transitions raised by
    /// expiring tombstone timers; callers must drain it into the broadcaster.
    pub fn new(
        config: Arc<SyncConfig>,
        catalog: Arc<dyn SongCatalog>,
    ) -> (SharedState, mpsc::UnboundedReceiver<PresenceChange>) {
        let (degraded_tx, _rx) = watch::channel(true);
        let (presence, presence_rx) = PresenceTracker::new(config.tombstone_grace());
        let state = Arc::new(Self {
            room_store: RwLock::new(None),
            catalog,
            broadcaster: ChangeBroadcaster::new(BROADCAST_CAPACITY),
            presence,
            degraded: degraded_tx,
            config,
        });
        (state, presence_rx)
    }

    /// Obtain a handle to the current room store, if one is installed.
    pub async fn room_store(&self) -> Option<Arc<dyn RoomStore>> {
        let guard = self.room_store.read().await;
        guard.as_ref().cloned()
    }

    /// Like [`AppState::room_store`] but fails with [`ServiceError::Degraded`]
    /// when storage is unavailable. Services use this on every operation.
    pub async fn require_room_store(&self) -> Result<Arc<dyn RoomStore>, ServiceError> {
        self.room_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new room store implementation and leave degraded mode.
    pub async fn install_room_store(&self, store: Arc<dyn RoomStore>) {
        {
            let mut guard = self.room_store.write().await;
            *guard = Some(store);
        }
        self.set_degraded(false);
    }

    /// Remove the current room store and enter degraded mode.
    pub async fn clear_room_store(&self) {
        {
            let mut guard = self.room_store.write().await;
            guard.take();
        }
        self.set_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    ///
    /// The storage supervisor flips this during reconnect attempts without
    /// tearing down the installed store handle.
    pub fn set_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Song catalog used to pick and resolve tracks.
    pub fn catalog(&self) -> &Arc<dyn SongCatalog> {
        &self.catalog
    }

    /// Per-room event fan-out.
    pub fn broadcaster(&self) -> &ChangeBroadcaster {
        &self.broadcaster
    }

    /// Connection-level presence tracker.
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Runtime tunables.
    pub fn config(&self) -> &Arc<SyncConfig> {
        &self.config
    }
}

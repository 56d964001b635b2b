//! Background supervision of the room store connection.
//!
//! Connectivity failures degrade the server, never the rooms: while the store
//! is unreachable every write fails fast with a degraded error, and this task
//! keeps working to get the connection back.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{room_store::RoomStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_BACKOFF: Duration = Duration::from_millis(1_000);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const RECONNECT_ATTEMPTS: u32 = 3;

/// Build the room store via `connect`, install it, and watch over it forever.
///
/// Failed connections are retried with exponential backoff. Once a store is
/// installed it is health-polled; a store that stops answering gets a bounded
/// number of in-place reconnects before the connection is rebuilt from
/// scratch.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RoomStore>, StorageError>> + Send,
{
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let store = match connect().await {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, "room store connection failed");
                sleep(backoff).await;
                backoff = grow(backoff);
                continue;
            }
        };

        state.install_room_store(store.clone()).await;
        info!("room store connected");
        backoff = INITIAL_BACKOFF;

        watch_store(&state, store.as_ref()).await;

        // The store is past in-place repair; rebuild the connection.
        state.set_degraded(true);
        sleep(backoff).await;
        backoff = grow(backoff);
    }
}

/// Poll the store until it fails in a way reconnects cannot repair.
async fn watch_store(state: &SharedState, store: &dyn RoomStore) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("room store healthy again; leaving degraded mode");
                    state.set_degraded(false);
                }
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(err) => {
                warn!(error = %err, "room store health check failed");
                if !reconnect_in_place(state, store).await {
                    return;
                }
            }
        }
    }
}

/// Try a bounded number of in-place reconnects, degrading while they run.
async fn reconnect_in_place(state: &SharedState, store: &dyn RoomStore) -> bool {
    state.set_degraded(true);
    let mut delay = INITIAL_BACKOFF;
    for attempt in 1..=RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "room store reconnected");
                state.set_degraded(false);
                return true;
            }
            Err(err) => {
                warn!(attempt, error = %err, "room store reconnect failed");
                sleep(delay).await;
                delay = grow(delay);
            }
        }
    }
    warn!("room store reconnects exhausted");
    false
}

fn grow(delay: Duration) -> Duration {
    (delay * 2).min(MAX_BACKOFF)
}

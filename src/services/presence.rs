//! Connection-level presence tracking with tombstone grace timers.
//!
//! Presence is in-memory only: it tracks live sockets, not persisted rows. A
//! player flips offline only after a grace period without any connection, so a
//! page refresh or a brief network blip never flickers through the roster.

use std::{collections::HashMap, sync::Arc, time::Duration};

use indexmap::IndexMap;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::debug;
use uuid::Uuid;

/// Presence transition raised by an expiring tombstone timer.
///
/// Online flips happen synchronously inside [`PresenceTracker::register`];
/// only the delayed offline flips travel over the channel, to be drained into
/// the room broadcaster by a dispatcher task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceChange {
    /// Room the transition belongs to.
    pub room_id: Uuid,
    /// Player whose connectivity changed.
    pub player_id: Uuid,
    /// New connectivity state.
    pub online: bool,
}

struct PlayerPresence {
    /// Live socket count; a player may hold several tabs.
    connections: u32,
    online: bool,
    /// Pending grace timer, aborted when a connection comes back.
    tombstone: Option<JoinHandle<()>>,
}

struct Inner {
    grace: Duration,
    /// Players keyed per room, in first-seen order.
    rooms: Mutex<HashMap<Uuid, IndexMap<Uuid, PlayerPresence>>>,
    changes: mpsc::UnboundedSender<PresenceChange>,
}

/// Tracks which players hold at least one live connection per room.
#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<Inner>,
}

impl PresenceTracker {
    /// Build a tracker with the given offline grace period.
    ///
    /// The receiver yields the delayed offline transitions.
    pub fn new(grace: Duration) -> (Self, mpsc::UnboundedReceiver<PresenceChange>) {
        let (changes, rx) = mpsc::unbounded_channel();
        let tracker = Self {
            inner: Arc::new(Inner {
                grace,
                rooms: Mutex::new(HashMap::new()),
                changes,
            }),
        };
        (tracker, rx)
    }

    /// Record a new live connection for a player.
    ///
    /// Returns `true` when the player flipped from offline to online, in which
    /// case the caller is responsible for broadcasting the transition.
    pub async fn register(&self, room_id: Uuid, player_id: Uuid) -> bool {
        let mut rooms = self.inner.rooms.lock().await;
        let presence = rooms
            .entry(room_id)
            .or_default()
            .entry(player_id)
            .or_insert_with(|| PlayerPresence {
                connections: 0,
                online: false,
                tombstone: None,
            });

        if let Some(timer) = presence.tombstone.take() {
            timer.abort();
        }
        presence.connections += 1;

        if presence.online {
            false
        } else {
            presence.online = true;
            true
        }
    }

    /// Record that one of a player's connections went away.
    ///
    /// When it was the last one, a tombstone timer starts; the player flips
    /// offline only if no connection returns before the grace period elapses.
    pub async fn disconnect(&self, room_id: Uuid, player_id: Uuid) {
        let mut rooms = self.inner.rooms.lock().await;
        let Some(players) = rooms.get_mut(&room_id) else {
            return;
        };
        let Some(presence) = players.get_mut(&player_id) else {
            return;
        };

        presence.connections = presence.connections.saturating_sub(1);
        if presence.connections > 0 || !presence.online {
            return;
        }

        if let Some(timer) = presence.tombstone.take() {
            timer.abort();
        }
        let inner = Arc::clone(&self.inner);
        presence.tombstone = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.grace).await;

            let mut rooms = inner.rooms.lock().await;
            let Some(presence) = rooms
                .get_mut(&room_id)
                .and_then(|players| players.get_mut(&player_id))
            else {
                return;
            };
            if presence.connections > 0 || !presence.online {
                return;
            }

            presence.online = false;
            presence.tombstone = None;
            debug!(%room_id, %player_id, "presence grace expired; player offline");
            let _ = inner.changes.send(PresenceChange {
                room_id,
                player_id,
                online: false,
            });
        }));
    }

    /// Drop a player's presence entry without emitting a transition.
    ///
    /// Used on explicit leave, where the roster change is broadcast as a
    /// membership event instead.
    pub async fn remove(&self, room_id: Uuid, player_id: Uuid) {
        let mut rooms = self.inner.rooms.lock().await;
        if let Some(players) = rooms.get_mut(&room_id)
            && let Some(presence) = players.shift_remove(&player_id)
            && let Some(timer) = presence.tombstone
        {
            timer.abort();
        }
    }

    /// Drop every presence entry of a deleted room.
    pub async fn forget_room(&self, room_id: Uuid) {
        let mut rooms = self.inner.rooms.lock().await;
        if let Some(players) = rooms.remove(&room_id) {
            for (_, presence) in players {
                if let Some(timer) = presence.tombstone {
                    timer.abort();
                }
            }
        }
    }

    /// Whether a player currently counts as online.
    pub async fn is_online(&self, room_id: Uuid, player_id: Uuid) -> bool {
        let rooms = self.inner.rooms.lock().await;
        rooms
            .get(&room_id)
            .and_then(|players| players.get(&player_id))
            .is_some_and(|presence| presence.online)
    }

    /// Players of a room currently counted online, in first-seen order.
    pub async fn online_players(&self, room_id: Uuid) -> Vec<Uuid> {
        let rooms = self.inner.rooms.lock().await;
        rooms
            .get(&room_id)
            .map(|players| {
                players
                    .iter()
                    .filter(|(_, presence)| presence.online)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Drain presence transitions into the room broadcaster.
///
/// An offline host is also the trigger for host migration; running it here
/// keeps the tombstone timers free of any storage dependency.
pub async fn run_presence_dispatcher(
    state: crate::state::SharedState,
    mut changes: mpsc::UnboundedReceiver<PresenceChange>,
) {
    use crate::services::{events, host_migration};
    use tracing::warn;

    while let Some(change) = changes.recv().await {
        events::broadcast_presence(&state, change.room_id, change.player_id, change.online);
        if change.online {
            continue;
        }
        if let Err(err) =
            host_migration::handle_host_offline(&state, change.room_id, change.player_id).await
        {
            warn!(
                room_id = %change.room_id,
                player_id = %change.player_id,
                error = %err,
                "host migration after offline transition failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_millis(5_000);

    #[tokio::test(start_paused = true)]
    async fn reconnect_within_grace_never_flips_offline() {
        let (tracker, mut rx) = PresenceTracker::new(GRACE);
        let room = Uuid::new_v4();
        let player = Uuid::new_v4();

        assert!(tracker.register(room, player).await);
        tracker.disconnect(room, player).await;
        tokio::time::advance(GRACE / 2).await;

        // Came back before the grace expired: no transition at all.
        assert!(!tracker.register(room, player).await);
        tokio::time::advance(GRACE * 2).await;
        tokio::task::yield_now().await;

        assert!(tracker.is_online(room, player).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn offline_fires_once_after_grace() {
        let (tracker, mut rx) = PresenceTracker::new(GRACE);
        let room = Uuid::new_v4();
        let player = Uuid::new_v4();

        tracker.register(room, player).await;
        tracker.disconnect(room, player).await;

        let change = rx.recv().await.unwrap();
        assert_eq!(
            change,
            PresenceChange {
                room_id: room,
                player_id: player,
                online: false,
            }
        );
        assert!(!tracker.is_online(room, player).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn second_tab_keeps_player_online() {
        let (tracker, mut rx) = PresenceTracker::new(GRACE);
        let room = Uuid::new_v4();
        let player = Uuid::new_v4();

        assert!(tracker.register(room, player).await);
        assert!(!tracker.register(room, player).await);

        tracker.disconnect(room, player).await;
        tokio::time::advance(GRACE * 2).await;
        tokio::task::yield_now().await;
        assert!(tracker.is_online(room, player).await);
        assert!(rx.try_recv().is_err());

        // Dropping the last connection starts the real tombstone.
        tracker.disconnect(room, player).await;
        let change = rx.recv().await.unwrap();
        assert!(!change.online);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_leave_is_silent() {
        let (tracker, mut rx) = PresenceTracker::new(GRACE);
        let room = Uuid::new_v4();
        let player = Uuid::new_v4();

        tracker.register(room, player).await;
        tracker.disconnect(room, player).await;
        tracker.remove(room, player).await;

        tokio::time::advance(GRACE * 2).await;
        tokio::task::yield_now().await;
        assert!(!tracker.is_online(room, player).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn online_players_follow_first_seen_order() {
        let (tracker, mut rx) = PresenceTracker::new(GRACE);
        let room = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        tracker.register(room, first).await;
        tracker.register(room, second).await;
        assert_eq!(tracker.online_players(room).await, vec![first, second]);

        tracker.disconnect(room, first).await;
        let change = rx.recv().await.unwrap();
        assert_eq!(change.player_id, first);
        assert_eq!(tracker.online_players(room).await, vec![second]);
    }
}

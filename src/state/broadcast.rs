use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dto::events::RoomEvent;

/// Per-room broadcast fan-out.
///
/// Each room gets its own lazily created channel; every live connection of the
/// room subscribes to it. Slow subscribers are lagged out by the channel rather
/// than backpressuring the sender.
pub struct ChangeBroadcaster {
    capacity: usize,
    channels: DashMap<Uuid, broadcast::Sender<RoomEvent>>,
}

impl ChangeBroadcaster {
    /// Construct a broadcaster whose per-room channels hold `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: DashMap::new(),
        }
    }

    /// Register a subscriber for a room, creating the channel on first use.
    pub fn subscribe(&self, room_id: Uuid) -> broadcast::Receiver<RoomEvent> {
        self.channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Send an event to every subscriber of a room, ignoring delivery errors.
    ///
    /// A room without subscribers silently drops the event; new subscribers
    /// always start from a fresh snapshot anyway.
    pub fn broadcast(&self, room_id: Uuid, event: RoomEvent) {
        if let Some(sender) = self.channels.get(&room_id) {
            let _ = sender.send(event);
        }
    }

    /// Drop a room's channel once the room itself is deleted.
    pub fn remove(&self, room_id: Uuid) {
        self.channels.remove(&room_id);
    }

    /// Number of live subscribers for a room.
    pub fn subscriber_count(&self, room_id: Uuid) -> usize {
        self.channels
            .get(&room_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_only_the_rooms_own_subscribers() {
        let hub = ChangeBroadcaster::new(8);
        let room_a = Uuid::new_v4();
        let room_b = Uuid::new_v4();

        let mut rx_a = hub.subscribe(room_a);
        let mut rx_b = hub.subscribe(room_b);

        let host = Uuid::new_v4();
        hub.broadcast(room_a, RoomEvent::HostChanged { host_id: host });

        match rx_a.recv().await.unwrap() {
            RoomEvent::HostChanged { host_id } => assert_eq!(host_id, host),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn broadcasting_to_an_unknown_room_is_a_no_op() {
        let hub = ChangeBroadcaster::new(8);
        hub.broadcast(
            Uuid::new_v4(),
            RoomEvent::HostChanged {
                host_id: Uuid::new_v4(),
            },
        );
        assert_eq!(hub.subscriber_count(Uuid::new_v4()), 0);
    }
}

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Events delivered to subscribed viewers.
#[derive(Debug, Clone)]
pub enum Event {
    /// Per-user snapshot: monitor id (string) -> full monitor JSON.
    MonitorList(HashMap<String, Value>),
    /// Global snapshot: maintenance id (string) -> maintenance JSON.
    MaintenanceList(HashMap<String, Value>),
    /// One heartbeat, full JSON view.
    Heartbeat(Value),
}

/// Room every viewer of maintenance state joins; maintenance windows
/// are not scoped to a single owner.
pub const MAINTENANCE_ROOM: &str = "maintenance";

pub fn user_room(user_id: i64) -> String {
    format!("user:{user_id}")
}

const ROOM_CAPACITY: usize = 64;

/// Publish/subscribe fan-out keyed by recipient room.
///
/// Delivery is fire-and-forget: publishing never blocks, carries no
/// acknowledgment, and a slow or disconnected subscriber only loses
/// its own backlog.
pub struct Broadcaster {
    rooms: RwLock<HashMap<String, broadcast::Sender<Event>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self { rooms: RwLock::new(HashMap::new()) }
    }

    /// Join a room, creating it on first subscription.
    pub fn subscribe(&self, room: &str) -> broadcast::Receiver<Event> {
        if let Some(tx) = self.rooms.read().expect("rooms lock poisoned").get(room) {
            return tx.subscribe();
        }

        let mut rooms = self.rooms.write().expect("rooms lock poisoned");
        rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Deliver an event to one room only. A room nobody has joined is
    /// a no-op, as is a room whose subscribers have all disconnected.
    pub fn publish(&self, room: &str, event: Event) {
        let rooms = self.rooms.read().expect("rooms lock poisoned");
        if let Some(tx) = rooms.get(room) {
            // Ignore errors if there are no receivers
            let _ = tx.send(event);
        } else {
            debug!(room, "No subscribers, dropping event");
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[tokio::test]
    async fn events_reach_only_the_target_room() {
        let broadcaster = Broadcaster::new();
        let mut user_a = broadcaster.subscribe(&user_room(1));
        let mut user_b = broadcaster.subscribe(&user_room(2));

        broadcaster.publish(&user_room(1), Event::MonitorList(HashMap::new()));

        assert!(matches!(user_a.try_recv(), Ok(Event::MonitorList(_))));
        assert!(matches!(user_b.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn publishing_without_subscribers_does_not_block_or_panic() {
        let broadcaster = Broadcaster::new();
        broadcaster.publish("user:404", Event::Heartbeat(serde_json::json!({})));
    }

    #[tokio::test]
    async fn late_subscriber_sees_later_events_only() {
        let broadcaster = Broadcaster::new();
        broadcaster.publish(MAINTENANCE_ROOM, Event::MaintenanceList(HashMap::new()));

        let mut viewer = broadcaster.subscribe(MAINTENANCE_ROOM);
        assert!(matches!(viewer.try_recv(), Err(TryRecvError::Empty)));

        broadcaster.publish(MAINTENANCE_ROOM, Event::MaintenanceList(HashMap::new()));
        assert!(matches!(viewer.try_recv(), Ok(Event::MaintenanceList(_))));
    }
}

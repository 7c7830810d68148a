//! Real-time event channels

use crate::{types::RealtimeEvent, types::Room, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

/// Emits events into company/driver rooms
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Emit one event into a room
    async fn emit(&self, room: &Room, event: &RealtimeEvent) -> Result<()>;
}

/// An event together with the room it was addressed to
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    /// Target room
    pub room: Room,
    /// Event
    pub event: RealtimeEvent,
}

/// In-process channel backed by a broadcast sender
///
/// Keeps the most recent `capacity` emissions so callers can inspect them.
pub struct InMemoryRealtime {
    sender: broadcast::Sender<Emitted>,
    log: Mutex<VecDeque<Emitted>>,
    capacity: usize,
}

impl InMemoryRealtime {
    /// Create a channel retaining up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            log: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Subscribe to every subsequent emission
    pub fn subscribe(&self) -> broadcast::Receiver<Emitted> {
        self.sender.subscribe()
    }

    /// Snapshot of retained emissions, oldest first
    pub async fn events(&self) -> Vec<Emitted> {
        self.log.lock().await.iter().cloned().collect()
    }

    /// Retained emissions addressed to `room`
    pub async fn events_for(&self, room: &Room) -> Vec<RealtimeEvent> {
        self.log
            .lock()
            .await
            .iter()
            .filter(|e| &e.room == room)
            .map(|e| e.event.clone())
            .collect()
    }

    /// Drop retained emissions
    pub async fn clear(&self) {
        self.log.lock().await.clear();
    }
}

impl Default for InMemoryRealtime {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl RealtimeChannel for InMemoryRealtime {
    async fn emit(&self, room: &Room, event: &RealtimeEvent) -> Result<()> {
        let emitted = Emitted {
            room: room.clone(),
            event: event.clone(),
        };

        {
            let mut log = self.log.lock().await;
            if log.len() == self.capacity {
                log.pop_front();
            }
            log.push_back(emitted.clone());
        }

        // No subscribers is not an error
        let receivers = self.sender.send(emitted).unwrap_or(0);
        debug!(room = %room, event = %event.name, receivers, "Emitted real-time event");
        Ok(())
    }
}

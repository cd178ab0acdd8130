//! Event bus
//!
//! Typed push channel from the backend to subscribed clients. Delivery is
//! at-most-once and in-order per subscriber; a subscriber that lags behind
//! the channel capacity loses messages (and the WebSocket layer drops it).
//! There is no persistent queue: a late subscriber sees the current catalog
//! on connect plus future events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::jobs::Job;
use crate::models::CatalogSnapshot;

const BUS_CAPACITY: usize = 1024;

/// Messages pushed to subscribed clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BusEvent {
    CatalogSnapshot(CatalogSnapshot),
    JobCreated(Job),
    JobUpdated(Job),
    JobError(Job),
    CaptureComplete(Job),
    ClipComplete(Job),
    PreviewComplete { job_id: Uuid, frames: usize },
    UploadComplete(Job),
}

/// Process-wide broadcast bus.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Publish to all current subscribers. With no subscribers the event is
    /// dropped silently; that is the normal idle state.
    pub fn publish(&self, event: BusEvent) {
        match self.tx.send(event) {
            Ok(receivers) => {
                tracing::trace!(receivers, "published bus event");
            }
            Err(_) => {
                tracing::trace!("no bus subscribers, event dropped");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let job = Job::new(Platform::Twitch, "kai");
        bus.publish(BusEvent::JobCreated(job.clone()));
        bus.publish(BusEvent::JobUpdated(job));

        assert!(matches!(rx.recv().await.unwrap(), BusEvent::JobCreated(_)));
        assert!(matches!(rx.recv().await.unwrap(), BusEvent::JobUpdated(_)));
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let job = Job::new(Platform::Kick, "waxiest");
        let v = serde_json::to_value(BusEvent::JobCreated(job)).unwrap();
        assert_eq!(v["type"], "job_created");
        assert_eq!(v["data"]["platform"], "kick");
    }
}

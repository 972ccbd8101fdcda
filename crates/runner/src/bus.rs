use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::event::Event;

/// Capacity of each subscriber channel. A subscriber that falls further
/// behind than this loses events on its live channel and must reconcile from
/// the durable log.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

/// Per-task fan-out of live events to bounded subscriber channels.
///
/// Publishing never blocks the worker: a full channel drops the event for
/// that subscriber only, a closed channel is deregistered on the spot.
#[derive(Default)]
pub struct SubscriptionBus {
    channels: Mutex<HashMap<Uuid, Vec<mpsc::Sender<Event>>>>,
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber for a task and return the receive end.
    /// Unsubscribing is implicit: drop the receiver and the registration is
    /// swept on the next publish.
    pub fn subscribe(&self, task_id: Uuid) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        self.channels.lock().entry(task_id).or_default().push(tx);
        rx
    }

    pub fn publish(&self, event: &Event) {
        let mut channels = self.channels.lock();
        let Some(senders) = channels.get_mut(&event.task_id) else {
            return;
        };

        senders.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(
                    task_id = %event.task_id,
                    event_id = event.event_id,
                    "subscriber channel full, dropping live event"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if senders.is_empty() {
            channels.remove(&event.task_id);
        }
    }

    /// Drop every registration for a task. Subscribers still drain whatever
    /// is buffered in their channel, then observe the close.
    pub fn remove_task(&self, task_id: Uuid) {
        self.channels.lock().remove(&task_id);
    }

    pub fn subscriber_count(&self, task_id: Uuid) -> usize {
        self.channels
            .lock()
            .get(&task_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

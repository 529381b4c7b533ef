// ABOUTME: EventBroadcaster - fans project events out to live subscribers
// ABOUTME: Publishing never blocks; subscribers that fall behind lose their oldest buffered events

use crate::event::{EventKind, ProjectEvent};
use chrono::Utc;
use futures::Stream;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default per-subscriber buffer when no configuration is supplied
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// A project's sequence counter, plus a sender while anyone is subscribed
struct ProjectChannel {
    sender: Option<broadcast::Sender<ProjectEvent>>,
    next_sequence: u64,
}

/// Central owner of every project's event channel.
///
/// Cloning is cheap and every clone publishes into the same channels.
#[derive(Clone)]
pub struct EventBroadcaster {
    channels: Arc<Mutex<HashMap<String, ProjectChannel>>>,
    queue_depth: usize,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

impl EventBroadcaster {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            queue_depth: queue_depth.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProjectChannel>> {
        // Channel state stays consistent even if a holder panicked mid-publish
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn channel<'a>(
        channels: &'a mut HashMap<String, ProjectChannel>,
        project_id: &str,
    ) -> &'a mut ProjectChannel {
        channels
            .entry(project_id.to_string())
            .or_insert_with(|| ProjectChannel {
                sender: None,
                next_sequence: 1,
            })
    }

    /// Publish an event to every current subscriber of `project_id`.
    ///
    /// Returns the sequence number assigned to the event. Sequence numbers keep
    /// increasing even when nobody is listening.
    pub fn publish(&self, project_id: &str, kind: EventKind, payload: Value) -> u64 {
        let mut channels = self.lock();
        let channel = Self::channel(&mut channels, project_id);

        let sequence = channel.next_sequence;
        channel.next_sequence += 1;

        let event = ProjectEvent {
            project_id: project_id.to_string(),
            sequence,
            kind,
            payload,
            timestamp: Utc::now(),
        };

        // Sending while holding the lock keeps delivery order equal to sequence order
        let live = channel.sender.as_ref().filter(|sender| sender.receiver_count() > 0);
        if let Some(sender) = live {
            let _ = sender.send(event);
        } else {
            // Everyone unsubscribed; the counter stays, the buffer goes
            channel.sender = None;
            debug!(
                "No subscribers for {} event #{} on project {}",
                kind, sequence, project_id
            );
        }
        sequence
    }

    /// Open a live stream of events for `project_id`, starting with the next publish.
    pub fn subscribe(&self, project_id: &str) -> Subscription {
        let mut channels = self.lock();
        let channel = Self::channel(&mut channels, project_id);
        debug!("New event subscriber for project {}", project_id);
        Subscription {
            project_id: project_id.to_string(),
            receiver: channel
                .sender
                .get_or_insert_with(|| broadcast::channel(self.queue_depth).0)
                .subscribe(),
            dropped: 0,
        }
    }

    pub fn subscriber_count(&self, project_id: &str) -> usize {
        self.lock()
            .get(project_id)
            .and_then(|channel| channel.sender.as_ref())
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }

    /// Sequence number the next event for `project_id` will carry
    pub fn next_sequence(&self, project_id: &str) -> u64 {
        self.lock()
            .get(project_id)
            .map(|channel| channel.next_sequence)
            .unwrap_or(1)
    }
}

/// A subscriber's handle on one project stream. Dropping it unsubscribes.
pub struct Subscription {
    project_id: String,
    receiver: broadcast::Receiver<ProjectEvent>,
    dropped: u64,
}

impl Subscription {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Events this subscriber lost by falling behind
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Next event, or `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<ProjectEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    warn!(
                        "Subscriber on project {} fell behind, dropped {} events",
                        self.project_id, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<ProjectEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                }
                Err(_) => return None,
            }
        }
    }

    pub fn into_stream(mut self) -> impl Stream<Item = ProjectEvent> {
        async_stream::stream! {
            while let Some(event) = self.recv().await {
                yield event;
            }
        }
    }
}

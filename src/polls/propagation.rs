//! Update Propagation
//!
//! Observers receive one call per message that displays a poll whenever the
//! poll changes.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::types::{FullMessageId, PollId};

/// Receiver of poll update notifications, typically the message layer
pub trait PollObserver: Send + Sync {
    /// `full_message_id` displays `poll_id`, which has changed
    fn on_poll_updated(&self, full_message_id: FullMessageId, poll_id: PollId);
}

/// A single update notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollUpdateEvent {
    pub full_message_id: FullMessageId,
    pub poll_id: PollId,
}

/// Forwards updates to a message layer running on another task
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<PollUpdateEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PollUpdateEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl PollObserver for ChannelObserver {
    fn on_poll_updated(&self, full_message_id: FullMessageId, poll_id: PollId) {
        let event = PollUpdateEvent {
            full_message_id,
            poll_id,
        };
        if self.sender.send(event).is_err() {
            debug!(poll_id = %poll_id, "poll update receiver dropped");
        }
    }
}

/// Discards every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PollObserver for NoopObserver {
    fn on_poll_updated(&self, _full_message_id: FullMessageId, _poll_id: PollId) {}
}

/// Keeps every update in memory for assertions
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingObserver {
    events: parking_lot::Mutex<Vec<PollUpdateEvent>>,
}

#[cfg(test)]
impl RecordingObserver {
    /// Take all updates recorded so far
    pub(crate) fn take(&self) -> Vec<PollUpdateEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

#[cfg(test)]
impl PollObserver for RecordingObserver {
    fn on_poll_updated(&self, full_message_id: FullMessageId, poll_id: PollId) {
        self.events.lock().push(PollUpdateEvent {
            full_message_id,
            poll_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polls::types::{ChatId, MessageId};

    #[tokio::test]
    async fn test_channel_observer_forwards_events() {
        let (observer, mut receiver) = ChannelObserver::new();
        let message = FullMessageId::new(ChatId(1), MessageId(10));

        observer.on_poll_updated(message, PollId::new(42));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.full_message_id, message);
        assert_eq!(event.poll_id, PollId::new(42));
    }

    #[test]
    fn test_channel_observer_tolerates_dropped_receiver() {
        let (observer, receiver) = ChannelObserver::new();
        drop(receiver);
        observer.on_poll_updated(FullMessageId::new(ChatId(1), MessageId(1)), PollId::new(1));
    }
}

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use time::Duration;

use crate::chat::{group_by_time, ChatError, ConversationId, DisplayItem, Message};

/// Change notification delivered to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    MessageInserted(Message),
}

/// In-process fan-out of newly stored messages.
#[derive(Clone, Default)]
pub struct FeedHub {
    inner: Arc<FeedInner>,
}

#[derive(Default)]
struct FeedInner {
    subscribers: Mutex<Vec<Sender<FeedEvent>>>,
}

impl FeedHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = unbounded();
        self.inner.subscribers.lock().push(tx);
        Subscription { receiver: rx }
    }

    /// Sends `event` to every live subscriber and returns how many received it.
    /// Subscribers whose receiving end was dropped are forgotten.
    pub fn publish(&self, event: FeedEvent) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        let delivered = subscribers.len();
        tracing::debug!(delivered, "published feed event");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

pub struct Subscription {
    receiver: Receiver<FeedEvent>,
}

impl Subscription {
    pub fn try_recv(&self) -> Option<FeedEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn pending(&self) -> impl Iterator<Item = FeedEvent> + '_ {
        self.receiver.try_iter()
    }
}

/// Local state of one open conversation screen.
///
/// Holds the messages in ascending `created_at` order and re-derives the
/// display timeline on demand; it never mutates derived output in place.
#[derive(Debug, Clone)]
pub struct ConversationView {
    conversation: ConversationId,
    self_id: String,
    messages: Vec<Message>,
    gap: Duration,
}

impl ConversationView {
    pub fn open(
        conversation: ConversationId,
        self_id: &str,
        history: Vec<Message>,
        gap: Duration,
    ) -> Result<Self, ChatError> {
        conversation.other_participant(self_id)?;
        let mut view = Self {
            conversation,
            self_id: self_id.to_string(),
            messages: Vec::with_capacity(history.len()),
            gap,
        };
        for message in history {
            view.insert(message);
        }
        Ok(view)
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn peer_id(&self) -> &str {
        // Checked in `open`.
        self.conversation
            .other_participant(&self.self_id)
            .unwrap_or(self.self_id.as_str())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Applies one feed event. Returns whether the view changed.
    pub fn apply(&mut self, event: &FeedEvent) -> bool {
        match event {
            FeedEvent::MessageInserted(message) => {
                if message.conversation_id() != self.conversation {
                    tracing::trace!(id = message.id, "ignoring message for another conversation");
                    return false;
                }
                self.insert(message.clone())
            }
        }
    }

    /// Applies everything already queued on `subscription` without blocking.
    pub fn drain(&mut self, subscription: &Subscription) -> usize {
        subscription
            .pending()
            .filter(|event| self.apply(event))
            .count()
    }

    pub fn display_items(&self) -> Vec<DisplayItem<'_>> {
        group_by_time(&self.messages, self.gap)
    }

    fn insert(&mut self, message: Message) -> bool {
        if self.messages.iter().rev().any(|m| m.id == message.id) {
            return false;
        }
        // Late deliveries slot in by time so the timeline's ordering holds.
        let sent_at = message.sent_at();
        let position = match sent_at {
            Some(at) => self
                .messages
                .partition_point(|m| m.sent_at().map_or(true, |existing| existing <= at)),
            None => self.messages.len(),
        };
        self.messages.insert(position, message);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{sample, DEFAULT_GAP};
    use assert_matches::assert_matches;

    fn view(history: Vec<Message>) -> ConversationView {
        ConversationView::open(
            ConversationId::between("alice", "bob"),
            "alice",
            history,
            DEFAULT_GAP,
        )
        .expect("alice is a participant")
    }

    #[test]
    fn hub_fans_out_to_every_subscriber() {
        let hub = FeedHub::new();
        let first = hub.subscribe();
        let second = hub.subscribe();
        let event = FeedEvent::MessageInserted(sample(1, "alice", "bob", "2024-10-19T10:00:00Z"));

        assert_eq!(hub.publish(event.clone()), 2);
        assert_eq!(first.try_recv(), Some(event.clone()));
        assert_eq!(second.try_recv(), Some(event));
        assert_eq!(first.try_recv(), None);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let hub = FeedHub::new();
        let kept = hub.subscribe();
        drop(hub.subscribe());
        let delivered = hub.publish(FeedEvent::MessageInserted(sample(
            1,
            "alice",
            "bob",
            "2024-10-19T10:00:00Z",
        )));
        assert_eq!(delivered, 1);
        assert_eq!(hub.subscriber_count(), 1);
        assert!(kept.try_recv().is_some());
    }

    #[test]
    fn view_appends_own_conversation_and_rebuilds_timeline() {
        let mut view = view(vec![sample(1, "alice", "bob", "2024-10-19T10:00:00Z")]);
        assert_eq!(view.display_items().len(), 2);

        let changed = view.apply(&FeedEvent::MessageInserted(sample(
            2,
            "bob",
            "alice",
            "2024-10-19T10:20:00Z",
        )));
        assert!(changed);
        let items = view.display_items();
        assert_eq!(items.len(), 4);
        assert!(items[2].is_marker());
    }

    #[test]
    fn view_ignores_other_conversations_and_duplicates() {
        let mut view = view(vec![sample(1, "alice", "bob", "2024-10-19T10:00:00Z")]);
        assert!(!view.apply(&FeedEvent::MessageInserted(sample(
            2,
            "alice",
            "carol",
            "2024-10-19T10:01:00Z"
        ))));
        assert!(!view.apply(&FeedEvent::MessageInserted(sample(
            1,
            "alice",
            "bob",
            "2024-10-19T10:00:00Z"
        ))));
        assert_eq!(view.messages().len(), 1);
    }

    #[test]
    fn late_delivery_keeps_ascending_order() {
        let mut view = view(vec![
            sample(1, "alice", "bob", "2024-10-19T10:00:00Z"),
            sample(3, "alice", "bob", "2024-10-19T10:02:00Z"),
        ]);
        view.apply(&FeedEvent::MessageInserted(sample(
            2,
            "bob",
            "alice",
            "2024-10-19T10:01:00Z",
        )));
        let ids: Vec<i64> = view.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn drain_applies_queued_events() {
        let hub = FeedHub::new();
        let sub = hub.subscribe();
        let mut view = view(Vec::new());
        hub.publish(FeedEvent::MessageInserted(sample(
            1,
            "bob",
            "alice",
            "2024-10-19T10:00:00Z",
        )));
        hub.publish(FeedEvent::MessageInserted(sample(
            2,
            "carol",
            "dave",
            "2024-10-19T10:00:30Z",
        )));
        assert_eq!(view.drain(&sub), 1);
        assert_eq!(view.peer_id(), "bob");
    }

    #[test]
    fn outsiders_cannot_open_a_view() {
        assert_matches!(
            ConversationView::open(
                ConversationId::between("alice", "bob"),
                "mallory",
                Vec::new(),
                DEFAULT_GAP,
            ),
            Err(ChatError::NotAParticipant { .. })
        );
    }
}

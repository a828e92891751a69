use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::model::ChatMessage;

/// Immutable view of the list handed to observers. A new `Arc` is published on every change.
pub type Snapshot = Arc<Vec<ChatMessage>>;

/// Ordered conversation. At most the tail may be loading; while it is, it is the only entry
/// that changes. Mutators are crate-private: the session drives every transition.
#[derive(Debug)]
pub struct MessageList {
    messages: Vec<ChatMessage>,
    /// Latest snapshot.
    tx: watch::Sender<Snapshot>,
    /// One queue per subscriber; every change is delivered, none are merged.
    subscribers: Vec<mpsc::UnboundedSender<Snapshot>>,
}

impl Default for MessageList {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageList {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            messages: Vec::new(),
            tx,
            subscribers: Vec::new(),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.messages.last().is_some_and(ChatMessage::is_loading)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn tail(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn as_slice(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    /// Latest-value view; intermediate states may be merged.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// Every published list, in order. The current list is queued first.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Snapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(self.snapshot());
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn append(&mut self, entries: impl IntoIterator<Item = ChatMessage>) {
        self.messages.extend(entries);
        debug_assert!(
            self.messages
                .iter()
                .rev()
                .skip(1)
                .all(|m| !m.is_loading()),
            "only the tail may be loading"
        );
        self.publish();
    }

    pub(crate) fn replace(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
        self.publish();
    }

    pub(crate) fn clear(&mut self) {
        self.messages.clear();
        self.publish();
    }

    /// Overwrite the loading tail. Returns false if there is nothing streaming.
    pub(crate) fn update_tail(&mut self, message: &ChatMessage) -> bool {
        match self.messages.last_mut() {
            Some(tail) if tail.is_loading() => {
                tail.content.clone_from(&message.content);
                tail.role.clone_from(&message.role);
                tail.meta.chunks.clone_from(&message.meta.chunks);
                self.publish();
                true
            }
            _ => false,
        }
    }

    /// Close the loading tail: the only transition that clears `loading`.
    pub(crate) fn finalize_tail(&mut self, timestamp: i64, response_time: String) -> bool {
        match self.messages.last_mut() {
            Some(tail) if tail.is_loading() => {
                tail.timestamp = timestamp;
                tail.meta.loading = false;
                tail.meta.response_time = response_time;
                self.publish();
                true
            }
            _ => false,
        }
    }

    fn publish(&mut self) {
        let snapshot = Arc::new(self.messages.clone());
        self.subscribers
            .retain(|sub| sub.send(snapshot.clone()).is_ok());
        self.tx.send_replace(snapshot);
    }
}

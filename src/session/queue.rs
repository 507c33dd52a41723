use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::store::ClientStore;
use crate::types::QueuedMessage;

/// FIFO of messages submitted while a turn was running.
///
/// Every mutation writes the `{prompt, display_text}` projection through the
/// store. Images live only in memory.
pub struct MessageQueue {
    chat_id: String,
    items: VecDeque<QueuedMessage>,
    store: Arc<dyn ClientStore>,
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("chat_id", &self.chat_id)
            .field("len", &self.items.len())
            .finish()
    }
}

impl MessageQueue {
    /// Load the durable projection for `chat_id`.
    pub fn restore(chat_id: impl Into<String>, store: Arc<dyn ClientStore>) -> Result<Self> {
        let chat_id = chat_id.into();
        let items: VecDeque<QueuedMessage> = store.load_queue(&chat_id)?.into();
        if !items.is_empty() {
            debug!(chat_id = %chat_id, count = items.len(), "restored queued messages");
        }
        Ok(Self {
            chat_id,
            items,
            store,
        })
    }

    pub fn empty(chat_id: impl Into<String>, store: Arc<dyn ClientStore>) -> Self {
        Self {
            chat_id: chat_id.into(),
            items: VecDeque::new(),
            store,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> Vec<QueuedMessage> {
        self.items.iter().cloned().collect()
    }

    /// Append and persist. Returns the 1-based position.
    pub fn push(&mut self, message: QueuedMessage) -> usize {
        self.items.push_back(message);
        self.persist();
        self.items.len()
    }

    /// Take the oldest message and persist the remainder.
    pub fn pop(&mut self) -> Option<QueuedMessage> {
        let message = self.items.pop_front();
        if message.is_some() {
            self.persist();
        }
        message
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.persist();
    }

    /// A failed write keeps the in-memory queue authoritative for this
    /// process.
    fn persist(&self) {
        let items: Vec<QueuedMessage> = self.items.iter().cloned().collect();
        if let Err(err) = self.store.save_queue(&self.chat_id, &items) {
            warn!(chat_id = %self.chat_id, error = %err, "failed to persist queue");
        }
    }
}

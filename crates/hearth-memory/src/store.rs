//! [`ConversationStore`] – authoritative in-memory conversation state.
//!
//! One [`parking_lot::RwLock`] guards the whole map: readers (`get`,
//! `recent_messages`, `stats`, `all`) run concurrently, writers (`create`,
//! `update`, `add_message`, `update_context`, `touch`, `delete`, `cleanup`) are
//! exclusive.  The lock is never held across a call into the
//! [`ConversationRepository`]; persistence happens after the guard is
//! dropped and its failures are logged, not returned.
//!
//! # Example
//!
//! ```rust
//! use hearth_memory::ConversationStore;
//! use hearth_types::Message;
//!
//! let store = ConversationStore::new();
//! let conv = store.create();
//! store.add_message(conv.id, Message::user("is the porch light on?")).unwrap();
//!
//! let recent = store.recent_messages(conv.id, 10).unwrap();
//! assert_eq!(recent.len(), 1);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use hearth_types::{Context, Conversation, HearthError, Message};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::repository::ConversationRepository;

/// Counts reported by [`ConversationStore::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub conversations: usize,
    pub messages: usize,
}

/// Thread-safe conversation store with optional durable backing.
pub struct ConversationStore {
    conversations: RwLock<HashMap<Uuid, Conversation>>,
    repository: Option<Arc<dyn ConversationRepository>>,
}

impl ConversationStore {
    /// A purely in-memory store.
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            repository: None,
        }
    }

    /// A store backed by `repository`.  Every durable conversation is
    /// preloaded; a preload failure is logged and the store starts empty.
    pub fn with_repository(repository: Arc<dyn ConversationRepository>) -> Self {
        let preloaded: HashMap<Uuid, Conversation> = match repository.load_all() {
            Ok(all) => {
                info!(count = all.len(), "preloaded conversations from storage");
                all.into_iter().map(|c| (c.id, c)).collect()
            }
            Err(e) => {
                warn!(error = %e, "failed to preload conversations; starting empty");
                HashMap::new()
            }
        };
        Self {
            conversations: RwLock::new(preloaded),
            repository: Some(repository),
        }
    }

    // -------------------------------------------------------------------------
    // Writers
    // -------------------------------------------------------------------------

    /// Start a new, empty conversation and return a snapshot of it.
    pub fn create(&self) -> Conversation {
        let conversation = Conversation::new();
        self.conversations
            .write()
            .insert(conversation.id, conversation.clone());
        debug!(conversation_id = %conversation.id, "conversation created");
        conversation
    }

    /// Replace a stored conversation, stamping `updated_at` with the current
    /// time, then persist it best-effort.
    ///
    /// Message timestamps are clamped forward like [`Self::add_message`], so
    /// the stored order is the order the list was given in.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::NotFound`] if `conversation.id` is unknown.
    pub fn update(&self, mut conversation: Conversation) -> Result<(), HearthError> {
        let id = conversation.id;
        {
            let mut map = self.conversations.write();
            let slot = map
                .get_mut(&id)
                .ok_or_else(|| HearthError::not_found("conversation", id))?;
            clamp_forward(&mut conversation.messages);
            conversation.updated_at = Utc::now().max(conversation.created_at);
            *slot = conversation.clone();
        }
        self.persist(&conversation);
        Ok(())
    }

    /// Append `message` to a conversation.
    ///
    /// A message stamped earlier than the current last message is moved
    /// forward to that message's timestamp so ordering never regresses.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::NotFound`] if `id` is unknown.
    pub fn add_message(&self, id: Uuid, mut message: Message) -> Result<(), HearthError> {
        let mut map = self.conversations.write();
        let conversation = map
            .get_mut(&id)
            .ok_or_else(|| HearthError::not_found("conversation", id))?;
        if let Some(last) = conversation.messages.last()
            && message.timestamp < last.timestamp
        {
            message.timestamp = last.timestamp;
        }
        conversation.updated_at = Utc::now().max(conversation.updated_at);
        conversation.messages.push(message);
        Ok(())
    }

    /// Replace the working context of a conversation.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::NotFound`] if `id` is unknown.
    pub fn update_context(&self, id: Uuid, context: Context) -> Result<(), HearthError> {
        let mut map = self.conversations.write();
        let conversation = map
            .get_mut(&id)
            .ok_or_else(|| HearthError::not_found("conversation", id))?;
        conversation.context = context;
        conversation.updated_at = Utc::now().max(conversation.updated_at);
        Ok(())
    }

    /// Stamp `updated_at` and persist the current in-memory state
    /// best-effort.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::NotFound`] if `id` is unknown.
    pub fn touch(&self, id: Uuid) -> Result<(), HearthError> {
        let snapshot = {
            let mut map = self.conversations.write();
            let conversation = map
                .get_mut(&id)
                .ok_or_else(|| HearthError::not_found("conversation", id))?;
            conversation.updated_at = Utc::now().max(conversation.updated_at);
            conversation.clone()
        };
        self.persist(&snapshot);
        Ok(())
    }

    /// Remove a conversation from memory and, best-effort, from storage.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::NotFound`] if `id` is unknown.
    pub fn delete(&self, id: Uuid) -> Result<(), HearthError> {
        let removed = self.conversations.write().remove(&id);
        if removed.is_none() {
            return Err(HearthError::not_found("conversation", id));
        }
        self.forget(&[id]);
        Ok(())
    }

    /// Delete every conversation idle for longer than `max_age` and return
    /// how many were removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let cutoff = TimeDelta::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.cleanup_before(cutoff)
    }

    /// Delete every conversation whose `updated_at` is strictly earlier than
    /// `cutoff`.  Repeating the call with the same cutoff removes nothing.
    pub fn cleanup_before(&self, cutoff: DateTime<Utc>) -> usize {
        let expired: Vec<Uuid> = {
            let mut map = self.conversations.write();
            let expired: Vec<Uuid> = map
                .values()
                .filter(|c| c.updated_at < cutoff)
                .map(|c| c.id)
                .collect();
            for id in &expired {
                map.remove(id);
            }
            expired
        };
        if !expired.is_empty() {
            info!(removed = expired.len(), %cutoff, "cleaned up idle conversations");
            self.forget(&expired);
        }
        expired.len()
    }

    // -------------------------------------------------------------------------
    // Readers
    // -------------------------------------------------------------------------

    /// Snapshot of one conversation.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::NotFound`] if `id` is unknown.
    pub fn get(&self, id: Uuid) -> Result<Conversation, HearthError> {
        self.conversations
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| HearthError::not_found("conversation", id))
    }

    /// The last `min(limit, len)` messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`HearthError::NotFound`] if `id` is unknown.
    pub fn recent_messages(&self, id: Uuid, limit: usize) -> Result<Vec<Message>, HearthError> {
        let map = self.conversations.read();
        let conversation = map
            .get(&id)
            .ok_or_else(|| HearthError::not_found("conversation", id))?;
        let start = conversation.messages.len().saturating_sub(limit);
        Ok(conversation.messages[start..].to_vec())
    }

    pub fn stats(&self) -> StoreStats {
        let map = self.conversations.read();
        StoreStats {
            conversations: map.len(),
            messages: map.values().map(|c| c.messages.len()).sum(),
        }
    }

    /// Snapshot of every conversation, most recently updated first.
    pub fn all(&self) -> Vec<Conversation> {
        let mut all: Vec<Conversation> = self.conversations.read().values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all
    }

    // -------------------------------------------------------------------------
    // Persistence (never called with the lock held)
    // -------------------------------------------------------------------------

    fn persist(&self, conversation: &Conversation) {
        if let Some(repo) = &self.repository
            && let Err(e) = repo.save(conversation)
        {
            warn!(conversation_id = %conversation.id, error = %e, "failed to persist conversation");
        }
    }

    fn forget(&self, ids: &[Uuid]) {
        let Some(repo) = &self.repository else {
            return;
        };
        for id in ids {
            if let Err(e) = repo.delete(*id) {
                warn!(conversation_id = %id, error = %e, "failed to delete stored conversation");
            }
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

/// Move any timestamp that precedes its predecessor up to it.
fn clamp_forward(messages: &mut [Message]) {
    for i in 1..messages.len() {
        let previous = messages[i - 1].timestamp;
        if messages[i].timestamp < previous {
            messages[i].timestamp = previous;
        }
    }
}

use crate::{
    ConversationId, DocumentPath, DocumentStore, Error, FieldUpdates, Result, UserIdentity,
    ACTIVE_FIELD, SEEN_FIELD,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

type PresenceKey = (UserIdentity, ConversationId);

/// Writes the current user's seen/active flags for a conversation.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn DocumentStore>,
    attached: Arc<Mutex<HashSet<PresenceKey>>>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            attached: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Marks the conversation seen and active. The returned guard detaches
    /// exactly once, on [`PresenceGuard::release`] or on drop.
    pub fn attach(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserIdentity,
    ) -> Result<PresenceGuard> {
        let path = DocumentPath::user_chats(user_id)?;
        let fields = FieldUpdates::new()
            .set(field(conversation_id, SEEN_FIELD), true)
            .set(field(conversation_id, ACTIVE_FIELD), true);
        self.store
            .update_fields(&path, fields)
            .map_err(Error::PresenceFailed)?;

        self.attached
            .lock()
            .insert((user_id.clone(), conversation_id.clone()));
        tracing::debug!(conversation = %conversation_id, user = %user_id, "presence attached");

        Ok(PresenceGuard {
            tracker: self.clone(),
            conversation_id: conversation_id.clone(),
            user_id: user_id.clone(),
            released: false,
        })
    }

    /// Clears the active flag. A conversation that is not attached is left alone.
    pub fn detach(&self, conversation_id: &ConversationId, user_id: &UserIdentity) -> Result<()> {
        let key = (user_id.clone(), conversation_id.clone());
        if !self.attached.lock().remove(&key) {
            return Ok(());
        }

        let path = DocumentPath::user_chats(user_id)?;
        self.store
            .update_fields(
                &path,
                FieldUpdates::new().set(field(conversation_id, ACTIVE_FIELD), false),
            )
            .map_err(Error::PresenceFailed)?;
        tracing::debug!(conversation = %conversation_id, user = %user_id, "presence detached");
        Ok(())
    }

    /// Local view of the active flag; it may run ahead of the store.
    pub fn is_active(&self, conversation_id: &ConversationId, user_id: &UserIdentity) -> bool {
        self.attached
            .lock()
            .contains(&(user_id.clone(), conversation_id.clone()))
    }
}

fn field(conversation_id: &ConversationId, name: &str) -> String {
    format!("{}.{}", conversation_id, name)
}

/// Scoped presence for one open conversation.
pub struct PresenceGuard {
    tracker: PresenceTracker,
    conversation_id: ConversationId,
    user_id: UserIdentity,
    released: bool,
}

impl PresenceGuard {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.tracker.detach(&self.conversation_id, &self.user_id)
    }
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(error) = self.tracker.detach(&self.conversation_id, &self.user_id) {
            tracing::warn!(
                conversation = %self.conversation_id,
                error = %error,
                "ignoring failed presence detach"
            );
        }
    }
}

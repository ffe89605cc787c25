use crate::{
    ConversationId, DocumentPath, DocumentStore, Error, FieldUpdates, Message, Result,
    UserIdentity, WriteBatch, LAST_MESSAGE_FIELD, MESSAGES_FIELD, PEER_ID_FIELD, SEEN_FIELD,
};
use std::sync::Arc;

/// The two users of a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participants {
    pub a: UserIdentity,
    pub b: UserIdentity,
}

impl Participants {
    pub fn new(a: UserIdentity, b: UserIdentity) -> Self {
        Self { a, b }
    }

    pub fn contains(&self, user_id: &UserIdentity) -> bool {
        &self.a == user_id || &self.b == user_id
    }

    /// The participant that is not `user_id`.
    pub fn other(&self, user_id: &UserIdentity) -> Option<&UserIdentity> {
        if &self.a == user_id {
            Some(&self.b)
        } else if &self.b == user_id {
            Some(&self.a)
        } else {
            None
        }
    }
}

/// Writes a message to the log and both inbox summaries in one batch.
#[derive(Clone)]
pub struct MessageAppender {
    store: Arc<dyn DocumentStore>,
}

impl MessageAppender {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// The sender's entry is marked seen, the recipient's unseen. `active`
    /// is not written. Any store failure is reported as [`Error::AppendFailed`].
    pub fn append(
        &self,
        conversation_id: &ConversationId,
        participants: &Participants,
        message: &Message,
    ) -> Result<()> {
        let sender = &message.sender_id;
        let recipient = participants.other(sender).ok_or_else(|| {
            Error::InvalidIdentity(format!(
                "{} is not a participant of {}",
                sender, conversation_id
            ))
        })?;

        let body = serde_json::to_value(message)?;
        let mut batch = WriteBatch::new()
            .upsert(
                DocumentPath::chat(conversation_id)?,
                FieldUpdates::new().array_union(MESSAGES_FIELD, vec![body.clone()]),
            )
            .upsert(
                DocumentPath::user_chats(sender)?,
                summary(conversation_id, &body, recipient, true),
            );
        if recipient != sender {
            batch = batch.upsert(
                DocumentPath::user_chats(recipient)?,
                summary(conversation_id, &body, sender, false),
            );
        }

        self.store.commit(batch).map_err(Error::AppendFailed)?;
        tracing::debug!(
            conversation = %conversation_id,
            message = %message.id,
            "message appended"
        );
        Ok(())
    }
}

fn summary(
    conversation_id: &ConversationId,
    message: &serde_json::Value,
    peer: &UserIdentity,
    seen: bool,
) -> FieldUpdates {
    let field = |name: &str| format!("{}.{}", conversation_id, name);
    FieldUpdates::new()
        .set(field(LAST_MESSAGE_FIELD), message.clone())
        .set(field(PEER_ID_FIELD), peer.as_str())
        .set(field(SEEN_FIELD), seen)
}

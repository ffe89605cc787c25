use crate::{
    Callback, CancelHandle, ConversationId, ConversationLog, DocumentPath, DocumentSnapshot,
    DocumentStore, Error, Message, Result, MESSAGES_FIELD,
};
use parking_lot::Mutex;
use std::sync::Arc;

pub type LogCallback = Callback<ConversationLog>;

/// Subscribes to the message log of one conversation.
///
/// `on_update` receives the current log first (empty if the conversation was
/// never written) and again after every change. Stores that do not promise
/// per-document order get a version fence that drops stale snapshots.
pub fn subscribe_log(
    store: &dyn DocumentStore,
    conversation_id: &ConversationId,
    on_update: LogCallback,
) -> Result<CancelHandle> {
    let path = DocumentPath::chat(conversation_id)?;
    let fenced = !store.guarantees_document_order();
    let last_version: Mutex<Option<u64>> = Mutex::new(None);
    let conversation = conversation_id.clone();

    store
        .subscribe_document(
            &path,
            Box::new(move |snapshot: DocumentSnapshot| {
                if fenced {
                    let mut last = last_version.lock();
                    if matches!(*last, Some(seen) if snapshot.version <= seen) {
                        tracing::debug!(
                            conversation = %conversation,
                            version = snapshot.version,
                            "dropping stale conversation snapshot"
                        );
                        return;
                    }
                    *last = Some(snapshot.version);
                }
                on_update(parse_log(&conversation, &snapshot));
            }),
        )
        .map_err(Error::SubscribeFailed)
}

/// Reads a `chats/{id}` snapshot into a log. Malformed messages are skipped.
pub fn parse_log(conversation_id: &ConversationId, snapshot: &DocumentSnapshot) -> ConversationLog {
    let Some(raw) = snapshot
        .data
        .as_ref()
        .and_then(|data| data.get(MESSAGES_FIELD))
    else {
        return ConversationLog::empty(conversation_id.clone());
    };
    let Some(items) = raw.as_array() else {
        tracing::warn!(conversation = %conversation_id, "messages field is not an array");
        return ConversationLog::empty(conversation_id.clone());
    };

    let mut messages = Vec::with_capacity(items.len());
    for item in items {
        let Ok(message) = serde_json::from_value::<Message>(item.clone()) else {
            tracing::warn!(conversation = %conversation_id, "skipping malformed message");
            continue;
        };
        messages.push(message);
    }
    ConversationLog::from_messages(conversation_id.clone(), messages)
}

struct LiveLog {
    conversation_id: ConversationId,
    handle: CancelHandle,
}

/// Holds at most one live log subscription. Subscribing again cancels the
/// previous one before the new listener is registered.
pub struct ConversationSubscription {
    store: Arc<dyn DocumentStore>,
    live: Mutex<Option<LiveLog>>,
}

impl ConversationSubscription {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            live: Mutex::new(None),
        }
    }

    pub fn subscribe(&self, conversation_id: &ConversationId, on_update: LogCallback) -> Result<()> {
        self.cancel();
        let handle = subscribe_log(self.store.as_ref(), conversation_id, on_update)?;
        tracing::debug!(conversation = %conversation_id, "conversation subscribed");
        *self.live.lock() = Some(LiveLog {
            conversation_id: conversation_id.clone(),
            handle,
        });
        Ok(())
    }

    /// Idempotent. No callback of the cancelled subscription runs after this returns.
    pub fn cancel(&self) {
        let previous = self.live.lock().take();
        if let Some(live) = previous {
            live.handle.cancel();
            tracing::debug!(conversation = %live.conversation_id, "conversation unsubscribed");
        }
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.live
            .lock()
            .as_ref()
            .map(|live| live.conversation_id.clone())
    }

    pub fn is_live(&self) -> bool {
        self.live.lock().is_some()
    }
}

impl Drop for ConversationSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

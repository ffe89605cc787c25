#![allow(dead_code)]

use chately_sync::{
    AuthUser, CancelHandle, ConversationId, DocumentCallback, DocumentPath, DocumentSnapshot,
    DocumentStore, FieldValue, InMemoryStore, InboxEntry, Result, StoreResult, SyncConfig,
    SyncEngine, UserIdentity, WriteBatch, WriteOp, USER_CHATS_COLLECTION,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// One field written to a `userChats` document.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxWrite {
    pub user: String,
    pub field: String,
    pub value: serde_json::Value,
}

/// Passes everything to an [`InMemoryStore`] and records inbox field writes
/// in commit order.
#[derive(Clone)]
pub struct RecordingStore {
    pub inner: InMemoryStore,
    writes: Arc<Mutex<Vec<InboxWrite>>>,
}

impl RecordingStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn writes(&self) -> Vec<InboxWrite> {
        self.writes.lock().clone()
    }

    /// `(conversation, active)` for every write of an `active` flag, in order.
    pub fn presence_writes(&self) -> Vec<(String, bool)> {
        self.writes()
            .into_iter()
            .filter_map(|write| {
                let (conversation, field) = write.field.split_once('.')?;
                if field != "active" {
                    return None;
                }
                Some((conversation.to_string(), write.value.as_bool()?))
            })
            .collect()
    }
}

impl DocumentStore for RecordingStore {
    fn get_document(&self, path: &DocumentPath) -> StoreResult<DocumentSnapshot> {
        self.inner.get_document(path)
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut recorded = Vec::new();
        for op in batch.ops() {
            let WriteOp::Update { path, fields, .. } = op else {
                continue;
            };
            if path.collection() != USER_CHATS_COLLECTION {
                continue;
            }
            for (field, value) in fields.iter() {
                if let FieldValue::Value(value) = value {
                    recorded.push(InboxWrite {
                        user: path.id().to_string(),
                        field: field.clone(),
                        value: value.clone(),
                    });
                }
            }
        }
        self.inner.commit(batch)?;
        self.writes.lock().extend(recorded);
        Ok(())
    }

    fn subscribe_document(
        &self,
        path: &DocumentPath,
        callback: DocumentCallback,
    ) -> StoreResult<CancelHandle> {
        self.inner.subscribe_document(path, callback)
    }
}

pub fn user(uid: &str) -> UserIdentity {
    UserIdentity::new(uid)
}

pub fn signed_in(store: Arc<dyn DocumentStore>, uid: &str) -> Result<SyncEngine> {
    let engine = SyncEngine::new(store, SyncConfig::default());
    engine.on_identity_changed(Some(AuthUser::new(uid)))?;
    Ok(engine)
}

pub fn inbox_entry(
    store: &dyn DocumentStore,
    uid: &str,
    conversation: &ConversationId,
) -> Result<Option<InboxEntry>> {
    let snapshot = store.get_document(&DocumentPath::user_chats(&user(uid))?)?;
    let Some(value) = snapshot
        .data
        .and_then(|data| data.get(conversation.as_str()).cloned())
    else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_value(value)?))
}

/// Number of live listeners across every `chats` document in `store`.
pub fn live_chat_listeners(store: &InMemoryStore, conversations: &[ConversationId]) -> usize {
    conversations
        .iter()
        .filter_map(|id| DocumentPath::chat(id).ok())
        .map(|path| store.listener_count(&path))
        .sum()
}

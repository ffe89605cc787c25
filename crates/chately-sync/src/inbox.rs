use crate::{
    Callback, CancelHandle, ConversationId, DocumentPath, DocumentSnapshot, DocumentStore, Error,
    Inbox, InboxEntry, Loadable, Result, UserIdentity,
};
use parking_lot::Mutex;
use std::sync::Arc;

pub type InboxCallback = Callback<Inbox>;

/// Reads a `userChats/{uid}` snapshot. A missing document is an empty inbox;
/// entries that do not parse are skipped.
pub fn parse_inbox(user_id: &UserIdentity, snapshot: &DocumentSnapshot) -> Inbox {
    let mut inbox = Inbox::new();
    let Some(data) = snapshot.data.as_ref() else {
        return inbox;
    };
    let Some(fields) = data.as_object() else {
        tracing::warn!(user = %user_id, "inbox document is not an object");
        return inbox;
    };

    for (key, value) in fields {
        let Ok(entry) = serde_json::from_value::<InboxEntry>(value.clone()) else {
            tracing::warn!(user = %user_id, conversation = %key, "skipping malformed inbox entry");
            continue;
        };
        inbox.insert(ConversationId::from_stored(key.clone()), entry);
    }
    inbox
}

/// Subscribes to a user's inbox. Every delivery carries the whole inbox.
pub fn subscribe_inbox(
    store: &dyn DocumentStore,
    user_id: &UserIdentity,
    on_update: InboxCallback,
) -> Result<CancelHandle> {
    let path = DocumentPath::user_chats(user_id)?;
    let fenced = !store.guarantees_document_order();
    let last_version: Mutex<Option<u64>> = Mutex::new(None);
    let user = user_id.clone();

    store
        .subscribe_document(
            &path,
            Box::new(move |snapshot: DocumentSnapshot| {
                if fenced {
                    let mut last = last_version.lock();
                    if matches!(*last, Some(seen) if snapshot.version <= seen) {
                        return;
                    }
                    *last = Some(snapshot.version);
                }
                on_update(parse_inbox(&user, &snapshot));
            }),
        )
        .map_err(Error::SubscribeFailed)
}

struct LiveInbox {
    user_id: UserIdentity,
    handle: CancelHandle,
}

/// The inbox of the signed-in user, `Pending` until the first delivery.
pub struct InboxSubscription {
    store: Arc<dyn DocumentStore>,
    state: Arc<Mutex<Loadable<Inbox>>>,
    live: Mutex<Option<LiveInbox>>,
}

impl InboxSubscription {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            state: Arc::new(Mutex::new(Loadable::Pending)),
            live: Mutex::new(None),
        }
    }

    /// Replaces any previous subscription. The cached state goes back to
    /// `Pending` until the new subscription delivers.
    pub fn subscribe(&self, user_id: &UserIdentity, on_update: InboxCallback) -> Result<()> {
        self.cancel();

        let state = self.state.clone();
        let handle = subscribe_inbox(
            self.store.as_ref(),
            user_id,
            Box::new(move |inbox: Inbox| {
                *state.lock() = Loadable::Ready(inbox.clone());
                on_update(inbox);
            }),
        )?;
        tracing::debug!(user = %user_id, "inbox subscribed");
        *self.live.lock() = Some(LiveInbox {
            user_id: user_id.clone(),
            handle,
        });
        Ok(())
    }

    pub fn cancel(&self) {
        let previous = self.live.lock().take();
        if let Some(live) = previous {
            live.handle.cancel();
            tracing::debug!(user = %live.user_id, "inbox unsubscribed");
        }
        *self.state.lock() = Loadable::Pending;
    }

    pub fn state(&self) -> Loadable<Inbox> {
        self.state.lock().clone()
    }

    pub fn entry(&self, conversation_id: &ConversationId) -> Option<InboxEntry> {
        self.state
            .lock()
            .ready()
            .and_then(|inbox| inbox.get(conversation_id).cloned())
    }

    pub fn user_id(&self) -> Option<UserIdentity> {
        self.live.lock().as_ref().map(|live| live.user_id.clone())
    }
}

impl Drop for InboxSubscription {
    fn drop(&mut self) {
        if let Some(live) = self.live.get_mut().take() {
            live.handle.cancel();
        }
    }
}

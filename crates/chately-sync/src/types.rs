use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Collection holding one message log per conversation.
pub const CHATS_COLLECTION: &str = "chats";
/// Collection holding one inbox document per user.
pub const USER_CHATS_COLLECTION: &str = "userChats";
/// Collection holding one profile document per user.
pub const USERS_COLLECTION: &str = "users";

pub const MESSAGES_FIELD: &str = "messages";
pub const LAST_MESSAGE_FIELD: &str = "lastMessage";
pub const PEER_ID_FIELD: &str = "peerId";
pub const SEEN_FIELD: &str = "seen";
pub const ACTIVE_FIELD: &str = "active";

pub const DEFAULT_BIO: &str = "A Bio.";
pub const DEFAULT_STATUS: &str = "off";
pub const DEFAULT_LOCATION: &str = "Earth";

/// Stable identifier issued by the authentication provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserIdentity(String);

impl UserIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserIdentity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for UserIdentity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Canonical key of a two-party conversation. Built by [`crate::derive_conversation_id`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub(crate) fn from_canonical(id: String) -> Self {
        Self(id)
    }

    /// Wraps a key read back from the store. No canonicalization is applied.
    pub fn from_stored(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Milliseconds since the UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: UserIdentity,
    pub body: String,
    pub sent_at: u64,
}

impl Message {
    pub fn new(sender_id: UserIdentity, body: impl Into<String>, sent_at: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id,
            body: body.into(),
            sent_at,
        }
    }

    fn order_key(&self) -> (u64, &str) {
        (self.sent_at, self.id.as_str())
    }
}

/// Messages of one conversation, ordered by `sent_at` then `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationLog {
    conversation_id: ConversationId,
    messages: Vec<Message>,
}

impl ConversationLog {
    pub fn empty(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
        }
    }

    pub fn from_messages(conversation_id: ConversationId, mut messages: Vec<Message>) -> Self {
        messages.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        Self {
            conversation_id,
            messages,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }

    /// Returns a copy with `extra` messages merged in, skipping ids already present.
    pub(crate) fn with_pending(&self, extra: &[Message]) -> Self {
        let mut messages = self.messages.clone();
        messages.extend(extra.iter().filter(|m| !self.contains(&m.id)).cloned());
        Self::from_messages(self.conversation_id.clone(), messages)
    }
}

/// Per-user summary of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<UserIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxItem {
    pub conversation_id: ConversationId,
    pub entry: InboxEntry,
}

/// All inbox entries of one user, keyed by conversation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Inbox {
    entries: BTreeMap<ConversationId, InboxEntry>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, conversation_id: ConversationId, entry: InboxEntry) {
        self.entries.insert(conversation_id, entry);
    }

    pub fn get(&self, conversation_id: &ConversationId) -> Option<&InboxEntry> {
        self.entries.get(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConversationId, &InboxEntry)> {
        self.entries.iter()
    }

    /// Entries by most recent message first. Entries without a message come last.
    pub fn sorted(&self) -> Vec<InboxItem> {
        let mut items: Vec<InboxItem> = self
            .entries
            .iter()
            .map(|(conversation_id, entry)| InboxItem {
                conversation_id: conversation_id.clone(),
                entry: entry.clone(),
            })
            .collect();
        items.sort_by(|a, b| {
            let a_at = a.entry.last_message.as_ref().map(|m| m.sent_at);
            let b_at = b.entry.last_message.as_ref().map(|m| m.sent_at);
            b_at.cmp(&a_at)
                .then_with(|| a.conversation_id.cmp(&b.conversation_id))
        });
        items
    }
}

/// A value that has either been delivered at least once or is still loading.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Loadable<T> {
    #[default]
    Pending,
    Ready(T),
}

impl<T> Loadable<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Loadable::Pending)
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Loadable::Ready(value) => Some(value),
            Loadable::Pending => None,
        }
    }
}

/// Document stored under `users/{uid}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: UserIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub bio: String,
    pub status: String,
    pub location: String,
    #[serde(default)]
    pub contacts: Vec<UserIdentity>,
}

impl UserProfile {
    pub fn new(uid: UserIdentity) -> Self {
        Self {
            uid,
            display_name: None,
            email: None,
            photo_url: None,
            bio: DEFAULT_BIO.to_string(),
            status: DEFAULT_STATUS.to_string(),
            location: DEFAULT_LOCATION.to_string(),
            contacts: Vec::new(),
        }
    }
}

//! Client-side synchronization core for two-party chat.
//!
//! Keeps one user's inbox and one open conversation in step with a
//! push-capable [`DocumentStore`], and writes the user's presence as
//! conversations are opened and closed.

pub mod appender;
pub mod auth;
pub mod config;
pub mod conversation;
pub mod document;
pub mod engine;
pub mod error;
pub mod file_store;
pub mod identity;
pub mod inbox;
pub mod presence;
pub mod profile;
pub mod remote;
pub mod store;
pub mod subscription;
pub mod types;

pub use appender::{MessageAppender, Participants};
pub use auth::{ensure_user_documents, AuthCallback, AuthProvider, AuthUser, SessionAuth};
pub use config::SyncConfig;
pub use conversation::{parse_log, subscribe_log, ConversationSubscription, LogCallback};
pub use document::{DocumentPath, DocumentSnapshot, FieldUpdates, FieldValue, WriteBatch, WriteOp};
pub use engine::{ConnectionStatus, SelectOutcome, SyncEngine, ViewPhase};
pub use error::{Error, Result, StoreError, StoreResult};
pub use file_store::FileStore;
pub use identity::{derive_conversation_id, validate_identity, CONVERSATION_SEPARATOR};
pub use inbox::{parse_inbox, subscribe_inbox, InboxCallback, InboxSubscription};
pub use presence::{PresenceGuard, PresenceTracker};
pub use profile::{load_profile, update_profile, ProfileEdit};
pub use remote::{Push, RemoteStore, StoreRequest, StoreServer};
pub use store::{DocumentStore, InMemoryStore};
pub use subscription::{
    Callback, CancelHandle, DocumentCallback, DocumentListener, Listener, Unsubscribe,
};
pub use types::*;

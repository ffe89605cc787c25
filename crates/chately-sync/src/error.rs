use thiserror::Error;

/// Errors reported by a [`DocumentStore`](crate::DocumentStore) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Invalid document path: {0}")]
    InvalidPath(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store request timed out")]
    Timeout,

    #[error("Malformed document: {0}")]
    Malformed(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Failed to subscribe: {0}")]
    SubscribeFailed(#[source] StoreError),

    #[error("Failed to append message: {0}")]
    AppendFailed(#[source] StoreError),

    #[error("Failed to write presence: {0}")]
    PresenceFailed(#[source] StoreError),

    #[error("No user is signed in")]
    NotSignedIn,

    #[error("No conversation is open")]
    NoActiveConversation,

    #[error("Unknown conversation: {0}")]
    UnknownConversation(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// The underlying store failure, if this error came from the store collaborator.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Error::SubscribeFailed(e)
            | Error::AppendFailed(e)
            | Error::PresenceFailed(e)
            | Error::Store(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

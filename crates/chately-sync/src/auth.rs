use crate::{
    validate_identity, Callback, CancelHandle, DocumentPath, DocumentStore, Listener, Result,
    UserIdentity, UserProfile, WriteBatch,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

/// A signed-in user as reported by the authentication provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub uid: UserIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl AuthUser {
    pub fn new(uid: impl Into<UserIdentity>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
            email: None,
            photo_url: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Profile written the first time this user signs in.
    pub fn initial_profile(&self) -> UserProfile {
        let mut profile = UserProfile::new(self.uid.clone());
        profile.display_name = self.display_name.clone();
        profile.email = self.email.clone();
        profile.photo_url = self.photo_url.clone();
        profile
    }
}

pub type AuthCallback = Callback<Option<AuthUser>>;

/// Session source consumed by the engine.
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<AuthUser>;

    /// `callback` receives the current session immediately and again on
    /// every sign-in or sign-out.
    fn subscribe(&self, callback: AuthCallback) -> CancelHandle;
}

type AuthListener = Listener<Option<AuthUser>>;

#[derive(Default)]
struct SessionInner {
    user: Mutex<Option<AuthUser>>,
    listeners: Mutex<Vec<Arc<AuthListener>>>,
}

/// In-process session holder.
#[derive(Clone, Default)]
pub struct SessionAuth {
    inner: Arc<SessionInner>,
}

impl SessionAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user: AuthUser) -> Result<Self> {
        let auth = Self::new();
        auth.sign_in(user)?;
        Ok(auth)
    }

    /// Replaces the current session. Signing in as the current user again
    /// notifies nobody.
    pub fn sign_in(&self, user: AuthUser) -> Result<()> {
        validate_identity(&user.uid)?;
        {
            let mut current = self.inner.user.lock();
            if current.as_ref() == Some(&user) {
                return Ok(());
            }
            *current = Some(user.clone());
        }
        tracing::info!(user = %user.uid, "signed in");
        self.notify(Some(user));
        Ok(())
    }

    pub fn sign_out(&self) {
        let previous = self.inner.user.lock().take();
        if let Some(user) = previous {
            tracing::info!(user = %user.uid, "signed out");
            self.notify(None);
        }
    }

    fn notify(&self, user: Option<AuthUser>) {
        let listeners: Vec<Arc<AuthListener>> = self.inner.listeners.lock().clone();
        for listener in listeners {
            listener.deliver(user.clone());
        }
    }
}

impl AuthProvider for SessionAuth {
    fn current_user(&self) -> Option<AuthUser> {
        self.inner.user.lock().clone()
    }

    fn subscribe(&self, callback: AuthCallback) -> CancelHandle {
        let listener = Listener::new(callback);
        self.inner.listeners.lock().push(listener.clone());

        let registry: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let listener_id = listener.id().to_string();
        let handle = listener.handle(Box::new(move || {
            if let Some(inner) = registry.upgrade() {
                inner.listeners.lock().retain(|l| l.id() != listener_id);
            }
        }));

        listener.deliver(self.current_user());
        handle
    }
}

/// Creates `users/{uid}` and an empty `userChats/{uid}` when they are missing.
/// Existing documents are left as they are.
pub fn ensure_user_documents(store: &dyn DocumentStore, user: &AuthUser) -> Result<()> {
    validate_identity(&user.uid)?;
    let profile_path = DocumentPath::user(&user.uid)?;
    let inbox_path = DocumentPath::user_chats(&user.uid)?;

    let mut batch = WriteBatch::new();
    if !store.get_document(&profile_path)?.exists() {
        batch = batch.set(profile_path, serde_json::to_value(user.initial_profile())?, false);
    }
    if !store.get_document(&inbox_path)?.exists() {
        batch = batch.set(inbox_path, serde_json::json!({}), false);
    }
    if batch.is_empty() {
        return Ok(());
    }

    store.commit(batch)?;
    tracing::info!(user = %user.uid, "created user documents");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, InMemoryStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (AuthCallback, Arc<Mutex<Vec<Option<UserIdentity>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (
            Box::new(move |user: Option<AuthUser>| sink.lock().push(user.map(|u| u.uid))),
            seen,
        )
    }

    #[test]
    fn subscribe_reports_current_session_then_changes() {
        let auth = SessionAuth::new();
        let (callback, seen) = recorder();
        let _handle = auth.subscribe(callback);

        auth.sign_in(AuthUser::new("alice")).unwrap();
        auth.sign_in(AuthUser::new("alice")).unwrap();
        auth.sign_out();
        auth.sign_out();

        assert_eq!(
            *seen.lock(),
            vec![None, Some(UserIdentity::new("alice")), None]
        );
    }

    #[test]
    fn cancelled_listener_is_not_notified() {
        let auth = SessionAuth::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handle = auth.subscribe(Box::new(move |_: Option<AuthUser>| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        drop(handle);

        auth.sign_in(AuthUser::new("alice")).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(auth.inner.listeners.lock().is_empty());
    }

    #[test]
    fn invalid_uid_is_rejected() {
        let auth = SessionAuth::new();
        assert!(matches!(
            auth.sign_in(AuthUser::new("a/b")),
            Err(Error::InvalidIdentity(_))
        ));
        assert_eq!(auth.current_user(), None);
    }

    #[test]
    fn ensure_creates_profile_and_inbox_once() {
        let store = InMemoryStore::new();
        let user = AuthUser::new("alice").with_display_name("Alice");
        ensure_user_documents(&store, &user).unwrap();

        let profile = store
            .get_document(&DocumentPath::user(&user.uid).unwrap())
            .unwrap()
            .data
            .unwrap();
        assert_eq!(profile["displayName"], "Alice");
        assert_eq!(profile["bio"], "A Bio.");

        let inbox_path = DocumentPath::user_chats(&user.uid).unwrap();
        store
            .set_document(&inbox_path, json!({ "x": { "seen": true } }), false)
            .unwrap();
        ensure_user_documents(&store, &user).unwrap();
        assert_eq!(
            store.get_document(&inbox_path).unwrap().data,
            Some(json!({ "x": { "seen": true } }))
        );
    }
}

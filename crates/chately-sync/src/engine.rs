use crate::{
    derive_conversation_id, ensure_user_documents, now_millis, validate_identity, AuthProvider,
    AuthUser, CancelHandle, ConversationId, ConversationLog, ConversationSubscription,
    DocumentStore, Error, Inbox, InboxItem, InboxSubscription, Loadable, Message, MessageAppender,
    Participants, PresenceGuard, PresenceTracker, ProfileEdit, Result, SyncConfig, UserIdentity,
    UserProfile,
};
use crate::profile::update_profile;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::watch;

/// Lifecycle of the open conversation view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewPhase {
    Idle,
    Attaching,
    Live,
    Detaching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Pending,
    Live,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    Opened,
    AlreadyOpen,
    /// The view is open but the presence write failed; nothing will be
    /// detached when it closes.
    OpenedWithoutPresence,
}

struct View {
    conversation_id: ConversationId,
    participants: Participants,
    presence: Option<PresenceGuard>,
}

/// What the log observable is built from: the last delivered snapshot plus
/// local echoes of sends the store has not reflected yet.
#[derive(Default)]
struct LogState {
    conversation: Option<ConversationId>,
    delivered: Option<ConversationLog>,
    pending: Vec<Message>,
}

impl LogState {
    fn visible(&self) -> Option<ConversationLog> {
        let conversation = self.conversation.as_ref()?;
        match &self.delivered {
            Some(log) => Some(log.with_pending(&self.pending)),
            None if self.pending.is_empty() => None,
            None => Some(ConversationLog::from_messages(
                conversation.clone(),
                self.pending.clone(),
            )),
        }
    }

    fn latest_sent_at(&self) -> u64 {
        let delivered = self
            .delivered
            .as_ref()
            .and_then(|log| log.last())
            .map_or(0, |m| m.sent_at);
        let pending = self.pending.iter().map(|m| m.sent_at).max().unwrap_or(0);
        delivered.max(pending)
    }
}

/// State touched from store callbacks. Callbacks never take the engine's
/// transition lock.
struct Shared {
    log: Mutex<LogState>,
    current_log: watch::Sender<Option<ConversationLog>>,
    sorted_inbox: watch::Sender<Loadable<Vec<InboxItem>>>,
    connection_status: watch::Sender<ConnectionStatus>,
    view_phase: watch::Sender<ViewPhase>,
}

impl Shared {
    fn new() -> Self {
        Self {
            log: Mutex::new(LogState::default()),
            current_log: watch::channel(None).0,
            sorted_inbox: watch::channel(Loadable::Pending).0,
            connection_status: watch::channel(ConnectionStatus::Pending).0,
            view_phase: watch::channel(ViewPhase::Idle).0,
        }
    }

    fn on_log(&self, target: &ConversationId, log: ConversationLog) {
        {
            let mut state = self.log.lock();
            if state.conversation.as_ref() != Some(target) {
                return;
            }
            state.pending.retain(|m| !log.contains(&m.id));
            state.delivered = Some(log);
            self.current_log.send_replace(state.visible());
        }
        self.view_phase.send_if_modified(|phase| {
            if *phase == ViewPhase::Attaching {
                *phase = ViewPhase::Live;
                true
            } else {
                false
            }
        });
    }

    fn on_inbox(&self, inbox: &Inbox) {
        self.sorted_inbox
            .send_replace(Loadable::Ready(inbox.sorted()));
        self.set_status(ConnectionStatus::Live);
    }

    fn set_phase(&self, phase: ViewPhase) {
        self.view_phase.send_replace(phase);
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.connection_status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn reset_log(&self, conversation: Option<ConversationId>) {
        let mut state = self.log.lock();
        *state = LogState {
            conversation,
            ..LogState::default()
        };
        self.current_log.send_replace(None);
    }

    fn publish_log(&self) {
        let state = self.log.lock();
        self.current_log.send_replace(state.visible());
    }
}

/// Composition root: one signed-in user, their inbox and at most one open
/// conversation.
pub struct SyncEngine {
    store: Arc<dyn DocumentStore>,
    config: SyncConfig,
    presence: PresenceTracker,
    conversation: ConversationSubscription,
    inbox: InboxSubscription,
    appender: MessageAppender,
    shared: Arc<Shared>,
    user: Mutex<Option<AuthUser>>,
    view: Mutex<Option<View>>,
    transition: Mutex<()>,
    auth: Mutex<Option<CancelHandle>>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn DocumentStore>, config: SyncConfig) -> Self {
        Self {
            presence: PresenceTracker::new(store.clone()),
            conversation: ConversationSubscription::new(store.clone()),
            inbox: InboxSubscription::new(store.clone()),
            appender: MessageAppender::new(store.clone()),
            store,
            config,
            shared: Arc::new(Shared::new()),
            user: Mutex::new(None),
            view: Mutex::new(None),
            transition: Mutex::new(()),
            auth: Mutex::new(None),
        }
    }

    /// Follows the provider's session. The current session is applied before
    /// this returns.
    pub fn bind_auth(self: &Arc<Self>, provider: &dyn AuthProvider) {
        let engine: Weak<Self> = Arc::downgrade(self);
        let handle = provider.subscribe(Box::new(move |user: Option<AuthUser>| {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            if let Err(error) = engine.on_identity_changed(user) {
                tracing::warn!(error = %error, "failed to apply session change");
            }
        }));
        if let Some(previous) = self.auth.lock().replace(handle) {
            previous.cancel();
        }
    }

    /// Starts the session on none to user, tears everything down on user to none.
    pub fn on_identity_changed(&self, user: Option<AuthUser>) -> Result<()> {
        let _transition = self.transition.lock();
        let previous = self.user.lock().clone();
        match (previous, user) {
            (Some(previous), Some(user)) if previous.uid == user.uid => {
                *self.user.lock() = Some(user);
                Ok(())
            }
            (previous, Some(user)) => {
                if previous.is_some() {
                    self.end_session();
                }
                self.start_session(user)
            }
            (Some(_), None) => {
                self.end_session();
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }

    fn start_session(&self, user: AuthUser) -> Result<()> {
        validate_identity(&user.uid)?;
        *self.user.lock() = Some(user.clone());
        self.shared.set_status(ConnectionStatus::Pending);
        tracing::info!(user = %user.uid, "session started");

        if let Err(error) = ensure_user_documents(self.store.as_ref(), &user) {
            *self.user.lock() = None;
            self.shared.set_status(ConnectionStatus::Error);
            return Err(error);
        }

        let shared = self.shared.clone();
        let subscribed = self.inbox.subscribe(
            &user.uid,
            Box::new(move |inbox: Inbox| shared.on_inbox(&inbox)),
        );
        if let Err(error) = subscribed {
            tracing::warn!(user = %user.uid, error = %error, "inbox subscription failed");
            *self.user.lock() = None;
            self.shared.set_status(ConnectionStatus::Error);
            return Err(error);
        }
        Ok(())
    }

    fn end_session(&self) {
        self.close_view();
        self.inbox.cancel();
        if let Some(user) = self.user.lock().take() {
            tracing::info!(user = %user.uid, "session ended");
        }
        self.shared.sorted_inbox.send_replace(Loadable::Pending);
        self.shared.set_status(ConnectionStatus::Pending);
    }

    /// Opens a conversation from the inbox.
    pub fn select_conversation(&self, conversation_id: &ConversationId) -> Result<SelectOutcome> {
        let user = self.require_user()?;
        let peer = self
            .inbox
            .entry(conversation_id)
            .and_then(|entry| entry.peer_id)
            .ok_or_else(|| Error::UnknownConversation(conversation_id.to_string()))?;
        self.open_view(&user, &peer, conversation_id.clone())
    }

    /// Opens the conversation with `peer`, whether or not it exists yet.
    pub fn open_conversation_with(&self, peer: &UserIdentity) -> Result<SelectOutcome> {
        let user = self.require_user()?;
        let conversation_id = derive_conversation_id(&user, peer)?;
        self.open_view(&user, peer, conversation_id)
    }

    pub fn close_conversation(&self) {
        let _transition = self.transition.lock();
        self.close_view();
    }

    fn open_view(
        &self,
        user: &UserIdentity,
        peer: &UserIdentity,
        conversation_id: ConversationId,
    ) -> Result<SelectOutcome> {
        let _transition = self.transition.lock();
        if self.user.lock().as_ref().map(|u| &u.uid) != Some(user) {
            return Err(Error::NotSignedIn);
        }

        let open = self
            .view
            .lock()
            .as_ref()
            .is_some_and(|view| view.conversation_id == conversation_id);
        let phase = *self.shared.view_phase.borrow();
        if open && matches!(phase, ViewPhase::Attaching | ViewPhase::Live) {
            return Ok(SelectOutcome::AlreadyOpen);
        }

        self.close_view();
        self.shared.set_phase(ViewPhase::Attaching);
        self.shared.reset_log(Some(conversation_id.clone()));
        tracing::info!(conversation = %conversation_id, "opening conversation");

        let (presence, outcome) = match self.presence.attach(&conversation_id, user) {
            Ok(guard) => (Some(guard), SelectOutcome::Opened),
            Err(error) => {
                tracing::warn!(conversation = %conversation_id, error = %error, "presence attach failed");
                (None, SelectOutcome::OpenedWithoutPresence)
            }
        };

        let shared = self.shared.clone();
        let target = conversation_id.clone();
        let subscribed = self.conversation.subscribe(
            &conversation_id,
            Box::new(move |log: ConversationLog| shared.on_log(&target, log)),
        );
        if let Err(error) = subscribed {
            if let Some(guard) = presence {
                if let Err(detach_error) = guard.release() {
                    tracing::warn!(error = %detach_error, "ignoring failed presence detach");
                }
            }
            self.shared.reset_log(None);
            self.shared.set_phase(ViewPhase::Idle);
            self.shared.set_status(ConnectionStatus::Error);
            return Err(error);
        }

        *self.view.lock() = Some(View {
            conversation_id,
            participants: Participants::new(user.clone(), peer.clone()),
            presence,
        });
        Ok(outcome)
    }

    /// Cancels the log subscription, then detaches presence.
    fn close_view(&self) {
        let view = self.view.lock().take();
        let Some(view) = view else {
            self.shared.set_phase(ViewPhase::Idle);
            return;
        };

        self.shared.set_phase(ViewPhase::Detaching);
        self.conversation.cancel();
        if let Some(guard) = view.presence {
            if let Err(error) = guard.release() {
                tracing::warn!(
                    conversation = %view.conversation_id,
                    error = %error,
                    "ignoring failed presence detach"
                );
            }
        }
        self.shared.reset_log(None);
        self.shared.set_phase(ViewPhase::Idle);
        tracing::info!(conversation = %view.conversation_id, "conversation closed");
    }

    /// Appends `text` to the open conversation. The message shows up in
    /// [`current_log`](Self::current_log) right away and is withdrawn again
    /// if the write fails.
    pub fn send_message(&self, text: &str) -> Result<Message> {
        let body = text.trim();
        if body.is_empty() {
            return Err(Error::InvalidMessage("message is empty".to_string()));
        }
        if body.chars().count() > self.config.max_message_len {
            return Err(Error::InvalidMessage(format!(
                "message is longer than {} characters",
                self.config.max_message_len
            )));
        }

        let user = self.require_user()?;
        let (conversation_id, participants) = self
            .view
            .lock()
            .as_ref()
            .map(|view| (view.conversation_id.clone(), view.participants.clone()))
            .ok_or(Error::NoActiveConversation)?;

        let message = {
            let mut state = self.shared.log.lock();
            // Strictly after everything already in the log, so the new message sorts last.
            let sent_at = now_millis().max(state.latest_sent_at().saturating_add(1));
            let message = Message::new(user, body, sent_at);
            if state.conversation.as_ref() == Some(&conversation_id) {
                state.pending.push(message.clone());
                self.shared.current_log.send_replace(state.visible());
            }
            message
        };

        if let Err(error) = self
            .appender
            .append(&conversation_id, &participants, &message)
        {
            self.shared
                .log
                .lock()
                .pending
                .retain(|m| m.id != message.id);
            self.shared.publish_log();
            return Err(error);
        }
        Ok(message)
    }

    /// Edits the signed-in user's own profile. A new display name is also
    /// kept on the session user.
    pub fn update_profile(&self, edit: &ProfileEdit) -> Result<UserProfile> {
        let uid = self.require_user()?;
        let profile = update_profile(self.store.as_ref(), &uid, edit)?;
        if let Some(user) = self.user.lock().as_mut().filter(|user| user.uid == uid) {
            user.display_name = profile.display_name.clone();
        }
        Ok(profile)
    }

    fn require_user(&self) -> Result<UserIdentity> {
        self.user
            .lock()
            .as_ref()
            .map(|user| user.uid.clone())
            .ok_or(Error::NotSignedIn)
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.user.lock().clone()
    }

    pub fn current_conversation(&self) -> Option<ConversationId> {
        self.view
            .lock()
            .as_ref()
            .map(|view| view.conversation_id.clone())
    }

    /// Local presence flag of the signed-in user for `conversation_id`.
    pub fn is_active(&self, conversation_id: &ConversationId) -> bool {
        self.user
            .lock()
            .as_ref()
            .is_some_and(|user| self.presence.is_active(conversation_id, &user.uid))
    }

    pub fn inbox(&self) -> Loadable<Inbox> {
        self.inbox.state()
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn current_log(&self) -> watch::Receiver<Option<ConversationLog>> {
        self.shared.current_log.subscribe()
    }

    pub fn sorted_inbox(&self) -> watch::Receiver<Loadable<Vec<InboxItem>>> {
        self.shared.sorted_inbox.subscribe()
    }

    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.connection_status.subscribe()
    }

    pub fn view_phase(&self) -> watch::Receiver<ViewPhase> {
        self.shared.view_phase.subscribe()
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.auth.get_mut().take() {
            handle.cancel();
        }
        self.close_view();
        self.inbox.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryStore, SessionAuth, StoreError};

    fn signed_in(store: &InMemoryStore, uid: &str) -> SyncEngine {
        let engine = SyncEngine::new(Arc::new(store.clone()), SyncConfig::default());
        engine
            .on_identity_changed(Some(AuthUser::new(uid)))
            .unwrap();
        engine
    }

    #[test]
    fn starts_idle_and_pending() {
        let engine = SyncEngine::new(Arc::new(InMemoryStore::new()), SyncConfig::default());
        assert_eq!(*engine.view_phase().borrow(), ViewPhase::Idle);
        assert_eq!(*engine.connection_status().borrow(), ConnectionStatus::Pending);
        assert!(engine.sorted_inbox().borrow().is_pending());
        assert!(matches!(
            engine.open_conversation_with(&UserIdentity::new("bob")),
            Err(Error::NotSignedIn)
        ));
    }

    #[test]
    fn sign_in_creates_documents_and_goes_live() {
        let store = InMemoryStore::new();
        let engine = signed_in(&store, "alice");

        assert_eq!(*engine.connection_status().borrow(), ConnectionStatus::Live);
        assert_eq!(*engine.sorted_inbox().borrow(), Loadable::Ready(Vec::new()));
        assert_eq!(store.paths().len(), 2);
    }

    #[test]
    fn profile_edit_updates_store_and_session_user() {
        let store = InMemoryStore::new();
        let engine = signed_in(&store, "alice");

        let profile = engine.update_profile(&ProfileEdit::display_name("Ally")).unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Ally"));
        assert_eq!(
            engine.current_user().and_then(|user| user.display_name),
            Some("Ally".to_string())
        );

        engine.on_identity_changed(None).unwrap();
        assert!(matches!(
            engine.update_profile(&ProfileEdit::display_name("Al")),
            Err(Error::NotSignedIn)
        ));
    }

    #[test]
    fn first_snapshot_moves_view_live() {
        let store = InMemoryStore::with_manual_delivery();
        let engine = SyncEngine::new(Arc::new(store.clone()), SyncConfig::default());
        engine
            .on_identity_changed(Some(AuthUser::new("alice")))
            .unwrap();

        engine
            .open_conversation_with(&UserIdentity::new("bob"))
            .unwrap();
        assert_eq!(*engine.view_phase().borrow(), ViewPhase::Attaching);
        assert!(engine.current_log().borrow().is_none());

        store.flush_deliveries();
        assert_eq!(*engine.view_phase().borrow(), ViewPhase::Live);
        assert_eq!(engine.current_log().borrow().as_ref().map(|l| l.len()), Some(0));
    }

    #[test]
    fn reselecting_open_conversation_is_noop() {
        let store = InMemoryStore::new();
        let engine = signed_in(&store, "alice");
        let bob = UserIdentity::new("bob");

        assert_eq!(engine.open_conversation_with(&bob).unwrap(), SelectOutcome::Opened);
        assert_eq!(
            engine.open_conversation_with(&bob).unwrap(),
            SelectOutcome::AlreadyOpen
        );
    }

    #[test]
    fn presence_failure_still_opens_view() {
        let store = InMemoryStore::new();
        let engine = signed_in(&store, "alice");
        store.fail_next_write(StoreError::Unavailable("offline".to_string()));

        let outcome = engine
            .open_conversation_with(&UserIdentity::new("bob"))
            .unwrap();
        assert_eq!(outcome, SelectOutcome::OpenedWithoutPresence);
        assert_eq!(*engine.view_phase().borrow(), ViewPhase::Live);
    }

    #[test]
    fn conversation_subscribe_failure_sets_error() {
        let store = InMemoryStore::new();
        let engine = signed_in(&store, "alice");
        store.fail_next_subscribe(StoreError::PermissionDenied("rules".to_string()));

        let result = engine.open_conversation_with(&UserIdentity::new("bob"));
        assert!(matches!(result, Err(Error::SubscribeFailed(_))));
        assert_eq!(*engine.connection_status().borrow(), ConnectionStatus::Error);
        assert_eq!(*engine.view_phase().borrow(), ViewPhase::Idle);
        let conversation =
            derive_conversation_id(&UserIdentity::new("alice"), &UserIdentity::new("bob")).unwrap();
        assert!(!engine.is_active(&conversation));
    }

    #[test]
    fn send_validates_text() {
        let store = InMemoryStore::new();
        let engine = SyncEngine::new(
            Arc::new(store.clone()),
            SyncConfig {
                max_message_len: 5,
                ..SyncConfig::default()
            },
        );
        engine
            .on_identity_changed(Some(AuthUser::new("alice")))
            .unwrap();

        assert!(matches!(
            engine.send_message("hi"),
            Err(Error::NoActiveConversation)
        ));
        engine
            .open_conversation_with(&UserIdentity::new("bob"))
            .unwrap();
        assert!(matches!(engine.send_message("   "), Err(Error::InvalidMessage(_))));
        assert!(matches!(
            engine.send_message("too long"),
            Err(Error::InvalidMessage(_))
        ));
        assert_eq!(engine.send_message("  hi  ").unwrap().body, "hi");
    }

    #[test]
    fn failed_send_withdraws_echo() {
        let store = InMemoryStore::new();
        let engine = signed_in(&store, "alice");
        engine
            .open_conversation_with(&UserIdentity::new("bob"))
            .unwrap();
        store.fail_next_write(StoreError::Unavailable("offline".to_string()));

        let result = engine.send_message("hi");
        assert!(matches!(result, Err(Error::AppendFailed(_))));
        assert_eq!(engine.current_log().borrow().as_ref().map(|l| l.len()), Some(0));
    }

    #[test]
    fn pending_echo_is_visible_before_delivery() {
        let store = InMemoryStore::with_manual_delivery();
        let engine = SyncEngine::new(Arc::new(store.clone()), SyncConfig::default());
        engine
            .on_identity_changed(Some(AuthUser::new("alice")))
            .unwrap();
        engine
            .open_conversation_with(&UserIdentity::new("bob"))
            .unwrap();
        store.flush_deliveries();

        let sent = engine.send_message("hi").unwrap();
        let log = engine.current_log();
        assert!(log.borrow().as_ref().is_some_and(|l| l.contains(&sent.id)));

        store.flush_deliveries();
        assert_eq!(log.borrow().as_ref().map(|l| l.len()), Some(1));
    }

    #[test]
    fn sign_out_resets_everything() {
        let store = InMemoryStore::new();
        let engine = Arc::new(SyncEngine::new(Arc::new(store.clone()), SyncConfig::default()));
        let auth = SessionAuth::signed_in(AuthUser::new("alice")).unwrap();
        engine.bind_auth(&auth);
        engine
            .open_conversation_with(&UserIdentity::new("bob"))
            .unwrap();

        auth.sign_out();
        assert_eq!(engine.current_user(), None);
        assert_eq!(engine.current_conversation(), None);
        assert!(engine.sorted_inbox().borrow().is_pending());
        assert!(engine.current_log().borrow().is_none());
        assert_eq!(*engine.connection_status().borrow(), ConnectionStatus::Pending);
        assert_eq!(
            store.listener_count(&crate::DocumentPath::user_chats(&UserIdentity::new("alice")).unwrap()),
            0
        );
    }
}

pub mod demo;
pub mod identity;
pub mod inbox;
pub mod message;

use anyhow::{Context, Result};
use chately_sync::{AuthUser, FileStore, SessionAuth, SyncEngine};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;

/// Engine signed in as the configured user, on the file store in the data dir.
pub struct Session {
    pub auth: SessionAuth,
    pub engine: Arc<SyncEngine>,
}

impl Session {
    pub fn open(data_dir: &Path, config: &Config, user_override: Option<&str>) -> Result<Self> {
        let uid = user_override
            .or(config.user.as_deref())
            .context("Not logged in. Run `chately login <uid>` first")?;

        let store = FileStore::open(data_dir.join("store")).context("Failed to open store")?;
        let engine = Arc::new(SyncEngine::new(Arc::new(store), config.sync.clone()));

        let mut user = AuthUser::new(uid);
        if user_override.is_none() {
            user.display_name = config.display_name.clone();
        }
        let auth = SessionAuth::new();
        engine.bind_auth(&auth);
        auth.sign_in(user).context("Failed to sign in")?;
        if engine.current_user().is_none() {
            anyhow::bail!("Failed to start session for {}", uid);
        }
        tracing::debug!(user = %uid, data_dir = %data_dir.display(), "session opened");

        Ok(Self { auth, engine })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.engine.close_conversation();
        self.auth.sign_out();
    }
}

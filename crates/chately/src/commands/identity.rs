use anyhow::{Context, Result};
use chately_sync::{
    ensure_user_documents, load_profile, validate_identity, AuthUser, FileStore, ProfileEdit,
    UserIdentity,
};
use serde::Serialize;
use std::path::Path;

use super::Session;
use crate::config::Config;
use crate::output::Output;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResult {
    uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WhoamiResult {
    uid: String,
    display_name: Option<String>,
    logged_in: bool,
}

/// Sign in as `uid`, creating the profile and inbox documents on first use
pub async fn login(
    uid: &str,
    display_name: Option<String>,
    data_dir: &Path,
    config: &Config,
    output: &Output,
) -> Result<()> {
    validate_identity(&UserIdentity::new(uid)).context("Invalid user id")?;

    let store = FileStore::open(data_dir.join("store")).context("Failed to open store")?;
    let mut user = AuthUser::new(uid);
    user.display_name = display_name.clone();
    ensure_user_documents(&store, &user).context("Failed to create user documents")?;

    let mut config = config.clone();
    config.set_user(uid, display_name.clone())?;

    output.success(
        "login",
        LoginResult {
            uid: uid.to_string(),
            display_name,
        },
    );
    Ok(())
}

/// Forget the signed-in user. Stored conversations are kept.
pub async fn logout(config: &Config, output: &Output) -> Result<()> {
    let mut config = config.clone();
    config.clear_user()?;
    output.success_message("logout", "Logged out");
    Ok(())
}

/// Show current identity
pub async fn whoami(config: &Config, output: &Output) -> Result<()> {
    let result = WhoamiResult {
        uid: config.user.clone().unwrap_or_default(),
        display_name: config.display_name.clone(),
        logged_in: config.is_logged_in(),
    };
    output.success("whoami", result);
    Ok(())
}

/// Show the profile, or edit it when any field is given
pub async fn profile(
    edit: ProfileEdit,
    data_dir: &Path,
    config: &Config,
    user: Option<&str>,
    output: &Output,
) -> Result<()> {
    let session = Session::open(data_dir, config, user)?;
    let uid = session
        .engine
        .current_user()
        .map(|user| user.uid)
        .context("Not signed in")?;

    let profile = if edit.is_empty() {
        load_profile(session.engine.store(), &uid)?
            .with_context(|| format!("No profile for {}", uid))?
    } else {
        let profile = session
            .engine
            .update_profile(&edit)
            .context("Failed to update profile")?;
        if edit.display_name.is_some() && config.user.as_deref() == Some(uid.as_str()) {
            let mut config = config.clone();
            config.set_user(uid.as_str(), profile.display_name.clone())?;
        }
        profile
    };

    output.success("profile", profile);
    Ok(())
}

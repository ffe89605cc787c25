use anyhow::{Context, Result};
use chately_sync::{Message, UserIdentity};
use serde::Serialize;
use std::path::Path;

use super::Session;
use crate::config::Config;
use crate::output::Output;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendResult {
    conversation_id: String,
    message: Message,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadResult {
    conversation_id: String,
    peer_id: String,
    messages: Vec<Message>,
}

/// Send a message to `peer`
pub async fn send(
    peer: &str,
    text: &str,
    data_dir: &Path,
    config: &Config,
    user: Option<&str>,
    output: &Output,
) -> Result<()> {
    let session = Session::open(data_dir, config, user)?;
    let peer = UserIdentity::new(peer);
    session
        .engine
        .open_conversation_with(&peer)
        .context("Failed to open conversation")?;

    let message = session.engine.send_message(text)?;
    let conversation_id = session
        .engine
        .current_conversation()
        .context("Conversation closed while sending")?;

    output.success(
        "send",
        SendResult {
            conversation_id: conversation_id.to_string(),
            message,
        },
    );
    Ok(())
}

/// Show the last `limit` messages exchanged with `peer`, marking them seen
pub async fn read(
    peer: &str,
    limit: usize,
    data_dir: &Path,
    config: &Config,
    user: Option<&str>,
    output: &Output,
) -> Result<()> {
    let session = Session::open(data_dir, config, user)?;
    let peer_id = UserIdentity::new(peer);
    session
        .engine
        .open_conversation_with(&peer_id)
        .context("Failed to open conversation")?;

    let log = session
        .engine
        .current_log()
        .borrow()
        .clone()
        .context("Conversation log was not delivered")?;
    let skip = log.len().saturating_sub(limit);
    let messages: Vec<Message> = log.messages().iter().skip(skip).cloned().collect();

    output.success(
        "read",
        ReadResult {
            conversation_id: log.conversation_id().to_string(),
            peer_id: peer.to_string(),
            messages,
        },
    );
    Ok(())
}

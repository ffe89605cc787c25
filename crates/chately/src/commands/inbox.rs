use anyhow::{Context, Result};
use chately_sync::{ConnectionStatus, InboxItem, Message};
use serde::Serialize;
use std::path::Path;

use super::Session;
use crate::config::Config;
use crate::output::Output;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InboxRow {
    conversation_id: String,
    peer_id: Option<String>,
    last_message: Option<Message>,
    seen: bool,
    active: bool,
}

impl From<InboxItem> for InboxRow {
    fn from(item: InboxItem) -> Self {
        Self {
            conversation_id: item.conversation_id.to_string(),
            peer_id: item.entry.peer_id.map(|peer| peer.to_string()),
            last_message: item.entry.last_message,
            seen: item.entry.seen,
            active: item.entry.active,
        }
    }
}

#[derive(Serialize)]
struct InboxResult {
    conversations: Vec<InboxRow>,
}

/// List conversations, most recent first
pub async fn list(
    data_dir: &Path,
    config: &Config,
    user: Option<&str>,
    output: &Output,
) -> Result<()> {
    let session = Session::open(data_dir, config, user)?;
    if *session.engine.connection_status().borrow() == ConnectionStatus::Error {
        anyhow::bail!("Inbox subscription failed");
    }

    let items = session
        .engine
        .sorted_inbox()
        .borrow()
        .ready()
        .cloned()
        .context("Inbox was not delivered")?;

    output.success(
        "inbox",
        InboxResult {
            conversations: items.into_iter().map(InboxRow::from).collect(),
        },
    );
    Ok(())
}

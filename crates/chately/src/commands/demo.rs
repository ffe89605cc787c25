use anyhow::{Context, Result};
use chately_sync::{
    derive_conversation_id, AuthUser, ConnectionStatus, ConversationId, DocumentStore,
    InMemoryStore, InboxEntry, Loadable, RemoteStore, SessionAuth, StoreServer, SyncEngine,
    UserIdentity, ViewPhase,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::Config;
use crate::output::Output;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

struct Client {
    auth: SessionAuth,
    engine: Arc<SyncEngine>,
}

impl Client {
    fn connect(store: Arc<RemoteStore>, config: &Config, uid: &str, name: &str) -> Result<Self> {
        let engine = Arc::new(SyncEngine::new(store, config.sync.clone()));
        let auth = SessionAuth::new();
        engine.bind_auth(&auth);
        auth.sign_in(AuthUser::new(uid).with_display_name(name))?;
        Ok(Self { auth, engine })
    }
}

/// Delivers pushes for `store` on a background thread until `running` clears.
fn spawn_pump(store: Arc<RemoteStore>, running: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while running.load(Ordering::Acquire) {
            store.wait_and_dispatch(Duration::from_millis(20));
        }
    })
}

async fn wait_until<T>(
    rx: &mut watch::Receiver<T>,
    what: &str,
    done: impl Fn(&T) -> bool,
) -> Result<()> {
    let wait = async {
        loop {
            if done(&rx.borrow_and_update()) {
                return Ok::<(), watch::error::RecvError>(());
            }
            rx.changed().await?;
        }
    };
    tokio::time::timeout(STEP_TIMEOUT, wait)
        .await
        .with_context(|| format!("Timed out waiting for {}", what))??;
    Ok(())
}

fn entry(store: &InMemoryStore, uid: &str, conversation: &ConversationId) -> Result<InboxEntry> {
    let path = chately_sync::DocumentPath::user_chats(&UserIdentity::new(uid))?;
    let data = store
        .get_document(&path)?
        .data
        .and_then(|data| data.get(conversation.as_str()).cloned())
        .with_context(|| format!("{} has no entry for {}", uid, conversation))?;
    Ok(serde_json::from_value(data)?)
}

/// Two users on separate clients of one store server
pub async fn run(config: &Config, output: &Output) -> Result<()> {
    output.note("Running alice and bob against a shared in-process store server");

    let backend = InMemoryStore::new();
    let (requests, server) = StoreServer::spawn(Arc::new(backend.clone()));
    let alice_store = Arc::new(RemoteStore::new(requests.clone(), &config.sync));
    let bob_store = Arc::new(RemoteStore::new(requests, &config.sync));

    let running = Arc::new(AtomicBool::new(true));
    let pumps = vec![
        spawn_pump(alice_store.clone(), running.clone()),
        spawn_pump(bob_store.clone(), running.clone()),
    ];

    let result = scenario(&backend, alice_store, bob_store, config, output).await;

    running.store(false, Ordering::Release);
    for pump in pumps {
        let _ = pump.join();
    }
    // The server stops once every client has released its request sender.
    let _ = server.join();
    result
}

async fn scenario(
    backend: &InMemoryStore,
    alice_store: Arc<RemoteStore>,
    bob_store: Arc<RemoteStore>,
    config: &Config,
    output: &Output,
) -> Result<()> {
    let alice = Client::connect(alice_store, config, "alice", "Alice")?;
    let bob = Client::connect(bob_store, config, "bob", "Bob")?;
    for (client, name) in [(&alice, "alice"), (&bob, "bob")] {
        wait_until(
            &mut client.engine.connection_status(),
            &format!("{} to connect", name),
            |status| *status == ConnectionStatus::Live,
        )
        .await?;
    }

    let with_bob = derive_conversation_id(&UserIdentity::new("alice"), &UserIdentity::new("bob"))?;
    alice.engine.open_conversation_with(&UserIdentity::new("bob"))?;
    wait_until(&mut alice.engine.view_phase(), "alice's view", |phase| {
        *phase == ViewPhase::Live
    })
    .await?;
    let opened_len = alice
        .engine
        .current_log()
        .borrow()
        .as_ref()
        .map_or(0, |log| log.len());
    output.event(
        "opened",
        json!({ "user": "alice", "conversationId": with_bob.as_str(), "messages": opened_len }),
    );

    let hi = alice.engine.send_message("hi")?;
    output.event("sent", json!({ "user": "alice", "message": hi }));

    wait_until(&mut bob.engine.sorted_inbox(), "bob's inbox", |inbox| {
        matches!(inbox, Loadable::Ready(items) if items.iter().any(|item| item.conversation_id == with_bob))
    })
    .await?;
    let bob_entry = entry(backend, "bob", &with_bob)?;
    output.event(
        "inbox",
        json!({
            "user": "bob",
            "conversationId": with_bob.as_str(),
            "seen": bob_entry.seen,
            "lastMessage": bob_entry.last_message.map(|m| m.body),
        }),
    );

    alice.engine.open_conversation_with(&UserIdentity::new("carol"))?;
    let with_carol =
        derive_conversation_id(&UserIdentity::new("alice"), &UserIdentity::new("carol"))?;
    output.event(
        "switched",
        json!({
            "user": "alice",
            "from": with_bob.as_str(),
            "fromActive": entry(backend, "alice", &with_bob)?.active,
            "to": with_carol.as_str(),
            "toActive": entry(backend, "alice", &with_carol)?.active,
        }),
    );

    bob.engine.select_conversation(&with_bob)?;
    wait_until(&mut bob.engine.current_log(), "bob's log", |log| {
        log.as_ref().is_some_and(|log| log.contains(&hi.id))
    })
    .await?;
    let reply = bob.engine.send_message("hello alice")?;
    output.event("sent", json!({ "user": "bob", "message": reply }));

    let alice_entry = entry(backend, "alice", &with_bob)?;
    output.event(
        "inbox",
        json!({
            "user": "alice",
            "conversationId": with_bob.as_str(),
            "seen": alice_entry.seen,
            "active": alice_entry.active,
        }),
    );

    for client in [&alice, &bob] {
        client.engine.close_conversation();
        client.auth.sign_out();
    }
    output.success_message("demo", "Demo finished");
    Ok(())
}

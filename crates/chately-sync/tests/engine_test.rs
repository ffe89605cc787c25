mod common;

use chately_sync::{
    derive_conversation_id, ConnectionStatus, DocumentStore, Error, InMemoryStore, Loadable,
    Message, MessageAppender, Participants, Result, SelectOutcome, ViewPhase,
};
use common::{inbox_entry, live_chat_listeners, signed_in, user, RecordingStore};
use std::sync::Arc;

#[test]
fn test_first_conversation_then_switch() -> Result<()> {
    let store = RecordingStore::new(InMemoryStore::new());
    let alice = signed_in(Arc::new(store.clone()), "alice")?;
    let with_bob = derive_conversation_id(&user("alice"), &user("bob"))?;
    let with_carol = derive_conversation_id(&user("alice"), &user("carol"))?;
    assert_eq!(with_bob.as_str(), "bob+alice");

    assert_eq!(alice.open_conversation_with(&user("bob"))?, SelectOutcome::Opened);
    assert_eq!(*alice.view_phase().borrow(), ViewPhase::Live);
    assert_eq!(alice.current_log().borrow().as_ref().map(|l| l.len()), Some(0));

    alice.send_message("hi")?;
    let bob_entry = inbox_entry(&store, "bob", &with_bob)?.expect("bob has an inbox entry");
    assert!(!bob_entry.seen);
    assert_eq!(bob_entry.last_message.map(|m| m.body), Some("hi".to_string()));

    alice.open_conversation_with(&user("carol"))?;
    let presence = store.presence_writes();
    assert_eq!(
        presence,
        vec![
            (with_bob.to_string(), true),
            (with_bob.to_string(), false),
            (with_carol.to_string(), true),
        ]
    );
    assert!(!alice.is_active(&with_bob));
    assert!(alice.is_active(&with_carol));
    Ok(())
}

#[test]
fn test_selections_alternate_attach_and_detach() -> Result<()> {
    let memory = InMemoryStore::new();
    let store = RecordingStore::new(memory.clone());
    let alice = signed_in(Arc::new(store.clone()), "alice")?;
    let peers = ["bob", "carol", "dave", "bob", "erin"];
    let conversations: Vec<_> = ["bob", "carol", "dave", "erin"]
        .iter()
        .map(|peer| derive_conversation_id(&user("alice"), &user(peer)))
        .collect::<Result<_>>()?;

    for peer in peers {
        alice.open_conversation_with(&user(peer))?;
        assert_eq!(live_chat_listeners(&memory, &conversations), 1);
    }

    let presence = store.presence_writes();
    let attaches = presence.iter().filter(|(_, active)| *active).count();
    let detaches = presence.iter().filter(|(_, active)| !*active).count();
    assert_eq!(attaches, peers.len());
    assert_eq!(detaches, peers.len() - 1);
    for (index, (_, active)) in presence.iter().enumerate() {
        assert_eq!(*active, index % 2 == 0, "write {} breaks alternation", index);
    }

    alice.close_conversation();
    assert_eq!(live_chat_listeners(&memory, &conversations), 0);
    assert_eq!(store.presence_writes().len(), 2 * peers.len());
    Ok(())
}

#[test]
fn test_late_delivery_after_close_is_ignored() -> Result<()> {
    let store = InMemoryStore::with_manual_delivery();
    let alice = signed_in(Arc::new(store.clone()), "alice")?;
    alice.open_conversation_with(&user("bob"))?;
    store.flush_deliveries();
    assert_eq!(*alice.view_phase().borrow(), ViewPhase::Live);

    let conversation = derive_conversation_id(&user("alice"), &user("bob"))?;
    let late = Message::new(user("bob"), "too late", 1);
    MessageAppender::new(Arc::new(store.clone())).append(
        &conversation,
        &Participants::new(user("alice"), user("bob")),
        &late,
    )?;
    alice.close_conversation();

    let log = alice.current_log();
    store.flush_deliveries();
    assert!(!log.has_changed().unwrap_or(true));
    assert!(log.borrow().is_none());
    Ok(())
}

#[test]
fn test_own_append_is_last_in_next_snapshot() -> Result<()> {
    let store = InMemoryStore::new();
    let alice = signed_in(Arc::new(store.clone()), "alice")?;
    alice.open_conversation_with(&user("bob"))?;

    let first = alice.send_message("first")?;
    let log = alice.current_log().borrow().clone().expect("log is open");
    assert_eq!(log.last(), Some(&first));

    let mut previous = first;
    for i in 0..200 {
        let sent = alice.send_message(&format!("burst {}", i))?;
        let log = alice.current_log().borrow().clone().expect("log is open");
        assert_eq!(log.last(), Some(&sent));
        assert!(sent.sent_at > previous.sent_at);
        previous = sent;
    }

    let stored = alice.current_log().borrow().clone().expect("log is open");
    assert_eq!(stored.len(), 201);
    assert_eq!(stored.last(), Some(&previous));
    Ok(())
}

#[test]
fn test_append_flags_seen_per_participant() -> Result<()> {
    let store = InMemoryStore::new();
    let alice = signed_in(Arc::new(store.clone()), "alice")?;
    let bob = signed_in(Arc::new(store.clone()), "bob")?;
    let conversation = derive_conversation_id(&user("alice"), &user("bob"))?;

    bob.open_conversation_with(&user("alice"))?;
    alice.open_conversation_with(&user("bob"))?;
    alice.send_message("hello bob")?;

    let for_alice = inbox_entry(&store, "alice", &conversation)?.expect("alice entry");
    let for_bob = inbox_entry(&store, "bob", &conversation)?.expect("bob entry");
    assert!(for_alice.seen);
    assert!(!for_bob.seen);
    assert!(for_bob.active);
    assert_eq!(for_bob.peer_id, Some(user("alice")));

    let bob_log = bob.current_log().borrow().clone().expect("bob has the log open");
    assert_eq!(bob_log.last().map(|m| m.body.as_str()), Some("hello bob"));
    Ok(())
}

#[test]
fn test_inbox_is_sorted_and_selectable() -> Result<()> {
    let store = InMemoryStore::new();
    let appender = MessageAppender::new(Arc::new(store.clone()));
    let alice = signed_in(Arc::new(store.clone()), "alice")?;
    assert!(matches!(
        *alice.sorted_inbox().borrow(),
        Loadable::Ready(ref items) if items.is_empty()
    ));

    for (peer, sent_at) in [("bob", 10), ("carol", 30), ("dave", 20)] {
        let conversation = derive_conversation_id(&user("alice"), &user(peer))?;
        appender.append(
            &conversation,
            &Participants::new(user("alice"), user(peer)),
            &Message::new(user(peer), format!("from {}", peer), sent_at),
        )?;
    }

    let order: Vec<String> = match &*alice.sorted_inbox().borrow() {
        Loadable::Ready(items) => items
            .iter()
            .map(|item| item.conversation_id.to_string())
            .collect(),
        Loadable::Pending => Vec::new(),
    };
    assert_eq!(order, vec!["carol+alice", "dave+alice", "bob+alice"]);

    let with_carol = derive_conversation_id(&user("alice"), &user("carol"))?;
    assert_eq!(alice.select_conversation(&with_carol)?, SelectOutcome::Opened);
    let log = alice.current_log().borrow().clone().expect("log is open");
    assert_eq!(log.last().map(|m| m.body.as_str()), Some("from carol"));
    assert!(inbox_entry(&store, "alice", &with_carol)?.is_some_and(|e| e.seen && e.active));

    let unknown = derive_conversation_id(&user("alice"), &user("zed"))?;
    assert!(matches!(
        alice.select_conversation(&unknown),
        Err(Error::UnknownConversation(_))
    ));
    assert_eq!(alice.current_conversation(), Some(with_carol));
    Ok(())
}

#[test]
fn test_reselecting_live_conversation_writes_nothing() -> Result<()> {
    let store = RecordingStore::new(InMemoryStore::new());
    let alice = signed_in(Arc::new(store.clone()), "alice")?;

    alice.open_conversation_with(&user("bob"))?;
    let writes = store.writes().len();
    assert_eq!(alice.open_conversation_with(&user("bob"))?, SelectOutcome::AlreadyOpen);
    assert_eq!(store.writes().len(), writes);
    Ok(())
}

#[test]
fn test_switching_users_rebuilds_session() -> Result<()> {
    let store = InMemoryStore::new();
    let engine = signed_in(Arc::new(store.clone()), "alice")?;
    engine.open_conversation_with(&user("bob"))?;

    engine.on_identity_changed(Some(chately_sync::AuthUser::new("bob")))?;
    assert_eq!(engine.current_conversation(), None);
    assert_eq!(*engine.connection_status().borrow(), ConnectionStatus::Live);
    assert_eq!(engine.current_user().map(|u| u.uid), Some(user("bob")));

    let conversation = derive_conversation_id(&user("alice"), &user("bob"))?;
    assert!(inbox_entry(&store, "alice", &conversation)?.is_some_and(|e| !e.active));
    assert!(store.get_document(&chately_sync::DocumentPath::user(&user("bob"))?)?.exists());
    Ok(())
}

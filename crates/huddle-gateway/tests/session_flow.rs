//! Coordination-layer tests against an in-process dispatcher and a
//! temp-file database: announce/roster, message relay, notification
//! fan-out, pinning and typing, end to end but without real sockets.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use huddle_db::Database;
use huddle_gateway::dispatcher::{ConnectionId, Dispatcher, Outbound};
use huddle_gateway::relay;
use huddle_types::events::ServerEvent;
use huddle_types::models::{OnlineUser, Role};

fn open_test_db() -> Arc<Database> {
    let dir = std::env::temp_dir().join(format!("huddle_gateway_test_{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    Arc::new(Database::open(&dir.join("huddle.db")).unwrap())
}

fn seed_user(db: &Database, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    db.create_user(
        &id.to_string(),
        name,
        &format!("{}@example.com", name),
        "not-a-real-hash",
        Role::Employee,
    )
    .unwrap();
    id
}

/// One simulated client: a delivery channel pair exactly as a connection
/// task would hold it.
struct Peer {
    conn_id: ConnectionId,
    targeted: mpsc::UnboundedReceiver<ServerEvent>,
    broadcast: broadcast::Receiver<Outbound>,
}

impl Peer {
    async fn connect(dispatcher: &Dispatcher) -> Self {
        let (conn_id, targeted) = dispatcher.attach().await;
        let broadcast = dispatcher.subscribe();
        Peer {
            conn_id,
            targeted,
            broadcast,
        }
    }

    async fn announce(&self, dispatcher: &Dispatcher, db: &Database, user_id: Uuid) {
        let profile = db
            .get_user_profile(&user_id.to_string())
            .unwrap()
            .expect("seeded user resolves");
        dispatcher.announce(self.conn_id, profile).await;
    }

    /// Drain pending broadcast events, applying the same origin-exclusion
    /// filter a connection's send task applies.
    fn broadcast_events(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(out) = self.broadcast.try_recv() {
            if out.exclude == Some(self.conn_id) {
                continue;
            }
            events.push(out.event);
        }
        events
    }

    fn targeted_events(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.targeted.try_recv() {
            events.push(event);
        }
        events
    }
}

fn last_roster(events: &[ServerEvent]) -> Vec<OnlineUser> {
    events
        .iter()
        .rev()
        .find_map(|e| match e {
            ServerEvent::OnlineRoster { users } => Some(users.clone()),
            _ => None,
        })
        .expect("at least one roster push")
}

#[tokio::test]
async fn full_session_flow() {
    let db = open_test_db();
    let dispatcher = Dispatcher::new();

    let alice_id = seed_user(&db, "alice");
    let bob_id = seed_user(&db, "bob");

    let alice = Peer::connect(&dispatcher).await;
    let mut bob = Peer::connect(&dispatcher).await;

    alice.announce(&dispatcher, &db, alice_id).await;
    bob.announce(&dispatcher, &db, bob_id).await;

    // Both announces were pushed; the latest roster holds both users
    let roster = last_roster(&bob.broadcast_events());
    let ids: Vec<Uuid> = roster.iter().map(|u| u.id).collect();
    assert!(ids.contains(&alice_id) && ids.contains(&bob_id));

    // The broadcast roster and the registry snapshot agree
    assert_eq!(dispatcher.online_users().await, roster);

    // alice sends "hello"
    let record = relay::send_message(&dispatcher, &db, alice_id, "hello")
        .await
        .expect("valid message goes through");
    assert_eq!(record.content, "hello");

    // bob sees the broadcast with sender identity joined in
    let events = bob.broadcast_events();
    let message = events
        .iter()
        .find_map(|e| match e {
            ServerEvent::MessageNew { message } => Some(message.clone()),
            _ => None,
        })
        .expect("bob receives the new message");
    assert_eq!(message.sender.name, "alice");
    assert_eq!(message.content, "hello");
    assert!(!message.is_pinned);

    // bob gets exactly one notification, titled after the actor
    let notifications = bob.targeted_events();
    assert_eq!(notifications.len(), 1);
    match &notifications[0] {
        ServerEvent::NotificationNew { notification } => {
            assert_eq!(notification.user_id, bob_id);
            assert!(notification.title.contains("alice"));
            assert_eq!(notification.message, "hello");
            assert!(!notification.read);
        }
        other => panic!("expected notification, got {:?}", other),
    }

    // alice disconnects; the roster shrinks to bob alone
    dispatcher.detach(alice.conn_id).await;
    let roster = last_roster(&bob.broadcast_events());
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].id, bob_id);
}

#[tokio::test]
async fn broadcast_order_matches_persistence_order_across_senders() {
    let db = open_test_db();
    let dispatcher = Dispatcher::new();

    let alice_id = seed_user(&db, "alice");
    let bob_id = seed_user(&db, "bob");

    let alice = Peer::connect(&dispatcher).await;
    let bob = Peer::connect(&dispatcher).await;
    alice.announce(&dispatcher, &db, alice_id).await;
    bob.announce(&dispatcher, &db, bob_id).await;

    let mut observer = Peer::connect(&dispatcher).await;

    let a = relay::send_message(&dispatcher, &db, alice_id, "first")
        .await
        .unwrap();
    let b = relay::send_message(&dispatcher, &db, bob_id, "second")
        .await
        .unwrap();

    let broadcast_ids: Vec<Uuid> = observer
        .broadcast_events()
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::MessageNew { message } => Some(message.id),
            _ => None,
        })
        .collect();
    assert_eq!(broadcast_ids, vec![a.id, b.id]);

    // Persisted order agrees: newest first
    let persisted = db.recent_messages(100).unwrap();
    let persisted_ids: Vec<Uuid> = persisted.iter().map(|m| m.id).collect();
    assert_eq!(persisted_ids, vec![b.id, a.id]);
}

#[tokio::test]
async fn fan_out_excludes_the_actor() {
    let db = open_test_db();
    let dispatcher = Dispatcher::new();

    let alice_id = seed_user(&db, "alice");
    let bob_id = seed_user(&db, "bob");
    let carol_id = seed_user(&db, "carol");

    let mut alice = Peer::connect(&dispatcher).await;
    let mut bob = Peer::connect(&dispatcher).await;
    let mut carol = Peer::connect(&dispatcher).await;
    alice.announce(&dispatcher, &db, alice_id).await;
    bob.announce(&dispatcher, &db, bob_id).await;
    carol.announce(&dispatcher, &db, carol_id).await;

    relay::send_message(&dispatcher, &db, alice_id, "fan out").await.unwrap();

    assert_eq!(bob.targeted_events().len(), 1);
    assert_eq!(carol.targeted_events().len(), 1);
    assert!(alice.targeted_events().is_empty());

    // Exactly one row per recipient, none for the actor
    assert_eq!(db.notifications_for_user(&bob_id.to_string(), 50).unwrap().len(), 1);
    assert_eq!(db.notifications_for_user(&carol_id.to_string(), 50).unwrap().len(), 1);
    assert!(db.notifications_for_user(&alice_id.to_string(), 50).unwrap().is_empty());
}

#[tokio::test]
async fn pin_toggle_round_trip_broadcasts_once_per_call() {
    let db = open_test_db();
    let dispatcher = Dispatcher::new();

    let alice_id = seed_user(&db, "alice");
    let alice = Peer::connect(&dispatcher).await;
    alice.announce(&dispatcher, &db, alice_id).await;

    let record = relay::send_message(&dispatcher, &db, alice_id, "pin me")
        .await
        .unwrap();

    let mut observer = Peer::connect(&dispatcher).await;

    let pinned = relay::set_pinned(&dispatcher, &db, record.id, true)
        .await
        .unwrap();
    assert!(pinned.is_pinned);

    let unpinned = relay::set_pinned(&dispatcher, &db, record.id, false)
        .await
        .unwrap();
    assert!(!unpinned.is_pinned);

    let pin_events: Vec<bool> = observer
        .broadcast_events()
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::MessagePinned { message } => Some(message.is_pinned),
            _ => None,
        })
        .collect();
    assert_eq!(pin_events, vec![true, false]);

    assert!(!db.get_message(&record.id.to_string()).unwrap().unwrap().is_pinned);
}

#[tokio::test]
async fn pin_toggle_on_unknown_message_broadcasts_nothing() {
    let db = open_test_db();
    let dispatcher = Dispatcher::new();
    let mut observer = Peer::connect(&dispatcher).await;

    assert!(relay::set_pinned(&dispatcher, &db, Uuid::new_v4(), true).await.is_none());
    assert!(observer.broadcast_events().is_empty());
}

#[tokio::test]
async fn typing_events_skip_their_origin_connection() {
    let db = open_test_db();
    let dispatcher = Dispatcher::new();

    let alice_id = seed_user(&db, "alice");
    let bob_id = seed_user(&db, "bob");

    let mut alice = Peer::connect(&dispatcher).await;
    let mut bob = Peer::connect(&dispatcher).await;
    alice.announce(&dispatcher, &db, alice_id).await;
    bob.announce(&dispatcher, &db, bob_id).await;
    alice.broadcast_events();
    bob.broadcast_events();

    dispatcher.broadcast_except(alice.conn_id, ServerEvent::UserTyping {
        user_id: alice_id,
        user_name: "alice".to_string(),
    });
    dispatcher.broadcast_except(alice.conn_id, ServerEvent::UserStoppedTyping { user_id: alice_id });

    assert!(alice.broadcast_events().is_empty());

    let seen = bob.broadcast_events();
    assert!(matches!(seen[0], ServerEvent::UserTyping { .. }));
    assert!(matches!(seen[1], ServerEvent::UserStoppedTyping { .. }));
}

#[tokio::test]
async fn oversized_message_is_dropped_entirely_and_cap_is_exact() {
    let db = open_test_db();
    let dispatcher = Dispatcher::new();

    let alice_id = seed_user(&db, "alice");
    let alice = Peer::connect(&dispatcher).await;
    alice.announce(&dispatcher, &db, alice_id).await;

    let mut observer = Peer::connect(&dispatcher).await;

    let over_cap = "x".repeat(relay::MAX_MESSAGE_CHARS + 1);
    assert!(relay::send_message(&dispatcher, &db, alice_id, &over_cap).await.is_none());

    // No persistence, no broadcast
    assert!(db.recent_messages(100).unwrap().is_empty());
    assert!(observer.broadcast_events().is_empty());

    let at_cap = "x".repeat(relay::MAX_MESSAGE_CHARS);
    let record = relay::send_message(&dispatcher, &db, alice_id, &at_cap).await;
    assert!(record.is_some());
    assert_eq!(db.recent_messages(100).unwrap().len(), 1);
}

#[tokio::test]
async fn script_content_is_stored_and_broadcast_without_brackets() {
    let db = open_test_db();
    let dispatcher = Dispatcher::new();

    let alice_id = seed_user(&db, "alice");
    let alice = Peer::connect(&dispatcher).await;
    alice.announce(&dispatcher, &db, alice_id).await;

    let mut observer = Peer::connect(&dispatcher).await;

    let record = relay::send_message(&dispatcher, &db, alice_id, "<script>alert(1)</script>")
        .await
        .unwrap();
    assert!(!record.content.contains('<') && !record.content.contains('>'));

    let stored = db.get_message(&record.id.to_string()).unwrap().unwrap();
    assert_eq!(stored.content, record.content);

    let broadcast = observer
        .broadcast_events()
        .into_iter()
        .find_map(|e| match e {
            ServerEvent::MessageNew { message } => Some(message),
            _ => None,
        })
        .unwrap();
    assert!(!broadcast.content.contains('<') && !broadcast.content.contains('>'));
}

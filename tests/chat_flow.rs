use std::sync::Arc;
use std::time::Duration;

use basic_chat::backend::ChatStore;
use basic_chat::chat::{ChatScreen, ScreenEvent};
use basic_chat::directory::DirectoryScreen;
use basic_chat::memory::MemoryBackend;
use basic_chat::message_list::{Alignment, Content, MessageListAdapter};
use basic_chat::relay::{NotificationRelay, RelayOutcome, SkipReason};
use basic_chat::session::{register_push_token, sign_up, Session};
use chrono::FixedOffset;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn open_screen(
    backend: &Arc<MemoryBackend>,
    uid: &str,
    name: &str,
    peer: &str,
    now: i64,
) -> ChatScreen {
    ChatScreen::new(
        backend.clone(),
        backend.clone(),
        Some(Session::new(uid, Some(name))),
        Some(peer.to_string()),
    )
    .with_clock(move || now)
    .with_adapter(MessageListAdapter::new(uid).with_offset(FixedOffset::east_opt(0).unwrap()))
}

async fn drain_until(screen: &mut ChatScreen, count: usize) {
    while screen.adapter().item_count() < count {
        let event = timeout(WAIT, screen.next_event())
            .await
            .expect("timed out waiting for messages")
            .expect("subscription ended");
        if let ScreenEvent::ListenFailed(error) = event {
            panic!("listen failed: {}", error);
        }
    }
}

async fn two_users(backend: &MemoryBackend) {
    sign_up(backend, "u1", "ann@example.com", "Ann").await.unwrap();
    sign_up(backend, "u2", "bob@example.com", "Bob").await.unwrap();
}

#[tokio::test]
async fn both_clients_see_the_conversation_in_order() {
    let backend = Arc::new(MemoryBackend::new());
    two_users(&backend).await;

    let mut ann = open_screen(&backend, "u1", "Ann", "u2", 100);
    let mut bob = open_screen(&backend, "u2", "Bob", "u1", 200);
    assert_eq!(ann.room_id(), Some("u1_u2"));
    assert_eq!(bob.room_id(), Some("u1_u2"));

    ann.open().await.unwrap();
    bob.open().await.unwrap();

    ann.send_text("hi").await.unwrap();
    bob.send_text("hey").await.unwrap();

    drain_until(&mut ann, 2).await;
    drain_until(&mut bob, 2).await;

    for (screen, own) in vec![(&ann, "u1"), (&bob, "u2")] {
        let messages = screen.adapter().messages();
        let seen: Vec<_> = messages
            .iter()
            .map(|m| (m.sender.as_str(), m.receiver.as_str(), m.text.as_str(), m.timestamp))
            .collect();
        assert_eq!(seen, vec![("u1", "u2", "hi", 100), ("u2", "u1", "hey", 200)]);

        for row in screen.adapter().rows() {
            let mine = row.bubble().content == Content::Text("hi".to_string());
            assert_eq!(row.is_sent(), mine == (own == "u1"));
        }
        assert_eq!(screen.scroll_target(), Some(1));
    }

    let first = ann.adapter().bind(0).unwrap();
    assert_eq!(first.alignment(), Alignment::Right);
    assert_eq!(first.bubble().sender_label, "Ann");
    assert_eq!(first.bubble().time_label, "12:00 AM");

    let reply = ann.adapter().bind(1).unwrap();
    assert_eq!(reply.alignment(), Alignment::Left);
    assert_eq!(reply.bubble().sender_label, "Bob");

    ann.close();
    bob.close();
}

#[tokio::test]
async fn busy_room_does_not_drop_messages_elsewhere() {
    let backend = Arc::new(MemoryBackend::new());
    two_users(&backend).await;

    let mut ann = open_screen(&backend, "u1", "Ann", "u2", 100);
    ann.open().await.unwrap();
    ann.send_text("hi").await.unwrap();

    let noisy = open_screen(&backend, "u3", "Cy", "u4", 150);
    for _ in 0..300 {
        noisy.send_text("spam").await.unwrap();
    }

    drain_until(&mut ann, 1).await;
    assert_eq!(ann.adapter().messages()[0].text, "hi");
    assert_eq!(backend.messages("u3_u4").len(), 300);
}

#[tokio::test]
async fn late_subscriber_gets_history_first() {
    let backend = Arc::new(MemoryBackend::new());
    two_users(&backend).await;

    let ann = open_screen(&backend, "u1", "Ann", "u2", 300);
    ann.send_text("are you there?").await.unwrap();

    let mut bob = open_screen(&backend, "u2", "Bob", "u1", 400);
    bob.open().await.unwrap();
    drain_until(&mut bob, 1).await;

    let row = bob.adapter().bind(0).unwrap();
    assert!(!row.is_sent());
    assert_eq!(row.bubble().content, Content::Text("are you there?".to_string()));
}

#[tokio::test]
async fn directory_opens_chat_with_the_selected_user() {
    let backend = Arc::new(MemoryBackend::new());
    two_users(&backend).await;
    sign_up(&*backend, "u3", "cy@example.com", "").await.unwrap();

    let mut directory = DirectoryScreen::new(backend.clone(), Session::new("u1", Some("Ann")));
    directory.refresh().await.unwrap();

    let names: Vec<_> = (0..directory.adapter().item_count())
        .filter_map(|position| directory.adapter().bind(position))
        .map(|row| row.display_name)
        .collect();
    assert_eq!(names, vec!["Bob", "cy"]);

    let target = directory.open_chat(1).unwrap();
    let mut chat = open_screen(&backend, "u1", "Ann", &target.peer_uid, 500);
    assert_eq!(chat.load_title().await, "cy");
    assert_eq!(chat.room_id(), Some("u1_u3"));
}

#[tokio::test]
async fn relay_follows_each_message_to_the_receiver() {
    let backend = Arc::new(MemoryBackend::new());
    two_users(&backend).await;
    register_push_token(&*backend, &Session::new("u2", None), "token-u2")
        .await
        .unwrap();

    let relay = NotificationRelay::new(backend.clone(), backend.clone());
    let ann = open_screen(&backend, "u1", "Ann", "u2", 100);
    let bob = open_screen(&backend, "u2", "Bob", "u1", 200);

    let to_bob = ann.send_text("hi").await.unwrap().unwrap();
    let to_ann = bob.send_text("hey").await.unwrap().unwrap();
    let stored = backend.messages("u1_u2");

    let outcome = relay.on_message_created("u1_u2", &to_bob, &stored[0]).await;
    assert_eq!(outcome.kind(), "sent");

    let lookups = backend.user_lookups();
    let outcome = relay.on_message_created("u1_u2", &to_ann, &stored[1]).await;
    assert_eq!(outcome, RelayOutcome::Skipped(SkipReason::NoToken));
    assert_eq!(backend.user_lookups(), lookups + 1);

    let pushes = backend.sent_pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].token, "token-u2");
    assert_eq!(pushes[0].notification.title, "Ann");
    assert_eq!(pushes[0].notification.body, "hi");
    assert_eq!(pushes[0].data.chat_room_id, "u1_u2");
    assert_eq!(pushes[0].data.sender_uid, "u1");
}

#[tokio::test]
async fn message_to_self_is_not_looked_up() {
    let backend = Arc::new(MemoryBackend::new());
    two_users(&backend).await;
    let relay = NotificationRelay::new(backend.clone(), backend.clone());

    let note = basic_chat::model::Message {
        text: "note".to_string(),
        sender: "u1".to_string(),
        receiver: "u1".to_string(),
        sender_name: "Ann".to_string(),
        timestamp: 1,
        ..Default::default()
    };
    let id = backend.add_message("u1_u1", &note).await.unwrap();

    let outcome = relay.on_message_created("u1_u1", &id, &note).await;
    assert_eq!(outcome, RelayOutcome::Skipped(SkipReason::SelfMessage));
    assert_eq!(backend.user_lookups(), 0);
    assert!(backend.sent_pushes().is_empty());
}

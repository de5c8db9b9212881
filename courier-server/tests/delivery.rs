//! End-to-end delivery over the WebSocket and the REST fallback.

mod common;

use std::time::Duration;

use chrono::Utc;
use common::TestServer;
use reqwest::StatusCode;
use serde_json::json;
use shared::models::{
    ClientEvent, DeliveryStatus, DirectSendPayload, DirectTypingPayload, GroupRef,
    GroupSendPayload, Message, MessageRef, ServerEvent,
};

fn direct(content: &str, to: &str) -> ClientEvent {
    ClientEvent::SendDirect(DirectSendPayload {
        content: content.to_string(),
        receiver_handle: to.to_string(),
        attachment: None,
        client_ref: None,
    })
}

fn new_message(event: &ServerEvent) -> Option<Message> {
    match event {
        ServerEvent::NewMessage(message) => Some(message.clone()),
        _ => None,
    }
}

fn message_sent(event: &ServerEvent) -> Option<Message> {
    match event {
        ServerEvent::MessageSent(sent) => Some(sent.message.clone()),
        _ => None,
    }
}

fn delivered_notice(event: &ServerEvent) -> Option<MessageRef> {
    match event {
        ServerEvent::MessageDelivered(notice) => Some(*notice),
        _ => None,
    }
}

async fn history_with(server: &TestServer, viewer: &common::TestUser, peer: &str) -> Vec<Message> {
    let (status, body) = server
        .get_json(viewer, "/api/messages", &[("peer", peer.to_string())])
        .await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_value(body["messages"].clone()).unwrap()
}

#[tokio::test]
async fn online_recipient_gets_push_and_sender_gets_delivered_notice() {
    let server = TestServer::start().await;
    let alice = server.user("alice");
    let bob = server.user("bob");
    let mut alice_ws = server.connect(&alice).await;
    let mut bob_ws = server.connect(&bob).await;

    alice_ws.emit(&direct("hi", "bob")).await;

    let echo = alice_ws.expect(message_sent).await;
    assert_eq!(echo.body, "hi");
    assert_eq!(echo.status, DeliveryStatus::Sent);

    let pushed = bob_ws.expect(new_message).await;
    assert_eq!(pushed.id, echo.id);
    assert_eq!(pushed.body, "hi");
    assert_eq!(pushed.sender_handle, "alice");

    let notice = alice_ws.expect(delivered_notice).await;
    assert_eq!(notice.message_id, echo.id);

    let stored = history_with(&server, &alice, "bob").await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, DeliveryStatus::Delivered);
    assert!(stored[0].delivered_at.is_some());
}

#[tokio::test]
async fn offline_recipient_receives_queue_before_newer_messages() {
    let server = TestServer::start().await;
    let alice = server.user("alice");
    let bob = server.user("bob");

    for content in ["first", "second"] {
        let (status, body) = server
            .post_json(
                &alice,
                "/api/messages",
                json!({"content": content, "receiverHandle": "bob"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], "SENT");
    }

    let mut bob_ws = server.try_connect(Some(&bob.token)).await.unwrap();
    let flushed: Vec<String> = vec![
        bob_ws.expect(new_message).await.body,
        bob_ws.expect(new_message).await.body,
    ];
    assert_eq!(flushed, ["first", "second"]);
    bob_ws.ready().await;

    server
        .post_json(
            &alice,
            "/api/messages",
            json!({"content": "third", "receiverHandle": "bob"}),
        )
        .await;
    assert_eq!(bob_ws.expect(new_message).await.body, "third");

    let stored = history_with(&server, &bob, "alice").await;
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(Message::is_delivered));
}

#[tokio::test]
async fn queued_messages_are_flushed_exactly_once() {
    let server = TestServer::start().await;
    let alice = server.user("alice");
    let bob = server.user("bob");

    server
        .post_json(
            &alice,
            "/api/messages",
            json!({"content": "once", "receiverHandle": "bob"}),
        )
        .await;

    let mut first = server.connect(&bob).await;
    assert_eq!(first.expect(new_message).await.body, "once");
    first.close().await;
    server.wait_online(&alice, "bob", false).await;

    let mut second = server.connect(&bob).await;
    second
        .expect_none(Duration::from_millis(300), |event| {
            matches!(event, ServerEvent::NewMessage(_))
        })
        .await;
}

#[tokio::test]
async fn group_send_reaches_only_connected_members_and_is_delivered() {
    let server = TestServer::start().await;
    let alice = server.user("alice");
    let bob = server.user("bob");
    let carol = server.user("carol");
    let group_id = server
        .store
        .create_group(&[alice.summary.id, bob.summary.id, carol.summary.id]);

    let mut alice_ws = server.connect(&alice).await;
    alice_ws
        .emit(&ClientEvent::SendGroup(GroupSendPayload {
            content: "hello G".to_string(),
            group_id,
            attachment: None,
            client_ref: None,
        }))
        .await;

    let echo = alice_ws.expect(message_sent).await;
    let broadcast = alice_ws.expect(new_message).await;
    assert_eq!(broadcast.id, echo.id);
    assert_eq!(broadcast.target.group_id(), Some(group_id));
    alice_ws.expect(delivered_notice).await;

    let (status, body) = server
        .get_json(&bob, "/api/messages", &[("groupId", group_id.to_string())])
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"][0]["status"], "DELIVERED");
}

#[tokio::test]
async fn group_typing_requires_joining_the_room() {
    let server = TestServer::start().await;
    let alice = server.user("alice");
    let bob = server.user("bob");
    let group_id = server.store.create_group(&[alice.summary.id]);

    let mut alice_ws = server.connect(&alice).await;
    let mut bob_ws = server.connect(&bob).await;

    bob_ws.emit(&ClientEvent::JoinGroup(GroupRef { group_id })).await;
    let error = bob_ws
        .expect(|event| match event {
            ServerEvent::MessageError(payload) => Some(payload.reason.clone()),
            _ => None,
        })
        .await;
    assert_eq!(error, "Not a member of this group");

    server.store.add_member(group_id, bob.summary.id);
    bob_ws.emit(&ClientEvent::JoinGroup(GroupRef { group_id })).await;
    let joined = alice_ws
        .expect(|event| match event {
            ServerEvent::GroupUserOnline(notice) => Some(notice.handle.clone()),
            _ => None,
        })
        .await;
    assert_eq!(joined, "bob");

    bob_ws
        .emit(&ClientEvent::GroupTypingStart(GroupRef { group_id }))
        .await;
    let typing = alice_ws
        .expect(|event| match event {
            ServerEvent::GroupTypingIndicator(indicator) => Some(indicator.clone()),
            _ => None,
        })
        .await;
    assert_eq!(typing.handle, "bob");
    assert!(typing.is_typing);
}

#[tokio::test]
async fn ambiguous_target_is_rejected_before_persistence() {
    let server = TestServer::start().await;
    let alice = server.user("alice");
    server.user("bob");
    let group_id = server.store.create_group(&[alice.summary.id]);

    let (status, body) = server
        .post_json(
            &alice,
            "/api/messages",
            json!({"content": "x", "receiverHandle": "bob", "groupId": group_id}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "ambiguous_target");

    let (status, _) = server
        .post_json(&alice, "/api/messages", json!({"content": "x"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(server.store.message_count(), 0);
}

#[tokio::test]
async fn socket_errors_come_back_as_message_error() {
    let server = TestServer::start().await;
    let alice = server.user("alice");
    let mut alice_ws = server.connect(&alice).await;

    alice_ws.emit(&direct("hi", "nobody")).await;
    let reason = alice_ws
        .expect(|event| match event {
            ServerEvent::MessageError(payload) => Some(payload.reason.clone()),
            _ => None,
        })
        .await;
    assert_eq!(reason, "Recipient not found");

    alice_ws.emit(&direct("   ", "alice")).await;
    let reason = alice_ws
        .expect(|event| match event {
            ServerEvent::MessageError(payload) => Some(payload.reason.clone()),
            _ => None,
        })
        .await;
    assert_eq!(reason, "Message content or attachment required");

    alice_ws.emit_raw(r#"{"event":"bogus","data":{}}"#).await;
    let reason = alice_ws
        .expect(|event| match event {
            ServerEvent::MessageError(payload) => Some(payload.reason.clone()),
            _ => None,
        })
        .await;
    assert_eq!(reason, "Malformed event");

    // the session survives every failure
    alice_ws.ready().await;
    assert_eq!(server.store.message_count(), 0);
}

#[tokio::test]
async fn poll_marks_delivered_and_drains_the_queue() {
    let server = TestServer::start().await;
    let alice = server.user("alice");
    let bob = server.user("bob");
    let mut alice_ws = server.connect(&alice).await;

    let before = Utc::now() - chrono::Duration::seconds(1);
    alice_ws.emit(&direct("while you were away", "bob")).await;
    let sent = alice_ws.expect(message_sent).await;

    let (status, body) = server
        .get_json(&bob, "/api/messages/poll", &[("since", before.to_rfc3339())])
        .await;
    assert_eq!(status, StatusCode::OK);
    let polled: Vec<Message> = serde_json::from_value(body["messages"].clone()).unwrap();
    assert_eq!(polled.len(), 1);
    assert_eq!(polled[0].id, sent.id);
    assert_eq!(polled[0].status, DeliveryStatus::Delivered);

    let notice = alice_ws.expect(delivered_notice).await;
    assert_eq!(notice.message_id, sent.id);

    let mut bob_ws = server.connect(&bob).await;
    bob_ws
        .expect_none(Duration::from_millis(300), |event| {
            matches!(event, ServerEvent::NewMessage(_))
        })
        .await;
}

#[tokio::test]
async fn acknowledging_twice_notifies_the_sender_once() {
    let server = TestServer::start().await;
    let alice = server.user("alice");
    let bob = server.user("bob");

    let (_, body) = server
        .post_json(
            &alice,
            "/api/messages",
            json!({"content": "ack me", "receiverHandle": "bob"}),
        )
        .await;
    let id: uuid::Uuid = serde_json::from_value(body["data"]["id"].clone()).unwrap();

    let mut alice_ws = server.connect(&alice).await;
    let mut bob_ws = server.try_connect(Some(&bob.token)).await.unwrap();
    bob_ws.expect(new_message).await;
    bob_ws.ready().await;

    // the flush already delivered it; explicit acks are no-ops
    alice_ws.expect(delivered_notice).await;
    for _ in 0..2 {
        bob_ws
            .emit(&ClientEvent::MessageDelivered(MessageRef { message_id: id }))
            .await;
    }
    bob_ws.ready().await;
    alice_ws
        .expect_none(Duration::from_millis(300), |event| {
            matches!(event, ServerEvent::MessageDelivered(_))
        })
        .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_connection_is_relayed_in_the_order_it_sent() {
    let server = TestServer::start().await;
    let alice = server.user("alice");
    let bob = server.user("bob");
    let mut alice_ws = server.connect(&alice).await;
    let mut bob_ws = server.connect(&bob).await;

    for n in 0..150 {
        alice_ws.emit(&direct(&format!("m{n}"), "bob")).await;
        let typing = DirectTypingPayload {
            receiver_handle: "bob".to_string(),
        };
        alice_ws.emit(&ClientEvent::TypingStart(typing.clone())).await;
        alice_ws.emit(&ClientEvent::TypingStop(typing)).await;
    }

    let mut bodies = Vec::new();
    for _ in 0..150 {
        bodies.push(bob_ws.expect(new_message).await.body);
    }
    let expected: Vec<String> = (0..150).map(|n| format!("m{n}")).collect();
    assert_eq!(bodies, expected);

    let mut last_typing = None;
    for _ in 0..300 {
        last_typing = Some(
            bob_ws
                .expect(|event| match event {
                    ServerEvent::TypingIndicator(indicator) => Some(indicator.is_typing),
                    _ => None,
                })
                .await,
        );
    }
    assert_eq!(last_typing, Some(false));
}

mod common;

use common::{
    assert_no_frame_of_kind, connect, recv_kind, seeded_backend, send_frame, start_server,
};
use realtime_api::store::ChatStore;

// ---------------------------------------------------------------------------
// Connection & auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upgrade_rejects_unknown_token() {
    let backend = seeded_backend();
    let addr = start_server(backend.state.clone()).await;

    let url = format!("ws://{addr}/ws?token=bogus");
    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_err(), "upgrade must fail for an unknown token");
}

#[tokio::test]
async fn connecting_user_receives_chat_list() {
    let backend = seeded_backend();
    let addr = start_server(backend.state.clone()).await;

    let mut ws = connect(addr, "tok_u1").await;
    let frame = recv_kind(&mut ws, "chat_list").await;
    assert!(frame["data"]["chats"].is_array());
}

#[tokio::test]
async fn unknown_kind_is_ignored_and_connection_survives() {
    let backend = seeded_backend();
    let addr = start_server(backend.state.clone()).await;

    let mut u1 = connect(addr, "tok_u1").await;
    let mut u2 = connect(addr, "tok_u2").await;
    send_frame(&mut u1, "telepathy", serde_json::json!({"whatever": true})).await;

    // The connection still works for recognized kinds afterwards.
    send_frame(
        &mut u1,
        "chat",
        serde_json::json!({"content": "still alive", "recipient_id": "u2", "message_type": "text"}),
    )
    .await;
    let frame = recv_kind(&mut u2, "chat").await;
    assert_eq!(frame["data"]["content"], "still alive");
}

// ---------------------------------------------------------------------------
// Chat delivery & ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn private_messages_arrive_in_send_order_with_canonical_ids() {
    let backend = seeded_backend();
    let addr = start_server(backend.state.clone()).await;

    let mut u1 = connect(addr, "tok_u1").await;
    let mut u2 = connect(addr, "tok_u2").await;

    for content in ["one", "two", "three"] {
        send_frame(
            &mut u1,
            "chat",
            serde_json::json!({"content": content, "recipient_id": "u2", "message_type": "text"}),
        )
        .await;
    }

    let mut ids = Vec::new();
    for expected in ["one", "two", "three"] {
        let frame = recv_kind(&mut u2, "chat").await;
        assert_eq!(frame["data"]["content"], expected);
        assert_eq!(frame["data"]["sender_id"], "u1");
        assert_eq!(frame["data"]["sender_name"], "Ada Lovelace");
        ids.push(frame["data"]["id"].as_str().unwrap().to_string());
    }
    // Identity is assigned by the persistence layer and monotonic.
    let parsed: Vec<i64> = ids.iter().map(|i| i.parse().unwrap()).collect();
    assert!(parsed[0] < parsed[1] && parsed[1] < parsed[2]);

    // The sender gets the same frames as delivery acks.
    let ack = recv_kind(&mut u1, "chat").await;
    assert_eq!(ack["data"]["content"], "one");
}

#[tokio::test]
async fn group_messages_fan_out_to_connected_participants_only() {
    let backend = seeded_backend();
    backend.store.add_group("g1", "Book Club", "u1", &["u2"]);
    let addr = start_server(backend.state.clone()).await;

    let mut u1 = connect(addr, "tok_u1").await;
    let mut u2 = connect(addr, "tok_u2").await;
    let mut u3 = connect(addr, "tok_u3").await; // not a member

    send_frame(
        &mut u1,
        "chat",
        serde_json::json!({"content": "meeting at 8", "group_id": "g1", "message_type": "text"}),
    )
    .await;

    let frame = recv_kind(&mut u2, "chat").await;
    assert_eq!(frame["data"]["content"], "meeting at 8");
    assert_eq!(frame["data"]["group_id"], "g1");

    // Persisted exactly once.
    let thread_id: i64 = frame["data"]["chat_id"].as_str().unwrap().parse().unwrap();
    assert_eq!(backend.store.message_count(thread_id).await.unwrap(), 1);

    // A non-participant gets no push, and a later joiner gets nothing
    // retroactively.
    assert_no_frame_of_kind(&mut u3, "chat", 300).await;
    backend.store.add_participant(thread_id, "u3").await.unwrap();
    assert_no_frame_of_kind(&mut u3, "chat", 300).await;
}

#[tokio::test]
async fn kicked_member_stops_receiving_group_messages() {
    let backend = seeded_backend();
    backend.store.add_group("g1", "Book Club", "u1", &["u2"]);
    let addr = start_server(backend.state.clone()).await;

    let mut u1 = connect(addr, "tok_u1").await;
    let mut u2 = connect(addr, "tok_u2").await;

    send_frame(
        &mut u1,
        "chat",
        serde_json::json!({"content": "before kick", "group_id": "g1", "message_type": "text"}),
    )
    .await;
    let frame = recv_kind(&mut u2, "chat").await;
    let thread_id: i64 = frame["data"]["chat_id"].as_str().unwrap().parse().unwrap();
    // Drain the sender's own copy so the next read sees the post-kick send.
    let own = recv_kind(&mut u1, "chat").await;
    assert_eq!(own["data"]["content"], "before kick");

    // Kick u2: membership sync removes the participant row while the
    // socket stays open.
    backend.store.remove_participant(thread_id, "u2").await.unwrap();
    backend.store.remove_group_member("g1", "u2");

    send_frame(
        &mut u1,
        "chat",
        serde_json::json!({"content": "after kick", "group_id": "g1", "message_type": "text"}),
    )
    .await;
    let own = recv_kind(&mut u1, "chat").await;
    assert_eq!(own["data"]["content"], "after kick");
    assert_no_frame_of_kind(&mut u2, "chat", 300).await;

    // Joining a different group must not resurrect the removed row.
    backend.store.add_group("g2", "Chess Club", "u3", &[]);
    send_frame(&mut u2, "join_group", serde_json::json!({"group_id": "g2"})).await;
    recv_kind(&mut u2, "chat_list").await;
    assert!(!backend.store.is_participant(thread_id, "u2").await.unwrap());
}

// ---------------------------------------------------------------------------
// Media validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_media_is_rejected_to_sender_only_and_never_persisted() {
    let backend = seeded_backend();
    let addr = start_server(backend.state.clone()).await;

    let mut u1 = connect(addr, "tok_u1").await;
    let mut u2 = connect(addr, "tok_u2").await;

    send_frame(
        &mut u1,
        "media",
        serde_json::json!({"content": "https://evil.com/?q=tenor.com", "recipient_id": "u2"}),
    )
    .await;

    let error = recv_kind(&mut u1, "media").await;
    assert_eq!(error["data"]["error"], true);
    assert_eq!(error["data"]["category"], "invalid_media");
    assert_no_frame_of_kind(&mut u2, "media", 300).await;

    // No thread, no message: nothing was persisted.
    assert!(backend.store.list_conversations("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn valid_media_is_persisted_and_fanned_out() {
    let backend = seeded_backend();
    let addr = start_server(backend.state.clone()).await;

    let mut u1 = connect(addr, "tok_u1").await;
    let mut u2 = connect(addr, "tok_u2").await;

    send_frame(
        &mut u1,
        "media",
        serde_json::json!({"content": "https://media.tenor.com/fun.gif", "recipient_id": "u2"}),
    )
    .await;

    let frame = recv_kind(&mut u2, "media").await;
    assert_eq!(frame["data"]["message_type"], "media");
    assert_eq!(frame["data"]["content"], "https://media.tenor.com/fun.gif");
    let thread_id: i64 = frame["data"]["chat_id"].as_str().unwrap().parse().unwrap();
    assert_eq!(backend.store.message_count(thread_id).await.unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Presence & privacy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn presence_broadcasts_stay_within_the_social_graph() {
    let backend = seeded_backend();
    backend.store.add_follow("u1", "u2");
    let addr = start_server(backend.state.clone()).await;

    let mut u1 = connect(addr, "tok_u1").await;
    let mut u3 = connect(addr, "tok_u3").await; // no edges with u2

    let mut _u2 = connect(addr, "tok_u2").await;

    let status = recv_kind(&mut u1, "user_status_update").await;
    assert_eq!(status["data"]["user_id"], "u2");
    assert_eq!(status["data"]["is_online"], true);
    // The related observer also gets a refreshed, annotated chat list.
    recv_kind(&mut u1, "chat_list").await;

    assert_no_frame_of_kind(&mut u3, "user_status_update", 300).await;

    // online_users honors the same privacy boundary.
    send_frame(&mut u1, "online_users", serde_json::json!({})).await;
    let online = recv_kind(&mut u1, "online_users").await;
    assert_eq!(online["data"], serde_json::json!(["u2"]));

    send_frame(&mut u3, "online_users", serde_json::json!({})).await;
    let online = recv_kind(&mut u3, "online_users").await;
    assert_eq!(online["data"], serde_json::json!([]));
}

#[tokio::test]
async fn disconnect_of_last_session_broadcasts_offline() {
    let backend = seeded_backend();
    backend.store.add_follow("u1", "u2");
    let addr = start_server(backend.state.clone()).await;

    let mut u1 = connect(addr, "tok_u1").await;
    let u2 = connect(addr, "tok_u2").await;

    let status = recv_kind(&mut u1, "user_status_update").await;
    assert_eq!(status["data"]["is_online"], true);

    drop(u2);

    let status = recv_kind(&mut u1, "user_status_update").await;
    assert_eq!(status["data"]["user_id"], "u2");
    assert_eq!(status["data"]["is_online"], false);
}

#[tokio::test]
async fn typing_events_reach_participants() {
    let backend = seeded_backend();
    let thread_id = backend
        .store
        .find_or_create_private_thread("u1", "u2")
        .await
        .unwrap();
    let addr = start_server(backend.state.clone()).await;

    let mut u1 = connect(addr, "tok_u1").await;
    let mut u2 = connect(addr, "tok_u2").await;

    send_frame(
        &mut u1,
        "typing",
        serde_json::json!({"chat_id": thread_id.to_string(), "user_name": "Ada Lovelace", "is_typing": true}),
    )
    .await;

    let frame = recv_kind(&mut u2, "typing").await;
    assert_eq!(frame["data"][0]["user_id"], "u1");
    assert_eq!(frame["data"][0]["is_typing"], true);
}

// ---------------------------------------------------------------------------
// History & read receipts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn offline_recipient_catches_up_via_history_and_read_receipts() {
    let backend = seeded_backend();
    backend.store.add_follow("u1", "u2");
    let addr = start_server(backend.state.clone()).await;

    // u1 messages u2 while u2 is offline.
    let mut u1 = connect(addr, "tok_u1").await;
    send_frame(
        &mut u1,
        "chat",
        serde_json::json!({"content": "are you there?", "recipient_id": "u2", "message_type": "text"}),
    )
    .await;
    let sent = recv_kind(&mut u1, "chat").await;
    let chat_id = sent["data"]["chat_id"].as_str().unwrap().to_string();
    let message_id = sent["data"]["id"].as_str().unwrap().to_string();

    // u2 reconnects later and fetches history.
    let mut u2 = connect(addr, "tok_u2").await;
    send_frame(
        &mut u2,
        "chat_messages",
        serde_json::json!({"chat_id": chat_id, "limit": 50, "offset": 0}),
    )
    .await;
    let history = recv_kind(&mut u2, "chat_messages").await;
    assert_eq!(history["data"]["total"], 1);
    assert_eq!(history["data"]["has_more"], false);
    let message = &history["data"]["messages"][0];
    assert_eq!(message["content"], "are you there?");
    assert_eq!(message["sender_name"], "Ada Lovelace");
    assert_eq!(message["sender_avatar"], "/avatars/ada.png");
    assert_eq!(message["is_read"], false);

    // u2 acknowledges; both participants observe the read state.
    send_frame(
        &mut u2,
        "messages_read",
        serde_json::json!({"chat_id": chat_id, "message_ids": [message_id]}),
    )
    .await;
    let read = recv_kind(&mut u1, "messages_read").await;
    assert_eq!(read["data"]["user_id"], "u2");

    // A repeat fetch now shows the message as read.
    send_frame(
        &mut u2,
        "chat_messages",
        serde_json::json!({"chat_id": chat_id, "limit": 50, "offset": 0}),
    )
    .await;
    let history = recv_kind(&mut u2, "chat_messages").await;
    assert_eq!(history["data"]["messages"][0]["is_read"], true);
}

#[tokio::test]
async fn history_is_denied_to_non_participants() {
    let backend = seeded_backend();
    let thread_id = backend
        .store
        .find_or_create_private_thread("u1", "u2")
        .await
        .unwrap();
    let addr = start_server(backend.state.clone()).await;

    let mut u3 = connect(addr, "tok_u3").await;
    send_frame(
        &mut u3,
        "chat_messages",
        serde_json::json!({"chat_id": thread_id.to_string()}),
    )
    .await;

    let error = recv_kind(&mut u3, "chat_messages").await;
    assert_eq!(error["data"]["error"], true);
    assert_eq!(error["data"]["category"], "access_denied");
}

// ---------------------------------------------------------------------------
// Notifications & invitations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn peer_notification_is_persisted_pushed_and_acked() {
    let backend = seeded_backend();
    let addr = start_server(backend.state.clone()).await;

    let mut u1 = connect(addr, "tok_u1").await;
    let mut u2 = connect(addr, "tok_u2").await;

    send_frame(
        &mut u1,
        "notification",
        serde_json::json!({
            "recipient_id": "u2",
            "type": "follow_request",
            "ref_id": "u1",
            "message": "Ada Lovelace wants to follow you"
        }),
    )
    .await;

    let pushed = recv_kind(&mut u2, "notification").await;
    assert_eq!(pushed["data"]["type"], "follow_request");
    assert_eq!(pushed["data"]["sender_avatar"], "/avatars/ada.png");
    assert_eq!(pushed["data"]["is_read"], false);

    let ack = recv_kind(&mut u1, "notification").await;
    assert_eq!(ack["data"]["status"], "sent");
    assert_eq!(
        ack["data"]["id"].as_str().unwrap(),
        pushed["data"]["id"].as_str().unwrap()
    );

    // Exactly one record was persisted.
    assert_eq!(backend.store.list_notifications("u2").await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_notification_type_is_dropped() {
    let backend = seeded_backend();
    let addr = start_server(backend.state.clone()).await;

    let mut u1 = connect(addr, "tok_u1").await;
    let mut u2 = connect(addr, "tok_u2").await;

    send_frame(
        &mut u1,
        "notification",
        serde_json::json!({"recipient_id": "u2", "type": "poke", "ref_id": "x", "message": "hi"}),
    )
    .await;

    assert_no_frame_of_kind(&mut u2, "notification", 300).await;
    assert!(backend.store.list_notifications("u2").await.unwrap().is_empty());
}

#[tokio::test]
async fn group_invitation_frames_are_relayed_to_the_right_party() {
    let backend = seeded_backend();
    let addr = start_server(backend.state.clone()).await;

    let mut u1 = connect(addr, "tok_u1").await;
    let mut u2 = connect(addr, "tok_u2").await;

    send_frame(
        &mut u1,
        "group_invitation",
        serde_json::json!({
            "group_id": "g1",
            "group_name": "Book Club",
            "inviter_id": "u1",
            "inviter_name": "Ada Lovelace",
            "invitee_id": "u2",
            "action": "notify_invitation"
        }),
    )
    .await;
    let invite = recv_kind(&mut u2, "group_invitation").await;
    assert_eq!(invite["data"]["group_name"], "Book Club");

    send_frame(
        &mut u2,
        "group_invitation",
        serde_json::json!({
            "group_id": "g1",
            "inviter_id": "u1",
            "invitee_id": "u2",
            "action": "notify_response",
            "message": "accepted"
        }),
    )
    .await;
    let response = recv_kind(&mut u1, "group_invitation").await;
    assert_eq!(response["data"]["message"], "accepted");
}

// ---------------------------------------------------------------------------
// Group membership sync over the wire
// ---------------------------------------------------------------------------

#[tokio::test]
async fn join_and_leave_group_keep_participants_in_sync() {
    let backend = seeded_backend();
    backend.store.add_group("g1", "Book Club", "u1", &[]);
    let addr = start_server(backend.state.clone()).await;

    let mut u2 = connect(addr, "tok_u2").await;

    send_frame(&mut u2, "join_group", serde_json::json!({"group_id": "g1"})).await;
    recv_kind(&mut u2, "chat_list").await;
    let thread_id = backend.store.group_thread_id("g1").await.unwrap().unwrap();
    assert!(backend.store.is_participant(thread_id, "u2").await.unwrap());

    // Joining again is a no-op, not an error.
    send_frame(&mut u2, "join_group", serde_json::json!({"group_id": "g1"})).await;
    recv_kind(&mut u2, "chat_list").await;
    assert_eq!(backend.store.participants(thread_id).await.unwrap().len(), 2);

    send_frame(&mut u2, "leave_group", serde_json::json!({"group_id": "g1"})).await;
    recv_kind(&mut u2, "chat_list").await;
    assert!(!backend.store.is_participant(thread_id, "u2").await.unwrap());
}

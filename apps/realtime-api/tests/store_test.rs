mod common;

use std::collections::HashSet;
use std::sync::Arc;

use realtime_api::store::{ChatStore, MemoryStore};

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.add_user("u1", "Ada", "Lovelace", Some("/avatars/ada.png"));
    store.add_user("u2", "Alan", "Turing", None);
    store.add_user("u3", "Grace", "Hopper", None);
    store
}

#[tokio::test]
async fn concurrent_first_contact_creates_exactly_one_thread() {
    let store = seeded_store();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            // Half the callers pass the pair in reverse order.
            if i % 2 == 0 {
                store.find_or_create_private_thread("u1", "u2").await
            } else {
                store.find_or_create_private_thread("u2", "u1").await
            }
        }));
    }

    let mut ids = HashSet::new();
    for task in tasks {
        ids.insert(task.await.unwrap().unwrap());
    }
    assert_eq!(ids.len(), 1, "concurrent callers must converge on one thread");

    // Both users see exactly one shared conversation.
    let u1_chats = store.list_conversations("u1").await.unwrap();
    let u2_chats = store.list_conversations("u2").await.unwrap();
    assert_eq!(u1_chats.len(), 1);
    assert_eq!(u2_chats.len(), 1);
    assert_eq!(u1_chats[0].id, u2_chats[0].id);
}

#[tokio::test]
async fn messages_page_newest_first_with_has_more_math() {
    let store = seeded_store();
    let thread = store.find_or_create_private_thread("u1", "u2").await.unwrap();

    for i in 1..=3 {
        store
            .append_message(thread, "u1", &format!("m{i}"), "text")
            .await
            .unwrap();
    }

    let page = store.list_messages(thread, "u2", 2, 0).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].content, "m3");
    assert_eq!(page[1].content, "m2");

    let rest = store.list_messages(thread, "u2", 2, 2).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].content, "m1");

    assert_eq!(store.message_count(thread).await.unwrap(), 3);
}

#[tokio::test]
async fn append_message_decorates_sender_and_assigns_identity() {
    let store = seeded_store();
    let thread = store.find_or_create_private_thread("u1", "u2").await.unwrap();

    let record = store
        .append_message(thread, "u1", "hello", "text")
        .await
        .unwrap();
    assert!(!record.id.is_empty());
    assert_eq!(record.chat_id, thread.to_string());
    assert_eq!(record.sender_name, "Ada Lovelace");
    assert_eq!(record.sender_avatar, "/avatars/ada.png");
    assert!(!record.is_read);
}

#[tokio::test]
async fn kicked_member_does_not_resurrect_via_other_group_join() {
    let store = seeded_store();
    store.add_group("g1", "Book Club", "u1", &["u2"]);
    store.add_group("g2", "Chess Club", "u3", &[]);

    let g1_thread = store.find_or_create_group_thread("g1").await.unwrap();
    let g2_thread = store.find_or_create_group_thread("g2").await.unwrap();

    // Kick u2 from g1.
    store.remove_participant(g1_thread, "u2").await.unwrap();
    store.remove_group_member("g1", "u2");
    assert!(!store.is_participant(g1_thread, "u2").await.unwrap());

    // Joining a different group later must not touch g1's participants.
    store.add_participant(g2_thread, "u2").await.unwrap();
    assert!(store.is_participant(g2_thread, "u2").await.unwrap());
    assert!(!store.is_participant(g1_thread, "u2").await.unwrap());
}

#[tokio::test]
async fn group_conversation_summary_carries_member_count_and_icon() {
    let store = seeded_store();
    store.add_group("g1", "Book Club", "u1", &["u2", "u3"]);
    store.find_or_create_group_thread("g1").await.unwrap();

    let chats = store.list_conversations("u2").await.unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].kind, "group");
    assert_eq!(chats[0].name, "Book Club");
    assert_eq!(chats[0].member_count, Some(3));
    assert_eq!(chats[0].group_id.as_deref(), Some("g1"));
    assert_eq!(chats[0].avatar, "/images/default-group.png");
}

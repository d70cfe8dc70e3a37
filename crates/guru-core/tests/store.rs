//! Chat store tests - round trips, save gating, and reopen behavior

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use guru_core::models::{Chat, Citation, Message, SearchState};
use guru_core::store::CHATS_KEY;
use guru_core::{ChatStore, KeyValueStorage, MemoryStorage, SqliteStorage};

fn sample_chat(id: &str, updated_at: i64) -> Chat {
    let t0 = Utc.timestamp_millis_opt(1_700_000_000_123).single().expect("ts");
    let user = Message::user("What is 2 + 2?", None, t0);
    let mut reply = Message::assistant("It is $4$.", t0 + Duration::seconds(2));
    reply.citations = vec![Citation {
        start_offset: 0,
        end_offset: 5,
        url: "https://example.com/math".to_string(),
        title: "Math".to_string(),
    }];
    reply.search = Some(SearchState::completed(&reply.citations));
    Chat {
        id: id.to_string(),
        title: "Basic arithmetic".to_string(),
        category: "Math".to_string(),
        messages: vec![user, reply],
        created_at: t0.timestamp_millis(),
        updated_at,
        is_favorite: false,
    }
}

#[tokio::test]
async fn round_trip_strips_placeholders() {
    let store = ChatStore::new(MemoryStorage::new());
    let mut chat = sample_chat("chat-1", 10);
    chat.messages.push(Message::thinking(Utc::now()));
    chat.messages.push(Message::streaming(Utc::now()));

    assert!(store.upsert(&chat).await.expect("upsert"));

    let loaded = store.get_by_id("chat-1").await.expect("get").expect("exists");
    assert_eq!(loaded.messages.len(), 2);
    assert!(loaded.messages.iter().all(|m| !m.is_placeholder()));
    assert_eq!(loaded, chat.without_placeholders());
    assert_eq!(loaded.messages[0].timestamp, chat.messages[0].timestamp);
}

#[tokio::test]
async fn chat_without_user_message_is_not_saved() {
    let store = ChatStore::new(MemoryStorage::new());
    let mut chat = sample_chat("chat-empty", 10);
    chat.messages.retain(|m| !m.is_user());

    assert!(!store.upsert(&chat).await.expect("upsert"));
    assert!(store.list_all().await.expect("list").is_empty());
    assert!(store.get_by_id("chat-empty").await.expect("get").is_none());
}

#[tokio::test]
async fn upsert_replaces_whole_record() {
    let store = ChatStore::new(MemoryStorage::new());
    store.upsert(&sample_chat("chat-1", 10)).await.expect("first");

    let mut updated = sample_chat("chat-1", 20);
    updated.title = "Renamed".to_string();
    updated.messages.truncate(1);
    store.upsert(&updated).await.expect("second");

    let all = store.list_all().await.expect("list");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].title, "Renamed");
    assert_eq!(all[0].messages.len(), 1);
    assert_eq!(all[0].updated_at, 20);
}

#[tokio::test]
async fn delete_and_favorite() {
    let store = ChatStore::new(MemoryStorage::new());
    store.upsert(&sample_chat("a", 10)).await.expect("a");
    store.upsert(&sample_chat("b", 20)).await.expect("b");

    store.delete("missing").await.expect("no-op delete");
    assert_eq!(store.list_all().await.expect("list").len(), 2);

    assert_eq!(store.toggle_favorite("a").await.expect("toggle"), Some(true));
    assert_eq!(store.toggle_favorite("missing").await.expect("toggle"), None);
    let favorites = store.list_favorites().await.expect("favorites");
    assert_eq!(favorites.len(), 1);
    assert_eq!(favorites[0].id, "a");

    store.delete("a").await.expect("delete");
    let remaining = store.list_all().await.expect("list");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "b");
}

#[tokio::test]
async fn rename_updates_title_and_category_only() {
    let store = ChatStore::new(MemoryStorage::new());
    store.upsert(&sample_chat("a", 10)).await.expect("upsert");
    store.toggle_favorite("a").await.expect("toggle");

    assert!(store.rename("a", "Addition", "Mathematics").await.expect("rename"));
    assert!(!store.rename("missing", "x", "y").await.expect("rename missing"));

    let chat = store.get_by_id("a").await.expect("get").expect("exists");
    assert_eq!(chat.title, "Addition");
    assert_eq!(chat.category, "Mathematics");
    assert_eq!(chat.messages.len(), 2);
    assert_eq!(chat.updated_at, 10);
    assert!(chat.is_favorite);
    assert_eq!(store.list_all().await.expect("list").len(), 1);
}

#[tokio::test]
async fn session_save_keeps_favorite_toggled_elsewhere() {
    let store = ChatStore::new(MemoryStorage::new());
    store.upsert(&sample_chat("a", 10)).await.expect("upsert");
    store.toggle_favorite("a").await.expect("toggle");

    // A session still holding the old flag saves a new revision.
    let stale = sample_chat("a", 30);
    assert!(!stale.is_favorite);
    store.upsert_keeping_favorite(&stale).await.expect("save");

    let loaded = store.get_by_id("a").await.expect("get").expect("exists");
    assert!(loaded.is_favorite);
    assert_eq!(loaded.updated_at, 30);
}

#[tokio::test]
async fn ordering_and_grouping_helpers() {
    let store = ChatStore::new(MemoryStorage::new());
    store.upsert(&sample_chat("old", 10)).await.expect("old");
    let mut cooking = sample_chat("new", 30);
    cooking.category = "Cooking".to_string();
    store.upsert(&cooking).await.expect("new");
    store.upsert(&sample_chat("mid", 20)).await.expect("mid");

    let recent: Vec<String> = store
        .list_recent()
        .await
        .expect("recent")
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(recent, vec!["new", "mid", "old"]);

    let latest = store.latest().await.expect("latest").expect("some");
    assert_eq!(latest.id, "new");

    let math = store.list_by_category("Math").await.expect("by category");
    assert_eq!(math.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["mid", "old"]);

    store.delete_all().await.expect("delete all");
    assert!(store.list_all().await.expect("list").is_empty());
}

#[tokio::test]
async fn corrupt_json_is_an_error_for_list_all() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item(CHATS_KEY, "{not json").await.expect("seed");
    let store = ChatStore::new(Arc::clone(&storage));

    assert!(store.list_all().await.is_err());
    assert!(store.list_all_or_empty().await.is_empty());
}

#[tokio::test]
async fn reads_epoch_millis_timestamps() {
    let storage = Arc::new(MemoryStorage::new());
    let json = r#"[{
        "id": "chat-legacy",
        "title": "Legacy",
        "messages": [
            {"id": "user-1", "text": "hi", "role": "user", "timestamp": 1700000000123},
            {"id": "bot-1", "text": "hello", "role": "assistant", "timestamp": "2023-11-14T22:13:21.123Z"}
        ],
        "createdAt": 1700000000000,
        "updatedAt": 1700000000500
    }]"#;
    storage.set_item(CHATS_KEY, json).await.expect("seed");
    let store = ChatStore::new(Arc::clone(&storage));

    let chat = store.get_by_id("chat-legacy").await.expect("get").expect("exists");
    assert_eq!(chat.category, guru_core::models::DEFAULT_CATEGORY);
    assert!(!chat.is_favorite);
    assert_eq!(chat.messages[0].timestamp.timestamp_millis(), 1_700_000_000_123);
    assert_eq!(chat.messages[1].timestamp, chat.messages[0].timestamp + Duration::seconds(1));
}

#[tokio::test]
async fn sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("nested").join("guru.db");

    {
        let storage = SqliteStorage::open(&db_path).await.expect("open");
        let store = ChatStore::new(storage);
        store.upsert(&sample_chat("persist", 42)).await.expect("upsert");
        store.toggle_favorite("persist").await.expect("favorite");
    }

    let storage = SqliteStorage::open(&db_path).await.expect("reopen");
    let store = ChatStore::new(storage);
    let chat = store.get_by_id("persist").await.expect("get").expect("exists");
    assert_eq!(chat.title, "Basic arithmetic");
    assert!(chat.is_favorite);
    assert_eq!(chat, {
        let mut expected = sample_chat("persist", 42);
        expected.is_favorite = true;
        expected
    });
}

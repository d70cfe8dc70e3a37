//! Local chat store.
//!
//! All chats live as one JSON array under the `chats` key. Every mutation
//! reads the array, changes it, and rewrites it whole; there are no partial
//! writes. This keeps the format trivially compatible with the device store
//! but makes each save O(history size).

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::Chat;
use crate::storage::KeyValueStorage;

/// Storage key holding the chat array.
pub const CHATS_KEY: &str = "chats";

/// Durable mapping from chat id to chat record.
pub struct ChatStore<S> {
    storage: S,
    /// Serializes read-modify-write cycles on the chat array.
    write_lock: Mutex<()>,
}

impl<S: KeyValueStorage> ChatStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// All persisted chats in stored order, with message timestamps
    /// rehydrated. Empty storage yields an empty list; unreadable JSON is
    /// returned as an error for the caller to log.
    pub async fn list_all(&self) -> Result<Vec<Chat>> {
        let Some(json) = self.storage.get_item(CHATS_KEY).await? else {
            return Ok(Vec::new());
        };
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&json)?)
    }

    /// Like [`Self::list_all`], but logs read failures and degrades to an
    /// empty list.
    pub async fn list_all_or_empty(&self) -> Vec<Chat> {
        match self.list_all().await {
            Ok(chats) => chats,
            Err(err) => {
                warn!(error = %err, "Failed to read chats, starting with empty history");
                Vec::new()
            }
        }
    }

    /// Single chat by id.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Chat>> {
        Ok(self.list_all().await?.into_iter().find(|c| c.id == id))
    }

    /// Insert or overwrite a chat by id, replacing the whole record.
    ///
    /// Placeholder messages are stripped first. A chat without any user
    /// message is not written; the return value reports whether a write
    /// happened.
    pub async fn upsert(&self, chat: &Chat) -> Result<bool> {
        self.write_chat(chat, false).await
    }

    /// Like [`Self::upsert`], but an existing record's favorite flag wins
    /// over the one in `chat`. Used by sessions, whose copy of the flag may
    /// be older than a toggle made from the history list.
    pub async fn upsert_keeping_favorite(&self, chat: &Chat) -> Result<bool> {
        self.write_chat(chat, true).await
    }

    async fn write_chat(&self, chat: &Chat, keep_favorite: bool) -> Result<bool> {
        let mut chat = chat.without_placeholders();
        if !chat.has_user_message() {
            debug!(chat_id = %chat.id, "Skipping save of chat without user messages");
            return Ok(false);
        }

        let _guard = self.write_lock.lock().await;
        let mut chats = self.list_all().await?;
        if let Some(existing) = chats.iter_mut().find(|c| c.id == chat.id) {
            if keep_favorite {
                chat.is_favorite = existing.is_favorite;
            }
            *existing = chat;
        } else {
            chats.push(chat);
        }
        self.save_all(&chats).await?;
        Ok(true)
    }

    /// Remove a chat by id. Absent ids are a no-op.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut chats = self.list_all().await?;
        let before = chats.len();
        chats.retain(|c| c.id != id);
        if chats.len() != before {
            self.save_all(&chats).await?;
        }
        Ok(())
    }

    /// Flip the favorite flag. Returns the new value, or `None` when the
    /// chat does not exist.
    pub async fn toggle_favorite(&self, id: &str) -> Result<Option<bool>> {
        let _guard = self.write_lock.lock().await;
        let mut chats = self.list_all().await?;
        let Some(chat) = chats.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        chat.is_favorite = !chat.is_favorite;
        let value = chat.is_favorite;
        self.save_all(&chats).await?;
        Ok(Some(value))
    }

    /// Set the title and category of a stored chat in place. Returns
    /// `false` when the chat does not exist.
    pub async fn rename(&self, id: &str, title: &str, category: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut chats = self.list_all().await?;
        let Some(chat) = chats.iter_mut().find(|c| c.id == id) else {
            return Ok(false);
        };
        chat.title = title.to_string();
        chat.category = category.to_string();
        self.save_all(&chats).await?;
        Ok(true)
    }

    /// Most recently updated chat.
    pub async fn latest(&self) -> Result<Option<Chat>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .max_by_key(|c| c.updated_at))
    }

    /// Chats sorted by `updated_at`, newest first.
    pub async fn list_recent(&self) -> Result<Vec<Chat>> {
        let mut chats = self.list_all().await?;
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(chats)
    }

    pub async fn list_by_category(&self, category: &str) -> Result<Vec<Chat>> {
        let mut chats = self.list_recent().await?;
        chats.retain(|c| c.category == category);
        Ok(chats)
    }

    pub async fn list_favorites(&self) -> Result<Vec<Chat>> {
        let mut chats = self.list_recent().await?;
        chats.retain(|c| c.is_favorite);
        Ok(chats)
    }

    pub async fn delete_all(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.storage.remove_item(CHATS_KEY).await
    }

    async fn save_all(&self, chats: &[Chat]) -> Result<()> {
        let json = serde_json::to_string(chats)?;
        self.storage.set_item(CHATS_KEY, &json).await
    }
}

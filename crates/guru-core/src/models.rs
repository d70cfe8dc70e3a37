//! Domain models for chats and their messages.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Category assigned to a chat until classification completes.
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

/// Message roles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// Transient state of a message. Anything other than `None` marks a
/// placeholder that is never persisted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    None,
    Thinking,
    Searching,
    Streaming,
}

impl Lifecycle {
    pub fn is_transient(self) -> bool {
        self != Lifecycle::None
    }
}

/// A source reference attached to an assistant message.
///
/// Offsets are character offsets into the finalized message text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub start_offset: usize,
    pub end_offset: usize,
    pub url: String,
    pub title: String,
}

/// A web page consulted during a search-augmented turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchSource {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Progress of web-search augmentation for one assistant message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchState {
    pub is_searching: bool,
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub sources: Vec<SearchSource>,
}

impl SearchState {
    /// State shown while the search request is outstanding.
    pub fn searching() -> Self {
        Self {
            is_searching: true,
            ..Self::default()
        }
    }

    /// Completed state listing each cited url once, in citation order.
    pub fn completed(citations: &[Citation]) -> Self {
        let mut sources: Vec<SearchSource> = Vec::new();
        for citation in citations {
            if sources.iter().any(|s| s.url == citation.url) {
                continue;
            }
            sources.push(SearchSource {
                title: citation.title.clone(),
                url: citation.url.clone(),
                snippet: None,
            });
        }
        Self {
            is_searching: false,
            is_completed: true,
            summary: None,
            sources,
        }
    }
}

/// A single turn in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub role: MessageRole,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_uri: Option<String>,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(default)]
    pub is_latest_user_turn: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchState>,
}

impl Message {
    fn new(prefix: &str, role: MessageRole, text: String, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("{prefix}-{}", now.timestamp_millis()),
            text,
            role,
            // Stored with millisecond precision.
            timestamp: now.trunc_subsecs(3),
            attachment_uri: None,
            lifecycle: Lifecycle::None,
            is_latest_user_turn: false,
            citations: Vec::new(),
            search: None,
        }
    }

    /// A user message; it becomes the latest user turn.
    pub fn user(text: impl Into<String>, attachment_uri: Option<String>, now: DateTime<Utc>) -> Self {
        let mut message = Self::new("user", MessageRole::User, text.into(), now);
        message.attachment_uri = attachment_uri;
        message.is_latest_user_turn = true;
        message
    }

    /// A finalized assistant message.
    pub fn assistant(text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new("bot", MessageRole::Assistant, text.into(), now)
    }

    pub fn system(text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new("system", MessageRole::System, text.into(), now)
    }

    /// Placeholder shown while the assistant is working on a reply.
    pub fn thinking(now: DateTime<Utc>) -> Self {
        let mut message = Self::new("bot-thinking", MessageRole::Assistant, String::new(), now);
        message.lifecycle = Lifecycle::Thinking;
        message
    }

    /// Placeholder shown while a web search is outstanding.
    pub fn searching(now: DateTime<Utc>) -> Self {
        let mut message = Self::new(
            "bot-searching",
            MessageRole::Assistant,
            "Searching the web...".to_string(),
            now,
        );
        message.lifecycle = Lifecycle::Searching;
        message.search = Some(SearchState::searching());
        message
    }

    /// Placeholder that accumulates streamed text.
    pub fn streaming(now: DateTime<Utc>) -> Self {
        let mut message = Self::new("bot-streaming", MessageRole::Assistant, String::new(), now);
        message.lifecycle = Lifecycle::Streaming;
        message
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }

    pub fn is_placeholder(&self) -> bool {
        self.lifecycle.is_transient()
    }
}

/// A persisted conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    #[serde(default = "default_category")]
    pub category: String,
    pub messages: Vec<Message>,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds, refreshed on every save.
    pub updated_at: i64,
    #[serde(default)]
    pub is_favorite: bool,
}

impl Chat {
    /// Generate a chat id for a conversation started at `now`.
    pub fn new_id(now: DateTime<Utc>) -> String {
        format!("chat-{}", now.timestamp_millis())
    }

    pub fn has_user_message(&self) -> bool {
        self.messages.iter().any(Message::is_user)
    }

    /// Copy of this chat with transient placeholder messages removed.
    pub fn without_placeholders(&self) -> Self {
        Self {
            messages: self
                .messages
                .iter()
                .filter(|m| !m.is_placeholder())
                .cloned()
                .collect(),
            ..self.clone()
        }
    }

    /// Text of the first user message and the first finalized assistant reply.
    pub fn first_exchange(&self) -> Option<(&str, &str)> {
        first_exchange(&self.messages)
    }
}

/// Text of the first user message and the first finalized assistant reply.
pub fn first_exchange(messages: &[Message]) -> Option<(&str, &str)> {
    let user = messages.iter().find(|m| m.is_user())?;
    let assistant = messages
        .iter()
        .find(|m| m.role == MessageRole::Assistant && !m.is_placeholder())?;
    Some((user.text.as_str(), assistant.text.as_str()))
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

/// Message timestamps are written as RFC 3339 strings and read back from
/// either RFC 3339 strings or epoch milliseconds.
mod timestamp {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {ms}"))),
            Raw::Text(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;

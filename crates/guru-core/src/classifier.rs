//! Title and category classification for a chat's first exchange.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::categories::category_names;
use crate::models::{DEFAULT_CATEGORY, MessageRole};
use crate::provider::{ChatProvider, CompletionRequest, RequestMessage};

/// Words kept by [`fallback_title`].
const FALLBACK_TITLE_WORDS: usize = 5;

/// Title used when the first message has no text at all.
pub const UNTITLED: &str = "New chat";

/// Title and category for a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub title: String,
    pub category: String,
}

impl Classification {
    /// Deterministic result derived from the user's text alone.
    pub fn fallback(user_text: &str) -> Self {
        Self {
            title: fallback_title(user_text),
            category: DEFAULT_CATEGORY.to_string(),
        }
    }
}

/// First five words of `text`, with an ellipsis when truncated.
pub fn fallback_title(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return UNTITLED.to_string();
    }
    let mut title = words
        .iter()
        .take(FALLBACK_TITLE_WORDS)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if words.len() > FALLBACK_TITLE_WORDS {
        title.push_str("...");
    }
    title
}

#[derive(Deserialize)]
struct RawClassification {
    title: String,
    category: String,
}

/// Extract `{"title": ..., "category": ...}` from a reply that may wrap the
/// JSON object in prose or code fences.
pub fn parse_classification(raw: &str) -> Option<Classification> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: RawClassification = serde_json::from_str(&raw[start..=end]).ok()?;
    let title = parsed.title.trim();
    let category = parsed.category.trim();
    if title.is_empty() || category.is_empty() {
        return None;
    }
    Some(Classification {
        title: title.to_string(),
        category: category.to_string(),
    })
}

/// Asks the provider to name a conversation.
#[derive(Debug, Clone)]
pub struct Classifier {
    model: String,
}

impl Classifier {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    pub fn prompt(user_text: &str, assistant_text: &str) -> String {
        format!(
            "Based on this conversation between a user and an assistant, generate a short title \
(at most 4 words) and a category that captures the main topic.\n\n\
User: {user_text}\n\
Assistant: {assistant_text}\n\n\
Reply ONLY with valid JSON following this example:\n\
{{\"title\": \"Chocolate Cake Recipe\", \"category\": \"Cooking\"}}\n\n\
Possible categories: {}\n\n\
JSON:",
            category_names()
        )
    }

    /// Classify the first exchange. Never fails: request errors and
    /// unparsable replies resolve to [`Classification::fallback`].
    pub async fn classify<P: ChatProvider>(
        &self,
        provider: &P,
        user_text: &str,
        assistant_text: &str,
    ) -> Classification {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![RequestMessage::text(
                MessageRole::User,
                Self::prompt(user_text, assistant_text),
            )],
            stream: false,
            web_search: false,
        };

        match provider.complete(&request).await {
            Ok(completion) => match parse_classification(&completion.text) {
                Some(classification) => {
                    debug!(title = %classification.title, category = %classification.category, "Classified chat");
                    classification
                }
                None => {
                    warn!(reply = %completion.text, "Unparsable classification, using fallback");
                    Classification::fallback(user_text)
                }
            },
            Err(err) => {
                warn!(error = %err, "Classification request failed, using fallback");
                Classification::fallback(user_text)
            }
        }
    }
}

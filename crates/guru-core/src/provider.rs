//! Interface to the AI chat provider.
//!
//! The session only depends on [`ChatProvider`]; the HTTP implementation
//! lives in `guru-provider`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::ProviderError;
use crate::models::{Citation, MessageRole};

/// Chat request in the provider-agnostic shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<RequestMessage>,
    pub stream: bool,
    /// Route through the search-capable endpoint.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub web_search: bool,
}

impl CompletionRequest {
    /// Latest user-authored message, the only input a web search sends.
    pub fn latest_user_message(&self) -> Option<&RequestMessage> {
        self.messages.iter().rev().find(|m| m.role == MessageRole::User)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestMessage {
    pub role: MessageRole,
    pub content: Content,
}

impl RequestMessage {
    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Content::Text(text.into()),
        }
    }
}

/// Plain text, or a multipart array when an image is attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Concatenated text of all text parts.
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(text) => text.trim().is_empty(),
            Content::Parts(parts) => parts.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

/// Aggregate result of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// Incremental output of a streamed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Next piece of reply text.
    Delta(String),
    /// Additional citations; batches accumulate.
    Citations(Vec<Citation>),
}

/// An AI chat-completion backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Single-shot request returning the complete reply.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;

    /// Streamed request. Deltas and citation batches are sent on `events`
    /// in arrival order; the returned value aggregates everything sent.
    /// Dropping `events` on return closes the stream.
    async fn stream(
        &self,
        request: &CompletionRequest,
        events: UnboundedSender<StreamEvent>,
    ) -> Result<Completion, ProviderError>;
}

#[async_trait]
impl<P: ChatProvider> ChatProvider for Arc<P> {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        (**self).complete(request).await
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        events: UnboundedSender<StreamEvent>,
    ) -> Result<Completion, ProviderError> {
        (**self).stream(request, events).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_serializes_as_string() {
        let msg = RequestMessage::text(MessageRole::User, "hi");
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn multipart_content_serializes_typed_parts() {
        let msg = RequestMessage {
            role: MessageRole::User,
            content: Content::Parts(vec![
                ContentPart::Text {
                    text: "what is this?".to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/jpeg;base64,AAAA".to_string(),
                    },
                },
            ]),
        };
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(
            json["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,AAAA"
        );
        assert_eq!(msg.content.as_text(), "what is this?");
    }

    #[test]
    fn web_search_flag_omitted_when_false() {
        let request = CompletionRequest {
            model: "m".to_string(),
            messages: vec![],
            stream: true,
            web_search: false,
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert!(json.get("webSearch").is_none());
        assert!(json.get("web_search").is_none());
    }

    #[test]
    fn latest_user_message_skips_assistant() {
        let request = CompletionRequest {
            model: "m".to_string(),
            messages: vec![
                RequestMessage::text(MessageRole::System, "sys"),
                RequestMessage::text(MessageRole::User, "first"),
                RequestMessage::text(MessageRole::Assistant, "reply"),
                RequestMessage::text(MessageRole::User, "second"),
                RequestMessage::text(MessageRole::Assistant, "partial"),
            ],
            stream: false,
            web_search: true,
        };
        let latest = request.latest_user_message().expect("user message");
        assert_eq!(latest.content.as_text(), "second");
    }
}

//! Build provider requests from a message history.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::{Message, MessageRole};
use crate::provider::{CompletionRequest, Content, ContentPart, ImageUrl, RequestMessage};

/// Options shared by every request of a session.
#[derive(Debug, Clone)]
pub struct RequestOptions<'a> {
    pub model: &'a str,
    pub system_prompt: &'a str,
    pub stream: bool,
    pub web_search: bool,
}

/// Convert finalized history into a request.
///
/// The system prompt goes first. Placeholders and empty messages without an
/// attachment are dropped. Attached images are embedded as JPEG data URLs;
/// an unreadable image is logged and the message is sent as text only.
pub async fn build_request(history: &[Message], opts: &RequestOptions<'_>) -> CompletionRequest {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if !opts.system_prompt.trim().is_empty() {
        messages.push(RequestMessage::text(MessageRole::System, opts.system_prompt));
    }

    for msg in history {
        if msg.is_placeholder() {
            continue;
        }
        if msg.text.trim().is_empty() && msg.attachment_uri.is_none() {
            continue;
        }
        let content = match &msg.attachment_uri {
            Some(uri) => match image_data_url(uri).await {
                Ok(url) => Content::Parts(vec![
                    ContentPart::Text {
                        text: msg.text.clone(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url },
                    },
                ]),
                Err(err) => {
                    warn!(uri = %uri, error = %err, "Failed to read attachment, sending text only");
                    Content::Text(msg.text.clone())
                }
            },
            None => Content::Text(msg.text.clone()),
        };
        if content.is_empty() {
            continue;
        }
        messages.push(RequestMessage {
            role: msg.role,
            content,
        });
    }

    CompletionRequest {
        model: opts.model.to_string(),
        messages,
        stream: opts.stream,
        web_search: opts.web_search,
    }
}

/// Check that an attachment can be read before a message carries it.
/// Missing paths, directories and unreadable files are rejected.
pub async fn check_attachment(uri: &str) -> Result<()> {
    let path = attachment_path(uri);
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| Error::Attachment(e.to_string()))?;
    if !metadata.is_file() {
        return Err(Error::Attachment(format!("{path} is not a file")));
    }
    tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::Attachment(e.to_string()))?;
    Ok(())
}

fn attachment_path(uri: &str) -> &str {
    uri.strip_prefix("file://").unwrap_or(uri)
}

async fn image_data_url(uri: &str) -> std::io::Result<String> {
    let bytes = tokio::fs::read(attachment_path(uri)).await?;
    Ok(format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes)))
}

//! OpenAI-compatible chat provider.
//!
//! Plain turns go to `{base_url}/chat/completions`, streamed as SSE when the
//! request asks for it. Search-augmented turns go to `{base_url}/responses`
//! with the `web_search_preview` tool; that endpoint answers in one piece,
//! which is forwarded as a single delta plus one citation batch.

use std::time::Duration;

use async_trait::async_trait;
use guru_core::config::ProviderConfig;
use guru_core::models::Citation;
use guru_core::provider::{ChatProvider, Completion, CompletionRequest, StreamEvent};
use guru_core::{Error, ProviderError, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::sse::{SseData, SseParser};

/// Longest slice of an error body copied into logs.
const ERROR_DETAIL_CHARS: usize = 800;

// ── Chat completions ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    annotations: Vec<Annotation>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    annotations: Vec<Annotation>,
}

/// `{"type": "url_citation", "url_citation": {...}}`
#[derive(Debug, Deserialize)]
struct Annotation {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    url_citation: Option<UrlCitation>,
}

#[derive(Debug, Deserialize)]
struct UrlCitation {
    start_index: usize,
    end_index: usize,
    url: String,
    #[serde(default)]
    title: String,
}

// ── Responses (web search) ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ResponsesBody {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    annotations: Vec<FlatAnnotation>,
}

/// Responses-API annotations carry the citation fields inline.
#[derive(Debug, Deserialize)]
struct FlatAnnotation {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    start_index: Option<usize>,
    #[serde(default)]
    end_index: Option<usize>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

fn url_citations(annotations: Vec<Annotation>) -> Vec<Citation> {
    annotations
        .into_iter()
        .filter(|a| a.kind == "url_citation")
        .filter_map(|a| a.url_citation)
        .map(|c| Citation {
            start_offset: c.start_index,
            end_offset: c.end_index,
            url: c.url,
            title: c.title,
        })
        .collect()
}

/// Parse a non-streamed `chat/completions` body.
pub fn parse_chat_completion(body: &str) -> std::result::Result<Completion, ProviderError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    let Some(choice) = parsed.choices.into_iter().next() else {
        return Err(ProviderError::MalformedResponse("no choices in response".to_string()));
    };
    Ok(Completion {
        text: choice.message.content.unwrap_or_default(),
        citations: url_citations(choice.message.annotations),
    })
}

/// Events carried by one streamed `chat/completions` chunk.
pub fn parse_stream_chunk(data: &str) -> std::result::Result<Vec<StreamEvent>, ProviderError> {
    let parsed: StreamResponse =
        serde_json::from_str(data).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    let mut events = Vec::new();
    if let Some(choice) = parsed.choices.into_iter().next() {
        if let Some(content) = choice.delta.content
            && !content.is_empty()
        {
            events.push(StreamEvent::Delta(content));
        }
        let citations = url_citations(choice.delta.annotations);
        if !citations.is_empty() {
            events.push(StreamEvent::Citations(citations));
        }
    }
    Ok(events)
}

/// Parse a `responses` body: the first `message` item's `output_text`.
/// A body without one yields an empty completion.
pub fn parse_responses(body: &str) -> std::result::Result<Completion, ProviderError> {
    let parsed: ResponsesBody =
        serde_json::from_str(body).map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
    let text = parsed
        .output
        .into_iter()
        .find(|item| item.kind == "message")
        .and_then(|item| item.content.into_iter().find(|c| c.kind == "output_text"));
    let Some(text) = text else {
        return Ok(Completion::default());
    };
    let citations = text
        .annotations
        .into_iter()
        .filter(|a| a.kind == "url_citation")
        .filter_map(|a| {
            Some(Citation {
                start_offset: a.start_index?,
                end_offset: a.end_index?,
                url: a.url?,
                title: a.title.unwrap_or_default(),
            })
        })
        .collect();
    Ok(Completion {
        text: text.text,
        citations,
    })
}

fn network(err: reqwest::Error) -> ProviderError {
    if err.is_decode() {
        ProviderError::MalformedResponse(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

/// HTTP client for an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiProvider {
    http: Client,
    base_url: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    referer: Option<String>,
    app_title: Option<String>,
}

impl OpenAiProvider {
    /// Build a provider, reading the API key from the configured variable.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &ProviderConfig, api_key: impl Into<String>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            referer: config.referer.clone(),
            app_title: config.app_title.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// JSON body for `chat/completions`.
    pub fn chat_body(&self, request: &CompletionRequest, stream: bool) -> Value {
        json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": self.temperature,
            "max_completion_tokens": self.max_tokens,
            "stream": stream,
        })
    }

    /// JSON body for `responses`, or `None` when the request has no user
    /// message to search for.
    pub fn search_body(request: &CompletionRequest) -> Option<Value> {
        let input = request.latest_user_message()?.content.as_text();
        Some(json!({
            "model": request.model,
            "tools": [{ "type": "web_search_preview" }],
            "input": input,
        }))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let mut builder = self
            .http
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.api_key);
        if let Some(referer) = &self.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.app_title {
            builder = builder.header("X-Title", title);
        }
        builder
    }

    async fn send(
        &self,
        path: &str,
        body: &Value,
    ) -> std::result::Result<Response, ProviderError> {
        let response = self.post(path).json(body).send().await.map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail: String = body.chars().take(ERROR_DETAIL_CHARS).collect();
            warn!(status = status.as_u16(), path, detail = %detail, "Provider returned error status");
            return Err(ProviderError::HttpStatus(status.as_u16()));
        }
        Ok(response)
    }

    async fn search(
        &self,
        request: &CompletionRequest,
    ) -> Option<std::result::Result<Completion, ProviderError>> {
        let body = Self::search_body(request)?;
        debug!(model = %request.model, "Running web search request");
        let result = async {
            let response = self.send("responses", &body).await?;
            let text = response.text().await.map_err(network)?;
            parse_responses(&text)
        }
        .await;
        Some(result)
    }

    async fn complete_chat(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError> {
        let response = self
            .send("chat/completions", &self.chat_body(request, false))
            .await?;
        let text = response.text().await.map_err(network)?;
        parse_chat_completion(&text)
    }

    async fn stream_chat(
        &self,
        request: &CompletionRequest,
        events: &UnboundedSender<StreamEvent>,
    ) -> std::result::Result<Completion, ProviderError> {
        let mut response = self
            .send("chat/completions", &self.chat_body(request, true))
            .await?;

        let mut parser = SseParser::new();
        let mut completion = Completion::default();
        'read: loop {
            let chunk = response.chunk().await.map_err(network)?;
            let payloads = match &chunk {
                Some(bytes) => parser.feed(bytes),
                None => parser.finish().into_iter().collect(),
            };
            for payload in payloads {
                let data = match payload {
                    SseData::Done => break 'read,
                    SseData::Json(data) => data,
                };
                let parsed = match parse_stream_chunk(&data) {
                    Ok(parsed) => parsed,
                    Err(err) => {
                        warn!(error = %err, "Skipping unparsable stream chunk");
                        continue;
                    }
                };
                for event in parsed {
                    match &event {
                        StreamEvent::Delta(text) => completion.text.push_str(text),
                        StreamEvent::Citations(citations) => {
                            completion.citations.extend(citations.iter().cloned());
                        }
                    }
                    // The session may have moved on; keep reading to completion.
                    let _ = events.send(event);
                }
            }
            if chunk.is_none() {
                break;
            }
        }
        debug!(chars = completion.text.chars().count(), "Stream finished");
        Ok(completion)
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError> {
        if request.web_search
            && let Some(result) = self.search(request).await
        {
            return result;
        }
        self.complete_chat(request).await
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        events: UnboundedSender<StreamEvent>,
    ) -> std::result::Result<Completion, ProviderError> {
        if request.web_search
            && let Some(result) = self.search(request).await
        {
            let completion = result?;
            if !completion.text.is_empty() {
                let _ = events.send(StreamEvent::Delta(completion.text.clone()));
            }
            if !completion.citations.is_empty() {
                let _ = events.send(StreamEvent::Citations(completion.citations.clone()));
            }
            return Ok(completion);
        }
        self.stream_chat(request, &events).await
    }
}

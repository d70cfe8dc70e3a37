//! Chat session controller.
//!
//! Drives one active conversation through send/receive cycles. State lives
//! in a watch channel: every change goes through [`reduce`] and subscribers
//! always observe the latest applied version. At most one turn is in flight;
//! results for a turn that is no longer current are dropped.

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::classifier::Classifier;
use crate::config::Config;
use crate::error::{ProviderError, Result};
use crate::models::{Chat, Message, first_exchange};
use crate::provider::{ChatProvider, Completion, CompletionRequest, StreamEvent};
use crate::request::{RequestOptions, build_request};
use crate::state::{Action, Naming, SessionState, TurnId, reduce};
use crate::storage::KeyValueStorage;
use crate::store::ChatStore;

/// Generic message shown when a turn fails.
pub const RETRY_PROMPT: &str =
    "Could not send the message. Check your connection and try again.";

/// Per-session request settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub model: String,
    pub system_prompt: String,
    pub streaming: bool,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.provider.model.clone(),
            system_prompt: config.session.system_prompt.clone(),
            streaming: config.session.streaming,
        }
    }
}

/// What the user submitted.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub text: String,
    pub attachment_uri: Option<String>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment_uri: None,
        }
    }

    pub fn with_attachment(mut self, uri: impl Into<String>) -> Self {
        self.attachment_uri = Some(uri.into());
        self
    }
}

/// Result of [`ChatSession::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing to send.
    Ignored,
    /// Another turn is still in flight.
    Rejected,
    /// Reply finalized in the active chat and saved.
    Completed { chat_id: String, message_id: String },
    /// The chat changed before the reply arrived; the reply was dropped.
    Discarded,
    /// The request failed. Placeholders are gone, the user message stays.
    Failed(ProviderError),
}

/// Controller for the active conversation.
pub struct ChatSession<P, S> {
    provider: P,
    store: ChatStore<S>,
    classifier: Classifier,
    settings: SessionSettings,
    state: watch::Sender<SessionState>,
}

impl<P: ChatProvider, S: KeyValueStorage> ChatSession<P, S> {
    /// Session starting on a fresh, empty chat.
    pub fn new(
        provider: P,
        store: ChatStore<S>,
        classifier: Classifier,
        settings: SessionSettings,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::new(Utc::now()));
        Self {
            provider,
            store,
            classifier,
            settings,
            state,
        }
    }

    pub fn store(&self) -> &ChatStore<S> {
        &self.store
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every applied state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Visible messages, placeholders included.
    pub fn messages(&self) -> Vec<Message> {
        self.state.borrow().messages()
    }

    pub fn chat_id(&self) -> String {
        self.state.borrow().chat_id.clone()
    }

    fn apply(&self, action: Action) {
        self.state.send_modify(|state| {
            let prev = std::mem::take(state);
            *state = reduce(prev, action);
        });
    }

    /// Apply a turn action only while `turn` is still in flight, then run
    /// `inspect` on the resulting state. `None` when the turn is stale.
    fn apply_for_turn_then<R>(
        &self,
        turn: TurnId,
        action: Action,
        inspect: impl FnOnce(&SessionState) -> R,
    ) -> Option<R> {
        let mut inspected = None;
        self.state.send_if_modified(|state| {
            if !state.in_flight.is_some_and(|t| t.turn == turn) {
                return false;
            }
            let prev = std::mem::take(state);
            *state = reduce(prev, action);
            inspected = Some(inspect(state));
            true
        });
        inspected
    }

    fn apply_for_turn(&self, turn: TurnId, action: Action) -> bool {
        self.apply_for_turn_then(turn, action, |_| ()).is_some()
    }

    /// Flip web-search mode for the next turn. Returns the new value.
    pub fn toggle_search_mode(&self) -> bool {
        self.apply(Action::ToggleSearch);
        self.state.borrow().search_mode
    }

    /// Flip the thinking display for the next turn. Returns the new value.
    pub fn toggle_thinking_display(&self) -> bool {
        self.apply(Action::ToggleThinking);
        self.state.borrow().thinking_mode_display
    }

    pub fn dismiss_error(&self) {
        self.apply(Action::DismissError);
    }

    /// Start an empty chat. The previous chat stays in the store; a turn
    /// still running for it is discarded when it completes.
    pub fn new_chat(&self) {
        self.apply(Action::NewChat { now: Utc::now() });
        debug!(chat_id = %self.chat_id(), "Started new chat");
    }

    /// Switch to a stored chat. Returns `false` when it does not exist.
    pub async fn resume(&self, chat_id: &str) -> Result<bool> {
        let Some(chat) = self.store.get_by_id(chat_id).await? else {
            return Ok(false);
        };
        debug!(chat_id = %chat.id, messages = chat.messages.len(), "Resuming chat");
        self.apply(Action::Resume(chat));
        Ok(true)
    }

    /// Switch to the most recently updated stored chat, if any.
    pub async fn resume_latest(&self) -> Result<bool> {
        let Some(chat) = self.store.latest().await? else {
            return Ok(false);
        };
        self.apply(Action::Resume(chat));
        Ok(true)
    }

    /// Run one turn, then name the chat if this was its first exchange.
    ///
    /// Returns once both are done. Front-ends that want to accept input while
    /// naming runs call [`Self::send_turn`] and [`Self::name_chat`] instead.
    pub async fn send(&self, draft: Draft) -> SendOutcome {
        let outcome = self.send_turn(draft).await;
        if let SendOutcome::Completed { chat_id, .. } = &outcome {
            self.name_chat(chat_id).await;
        }
        outcome
    }

    /// Run one turn: append the user message and a placeholder, call the
    /// provider, fold its output into the placeholder, finalize, and save the
    /// chat. The save happens before this returns, so a chat switch right
    /// after cannot lose the exchange.
    pub async fn send_turn(&self, draft: Draft) -> SendOutcome {
        let text = draft.text.trim().to_string();
        if text.is_empty() && draft.attachment_uri.is_none() {
            return SendOutcome::Ignored;
        }

        let now = Utc::now();
        let turn = TurnId::new();
        let message = Message::user(text, draft.attachment_uri, now);

        let accepted = self.state.send_if_modified(|state| {
            if state.in_flight.is_some() {
                return false;
            }
            let prev = std::mem::take(state);
            *state = reduce(prev, Action::Submit { turn, message, now });
            true
        });
        if !accepted {
            debug!("Turn already in flight, rejecting send");
            return SendOutcome::Rejected;
        }

        let (chat_id, history, web_search) = {
            let state = self.state.borrow();
            (
                state.chat_id.clone(),
                state.final_messages(),
                state.in_flight.is_some_and(|t| t.web_search),
            )
        };
        debug!(chat_id = %chat_id, turn = %turn, web_search, "Sending message");

        let stream = self.settings.streaming || web_search;
        let request = build_request(
            &history,
            &RequestOptions {
                model: &self.settings.model,
                system_prompt: &self.settings.system_prompt,
                stream,
                web_search,
            },
        )
        .await;

        let result = if stream {
            self.run_stream(turn, &request).await
        } else {
            self.provider.complete(&request).await
        };

        match result {
            Ok(Completion { text, citations }) => {
                let now = Utc::now();
                let finalized = self.apply_for_turn_then(
                    turn,
                    Action::Finalize {
                        turn,
                        text,
                        citations,
                        now,
                    },
                    |state| (last_reply_id(state), state.to_chat(now)),
                );
                let Some((message_id, chat)) = finalized else {
                    debug!(chat_id = %chat_id, turn = %turn, "Chat changed, discarding reply");
                    return SendOutcome::Discarded;
                };
                debug!(chat_id = %chat_id, message_id = %message_id, "Turn finalized");

                self.save(&chat).await;
                SendOutcome::Completed {
                    chat_id,
                    message_id,
                }
            }
            Err(err) => {
                let applied = self.apply_for_turn(
                    turn,
                    Action::Fail {
                        turn,
                        error: err.clone(),
                    },
                );
                if !applied {
                    return SendOutcome::Discarded;
                }
                error!(chat_id = %chat_id, error = %err, "Failed to get AI response");
                SendOutcome::Failed(err)
            }
        }
    }

    /// Stream the request, applying events strictly in arrival order.
    async fn run_stream(
        &self,
        turn: TurnId,
        request: &CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request_fut = self.provider.stream(request, tx);
        let apply_fut = async {
            while let Some(event) = rx.recv().await {
                let action = match event {
                    StreamEvent::Delta(text) => Action::Delta {
                        turn,
                        text,
                        now: Utc::now(),
                    },
                    StreamEvent::Citations(citations) => Action::Citations { turn, citations },
                };
                self.apply_for_turn(turn, action);
            }
        };
        let (result, ()) = tokio::join!(request_fut, apply_fut);
        result
    }

    /// Classify the first exchange of `chat_id` and record its title and
    /// category, once per chat.
    ///
    /// Naming only starts while `chat_id` is the active chat. Once started,
    /// the result is written to the stored record even if the session has
    /// moved to another chat in the meantime. Failures are logged only.
    pub async fn name_chat(&self, chat_id: &str) {
        let mut exchange = None;
        self.state.send_if_modified(|state| {
            if state.chat_id != chat_id || state.naming != Naming::Unnamed {
                return false;
            }
            let messages = state.final_messages();
            let Some((user_text, assistant_text)) = first_exchange(&messages) else {
                return false;
            };
            exchange = Some((user_text.to_string(), assistant_text.to_string()));
            let prev = std::mem::take(state);
            *state = reduce(
                prev,
                Action::NamingStarted {
                    chat_id: chat_id.to_string(),
                },
            );
            true
        });
        let Some((user_text, assistant_text)) = exchange else {
            return;
        };

        let classification = self
            .classifier
            .classify(&self.provider, &user_text, &assistant_text)
            .await;
        let (title, category) = (classification.title.clone(), classification.category.clone());
        self.apply(Action::Named {
            chat_id: chat_id.to_string(),
            classification,
        });

        match self.store.rename(chat_id, &title, &category).await {
            Ok(true) => debug!(chat_id, title = %title, category = %category, "Named chat"),
            Ok(false) => debug!(chat_id, "Chat not stored yet, name kept in session"),
            Err(err) => warn!(chat_id, error = %err, "Failed to save chat name"),
        }
    }

    async fn save(&self, chat: &Chat) {
        match self.store.upsert_keeping_favorite(chat).await {
            Ok(true) => debug!(chat_id = %chat.id, title = %chat.title, "Saved chat"),
            Ok(false) => {}
            Err(err) => warn!(chat_id = %chat.id, error = %err, "Failed to save chat"),
        }
    }
}

/// Id of the newest finalized assistant message.
fn last_reply_id(state: &SessionState) -> String {
    state
        .entries
        .iter()
        .rev()
        .map(|e| e.message())
        .find(|m| !m.is_user() && !m.is_placeholder())
        .map(|m| m.id.clone())
        .unwrap_or_default()
}

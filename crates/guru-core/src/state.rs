//! Session state and its transition function.
//!
//! [`reduce`] is the only way a [`SessionState`] changes. Each call consumes
//! the previous version and returns the next one, so asynchronous callbacks
//! never act on a stale copy of the message list. Turn-scoped actions carry
//! the [`TurnId`] they belong to and are ignored once that turn is no longer
//! in flight (after a new chat, a resume, or the turn's own completion).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::classifier::{Classification, fallback_title};
use crate::error::ProviderError;
use crate::models::{Chat, Citation, DEFAULT_CATEGORY, Lifecycle, Message, MessageRole, SearchState};

/// Reply shown when the provider finished without producing any text.
pub const EMPTY_REPLY: &str = "Sorry, I couldn't generate a response.";

/// Identity of one user-submit-to-final-reply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnId(Uuid);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the visible message list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Final(Message),
    /// Stand-in for in-progress assistant work, owned by a turn.
    Placeholder { turn: TurnId, message: Message },
}

impl Entry {
    pub fn message(&self) -> &Message {
        match self {
            Entry::Final(message) | Entry::Placeholder { message, .. } => message,
        }
    }

    pub fn turn(&self) -> Option<TurnId> {
        match self {
            Entry::Final(_) => None,
            Entry::Placeholder { turn, .. } => Some(*turn),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Entry::Placeholder { .. })
    }

    fn is_placeholder_of(&self, turn: TurnId) -> bool {
        self.turn() == Some(turn)
    }
}

/// Per-turn options captured at submit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlightTurn {
    pub turn: TurnId,
    pub web_search: bool,
    pub show_thinking: bool,
}

/// Where the current turn is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Searching,
    Thinking,
    Streaming,
}

/// Progress of title/category naming for the chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Naming {
    #[default]
    Unnamed,
    InProgress,
    Named,
}

/// Snapshot of the active conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub chat_id: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub entries: Vec<Entry>,
    pub in_flight: Option<InFlightTurn>,
    pub can_show_new_question: bool,
    pub has_user_sent_message: bool,
    /// Applies to the next submitted turn.
    pub search_mode: bool,
    /// Applies to the next submitted turn.
    pub thinking_mode_display: bool,
    pub title: Option<String>,
    pub category: Option<String>,
    pub naming: Naming,
    pub is_favorite: bool,
    /// Error of the last failed turn, cleared by the next submit.
    pub last_error: Option<ProviderError>,
}

impl SessionState {
    /// Empty conversation started at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            chat_id: Chat::new_id(now),
            created_at: now.timestamp_millis(),
            ..Self::default()
        }
    }

    /// Every visible message, placeholders included, in list order.
    pub fn messages(&self) -> Vec<Message> {
        self.entries.iter().map(|e| e.message().clone()).collect()
    }

    /// Finalized messages only.
    pub fn final_messages(&self) -> Vec<Message> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                Entry::Final(message) => Some(message.clone()),
                Entry::Placeholder { .. } => None,
            })
            .collect()
    }

    pub fn placeholder_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_placeholder()).count()
    }

    pub fn phase(&self) -> TurnPhase {
        let Some(in_flight) = self.in_flight else {
            return TurnPhase::Idle;
        };
        let lifecycle = self
            .entries
            .iter()
            .rev()
            .find(|e| e.is_placeholder_of(in_flight.turn))
            .map(|e| e.message().lifecycle);
        match lifecycle {
            Some(Lifecycle::Searching) => TurnPhase::Searching,
            Some(Lifecycle::Streaming) => TurnPhase::Streaming,
            _ => TurnPhase::Thinking,
        }
    }

    pub fn has_user_message(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, Entry::Final(m) if m.is_user()))
    }

    /// Persistable record of this conversation as of `now`.
    pub fn to_chat(&self, now: DateTime<Utc>) -> Chat {
        let messages = self.final_messages();
        let title = self.title.clone().unwrap_or_else(|| {
            let first_user = messages.iter().find(|m| m.is_user()).map_or("", |m| m.text.as_str());
            fallback_title(first_user)
        });
        Chat {
            id: self.chat_id.clone(),
            title,
            category: self
                .category
                .clone()
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            messages,
            created_at: self.created_at,
            updated_at: now.timestamp_millis(),
            is_favorite: self.is_favorite,
        }
    }
}

/// Everything that can happen to a session.
#[derive(Debug, Clone)]
pub enum Action {
    /// User message accepted; opens a turn.
    Submit {
        turn: TurnId,
        message: Message,
        now: DateTime<Utc>,
    },
    /// Streamed text for the turn.
    Delta {
        turn: TurnId,
        text: String,
        now: DateTime<Utc>,
    },
    /// Additional citations for the turn.
    Citations {
        turn: TurnId,
        citations: Vec<Citation>,
    },
    /// Request completed; `text` and `citations` are the provider aggregate.
    Finalize {
        turn: TurnId,
        text: String,
        citations: Vec<Citation>,
        now: DateTime<Utc>,
    },
    /// Request failed.
    Fail { turn: TurnId, error: ProviderError },
    /// Naming of `chat_id` started.
    NamingStarted { chat_id: String },
    /// Naming of `chat_id` resolved.
    Named {
        chat_id: String,
        classification: Classification,
    },
    /// Start an empty conversation.
    NewChat { now: DateTime<Utc> },
    /// Continue a stored conversation.
    Resume(Chat),
    ToggleSearch,
    ToggleThinking,
    DismissError,
}

/// Compute the next session state.
pub fn reduce(prev: SessionState, action: Action) -> SessionState {
    match action {
        Action::Submit { turn, message, now } => submit(prev, turn, message, now),
        Action::Delta { turn, text, now } => delta(prev, turn, text, now),
        Action::Citations { turn, citations } => add_citations(prev, turn, citations),
        Action::Finalize {
            turn,
            text,
            citations,
            now,
        } => finalize(prev, turn, text, citations, now),
        Action::Fail { turn, error } => fail(prev, turn, error),
        Action::NamingStarted { chat_id } => {
            if chat_id != prev.chat_id || prev.naming != Naming::Unnamed {
                return prev;
            }
            SessionState {
                naming: Naming::InProgress,
                ..prev
            }
        }
        Action::Named {
            chat_id,
            classification,
        } => {
            if chat_id != prev.chat_id {
                return prev;
            }
            SessionState {
                title: Some(classification.title),
                category: Some(classification.category),
                naming: Naming::Named,
                ..prev
            }
        }
        Action::NewChat { now } => SessionState::new(now),
        Action::Resume(chat) => resume(chat),
        Action::ToggleSearch => SessionState {
            search_mode: !prev.search_mode,
            ..prev
        },
        Action::ToggleThinking => SessionState {
            thinking_mode_display: !prev.thinking_mode_display,
            ..prev
        },
        Action::DismissError => SessionState {
            last_error: None,
            ..prev
        },
    }
}

fn is_current(state: &SessionState, turn: TurnId) -> bool {
    state.in_flight.is_some_and(|t| t.turn == turn)
}

/// Append the user message and the turn's single placeholder. In search mode
/// the placeholder is Searching instead of Thinking, so a turn never shows
/// more than one placeholder; the first delta turns it into Streaming.
fn submit(prev: SessionState, turn: TurnId, message: Message, now: DateTime<Utc>) -> SessionState {
    if prev.in_flight.is_some() {
        return prev;
    }
    let web_search = prev.search_mode;

    let mut entries: Vec<Entry> = prev
        .entries
        .into_iter()
        .map(|entry| match entry {
            Entry::Final(mut m) if m.role == MessageRole::User && m.is_latest_user_turn => {
                m.is_latest_user_turn = false;
                Entry::Final(m)
            }
            other => other,
        })
        .collect();

    let message = Message {
        is_latest_user_turn: true,
        ..message
    };
    entries.push(Entry::Final(message));
    let placeholder = if web_search {
        Message::searching(now)
    } else {
        Message::thinking(now)
    };
    entries.push(Entry::Placeholder {
        turn,
        message: placeholder,
    });

    SessionState {
        entries,
        in_flight: Some(InFlightTurn {
            turn,
            web_search,
            show_thinking: prev.thinking_mode_display,
        }),
        can_show_new_question: false,
        has_user_sent_message: true,
        last_error: None,
        ..prev
    }
}

fn delta(prev: SessionState, turn: TurnId, text: String, now: DateTime<Utc>) -> SessionState {
    if !is_current(&prev, turn) || text.is_empty() {
        return prev;
    }

    let streaming = prev.entries.iter().position(|e| {
        e.is_placeholder_of(turn) && e.message().lifecycle == Lifecycle::Streaming
    });

    let entries = match streaming {
        Some(idx) => prev
            .entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| match entry {
                Entry::Placeholder { turn, mut message } if i == idx => {
                    message.text.push_str(&text);
                    Entry::Placeholder { turn, message }
                }
                other => other,
            })
            .collect(),
        None => {
            // First chunk: the turn's waiting placeholders collapse into one
            // streaming placeholder at the position of the first of them.
            let mut placeholder = Message::streaming(now);
            placeholder.text = text;
            replace_turn_placeholders(
                prev.entries,
                turn,
                Entry::Placeholder {
                    turn,
                    message: placeholder,
                },
                true,
            )
        }
    };

    SessionState { entries, ..prev }
}

fn add_citations(prev: SessionState, turn: TurnId, citations: Vec<Citation>) -> SessionState {
    if !is_current(&prev, turn) || citations.is_empty() {
        return prev;
    }
    let Some(idx) = prev.entries.iter().rposition(|e| e.is_placeholder_of(turn)) else {
        return prev;
    };
    let entries = prev
        .entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| match entry {
            Entry::Placeholder { turn, mut message } if i == idx => {
                message.citations.extend(citations.iter().cloned());
                Entry::Placeholder { turn, message }
            }
            other => other,
        })
        .collect();
    SessionState { entries, ..prev }
}

fn finalize(
    prev: SessionState,
    turn: TurnId,
    text: String,
    citations: Vec<Citation>,
    now: DateTime<Utc>,
) -> SessionState {
    let Some(in_flight) = prev.in_flight.filter(|t| t.turn == turn) else {
        return prev;
    };

    let (streamed_text, streamed_citations) = prev
        .entries
        .iter()
        .filter(|e| e.is_placeholder_of(turn))
        .fold((String::new(), Vec::new()), |(mut text, mut cites), e| {
            let m = e.message();
            if m.lifecycle == Lifecycle::Streaming {
                text.push_str(&m.text);
            }
            cites.extend(m.citations.iter().cloned());
            (text, cites)
        });

    let final_text = if !streamed_text.is_empty() {
        streamed_text
    } else if !text.is_empty() {
        text
    } else {
        EMPTY_REPLY.to_string()
    };
    let citations = if streamed_citations.is_empty() {
        citations
    } else {
        streamed_citations
    };
    let citations = citations_within(&final_text, citations);

    let mut reply = Message::assistant(final_text, now);
    if in_flight.web_search {
        reply.search = Some(SearchState::completed(&citations));
    }
    reply.citations = citations;

    let entries = replace_turn_placeholders(prev.entries, turn, Entry::Final(reply), false);

    SessionState {
        entries,
        in_flight: None,
        can_show_new_question: true,
        ..prev
    }
}

fn fail(prev: SessionState, turn: TurnId, error: ProviderError) -> SessionState {
    if !is_current(&prev, turn) {
        return prev;
    }
    let entries = prev
        .entries
        .into_iter()
        .filter(|e| !e.is_placeholder_of(turn))
        .collect();
    SessionState {
        entries,
        in_flight: None,
        can_show_new_question: true,
        last_error: Some(error),
        ..prev
    }
}

fn resume(chat: Chat) -> SessionState {
    let chat = chat.without_placeholders();
    let has_user = chat.has_user_message();
    let ends_with_reply = chat
        .messages
        .last()
        .is_some_and(|m| m.role == MessageRole::Assistant);
    let naming = if chat.first_exchange().is_some() {
        Naming::Named
    } else {
        Naming::Unnamed
    };

    SessionState {
        chat_id: chat.id,
        created_at: chat.created_at,
        entries: chat.messages.into_iter().map(Entry::Final).collect(),
        in_flight: None,
        can_show_new_question: has_user && ends_with_reply,
        has_user_sent_message: has_user,
        search_mode: false,
        thinking_mode_display: false,
        title: Some(chat.title),
        category: Some(chat.category),
        naming,
        is_favorite: chat.is_favorite,
        last_error: None,
    }
}

/// Replace the turn's placeholders with `replacement` at the index of the
/// streaming placeholder (or the first placeholder when `first` is set or no
/// streaming placeholder exists). Appends when the turn has no placeholder.
fn replace_turn_placeholders(
    entries: Vec<Entry>,
    turn: TurnId,
    replacement: Entry,
    first: bool,
) -> Vec<Entry> {
    let streaming = entries.iter().position(|e| {
        e.is_placeholder_of(turn) && e.message().lifecycle == Lifecycle::Streaming
    });
    let first_placeholder = entries.iter().position(|e| e.is_placeholder_of(turn));
    let target = if first {
        first_placeholder
    } else {
        streaming.or(first_placeholder)
    };

    let mut replacement = Some(replacement);
    let mut out = Vec::with_capacity(entries.len());
    for (i, entry) in entries.into_iter().enumerate() {
        if Some(i) == target {
            if let Some(r) = replacement.take() {
                out.push(carry_citations(&entry, r));
            }
        } else if !entry.is_placeholder_of(turn) {
            out.push(entry);
        }
    }
    if let Some(r) = replacement {
        out.push(r);
    }
    out
}

/// Citations gathered on a waiting placeholder survive its replacement by
/// the streaming placeholder.
fn carry_citations(old: &Entry, new: Entry) -> Entry {
    match new {
        Entry::Placeholder { turn, mut message } if message.citations.is_empty() => {
            message.citations = old.message().citations.clone();
            Entry::Placeholder { turn, message }
        }
        other => other,
    }
}

/// Keep citations whose span lies inside `text` (character offsets).
fn citations_within(text: &str, citations: Vec<Citation>) -> Vec<Citation> {
    let len = text.chars().count();
    citations
        .into_iter()
        .filter(|c| c.start_offset <= c.end_offset && c.end_offset <= len)
        .collect()
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;

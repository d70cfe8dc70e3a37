//! Unit tests for the session reducer.

use super::*;
use chrono::TimeZone;

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().expect("valid timestamp")
}

fn citation(start: usize, end: usize, url: &str) -> Citation {
    Citation {
        start_offset: start,
        end_offset: end,
        url: url.to_string(),
        title: url.to_string(),
    }
}

fn submitted(text: &str) -> (SessionState, TurnId) {
    let turn = TurnId::new();
    let state = reduce(
        SessionState::new(at(1_000)),
        Action::Submit {
            turn,
            message: Message::user(text, None, at(2_000)),
            now: at(2_000),
        },
    );
    (state, turn)
}

fn delta(state: SessionState, turn: TurnId, text: &str) -> SessionState {
    reduce(
        state,
        Action::Delta {
            turn,
            text: text.to_string(),
            now: at(3_000),
        },
    )
}

fn finalize(state: SessionState, turn: TurnId, text: &str) -> SessionState {
    reduce(
        state,
        Action::Finalize {
            turn,
            text: text.to_string(),
            citations: Vec::new(),
            now: at(4_000),
        },
    )
}

#[cfg(test)]
mod submit_tests {
    use super::*;

    #[test]
    fn appends_user_message_and_thinking_placeholder() {
        let (state, turn) = submitted("Olá");
        assert_eq!(state.entries.len(), 2);
        assert!(matches!(&state.entries[0], Entry::Final(m) if m.text == "Olá" && m.is_latest_user_turn));
        assert!(matches!(
            &state.entries[1],
            Entry::Placeholder { turn: t, message } if *t == turn && message.lifecycle == Lifecycle::Thinking
        ));
        assert_eq!(state.phase(), TurnPhase::Thinking);
        assert!(state.has_user_sent_message);
        assert!(!state.can_show_new_question);
    }

    #[test]
    fn search_mode_uses_searching_placeholder() {
        let state = reduce(SessionState::new(at(1)), Action::ToggleSearch);
        let state = reduce(
            state,
            Action::Submit {
                turn: TurnId::new(),
                message: Message::user("news today", None, at(2)),
                now: at(2),
            },
        );
        assert_eq!(state.placeholder_count(), 1);
        assert_eq!(state.phase(), TurnPhase::Searching);
        assert!(state.in_flight.is_some_and(|t| t.web_search));
    }

    #[test]
    fn second_submit_while_in_flight_is_ignored() {
        let (state, _) = submitted("first");
        let before = state.clone();
        let state = reduce(
            state,
            Action::Submit {
                turn: TurnId::new(),
                message: Message::user("second", None, at(5)),
                now: at(5),
            },
        );
        assert_eq!(state, before);
    }

    #[test]
    fn latest_user_turn_moves_to_newest_message() {
        let (state, turn) = submitted("first");
        let state = finalize(delta(state, turn, "reply"), turn, "reply");
        let state = reduce(
            state,
            Action::Submit {
                turn: TurnId::new(),
                message: Message::user("second", None, at(6_000)),
                now: at(6_000),
            },
        );
        let latest: Vec<_> = state
            .messages()
            .into_iter()
            .filter(|m| m.is_latest_user_turn)
            .collect();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].text, "second");
    }

    #[test]
    fn toggles_only_affect_next_turn() {
        let (state, _) = submitted("q");
        let state = reduce(state, Action::ToggleSearch);
        let state = reduce(state, Action::ToggleThinking);
        assert!(state.search_mode);
        assert!(state.thinking_mode_display);
        let in_flight = state.in_flight.expect("in flight");
        assert!(!in_flight.web_search);
        assert!(!in_flight.show_thinking);
    }
}

#[cfg(test)]
mod streaming_tests {
    use super::*;

    #[test]
    fn first_chunk_replaces_thinking_with_streaming() {
        let (state, turn) = submitted("Olá");
        let state = delta(state, turn, "Oi!");
        assert_eq!(state.placeholder_count(), 1);
        assert_eq!(state.phase(), TurnPhase::Streaming);
        let last = state.entries[1].message();
        assert_eq!(last.lifecycle, Lifecycle::Streaming);
        assert_eq!(last.text, "Oi!");
    }

    #[test]
    fn chunks_extend_text_monotonically() {
        let (mut state, turn) = submitted("count");
        let mut previous = String::new();
        let mut id = None;
        for chunk in ["one", ", two", "", ", three", "."] {
            state = delta(state, turn, chunk);
            let msg = state.entries[1].message().clone();
            assert!(msg.text.starts_with(&previous));
            assert!(msg.text.len() >= previous.len());
            if let Some(id) = &id {
                assert_eq!(&msg.id, id);
            }
            id = Some(msg.id.clone());
            previous = msg.text;
        }
        assert_eq!(previous, "one, two, three.");
    }

    #[test]
    fn citations_accumulate() {
        let (state, turn) = submitted("q");
        let state = delta(state, turn, "some cited text");
        let state = reduce(
            state,
            Action::Citations {
                turn,
                citations: vec![citation(0, 4, "https://a")],
            },
        );
        let state = reduce(
            state,
            Action::Citations {
                turn,
                citations: vec![citation(5, 10, "https://b")],
            },
        );
        let urls: Vec<_> = state.entries[1]
            .message()
            .citations
            .iter()
            .map(|c| c.url.clone())
            .collect();
        assert_eq!(urls, vec!["https://a", "https://b"]);
    }

    #[test]
    fn stale_turn_actions_are_ignored() {
        let (state, _) = submitted("q");
        let before = state.clone();
        let stranger = TurnId::new();
        let state = delta(state, stranger, "nope");
        let state = finalize(state, stranger, "nope");
        let state = reduce(
            state,
            Action::Fail {
                turn: stranger,
                error: ProviderError::HttpStatus(500),
            },
        );
        assert_eq!(state, before);
    }
}

#[cfg(test)]
mod finalize_tests {
    use super::*;

    #[test]
    fn scenario_ola() {
        let (state, turn) = submitted("Olá");
        let state = delta(state, turn, "Oi!");
        let state = delta(state, turn, " Como posso ajudar?");
        let streaming_index = 1;
        let state = finalize(state, turn, "Oi! Como posso ajudar?");

        assert_eq!(state.entries.len(), 2);
        assert_eq!(state.placeholder_count(), 0);
        let Entry::Final(reply) = &state.entries[streaming_index] else {
            panic!("expected final reply");
        };
        assert_eq!(reply.text, "Oi! Como posso ajudar?");
        assert_eq!(reply.role, MessageRole::Assistant);
        assert_eq!(reply.lifecycle, Lifecycle::None);
        assert!(reply.id.starts_with("bot-"));
        assert!(state.can_show_new_question);
        assert!(state.in_flight.is_none());
        assert_eq!(state.phase(), TurnPhase::Idle);
    }

    #[test]
    fn non_streaming_finalize_replaces_thinking() {
        let (state, turn) = submitted("q");
        let state = finalize(state, turn, "full answer");
        assert_eq!(state.entries.len(), 2);
        assert_eq!(state.entries[1].message().text, "full answer");
        assert!(!state.entries[1].is_placeholder());
    }

    #[test]
    fn empty_reply_uses_apology() {
        let (state, turn) = submitted("q");
        let state = finalize(state, turn, "");
        assert_eq!(state.entries[1].message().text, EMPTY_REPLY);
    }

    #[test]
    fn streamed_text_wins_over_aggregate() {
        let (state, turn) = submitted("q");
        let state = delta(state, turn, "streamed");
        let state = finalize(state, turn, "aggregate");
        assert_eq!(state.entries[1].message().text, "streamed");
    }

    #[test]
    fn out_of_range_citations_are_dropped() {
        let (state, turn) = submitted("q");
        let state = reduce(
            state,
            Action::Finalize {
                turn,
                text: "short".to_string(),
                citations: vec![citation(0, 5, "https://ok"), citation(2, 50, "https://bad")],
                now: at(4_000),
            },
        );
        let cites = &state.entries[1].message().citations;
        assert_eq!(cites.len(), 1);
        assert_eq!(cites[0].url, "https://ok");
    }

    #[test]
    fn search_turn_records_sources() {
        let state = reduce(SessionState::new(at(1)), Action::ToggleSearch);
        let turn = TurnId::new();
        let state = reduce(
            state,
            Action::Submit {
                turn,
                message: Message::user("news", None, at(2)),
                now: at(2),
            },
        );
        let state = delta(state, turn, "Today in the news.");
        let state = reduce(
            state,
            Action::Citations {
                turn,
                citations: vec![citation(0, 5, "https://news")],
            },
        );
        let state = finalize(state, turn, "Today in the news.");
        let reply = state.entries[1].message();
        let search = reply.search.as_ref().expect("search state");
        assert!(search.is_completed);
        assert_eq!(search.sources.len(), 1);
        assert_eq!(reply.citations.len(), 1);
    }

    #[test]
    fn failure_mid_stream_keeps_user_message() {
        let (state, turn) = submitted("Olá");
        let state = delta(state, turn, "Oi");
        let state = delta(state, turn, "!");
        let state = reduce(
            state,
            Action::Fail {
                turn,
                error: ProviderError::Network("reset".to_string()),
            },
        );
        assert_eq!(state.entries.len(), 1);
        assert!(matches!(&state.entries[0], Entry::Final(m) if m.text == "Olá"));
        assert_eq!(state.placeholder_count(), 0);
        assert!(state.can_show_new_question);
        assert!(state.in_flight.is_none());
        assert_eq!(state.last_error, Some(ProviderError::Network("reset".to_string())));

        let state = reduce(state, Action::DismissError);
        assert!(state.last_error.is_none());
    }
}

#[cfg(test)]
mod chat_lifecycle_tests {
    use super::*;

    #[test]
    fn new_chat_resets_everything() {
        let (state, _) = submitted("q");
        let state = reduce(state, Action::ToggleSearch);
        let old_id = state.chat_id.clone();
        let state = reduce(state, Action::NewChat { now: at(9_999) });
        assert_eq!(state.chat_id, "chat-9999");
        assert_ne!(state.chat_id, old_id);
        assert!(state.entries.is_empty());
        assert!(state.in_flight.is_none());
        assert!(!state.search_mode);
        assert!(!state.thinking_mode_display);
    }

    #[test]
    fn naming_applies_only_to_its_chat() {
        let (state, _) = submitted("q");
        let chat_id = state.chat_id.clone();
        let state = reduce(
            state,
            Action::NamingStarted {
                chat_id: chat_id.clone(),
            },
        );
        assert_eq!(state.naming, Naming::InProgress);

        let ignored = reduce(
            state.clone(),
            Action::Named {
                chat_id: "chat-other".to_string(),
                classification: Classification::fallback("x"),
            },
        );
        assert_eq!(ignored, state);

        let named = reduce(
            state,
            Action::Named {
                chat_id,
                classification: Classification {
                    title: "Greeting".to_string(),
                    category: "Other".to_string(),
                },
            },
        );
        assert_eq!(named.naming, Naming::Named);
        assert_eq!(named.title.as_deref(), Some("Greeting"));
    }

    #[test]
    fn to_chat_uses_defaults_before_naming() {
        let (state, turn) = submitted("how do plants make food from light");
        let state = finalize(state, turn, "Photosynthesis.");
        let chat = state.to_chat(at(5_000));
        assert_eq!(chat.title, "how do plants make food...");
        assert_eq!(chat.category, DEFAULT_CATEGORY);
        assert_eq!(chat.created_at, 1_000);
        assert_eq!(chat.updated_at, 5_000);
        assert_eq!(chat.messages.len(), 2);
    }

    #[test]
    fn to_chat_excludes_placeholders() {
        let (state, turn) = submitted("q");
        let state = delta(state, turn, "partial");
        let chat = state.to_chat(at(5_000));
        assert_eq!(chat.messages.len(), 1);
        assert!(chat.messages[0].is_user());
    }

    #[test]
    fn resume_restores_stored_chat() {
        let chat = Chat {
            id: "chat-77".to_string(),
            title: "Fractions".to_string(),
            category: "Study".to_string(),
            messages: vec![
                Message::user("what is 1/2 + 1/3?", None, at(1)),
                Message::assistant("5/6", at(2)),
            ],
            created_at: 1,
            updated_at: 2,
            is_favorite: true,
        };
        let state = reduce(SessionState::new(at(0)), Action::Resume(chat));
        assert_eq!(state.chat_id, "chat-77");
        assert_eq!(state.entries.len(), 2);
        assert_eq!(state.naming, Naming::Named);
        assert!(state.can_show_new_question);
        assert!(state.is_favorite);
        assert_eq!(state.to_chat(at(3)).title, "Fractions");
    }
}

//! Interactive chat loop.

use std::cell::Cell;
use std::io::Write;
use std::pin::Pin;

use anyhow::Result;
use console::style;
use guru_core::provider::ChatProvider;
use guru_core::request::check_attachment;
use guru_core::session::RETRY_PROMPT;
use guru_core::state::{SessionState, TurnPhase};
use guru_core::{ChatSession, Draft, KeyValueStorage, SendOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::pretty;

/// A line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Message(String),
    ToggleSearch,
    ToggleThinking,
    NewChat,
    Attach(String),
    History,
    Help,
    Quit,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };
    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(n, a)| (n, a.trim()));
    match name {
        "search" => Input::ToggleSearch,
        "think" => Input::ToggleThinking,
        "new" => Input::NewChat,
        "attach" if !arg.is_empty() => Input::Attach(arg.to_string()),
        "history" => Input::History,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        _ => Input::Unknown(name.to_string()),
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

/// Read lines from stdin and drive `session` until EOF or `/quit`.
pub async fn run<P: ChatProvider, S: KeyValueStorage>(session: &ChatSession<P, S>) -> Result<()> {
    let state = session.snapshot();
    if !state.entries.is_empty() {
        println!(
            "{}",
            style(format!(
                "Continuing \"{}\"",
                state.title.as_deref().unwrap_or("chat")
            ))
            .dim()
        );
        for message in session.messages() {
            pretty::print_message(&message);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut attachment: Option<String> = None;
    // Naming of the last chat runs while the user types the next line.
    let mut naming: Option<Pin<Box<dyn Future<Output = ()> + '_>>> = None;

    loop {
        print!("{} ", style(">").cyan().bold());
        std::io::stdout().flush()?;
        let line = match naming.as_mut() {
            Some(pending) => tokio::select! {
                line = lines.next_line() => line?,
                () = pending => {
                    naming = None;
                    lines.next_line().await?
                }
            },
            None => lines.next_line().await?,
        };
        if let Some(pending) = naming.take() {
            pending.await;
        }
        let Some(line) = line else {
            break;
        };

        match parse_input(&line) {
            Input::Message(text) => {
                let mut draft = Draft::text(text);
                if let Some(path) = attachment.take() {
                    draft = draft.with_attachment(path);
                }
                if let Some(chat_id) = send(session, draft).await {
                    naming = Some(Box::pin(async move { session.name_chat(&chat_id).await }));
                }
            }
            Input::ToggleSearch => {
                let on = session.toggle_search_mode();
                println!("{}", style(format!("Web search {}", on_off(on))).dim());
            }
            Input::ToggleThinking => {
                let on = session.toggle_thinking_display();
                println!("{}", style(format!("Thinking display {}", on_off(on))).dim());
            }
            Input::NewChat => {
                session.new_chat();
                attachment = None;
                println!("{}", style("Started a new chat.").dim());
            }
            Input::Attach(path) => match check_attachment(&path).await {
                Ok(()) => {
                    println!("{}", style(format!("Attached {path} to the next message.")).dim());
                    attachment = Some(path);
                }
                Err(err) => eprintln!("{}", style(format!("Cannot attach {path}: {err}")).red()),
            },
            Input::History => {
                let chats = session.store().list_recent().await?;
                pretty::print_chat_list(&chats);
            }
            Input::Help => pretty::print_welcome(),
            Input::Quit => break,
            Input::Unknown(name) => {
                println!("{}", style(format!("Unknown command /{name}")).red());
            }
        }
    }
    Ok(())
}

/// Send one draft and render the reply as it arrives. Returns the chat id
/// when a reply was finalized, so the caller can name the chat.
async fn send<P: ChatProvider, S: KeyValueStorage>(
    session: &ChatSession<P, S>,
    draft: Draft,
) -> Option<String> {
    let printed = Cell::new(0_usize);
    let rx = session.subscribe();

    let outcome = tokio::select! {
        biased;
        outcome = session.send_turn(draft) => outcome,
        () = render(rx, &printed) => return None,
    };

    match outcome {
        SendOutcome::Completed { chat_id, .. } => {
            if let Some(reply) = session.messages().last() {
                let rest: String = reply.text.chars().skip(printed.get()).collect();
                print!("{rest}");
                println!();
                pretty::print_sources(reply);
            }
            println!();
            return Some(chat_id);
        }
        SendOutcome::Failed(_) => {
            println!();
            eprintln!("{}", style(RETRY_PROMPT).red());
            session.dismiss_error();
        }
        SendOutcome::Rejected => {
            println!("{}", style("Still answering the previous question.").dim());
        }
        SendOutcome::Ignored | SendOutcome::Discarded => {}
    }
    None
}

/// Print status lines and streamed text for the turn in flight. Returns only
/// if the session goes away.
async fn render(mut rx: watch::Receiver<SessionState>, printed: &Cell<usize>) {
    let mut shown = TurnPhase::Idle;
    loop {
        {
            let state = rx.borrow_and_update();
            let phase = state.phase();
            let show_thinking = state.in_flight.is_some_and(|t| t.show_thinking);
            if phase != shown {
                match phase {
                    TurnPhase::Searching => println!("{}", style("Searching the web...").dim()),
                    TurnPhase::Thinking if show_thinking => {
                        println!("{}", style("Thinking...").dim());
                    }
                    _ => {}
                }
                shown = phase;
            }
            if phase == TurnPhase::Streaming
                && let Some(entry) = state.entries.last()
            {
                let text = &entry.message().text;
                let rest: String = text.chars().skip(printed.get()).collect();
                if !rest.is_empty() {
                    print!("{rest}");
                    let _ = std::io::stdout().flush();
                    printed.set(printed.get() + rest.chars().count());
                }
            }
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

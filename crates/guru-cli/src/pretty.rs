//! Terminal output for guru chats.

use chrono::{DateTime, TimeZone, Utc};
use console::{Style, Term, style};
use guru_core::categories::{category_emoji, group_by_category};
use guru_core::models::{Chat, Message, MessageRole};

/// Terminal width for formatting, with fallback.
fn term_width() -> usize {
    usize::from(Term::stdout().size().1).clamp(40, 100)
}

/// Format a relative time string (e.g., "2 days ago", "just now").
fn relative_time(dt: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(dt);

    if duration.num_seconds() < 60 {
        return "just now".to_string();
    }
    if duration.num_minutes() < 60 {
        let mins = duration.num_minutes();
        return format!("{mins} min{s} ago", s = if mins == 1 { "" } else { "s" });
    }
    if duration.num_hours() < 24 {
        let hours = duration.num_hours();
        return format!("{hours} hour{s} ago", s = if hours == 1 { "" } else { "s" });
    }
    if duration.num_days() < 7 {
        let days = duration.num_days();
        return format!("{days} day{s} ago", s = if days == 1 { "" } else { "s" });
    }

    dt.format("%Y-%m-%d").to_string()
}

fn relative_millis(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map_or_else(|| "-".to_string(), |dt| relative_time(dt, Utc::now()))
}

/// Style for role badges.
fn role_style(role: MessageRole) -> Style {
    match role {
        MessageRole::User => Style::new().cyan().bold(),
        MessageRole::Assistant => Style::new().green().bold(),
        MessageRole::System => Style::new().magenta().bold(),
    }
}

/// Single-line preview, cut on a character boundary.
pub fn truncate(s: &str, max_chars: usize) -> String {
    let flat = s.replace(['\n', '\r'], " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}

pub fn print_welcome() {
    println!("{}", style("Welcome to guru, your AI tutor.").bold());
    println!("Ask anything. Math is answered with LaTeX.");
    println!(
        "{}",
        style("Commands: /search  /think  /new  /attach <image>  /history  /quit").dim()
    );
    println!();
}

/// History grouped by category, newest first within each group.
pub fn print_chat_list(chats: &[Chat]) {
    if chats.is_empty() {
        println!("{}", style("No chats yet.").dim());
        return;
    }

    let width = term_width();
    for (category, members) in group_by_category(chats) {
        println!(
            "{} {}",
            category_emoji(&category),
            style(&category).bold().white()
        );
        for chat in members {
            let star = if chat.is_favorite { "★" } else { " " };
            println!(
                " {} {} {}",
                style(star).yellow(),
                style(truncate(&chat.title, width.saturating_sub(40))).bold(),
                style(format!("({})", relative_millis(chat.updated_at)))
                    .dim()
                    .italic()
            );
            println!("     {}", style(&chat.id).dim());
        }
        println!();
    }
}

/// Whole conversation with roles and sources.
pub fn print_chat(chat: &Chat) {
    let separator = "─".repeat(term_width());
    println!(
        "{} {}",
        category_emoji(&chat.category),
        style(&chat.title).bold()
    );
    println!(
        "{}",
        style(format!(
            "{} · {} · updated {}",
            chat.id,
            chat.category,
            relative_millis(chat.updated_at)
        ))
        .dim()
    );
    println!("{}", style(&separator).dim());

    for message in &chat.messages {
        print_message(message);
    }
}

pub fn print_message(message: &Message) {
    let role = message.role.to_string();
    println!("{}", role_style(message.role).apply_to(role));
    if let Some(uri) = &message.attachment_uri {
        println!("{}", style(format!("[image: {uri}]")).dim());
    }
    println!("{}", message.text);
    print_sources(message);
    println!();
}

/// Numbered list of the message's sources, if it has any.
pub fn print_sources(message: &Message) {
    let sources: Vec<(&str, &str)> = match &message.search {
        Some(search) if !search.sources.is_empty() => search
            .sources
            .iter()
            .map(|s| (s.title.as_str(), s.url.as_str()))
            .collect(),
        _ => message
            .citations
            .iter()
            .map(|c| (c.title.as_str(), c.url.as_str()))
            .collect(),
    };
    if sources.is_empty() {
        return;
    }
    println!("{}", style(format!("Sources ({})", sources.len())).dim());
    for (i, (title, url)) in sources.iter().enumerate() {
        let title = if title.is_empty() { url } else { title };
        println!(
            "  {} {} {}",
            style(format!("[{}]", i + 1)).dim(),
            title,
            style(url).dim().underlined()
        );
    }
}

//! Chat categories and their display emoji.

use crate::models::Chat;

/// Category used when nothing else fits.
pub const OTHER: &str = "Other";

/// Categories the classifier is asked to choose from, with their emoji.
pub const CATEGORIES: &[(&str, &str)] = &[
    ("Work", "💼"),
    ("Study", "📚"),
    ("Technology", "💻"),
    ("Health", "🏥"),
    ("Cooking", "🍳"),
    ("Entertainment", "🎬"),
    ("Travel", "✈️"),
    ("Finance", "💰"),
    ("Relationships", "💙"),
    ("Creativity", "🎨"),
    (OTHER, "💭"),
];

/// Emoji for a category; unknown categories share the "Other" emoji.
pub fn category_emoji(category: &str) -> &'static str {
    CATEGORIES
        .iter()
        .find(|(name, _)| *name == category)
        .or_else(|| CATEGORIES.iter().find(|(name, _)| *name == OTHER))
        .map_or("💭", |(_, emoji)| *emoji)
}

/// Comma-separated category names, for prompts.
pub fn category_names() -> String {
    CATEGORIES
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Group chats by category. Groups appear in order of first occurrence and
/// keep the input order of their chats.
pub fn group_by_category(chats: &[Chat]) -> Vec<(String, Vec<&Chat>)> {
    let mut groups: Vec<(String, Vec<&Chat>)> = Vec::new();
    for chat in chats {
        let category = if chat.category.trim().is_empty() {
            OTHER
        } else {
            chat.category.as_str()
        };
        match groups.iter_mut().find(|(name, _)| name == category) {
            Some((_, members)) => members.push(chat),
            None => groups.push((category.to_string(), vec![chat])),
        }
    }
    groups
}

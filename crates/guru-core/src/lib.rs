//! guru-core: AI tutor chat sessions with on-device history
//!
//! This crate provides the chat session state machine (optimistic user
//! messages, thinking/searching/streaming placeholders, finalization), the
//! local chat store, title/category classification, and the provider
//! interface the session drives.

pub mod categories;
pub mod classifier;
pub mod config;
pub mod error;
pub mod models;
pub mod onboarding;
pub mod provider;
pub mod request;
pub mod schema;
pub mod session;
pub mod state;
pub mod storage;
pub mod store;

pub use classifier::Classifier;
pub use config::Config;
pub use error::{Error, ProviderError, Result};
pub use provider::ChatProvider;
pub use session::{ChatSession, Draft, SendOutcome, SessionSettings};
pub use storage::{KeyValueStorage, MemoryStorage, SqliteStorage};
pub use store::ChatStore;

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "guru";

/// Returns the environment variable prefix for this application.
pub fn env_prefix() -> String {
    "GURU".to_string()
}

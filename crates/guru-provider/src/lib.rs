//! guru-provider: OpenAI-compatible HTTP backend for guru sessions
//!
//! Implements [`guru_core::ChatProvider`] over `chat/completions` (plain or
//! SSE-streamed) and the `responses` endpoint for web-search turns.

pub mod openai;
pub mod sse;

pub use openai::OpenAiProvider;

//! Configuration types and loading for guru.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::error::Result;

/// Tutoring prompt sent ahead of every conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Guru, an educational assistant that helps \
students with their academic questions.

LATEX:
- ALWAYS use LaTeX for formulas, equations, algebraic expressions and mathematical symbols
- Use $$formula$$ for block formulas and $formula$ for inline formulas
- Examples: $\\frac{1}{2}$, $$\\int_{-\\infty}^{\\infty} f(x) dx$$, $\\sqrt{x}$, $x^2$, \
$$\\sum_{i=1}^{n} x_i$$, $$\\lim_{x \\to \\infty} f(x)$$, $\\frac{df}{dx}$

OTHER INSTRUCTIONS:
- Be didactic and explain step by step
- Use clear, accessible language
- Give practical examples whenever possible

Never write mathematics without LaTeX.";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the key-value database holding chats.
    pub database: PathBuf,

    /// AI provider configuration.
    pub provider: ProviderConfig,

    /// Session behavior.
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_NAME);

        Self {
            database: data_dir.join("guru.db"),
            provider: ProviderConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file, or defaults when it
    /// does not exist. The environment overlay applies either way.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::default_config_path())
    }

    /// Load configuration from a specific file, overlaid with `GURU_*`
    /// environment variables (`GURU_PROVIDER__MODEL=gpt-4o`). A missing file
    /// yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(&crate::env_prefix())
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| Error::Config(format!("Failed to load config: {e}")))?;
        let mut config: Config = settings
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.expand_paths();
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::APP_NAME)
            .join("config.toml")
    }

    /// Save configuration to a specific file path.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Ensure config exists at the given path, creating defaults if missing.
    /// Environment overrides apply to the returned value but are never
    /// written to the file.
    pub fn ensure_at(path: &Path) -> Result<Self> {
        if !path.exists() {
            let mut defaults = Self::default();
            defaults.expand_paths();
            defaults.save_to_path(path)?;
        }
        Self::load_from_path(path)
    }

    /// Expand a path, replacing ~ with home directory.
    pub fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::full(path)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| path.to_string());
        PathBuf::from(expanded)
    }

    fn expand_paths(&mut self) {
        self.database = Self::expand_path(&self.database.to_string_lossy());
    }
}

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL, without the trailing `/chat/completions`.
    pub base_url: String,

    /// Model used for conversation turns.
    pub model: String,

    /// Model used for title/category classification.
    pub classifier_model: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Request timeout. Unset means wait until the transport gives up.
    pub timeout_secs: Option<u64>,

    pub max_tokens: u32,

    pub temperature: f32,

    /// `HTTP-Referer` header for OpenRouter-style gateways.
    pub referer: Option<String>,

    /// `X-Title` header for OpenRouter-style gateways.
    pub app_title: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            classifier_model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: None,
            max_tokens: 2048,
            temperature: 1.0,
            referer: None,
            app_title: None,
        }
    }
}

impl ProviderConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .map_err(|_| Error::Config(format!("{} is not set", self.api_key_env)))
    }
}

/// Session behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Stream replies chunk by chunk instead of waiting for the full text.
    pub streaming: bool,

    /// System prompt prepended to every request.
    pub system_prompt: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            streaming: true,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

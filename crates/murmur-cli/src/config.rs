//! Configuration file support

use murmur_ai::providers::{get_api_key, openai::API_KEY_ENV_VAR};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for murmur
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// OpenAI-compatible endpoint (defaults to api.openai.com)
    pub base_url: Option<String>,
    /// System prompt prepended to every request
    pub system_prompt: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Minimum milliseconds between streamed updates
    pub throttle_ms: Option<u64>,
    /// API keys (alternative to environment variables)
    #[serde(default)]
    pub api_keys: ApiKeys,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub openai: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("murmur")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("MURMUR_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: Some(murmur_ai::models::DEFAULT_MODEL.to_string()),
            system_prompt: Some(murmur_chat::config::DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: Some(murmur_chat::config::DEFAULT_TEMPERATURE),
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// Get the API key, checking config then env
    pub fn get_api_key(&self) -> Option<String> {
        let configured = self.api_keys.openai.as_deref().filter(|k| !k.is_empty());
        get_api_key(configured, API_KEY_ENV_VAR).ok()
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# murmur configuration file
# Place at ~/.config/murmur/config.toml (Linux) or set MURMUR_CONFIG_PATH

# Default model to use
model = "gpt-3.5-turbo"

# OpenAI-compatible endpoint (optional)
# base_url = "http://localhost:11434/v1"

# System prompt prepended to every request
system_prompt = "You are a helpful assistant."

# Sampling temperature (0.0 - 2.0)
temperature = 0.7

# Minimum milliseconds between streamed updates (0 prints every token)
throttle_ms = 100

# API keys (optional - can also use the OPENAI_API_KEY environment variable)
[api_keys]
# openai = "sk-..."
"#
}

use serde::{Serialize, Deserialize};
use std::time::Duration;

use crate::cli::ProviderKind;
use crate::errors::{RefineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend_url: String,
    pub api_prefix: String,
    pub api_token: Option<String>,
    pub timeout_secs: u64,
    pub debounce_ms: u64,
    pub provider: ProviderKind,
    pub chat_model: String,
    pub validator_model: String,
    pub ollama_url: Option<String>,
    pub root: String,
    pub save_artifacts: bool,
}

impl Default for Config {
    fn default() -> Self {
        let host = std::env::var("FASTAPI_HOST").unwrap_or_else(|_| "back_end".into());
        let port = std::env::var("FASTAPI_PORT").unwrap_or_else(|_| "80".into());
        Self {
            backend_url: format!("http://{host}:{port}"),
            api_prefix: "/api/v1".into(),
            api_token: std::env::var("REFINE_API_TOKEN").ok(),
            timeout_secs: 300,
            debounce_ms: 1000,
            provider: ProviderKind::OpenAI,
            chat_model: "gpt-4o".into(),
            validator_model: "gpt-4o".into(),
            ollama_url: Some("http://localhost:11434".into()),
            root: ".".into(),
            save_artifacts: false,
        }
    }
}

impl Config {
    /// Defaults, overlaid with the TOML file when one is given.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs_err::read_to_string(path)
            .map_err(|e| RefineError::Config(e.to_string()))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| RefineError::Config(e.to_string()))
    }

    pub fn api_base(&self) -> String {
        format!(
            "{}/{}",
            self.backend_url.trim_end_matches('/'),
            self.api_prefix.trim_matches('/')
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

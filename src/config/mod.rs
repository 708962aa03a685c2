use crate::model::DEFAULT_MODEL;
use crate::provider::{DEFAULT_HOST, DEFAULT_NUM_PREDICT, DEFAULT_TEMPERATURE, api_base_url};
use crate::session::{DEFAULT_SYSTEM_PROMPT, PromptMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "nexus-chat";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ollama server. `OLLAMA_HOST` takes precedence when set.
    pub ollama_host: String,
    pub data_dir: PathBuf,
    /// Model used until one is saved.
    pub default_model: String,
    pub temperature: f32,
    /// Token cap for generate requests.
    pub num_predict: u32,
    pub prompt_mode: PromptMode,
    /// Chat-mode instruction. Empty sends none.
    pub system_prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from(".nexus-chat"));

        Self {
            ollama_host: DEFAULT_HOST.to_string(),
            data_dir,
            default_model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            num_predict: DEFAULT_NUM_PREDICT,
            prompt_mode: PromptMode::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl Config {
    /// Path to the key/value state database.
    pub fn state_db_path(&self) -> PathBuf {
        self.data_dir.join("state.db")
    }

    /// Default location of the config file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join(APP_DIR).join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".nexus-chat/config.toml"))
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path(), std::env::var("OLLAMA_HOST").ok())
    }

    /// Load `path` (defaults if absent), apply `host_override`, then validate.
    pub fn load_from(path: &Path, host_override: Option<String>) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::parse(&content)
                .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_host_override(host_override);
        config.validate()?;
        Ok(config)
    }

    /// Replace `ollama_host` with an `OLLAMA_HOST` style value. Blank is ignored.
    pub fn apply_host_override(&mut self, host: Option<String>) {
        if let Some(host) = host
            && !host.trim().is_empty()
        {
            tracing::debug!(host = %host.trim(), "Using OLLAMA_HOST");
            self.ollama_host = host.trim().to_string();
        }
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Reject values the client would fail on later.
    pub fn validate(&self) -> crate::Result<()> {
        api_base_url(&self.ollama_host)
            .map_err(|e| crate::Error::Config(format!("ollama_host: {e}")))?;
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(crate::Error::Config(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

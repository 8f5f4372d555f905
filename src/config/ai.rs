// src/config/ai.rs
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};
use tracing::warn;

pub const DEFAULT_AI_CONFIG_PATH: &str = "config/ai.json";

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_daily_limit() -> u32 {
    200
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_prompt_chars() -> usize {
    20_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub enabled: bool,
    /// "openai" | "gemini" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name; provider default when absent.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    /// "ENV" means: read from OPENAI_API_KEY / GOOGLE_API_KEY (by provider)
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Article characters sent to the model.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            model: None,
            daily_limit: default_daily_limit(),
            api_key: default_api_key(),
            timeout_secs: default_timeout_secs(),
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

impl AiConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading AI config from {}", path.display()))?;
        let cfg: AiConfig = serde_json::from_str(&data)
            .with_context(|| format!("parsing AI config {}", path.display()))?;
        Ok(cfg.finish())
    }

    /// Missing file means AI off; a present but broken file is an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default().finish())
        }
    }

    /// Normalize provider, apply env overrides, resolve the key.
    fn finish(mut self) -> Self {
        if let Ok(v) = env::var("AI_ENABLED") {
            self.enabled = matches!(v.trim(), "1" | "true" | "TRUE" | "yes" | "on");
        }
        if let Ok(v) = env::var("AI_PROVIDER") {
            if !v.trim().is_empty() {
                self.provider = v;
            }
        }
        if let Ok(v) = env::var("AI_DAILY_LIMIT") {
            match v.trim().parse::<u32>() {
                Ok(n) => self.daily_limit = n,
                Err(_) => warn!(value = %v, "ignoring unparsable AI_DAILY_LIMIT"),
            }
        }

        self.provider = self.provider.trim().to_lowercase();

        if self.api_key.trim().eq_ignore_ascii_case("env") {
            let var = match self.provider.as_str() {
                "openai" => Some("OPENAI_API_KEY"),
                "gemini" => Some("GOOGLE_API_KEY"),
                _ => None,
            };
            // An unresolved key leaves the client disabled at build time.
            self.api_key = var.and_then(|v| env::var(v).ok()).unwrap_or_default();
        }

        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        if self.max_prompt_chars == 0 {
            self.max_prompt_chars = default_max_prompt_chars();
        }
        self
    }
}

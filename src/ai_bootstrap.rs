// src/ai_bootstrap.rs
use crate::analyze::ai_adapter::{build_client_from_config, AiAdapter, AnalysisOptions, DynAiClient};
use crate::config::ai::AiConfig;
use crate::config::scoring::ScoringConfig;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub struct AiRuntime {
    pub cfg: AiConfig,
    pub client: DynAiClient,
}

impl AiRuntime {
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let cfg = AiConfig::load_or_default(path)?;
        // Safe diagnostics: only provider + enabled + key length
        info!(
            provider = %cfg.provider,
            enabled = cfg.enabled,
            daily_limit = cfg.daily_limit,
            key_len = cfg.api_key.len(),
            "AI config loaded"
        );
        let client = build_client_from_config(&cfg)?;
        Ok(Self { cfg, client })
    }

    pub fn adapter(&self, scoring: ScoringConfig) -> AiAdapter {
        AiAdapter::new(Arc::clone(&self.client), scoring, self.cfg.max_prompt_chars)
    }

    /// One call against the configured model at startup; logs the outcome, never fails.
    /// Spends one unit of the daily budget.
    pub async fn smoke_check(&self, adapter: &AiAdapter) {
        if !self.cfg.enabled {
            warn!("AI smoke_check skipped: AI is disabled in config");
            return;
        }
        let sample = "The senate passed the budget bill on Tuesday after a long debate; \
                      critics say the plan will raise costs for families.";
        let out = adapter
            .analyze(sample, Some("smoke check"), Some("startup"), &AnalysisOptions::default())
            .await;
        info!(
            provider = out.provider,
            ai_used = out.ai_used(),
            reason = out.fallback.map(|r| r.as_str()).unwrap_or("-"),
            "AI smoke_check finished"
        );
    }
}

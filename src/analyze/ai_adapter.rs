//! AI adapter: provider abstraction + daily budget + fallback decision.
//!
//! The adapter owns the choice between the model and the heuristic scorer.
//! It makes one attempt per request; anything short of a schema-valid reply
//! (disabled, budget spent, transport error, bad status, non-JSON, wrong
//! shape) yields the heuristic record and the reason it was used.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analyze::heuristic;
use crate::analyze::prompt::build_prompt;
use crate::analyze::record::AnalysisRecord;
use crate::analyze::schema::{self, SchemaError};
use crate::analyze::topic::{extract_topic, Topic};
use crate::config::ai::AiConfig;
use crate::config::scoring::ScoringConfig;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI is disabled")]
    Disabled,
    #[error("daily AI budget exhausted ({limit} calls)")]
    BudgetExhausted { limit: u32 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider returned HTTP {0}")]
    Status(u16),
    #[error("provider returned no completion text")]
    EmptyCompletion,
}

/// Why the heuristic path produced the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    Disabled,
    Budget,
    Transport,
    Status,
    InvalidJson,
    Schema,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::Disabled => "disabled",
            FallbackReason::Budget => "budget",
            FallbackReason::Transport => "transport",
            FallbackReason::Status => "status",
            FallbackReason::InvalidJson => "invalid_json",
            FallbackReason::Schema => "schema",
        }
    }
}

impl From<&AiError> for FallbackReason {
    fn from(e: &AiError) -> Self {
        match e {
            AiError::Disabled => FallbackReason::Disabled,
            AiError::BudgetExhausted { .. } => FallbackReason::Budget,
            AiError::Transport(_) => FallbackReason::Transport,
            AiError::Status(_) => FallbackReason::Status,
            AiError::EmptyCompletion => FallbackReason::InvalidJson,
        }
    }
}

impl From<&SchemaError> for FallbackReason {
    fn from(e: &SchemaError) -> Self {
        match e {
            SchemaError::NotJson(_) => FallbackReason::InvalidJson,
            SchemaError::Shape(_) => FallbackReason::Schema,
        }
    }
}

pub type AiFuture<'a> = Pin<Box<dyn Future<Output = Result<String, AiError>> + Send + 'a>>;

/// Trait object used by the adapter (and tests).
pub trait AiClient: Send + Sync {
    /// Send one prompt; return the raw completion text.
    fn complete<'a>(&'a self, prompt: &'a str) -> AiFuture<'a>;
    /// Provider name for diagnostics/headers.
    fn provider_name(&self) -> &'static str;
}

pub type DynAiClient = Arc<dyn AiClient>;

/// Which fields the caller cares about. Advisory only: the full record is
/// always computed, and the flags are echoed back in response metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisOptions {
    pub fact_check: bool,
    pub sentiment_analysis: bool,
    pub narrative_detection: bool,
    pub source_credibility: bool,
    pub bias_detection: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            fact_check: true,
            sentiment_analysis: true,
            narrative_detection: true,
            source_credibility: true,
            bias_detection: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdapterOutcome {
    pub record: AnalysisRecord,
    pub topic: Topic,
    /// `None` when the model's reply was used.
    pub fallback: Option<FallbackReason>,
    pub provider: &'static str,
}

impl AdapterOutcome {
    pub fn ai_used(&self) -> bool {
        self.fallback.is_none()
    }
}

pub struct AiAdapter {
    client: DynAiClient,
    scoring: ScoringConfig,
    max_prompt_chars: usize,
}

impl AiAdapter {
    pub fn new(client: DynAiClient, scoring: ScoringConfig, max_prompt_chars: usize) -> Self {
        Self {
            client,
            scoring: scoring.sanitized(),
            max_prompt_chars,
        }
    }

    /// Heuristic-only adapter.
    pub fn disabled(scoring: ScoringConfig) -> Self {
        Self::new(Arc::new(DisabledClient), scoring, 20_000)
    }

    pub fn provider_name(&self) -> &'static str {
        self.client.provider_name()
    }

    pub fn scoring(&self) -> &ScoringConfig {
        &self.scoring
    }

    pub async fn analyze(
        &self,
        content: &str,
        title: Option<&str>,
        source: Option<&str>,
        options: &AnalysisOptions,
    ) -> AdapterOutcome {
        let provider = self.client.provider_name();
        let prompt = build_prompt(content, title, source, self.max_prompt_chars);

        let t0 = Instant::now();
        let reply = self.client.complete(&prompt).await;
        let elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0;

        let raw = match reply {
            Ok(raw) => {
                histogram!("ai_call_duration_ms", "provider" => provider).record(elapsed_ms);
                raw
            }
            Err(e) => {
                if !matches!(e, AiError::Disabled | AiError::BudgetExhausted { .. }) {
                    histogram!("ai_call_duration_ms", "provider" => provider).record(elapsed_ms);
                    warn!(provider, error = %e, elapsed_ms, "AI call failed");
                } else {
                    debug!(provider, error = %e, "AI skipped");
                }
                return self.fallback(content, provider, FallbackReason::from(&e));
            }
        };

        match schema::decode(&raw) {
            Ok(payload) => {
                let (record, topic) = payload.into_record();
                let topic = topic.unwrap_or_else(|| extract_topic(content));
                info!(
                    provider,
                    elapsed_ms,
                    fact_check = options.fact_check,
                    "AI analysis accepted"
                );
                AdapterOutcome {
                    record,
                    topic,
                    fallback: None,
                    provider,
                }
            }
            Err(e) => {
                warn!(provider, error = %e, "AI reply rejected");
                self.fallback(content, provider, FallbackReason::from(&e))
            }
        }
    }

    fn fallback(
        &self,
        content: &str,
        provider: &'static str,
        reason: FallbackReason,
    ) -> AdapterOutcome {
        counter!("analyze_fallback_total", "reason" => reason.as_str()).increment(1);
        let (record, topic) = heuristic::score_with_topic(content, &self.scoring);
        AdapterOutcome {
            record,
            topic,
            fallback: Some(reason),
            provider,
        }
    }
}

/// Factory: build a client according to config and environment variables.
///
/// * `AI_TEST_MODE` = `mock` | `error` | `garbage` | `daily-limit` returns a
///   deterministic in-process client (no network).
/// * Else if `config.enabled == false` (or no key), returns a disabled client.
/// * Else builds the real provider wrapped with the daily budget.
pub fn build_client_from_config(config: &AiConfig) -> anyhow::Result<DynAiClient> {
    if let Ok(mode) = std::env::var("AI_TEST_MODE") {
        let limit = config.daily_limit;
        let client: Option<DynAiClient> = match mode.trim() {
            "mock" => Some(Arc::new(BudgetedClient::new(
                MockProvider::new(MOCK_ANALYSIS_JSON),
                limit,
            ))),
            "garbage" => Some(Arc::new(BudgetedClient::new(
                MockProvider::new("Sure! Here is my analysis: the article is fine."),
                limit,
            ))),
            "error" => Some(Arc::new(BudgetedClient::new(FailingProvider, limit))),
            "daily-limit" => Some(Arc::new(BudgetedClient::new(
                MockProvider::new(MOCK_ANALYSIS_JSON),
                0,
            ))),
            _ => None,
        };
        if let Some(c) = client {
            info!(mode = %mode, "AI test mode active");
            return Ok(c);
        }
    }

    if !config.enabled {
        return Ok(Arc::new(DisabledClient));
    }
    if config.api_key.trim().is_empty() {
        warn!(provider = %config.provider, "AI enabled but no API key resolved; running heuristic-only");
        return Ok(Arc::new(DisabledClient));
    }

    let timeout = Duration::from_secs(config.timeout_secs);
    match config.provider.as_str() {
        "openai" => {
            let p = OpenAiProvider::new(config.api_key.clone(), config.model.clone(), timeout)?;
            Ok(Arc::new(BudgetedClient::new(p, config.daily_limit)))
        }
        "gemini" => {
            let p = GeminiProvider::new(config.api_key.clone(), config.model.clone(), timeout)?;
            Ok(Arc::new(BudgetedClient::new(p, config.daily_limit)))
        }
        other => {
            warn!(provider = %other, "unsupported AI provider; running heuristic-only");
            Ok(Arc::new(DisabledClient))
        }
    }
}

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

/// Low-level provider: does a *real* remote call. Separated so the budget
/// wrapper is shared by production and test providers.
pub trait Provider: Send + Sync + 'static {
    fn fetch<'a>(&'a self, prompt: &'a str) -> AiFuture<'a>;
    fn name(&self) -> &'static str;
}

const USER_AGENT: &str = concat!("truthguard/", env!("CARGO_PKG_VERSION"));

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow::anyhow!("building HTTP client: {e}"))
}

fn transport(e: reqwest::Error) -> AiError {
    AiError::Transport(e.to_string())
}

/// OpenAI Chat Completions with JSON response format.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    pub fn new(api_key: String, model: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            model: model.unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point at another host (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl Provider for OpenAiProvider {
    fn fetch<'a>(&'a self, prompt: &'a str) -> AiFuture<'a> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct ResponseFormat {
                #[serde(rename = "type")]
                kind: &'static str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                response_format: ResponseFormat,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: Option<String>,
            }

            let req = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: "You are a news analysis engine. Output a single JSON object.",
                    },
                    Msg {
                        role: "user",
                        content: prompt,
                    },
                ],
                temperature: 0.2,
                response_format: ResponseFormat {
                    kind: "json_object",
                },
            };

            let resp = self
                .http
                .post(format!("{}/v1/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&req)
                .send()
                .await
                .map_err(transport)?;

            if !resp.status().is_success() {
                return Err(AiError::Status(resp.status().as_u16()));
            }
            let body: Resp = resp.json().await.map_err(transport)?;
            body.choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .filter(|s| !s.trim().is_empty())
                .ok_or(AiError::EmptyCompletion)
        })
    }
    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Google Gemini `generateContent` with a JSON mime type.
pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";
    pub const DEFAULT_MODEL: &'static str = "gemini-1.5-pro";

    pub fn new(api_key: String, model: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            api_key,
            model: model.unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl Provider for GeminiProvider {
    fn fetch<'a>(&'a self, prompt: &'a str) -> AiFuture<'a> {
        Box::pin(async move {
            let req = serde_json::json!({
                "contents": [{ "parts": [{ "text": prompt }] }],
                "generationConfig": {
                    "responseMimeType": "application/json",
                    "temperature": 0.2
                }
            });

            #[derive(Deserialize)]
            struct Resp {
                #[serde(default)]
                candidates: Vec<Candidate>,
            }
            #[derive(Deserialize)]
            struct Candidate {
                content: Option<Content>,
            }
            #[derive(Deserialize)]
            struct Content {
                #[serde(default)]
                parts: Vec<Part>,
            }
            #[derive(Deserialize)]
            struct Part {
                text: Option<String>,
            }

            let resp = self
                .http
                .post(format!(
                    "{}/v1beta/models/{}:generateContent",
                    self.base_url, self.model
                ))
                .query(&[("key", self.api_key.as_str())])
                .json(&req)
                .send()
                .await
                .map_err(transport)?;

            if !resp.status().is_success() {
                return Err(AiError::Status(resp.status().as_u16()));
            }
            let body: Resp = resp.json().await.map_err(transport)?;
            let text: String = body
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
                .unwrap_or_default();
            if text.trim().is_empty() {
                Err(AiError::EmptyCompletion)
            } else {
                Ok(text)
            }
        })
    }
    fn name(&self) -> &'static str {
        "gemini"
    }
}

/// Always `Err(Disabled)`; used when AI is off.
pub struct DisabledClient;

impl AiClient for DisabledClient {
    fn complete<'a>(&'a self, _prompt: &'a str) -> AiFuture<'a> {
        Box::pin(async { Err(AiError::Disabled) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Canned reply used by `AI_TEST_MODE=mock`.
pub const MOCK_ANALYSIS_JSON: &str = r#"{
  "bias_analysis": {"overall_score": 0.35, "political_leaning": "center-left",
    "language_bias": 0.3, "source_bias": 0.2, "framing_bias": 0.4,
    "selection_bias": 0.2, "confirmation_bias": 0.1, "indicators": ["selective quotation"]},
  "misinformation_analysis": {"risk_score": 0.15, "fact_checks": [], "red_flags": [],
    "evidence_quality": 0.7},
  "sentiment_analysis": {"overall_sentiment": 0.1, "emotional_tone": "neutral",
    "emotional_manipulation": 0.1, "subjectivity": 0.3},
  "narrative_analysis": {"primary_frame": "economic-consequences",
    "secondary_frames": ["conflict"], "perspective_diversity": 0.6},
  "credibility_assessment": {"overall_score": 0.75, "evidence_quality": 0.7,
    "source_reliability": 0.8},
  "confidence": 0.8
}"#;

/// Fixed reply; no network.
#[derive(Clone)]
pub struct MockProvider {
    pub fixed: String,
}

impl MockProvider {
    pub fn new(fixed: impl Into<String>) -> Self {
        Self {
            fixed: fixed.into(),
        }
    }
}

impl Provider for MockProvider {
    fn fetch<'a>(&'a self, _prompt: &'a str) -> AiFuture<'a> {
        let out = self.fixed.clone();
        Box::pin(async move { Ok(out) })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Always a transport failure.
pub struct FailingProvider;

impl Provider for FailingProvider {
    fn fetch<'a>(&'a self, _prompt: &'a str) -> AiFuture<'a> {
        Box::pin(async { Err(AiError::Transport("simulated connection reset".to_string())) })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Daily budget wrapper
// ------------------------------------------------------------

/// Caps remote calls per UTC day. A call is charged when dispatched, so
/// concurrent requests cannot overshoot the limit.
pub struct BudgetedClient<P: Provider> {
    inner: P,
    daily_limit: u32,
    counter: Mutex<DailyCounter>,
}

#[derive(Debug, Clone, Copy)]
struct DailyCounter {
    day: NaiveDate,
    count: u32,
}

impl<P: Provider> BudgetedClient<P> {
    pub fn new(inner: P, daily_limit: u32) -> Self {
        Self {
            inner,
            daily_limit,
            counter: Mutex::new(DailyCounter {
                day: Utc::now().date_naive(),
                count: 0,
            }),
        }
    }

    /// Calls charged today.
    pub fn used_today(&self) -> u32 {
        let g = self.counter.lock().unwrap_or_else(PoisonError::into_inner);
        if g.day == Utc::now().date_naive() {
            g.count
        } else {
            0
        }
    }

    fn try_reserve(&self) -> Result<(), AiError> {
        let today = Utc::now().date_naive();
        let mut g = self.counter.lock().unwrap_or_else(PoisonError::into_inner);
        if g.day != today {
            g.day = today;
            g.count = 0;
        }
        if g.count >= self.daily_limit {
            return Err(AiError::BudgetExhausted {
                limit: self.daily_limit,
            });
        }
        g.count += 1;
        Ok(())
    }
}

impl<P: Provider> AiClient for BudgetedClient<P> {
    fn complete<'a>(&'a self, prompt: &'a str) -> AiFuture<'a> {
        Box::pin(async move {
            self.try_reserve()?;
            self.inner.fetch(prompt).await
        })
    }
    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

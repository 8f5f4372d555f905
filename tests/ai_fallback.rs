//! AI path vs. heuristic fallback.
//!
//! Provider tests talk to a local wiremock server; the `AI_TEST_MODE` tests go
//! through the full env-built app. Env-mutating tests are `#[serial]`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
};
use serde_json::json;
use serial_test::serial;
use tower::ServiceExt as _;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use truthguard::ai_adapter::{
    AiAdapter, AnalysisOptions, BudgetedClient, FallbackReason, GeminiProvider, OpenAiProvider,
    MOCK_ANALYSIS_JSON,
};
use truthguard::analyze::record::ProcessingModel;
use truthguard::config::scoring::{ScoringConfig, AI_TRUSTED_CONFIDENCE};

const TEXT: &str = "The senate passed the budget; critics call the plan a shocking cover-up.";

fn adapter_for<P: truthguard::ai_adapter::Provider>(provider: P, limit: u32) -> AiAdapter {
    AiAdapter::new(
        Arc::new(BudgetedClient::new(provider, limit)),
        ScoringConfig::default(),
        20_000,
    )
}

fn gemini_reply(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{ "content": { "parts": [{ "text": text }] } }]
    })
}

#[tokio::test]
async fn openai_5xx_falls_back_with_status_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let p = OpenAiProvider::new("sk-test".into(), None, Duration::from_secs(5))
        .unwrap()
        .with_base_url(server.uri());
    let out = adapter_for(p, 10)
        .analyze(TEXT, None, None, &AnalysisOptions::default())
        .await;

    assert_eq!(out.fallback, Some(FallbackReason::Status));
    assert!(!out.ai_used());
    assert_eq!(out.record.processing_model, ProcessingModel::FallbackHeuristic);
    assert!(out.record.confidence < AI_TRUSTED_CONFIDENCE);
    assert!(out.record.misinformation.risk_score > 0.0);
}

#[tokio::test]
async fn unreachable_provider_is_transport_failure() {
    // nothing listens on the discard port
    let p = OpenAiProvider::new("sk-test".into(), None, Duration::from_secs(2))
        .unwrap()
        .with_base_url("http://127.0.0.1:9");
    let out = adapter_for(p, 10)
        .analyze(TEXT, None, None, &AnalysisOptions::default())
        .await;
    assert_eq!(out.fallback, Some(FallbackReason::Transport));
    assert_eq!(out.record.processing_model, ProcessingModel::FallbackHeuristic);
}

#[tokio::test]
async fn gemini_prose_reply_is_invalid_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-pro:generateContent"))
        .and(query_param("key", "g-test"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(gemini_reply("I think this article is mostly fine.")),
        )
        .mount(&server)
        .await;

    let p = GeminiProvider::new("g-test".into(), None, Duration::from_secs(5))
        .unwrap()
        .with_base_url(server.uri());
    let out = adapter_for(p, 10)
        .analyze(TEXT, Some("Budget"), Some("Wire"), &AnalysisOptions::default())
        .await;
    assert_eq!(out.fallback, Some(FallbackReason::InvalidJson));
    assert_eq!(out.provider, "gemini");
}

#[tokio::test]
async fn gemini_valid_reply_is_primary_and_clamped() {
    let reply = r#"```json
{
  "bias_analysis": {"overall_score": 1.7, "political_leaning": "center-right",
    "language_bias": 0.3, "source_bias": 0.2, "framing_bias": 0.4,
    "selection_bias": 0.2, "confirmation_bias": -0.4, "indicators": ["loaded terms"]},
  "misinformation_analysis": {"risk_score": 0.4, "fact_checks": [], "red_flags": ["shocking"],
    "evidence_quality": 0.5},
  "sentiment_analysis": {"overall_sentiment": -3.0, "emotional_tone": "alarmist",
    "emotional_manipulation": 0.6, "subjectivity": 0.5},
  "credibility_assessment": {"overall_score": 0.6, "evidence_quality": 0.5,
    "source_reliability": 0.7},
  "confidence": 0.9,
  "topic": "politics"
}
```"#;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply(reply)))
        .mount(&server)
        .await;

    let p = GeminiProvider::new("g-test".into(), None, Duration::from_secs(5))
        .unwrap()
        .with_base_url(server.uri());
    let out = adapter_for(p, 10)
        .analyze(TEXT, None, None, &AnalysisOptions::default())
        .await;

    assert!(out.ai_used(), "fallback: {:?}", out.fallback);
    let r = &out.record;
    assert_eq!(r.processing_model, ProcessingModel::PrimaryAi);
    assert!(r.in_bounds());
    assert_eq!(r.bias.overall_score, 1.0);
    assert_eq!(r.bias.confirmation_bias, 0.0);
    assert_eq!(r.sentiment.overall_sentiment, -1.0);
    assert_eq!(out.topic.as_str(), "politics");
}

#[tokio::test]
async fn exhausted_budget_skips_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let p = OpenAiProvider::new("sk-test".into(), None, Duration::from_secs(5))
        .unwrap()
        .with_base_url(server.uri());
    let out = adapter_for(p, 0)
        .analyze(TEXT, None, None, &AnalysisOptions::default())
        .await;
    assert_eq!(out.fallback, Some(FallbackReason::Budget));
}

#[test]
fn mock_reply_decodes() {
    let payload = truthguard::analyze::schema::decode(MOCK_ANALYSIS_JSON).unwrap();
    let (rec, topic) = payload.into_record();
    assert_eq!(rec.processing_model, ProcessingModel::PrimaryAi);
    assert!(topic.is_none());
}

// ---- full app driven by AI_TEST_MODE ----

async fn analyze_via_app(mode: &str, content: &str) -> (StatusCode, Option<String>, Option<String>) {
    std::env::set_var("AI_TEST_MODE", mode);
    std::env::set_var("METRICS_ENABLED", "1");
    std::env::set_var("EMBEDDINGS_ENABLED", "0");
    let app = truthguard::app().await.expect("app");

    let req = Request::builder()
        .method("POST")
        .uri("/api/analyze")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "content": content }).to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.expect("oneshot");
    let header = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let out = (resp.status(), header("x-ai-used"), header("x-ai-reason"));
    std::env::remove_var("AI_TEST_MODE");
    out
}

#[tokio::test]
#[serial]
async fn test_mode_mock_uses_ai() {
    let (status, used, reason) = analyze_via_app("mock", "Mock mode article about trade.").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(used.as_deref(), Some("1"));
    assert!(reason.is_none());
}

#[tokio::test]
#[serial]
async fn test_mode_error_falls_back() {
    let (status, used, reason) = analyze_via_app("error", "Error mode article about trade.").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(used.as_deref(), Some("0"));
    assert_eq!(reason.as_deref(), Some("transport"));
}

#[tokio::test]
#[serial]
async fn test_mode_garbage_falls_back() {
    let (_, used, reason) = analyze_via_app("garbage", "Garbage mode article about trade.").await;
    assert_eq!(used.as_deref(), Some("0"));
    assert_eq!(reason.as_deref(), Some("invalid_json"));
}

#[tokio::test]
#[serial]
async fn test_mode_daily_limit_reports_budget() {
    let (status, used, reason) =
        analyze_via_app("daily-limit", "Daily limit article about trade.").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(used.as_deref(), Some("0"));
    assert_eq!(reason.as_deref(), Some("budget"));
}

#[tokio::test]
#[serial]
async fn metrics_endpoint_exposes_counters() {
    std::env::set_var("METRICS_ENABLED", "1");
    std::env::set_var("EMBEDDINGS_ENABLED", "0");
    let app = truthguard::app().await.expect("app");

    let req = Request::builder()
        .method("POST")
        .uri("/api/analyze")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"content":"Metrics check about the economy."}"#))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("analyze_requests_total"), "metrics:\n{text}");
    assert!(text.contains("analyze_fallback_total"), "metrics:\n{text}");
}

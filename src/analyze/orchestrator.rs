//! Analysis orchestrator: one submitted article from request to stored record.
//!
//! Order: validate → natural key → duplicate check → resolve content →
//! adapter → embed → persist → publish. Dedup is check-then-insert; a racing
//! insert that loses still reports `AlreadyExists`.
//!
//! Articles can also be created `pending` and analyzed later by a batch run,
//! which walks them oldest first, one at a time.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::analyze::ai_adapter::{AiAdapter, AnalysisOptions, FallbackReason};
use crate::analyze::insights::{self, Insight};
use crate::analyze::record::{AnalysisRecord, ProcessingModel};
use crate::analyze::topic::Topic;
use crate::embedding::{DisabledEmbedder, EmbedError, Embedder};
use crate::error::AnalyzeError;
use crate::feed::{FeedEvent, FeedHub};
use crate::fetch::ContentFetcher;
use crate::store::{
    natural_key, ArticleStore, InsertOutcome, ProcessingStatus, StoredArticle,
    HIGH_BIAS_MIN_SCORE, MISINFORMATION_MIN_RISK,
};

pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");
const UNKNOWN_SOURCE: &str = "unknown";
const UNTITLED: &str = "Untitled";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub options: AnalysisOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub content_length: usize,
    pub processing_model: ProcessingModel,
    pub api_version: &'static str,
    pub topic: Topic,
    pub key: String,
    pub provider: &'static str,
    pub fallback_reason: Option<FallbackReason>,
    pub options: AnalysisOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeSuccess {
    pub success: bool,
    pub analysis: AnalysisRecord,
    pub insights: Vec<Insight>,
    pub metadata: ResponseMetadata,
}

impl AnalyzeSuccess {
    pub fn ai_used(&self) -> bool {
        self.metadata.fallback_reason.is_none()
    }
}

/// A validated request: at least one of content/url, url well-formed.
struct Validated {
    content: Option<String>,
    url: Option<reqwest::Url>,
    title: Option<String>,
    source: Option<String>,
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn validate(req: &AnalyzeRequest) -> Result<Validated, AnalyzeError> {
    let content = non_blank(req.content.clone());
    let url = match non_blank(req.url.clone()) {
        Some(raw) => {
            let parsed = reqwest::Url::parse(&raw)
                .map_err(|e| AnalyzeError::InvalidRequest(format!("url is not valid: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AnalyzeError::InvalidRequest(
                    "url must use http or https".to_string(),
                ));
            }
            Some(parsed)
        }
        None => None,
    };
    if content.is_none() && url.is_none() {
        return Err(AnalyzeError::InvalidRequest(
            "either content or url is required".to_string(),
        ));
    }
    Ok(Validated {
        content,
        url,
        title: non_blank(req.title.clone()),
        source: non_blank(req.source.clone()),
    })
}

/// Body of `POST /api/articles`: stored as `pending` for the next batch run.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateArticle {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    CompletedNoArticlesFound,
    CompletedSuccessfully,
    CompletedWithErrorsOrFallbacks,
}

/// Counters for one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub processed: usize,
    pub successfully_analyzed: usize,
    pub fallback_used: usize,
    pub high_bias_detected: usize,
    pub misinformation_flagged: usize,
    pub embeddings_generated: usize,
    pub processing_errors: usize,
    pub status: BatchStatus,
}

impl BatchStats {
    fn new() -> Self {
        Self {
            processed: 0,
            successfully_analyzed: 0,
            fallback_used: 0,
            high_bias_detected: 0,
            misinformation_flagged: 0,
            embeddings_generated: 0,
            processing_errors: 0,
            status: BatchStatus::CompletedNoArticlesFound,
        }
    }

    fn finish(&mut self) {
        self.status = if self.processed == 0 {
            BatchStatus::CompletedNoArticlesFound
        } else if self.processing_errors == 0 && self.fallback_used == 0 {
            BatchStatus::CompletedSuccessfully
        } else {
            BatchStatus::CompletedWithErrorsOrFallbacks
        };
    }
}

pub struct Orchestrator {
    adapter: Arc<AiAdapter>,
    store: Arc<dyn ArticleStore>,
    fetcher: Arc<dyn ContentFetcher>,
    embedder: Arc<dyn Embedder>,
    feed: FeedHub,
    // one batch at a time
    batch: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        adapter: Arc<AiAdapter>,
        store: Arc<dyn ArticleStore>,
        fetcher: Arc<dyn ContentFetcher>,
        feed: FeedHub,
    ) -> Self {
        Self {
            adapter,
            store,
            fetcher,
            embedder: Arc::new(DisabledEmbedder),
            feed,
            batch: Mutex::new(()),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn adapter(&self) -> &AiAdapter {
        &self.adapter
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Empty when embeddings are off or the model fails; the article is stored anyway.
    async fn embed_content(&self, content: &str) -> Vec<f32> {
        match self.embedder.embed(content).await {
            Ok(v) => v,
            Err(EmbedError::Disabled) => Vec::new(),
            Err(e) => {
                counter!("embedding_failures_total").increment(1);
                warn!(error = %e, "embedding failed; storing without one");
                Vec::new()
            }
        }
    }

    pub async fn submit(&self, req: AnalyzeRequest) -> Result<AnalyzeSuccess, AnalyzeError> {
        counter!("analyze_requests_total").increment(1);
        let result = self.submit_inner(req).await;
        match &result {
            Err(AnalyzeError::AlreadyExists { key }) => {
                counter!("analyze_duplicates_total").increment(1);
                info!(key = %key, "duplicate submission");
            }
            Err(e) => {
                counter!("analyze_errors_total", "kind" => e.kind()).increment(1);
                warn!(kind = e.kind(), error = %e, "analyze failed");
            }
            Ok(_) => {}
        }
        result
    }

    async fn submit_inner(&self, req: AnalyzeRequest) -> Result<AnalyzeSuccess, AnalyzeError> {
        let t0 = Instant::now();
        let options = req.options;
        let v = validate(&req)?;

        // The key for a url-less submission depends on the content itself.
        let url_str = v.url.as_ref().map(|u| u.to_string());
        let early_key = url_str.clone();
        if let Some(key) = &early_key {
            if self.store.exists(key).await? {
                return Err(AnalyzeError::AlreadyExists { key: key.clone() });
            }
        }

        let (content, fetched_title) = match (v.content, &v.url) {
            (Some(c), _) => (c, None),
            (None, Some(url)) => {
                let page = self.fetcher.fetch(url.as_str()).await?;
                (page.text, page.title)
            }
            // validate() guarantees one of the two
            (None, None) => {
                return Err(AnalyzeError::InvalidRequest(
                    "either content or url is required".to_string(),
                ))
            }
        };

        let key = match early_key {
            Some(k) => k,
            None => {
                let k = natural_key(None, &content);
                if self.store.exists(&k).await? {
                    return Err(AnalyzeError::AlreadyExists { key: k });
                }
                k
            }
        };

        let title = v.title.or(fetched_title);
        let source = v
            .source
            .or_else(|| v.url.as_ref().and_then(|u| u.host_str().map(str::to_string)));

        let outcome = self
            .adapter
            .analyze(&content, title.as_deref(), source.as_deref(), &options)
            .await;

        let article = StoredArticle {
            key: key.clone(),
            title: title.unwrap_or_else(|| UNTITLED.to_string()),
            embedding: self.embed_content(&content).await,
            content,
            source: source.unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
            url: url_str,
            topic: outcome.topic,
            timestamp: Utc::now(),
            processing_status: ProcessingStatus::for_model(outcome.record.processing_model),
            updated_at: None,
            analysis: outcome.record.clone(),
        };
        let content_length = article.content.chars().count();
        let event = FeedEvent::from(&article);

        match self.store.insert(article).await? {
            InsertOutcome::Inserted => {}
            InsertOutcome::AlreadyExists => return Err(AnalyzeError::AlreadyExists { key }),
        }
        let delivered = self.feed.publish(event);

        info!(
            key = %short_key(&key),
            provider = outcome.provider,
            processing_model = outcome.record.processing_model.as_str(),
            reason = outcome.fallback.map(|r| r.as_str()).unwrap_or("-"),
            topic = outcome.topic.as_str(),
            feed_subscribers = delivered,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "article analyzed"
        );

        Ok(AnalyzeSuccess {
            success: true,
            insights: insights::generate(&outcome.record),
            metadata: ResponseMetadata {
                content_length,
                processing_model: outcome.record.processing_model,
                api_version: API_VERSION,
                topic: outcome.topic,
                key,
                provider: outcome.provider,
                fallback_reason: outcome.fallback,
                options,
            },
            analysis: outcome.record,
        })
    }
}

impl Orchestrator {
    /// Store an unanalyzed article. Title, url and source are required; the
    /// url is the key.
    pub async fn create(&self, req: CreateArticle) -> Result<StoredArticle, AnalyzeError> {
        let mut missing = Vec::new();
        let title = non_blank(req.title);
        let url = non_blank(req.url);
        let source = non_blank(req.source);
        for (name, v) in [("title", &title), ("url", &url), ("source", &source)] {
            if v.is_none() {
                missing.push(name);
            }
        }
        let (Some(title), Some(url), Some(source)) = (title, url, source) else {
            return Err(AnalyzeError::InvalidRequest(format!(
                "required fields missing: {}",
                missing.join(", ")
            )));
        };
        let check = AnalyzeRequest {
            url: Some(url.clone()),
            ..Default::default()
        };
        // same normalized form `submit` keys on
        let url = validate(&check)?.url.map_or(url, |u| u.to_string());

        let article = StoredArticle {
            key: natural_key(Some(&url), ""),
            title,
            content: non_blank(req.content).unwrap_or_default(),
            source,
            url: Some(url),
            topic: Topic::General,
            timestamp: Utc::now(),
            embedding: Vec::new(),
            processing_status: ProcessingStatus::Pending,
            updated_at: None,
            analysis: AnalysisRecord::neutral(ProcessingModel::FallbackHeuristic),
        };
        match self.store.insert(article.clone()).await? {
            InsertOutcome::Inserted => {
                info!(key = %article.key, "pending article created");
                Ok(article)
            }
            InsertOutcome::AlreadyExists => Err(AnalyzeError::AlreadyExists { key: article.key }),
        }
    }

    /// Analyze up to `batch_size` pending or failed articles, oldest first.
    pub async fn run_batch(&self, batch_size: usize) -> Result<BatchStats, AnalyzeError> {
        let Ok(_running) = self.batch.try_lock() else {
            return Err(AnalyzeError::BatchInProgress);
        };
        let t0 = Instant::now();
        let mut stats = BatchStats::new();
        let batch = self
            .store
            .awaiting_analysis(batch_size.clamp(1, MAX_BATCH_SIZE))
            .await?;

        for article in batch {
            stats.processed += 1;
            match self.analyze_stored(article, &mut stats).await {
                Ok(true) => {}
                Ok(false) => stats.processing_errors += 1,
                Err(e) => {
                    stats.processing_errors += 1;
                    warn!(error = %e, "batch item failed");
                }
            }
        }
        stats.finish();
        counter!("batch_articles_total").increment(stats.processed as u64);
        info!(
            processed = stats.processed,
            fallback_used = stats.fallback_used,
            errors = stats.processing_errors,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "batch analysis finished"
        );
        Ok(stats)
    }

    /// `Ok(false)` when the article was marked `failed_analysis`.
    async fn analyze_stored(
        &self,
        mut article: StoredArticle,
        stats: &mut BatchStats,
    ) -> Result<bool, AnalyzeError> {
        if article.content.trim().is_empty() {
            let fetched = match article.url.as_deref() {
                Some(url) => self.fetcher.fetch(url).await,
                None => {
                    return self
                        .mark_failed(article, "no content and no url".to_string())
                        .await
                }
            };
            match fetched {
                Ok(page) => article.content = page.text,
                Err(e) => return self.mark_failed(article, e.to_string()).await,
            }
        }

        let outcome = self
            .adapter
            .analyze(
                &article.content,
                Some(article.title.as_str()),
                Some(article.source.as_str()),
                &AnalysisOptions::default(),
            )
            .await;
        match outcome.fallback {
            None => stats.successfully_analyzed += 1,
            Some(_) => stats.fallback_used += 1,
        }
        if outcome.record.bias.overall_score >= HIGH_BIAS_MIN_SCORE {
            stats.high_bias_detected += 1;
        }
        if outcome.record.misinformation.risk_score >= MISINFORMATION_MIN_RISK {
            stats.misinformation_flagged += 1;
        }

        article.embedding = self.embed_content(&article.content).await;
        if !article.embedding.is_empty() {
            stats.embeddings_generated += 1;
        }
        article.topic = outcome.topic;
        article.processing_status = ProcessingStatus::for_model(outcome.record.processing_model);
        article.analysis = outcome.record;
        article.updated_at = Some(Utc::now());

        let key = article.key.clone();
        let event = FeedEvent::from(&article);
        if !self.store.replace(article).await? {
            // deleted while we were analyzing
            debug!(key = %short_key(&key), "batch article vanished");
            return Ok(true);
        }
        self.feed.publish(event);
        Ok(true)
    }

    async fn mark_failed(&self, mut article: StoredArticle, reason: String) -> Result<bool, AnalyzeError> {
        warn!(key = %short_key(&article.key), reason = %reason, "article could not be analyzed");
        article.processing_status = ProcessingStatus::FailedAnalysis;
        article.updated_at = Some(Utc::now());
        self.store.replace(article).await?;
        Ok(false)
    }
}

/// Content-hash keys are long; logs only need a prefix.
fn short_key(key: &str) -> &str {
    match key.strip_prefix("sha256:") {
        Some(hex) => &key[..("sha256:".len() + hex.len().min(12))],
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::config::scoring::ScoringConfig;
    use crate::fetch::{FetchError, FetchedPage};
    use crate::store::MemoryStore;

    struct NoFetch;

    #[async_trait]
    impl ContentFetcher for NoFetch {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
        fn name(&self) -> &'static str {
            "none"
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Ok(vec![1.0, 0.0])
        }
        fn name(&self) -> &'static str {
            "unit"
        }
    }

    fn orchestrator(store: Arc<dyn ArticleStore>) -> Orchestrator {
        Orchestrator::new(
            Arc::new(AiAdapter::disabled(ScoringConfig::default())),
            store,
            Arc::new(NoFetch),
            FeedHub::new(8),
        )
        .with_embedder(Arc::new(UnitEmbedder))
    }

    fn pending(n: u32, content: Option<&str>) -> CreateArticle {
        CreateArticle {
            title: Some(format!("Story {n}")),
            url: Some(format!("https://a.test/{n}")),
            source: Some("Wire".into()),
            content: content.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn batch_analyzes_pending_and_marks_unfetchable_failed() {
        let store: Arc<dyn ArticleStore> = Arc::new(MemoryStore::default());
        let o = orchestrator(Arc::clone(&store));
        o.create(pending(1, Some("A shocking hoax and cover-up, exposed at last.")))
            .await
            .unwrap();
        o.create(pending(2, None)).await.unwrap();

        let stats = o.run_batch(DEFAULT_BATCH_SIZE).await.unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.fallback_used, 1);
        assert_eq!(stats.successfully_analyzed, 0);
        assert_eq!(stats.processing_errors, 1);
        assert_eq!(stats.embeddings_generated, 1);
        assert_eq!(stats.status, BatchStatus::CompletedWithErrorsOrFallbacks);

        let done = store.get("https://a.test/1").await.unwrap().unwrap();
        assert_eq!(done.processing_status, ProcessingStatus::AnalyzedFallback);
        assert!(done.analysis.misinformation.risk_score > 0.0);
        assert_eq!(done.embedding, vec![1.0, 0.0]);
        assert!(done.updated_at.is_some());

        let failed = store.get("https://a.test/2").await.unwrap().unwrap();
        assert_eq!(failed.processing_status, ProcessingStatus::FailedAnalysis);

        // only the failed one is picked up again
        assert_eq!(o.run_batch(DEFAULT_BATCH_SIZE).await.unwrap().processed, 1);
    }

    #[tokio::test]
    async fn empty_batch_reports_nothing_found() {
        let o = orchestrator(Arc::new(MemoryStore::default()));
        let stats = o.run_batch(5).await.unwrap();
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.status, BatchStatus::CompletedNoArticlesFound);
    }

    #[tokio::test]
    async fn create_requires_fields_and_rejects_duplicates() {
        let o = orchestrator(Arc::new(MemoryStore::default()));
        let partial = CreateArticle {
            title: Some("t".into()),
            ..Default::default()
        };
        match o.create(partial).await {
            Err(AnalyzeError::InvalidRequest(msg)) => {
                assert!(msg.contains("url") && msg.contains("source"), "{msg}")
            }
            other => panic!("unexpected {other:?}"),
        }

        let created = o.create(pending(7, Some("body"))).await.unwrap();
        assert_eq!(created.processing_status, ProcessingStatus::Pending);
        assert!(matches!(
            o.create(pending(7, Some("body"))).await,
            Err(AnalyzeError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn requires_content_or_url() {
        let err = validate(&AnalyzeRequest::default()).err().unwrap();
        assert!(matches!(err, AnalyzeError::InvalidRequest(_)));

        let blank = AnalyzeRequest {
            content: Some("   ".into()),
            ..Default::default()
        };
        assert!(validate(&blank).is_err());
    }

    #[test]
    fn rejects_non_http_urls() {
        for bad in ["ftp://example.com/a", "not a url", "file:///etc/passwd"] {
            let req = AnalyzeRequest {
                url: Some(bad.into()),
                ..Default::default()
            };
            assert!(validate(&req).is_err(), "{bad} should be rejected");
        }
        let ok = AnalyzeRequest {
            url: Some("https://news.example.com/story".into()),
            ..Default::default()
        };
        assert!(validate(&ok).is_ok());
    }

    #[test]
    fn short_key_trims_digests_only() {
        let k = natural_key(None, "text");
        assert_eq!(short_key(&k).len(), "sha256:".len() + 12);
        assert_eq!(short_key("https://a.test/x"), "https://a.test/x");
    }
}

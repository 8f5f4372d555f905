//! Article persistence behind the `ArticleStore` boundary.
//!
//! `MemoryStore` is the default backend; `MongoStore` (feature `mongo`) is
//! the production one. Duplicate detection is keyed on the natural key.

#[cfg(feature = "mongo")]
pub mod mongo;

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::analytics::{self, AnalyticsParams, AnalyticsReport};
use crate::analyze::record::{AnalysisRecord, ProcessingModel};
use crate::analyze::topic::Topic;
use crate::embedding::cosine;

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

/// Default floor for the high-bias listing and the batch `high_bias_detected` count.
pub const HIGH_BIAS_MIN_SCORE: f32 = 0.7;
/// Default floor for the misinformation-risk listing and batch flagging.
pub const MISINFORMATION_MIN_RISK: f32 = 0.6;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation failed: {0}")]
    Backend(String),
}

/// Where an article is in its analysis lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Created without analysis; picked up by the next batch run.
    Pending,
    #[default]
    Analyzed,
    AnalyzedFallback,
    FailedAnalysis,
}

impl ProcessingStatus {
    pub const ALL: [ProcessingStatus; 4] = [
        ProcessingStatus::Pending,
        ProcessingStatus::Analyzed,
        ProcessingStatus::AnalyzedFallback,
        ProcessingStatus::FailedAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Analyzed => "analyzed",
            ProcessingStatus::AnalyzedFallback => "analyzed_fallback",
            ProcessingStatus::FailedAnalysis => "failed_analysis",
        }
    }

    pub fn for_model(model: ProcessingModel) -> Self {
        match model {
            ProcessingModel::PrimaryAi => ProcessingStatus::Analyzed,
            ProcessingModel::FallbackHeuristic => ProcessingStatus::AnalyzedFallback,
        }
    }

    /// Carries a real analysis record.
    pub fn is_analyzed(&self) -> bool {
        matches!(self, ProcessingStatus::Analyzed | ProcessingStatus::AnalyzedFallback)
    }

    pub fn awaiting_analysis(&self) -> bool {
        matches!(self, ProcessingStatus::Pending | ProcessingStatus::FailedAnalysis)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        ProcessingStatus::ALL
            .iter()
            .copied()
            .find(|st| st.as_str() == t)
            .ok_or_else(|| format!("unknown processing status '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredArticle {
    pub key: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub url: Option<String>,
    pub topic: Topic,
    pub timestamp: DateTime<Utc>,
    /// Empty when no embedding could be computed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub processing_status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub analysis: AnalysisRecord,
}

/// Natural key: the URL when present, else a content digest.
pub fn natural_key(url: Option<&str>, content: &str) -> String {
    match url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(u) => u.to_string(),
        None => content_key(content),
    }
}

pub fn content_key(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("sha256:{hex}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Timestamp,
    Credibility,
    Bias,
    MisinformationRisk,
    Sentiment,
    Source,
    Title,
}

impl SortField {
    /// Unknown names fall back to the default order.
    pub fn parse_or_default(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "credibility_score" | "credibility" => SortField::Credibility,
            "bias_score" | "bias" => SortField::Bias,
            "misinformation_risk" | "risk" => SortField::MisinformationRisk,
            "sentiment" => SortField::Sentiment,
            "source" => SortField::Source,
            "title" => SortField::Title,
            _ => SortField::Timestamp,
        }
    }

    /// Document path of the sort key in the persisted shape.
    pub fn field_path(&self) -> &'static str {
        match self {
            SortField::Timestamp => "timestamp",
            SortField::Credibility => "credibility.overall_score",
            SortField::Bias => "bias.overall_score",
            SortField::MisinformationRisk => "misinformation.risk_score",
            SortField::Sentiment => "sentiment.overall_sentiment",
            SortField::Source => "source",
            SortField::Title => "title",
        }
    }

    fn compare(&self, a: &StoredArticle, b: &StoredArticle) -> Ordering {
        match self {
            SortField::Timestamp => a.timestamp.cmp(&b.timestamp),
            SortField::Credibility => a
                .analysis
                .credibility
                .overall_score
                .total_cmp(&b.analysis.credibility.overall_score),
            SortField::Bias => a
                .analysis
                .bias
                .overall_score
                .total_cmp(&b.analysis.bias.overall_score),
            SortField::MisinformationRisk => a
                .analysis
                .misinformation
                .risk_score
                .total_cmp(&b.analysis.misinformation.risk_score),
            SortField::Sentiment => a
                .analysis
                .sentiment
                .overall_sentiment
                .total_cmp(&b.analysis.sentiment.overall_sentiment),
            SortField::Source => a.source.to_lowercase().cmp(&b.source.to_lowercase()),
            SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse_or_default(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("asc") {
            SortOrder::Asc
        } else {
            SortOrder::Desc
        }
    }
}

/// Listing filters plus pagination. Every filter is optional and they combine with AND.
#[derive(Debug, Clone, Default)]
pub struct ArticleQuery {
    pub source: Option<String>,
    pub topic: Option<Topic>,
    pub status: Option<ProcessingStatus>,
    /// Case-insensitive substring of the title or content.
    pub text: Option<String>,
    pub min_bias: Option<f32>,
    pub min_risk: Option<f32>,
    /// 1-based.
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl ArticleQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }

    pub fn effective_page(&self) -> usize {
        self.page.unwrap_or(1).max(1)
    }

    pub fn skip(&self) -> usize {
        (self.effective_page() - 1).saturating_mul(self.effective_limit())
    }

    fn matches(&self, a: &StoredArticle) -> bool {
        let source_ok = match self.source.as_deref() {
            Some(s) => a.source.eq_ignore_ascii_case(s),
            None => true,
        };
        let text_ok = match self.text.as_deref() {
            Some(t) => {
                let needle = t.to_lowercase();
                a.title.to_lowercase().contains(&needle) || a.content.to_lowercase().contains(&needle)
            }
            None => true,
        };
        source_ok
            && text_ok
            && self.topic.map_or(true, |t| a.topic == t)
            && self.status.map_or(true, |s| a.processing_status == s)
            && self.min_bias.map_or(true, |m| a.analysis.bias.overall_score >= m)
            && self
                .min_risk
                .map_or(true, |m| a.analysis.misinformation.risk_score >= m)
    }
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct ArticlePage {
    /// Matches across all pages.
    pub total: u64,
    pub articles: Vec<StoredArticle>,
}

/// An article with its similarity to a query vector.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredArticle {
    #[serde(flatten)]
    pub article: StoredArticle,
    pub similarity: f32,
}

/// Partial edit of a stored article. Absent fields are left alone; the score
/// fields overwrite the matching analysis values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArticleUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub source: Option<String>,
    pub url: Option<String>,
    pub topic: Option<Topic>,
    pub processing_status: Option<ProcessingStatus>,
    pub bias_score: Option<f32>,
    pub misinformation_risk: Option<f32>,
    pub credibility_score: Option<f32>,
    pub sentiment: Option<f32>,
}

impl ArticleUpdate {
    /// All problems at once, joined for a single 400 message.
    pub fn validate(&self) -> Result<(), String> {
        let mut errors = Vec::new();
        for (name, v) in [
            ("title", &self.title),
            ("content", &self.content),
            ("source", &self.source),
        ] {
            if v.as_deref().is_some_and(|s| s.trim().is_empty()) {
                errors.push(format!("{name} cannot be empty"));
            }
        }
        if let Some(url) = self.url.as_deref() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push("url must start with http:// or https://".to_string());
            }
        }
        for (name, v) in [
            ("bias_score", self.bias_score),
            ("misinformation_risk", self.misinformation_risk),
            ("credibility_score", self.credibility_score),
        ] {
            if v.is_some_and(|x| !(0.0..=1.0).contains(&x)) {
                errors.push(format!("{name} must be between 0 and 1"));
            }
        }
        if self.sentiment.is_some_and(|x| !(-1.0..=1.0).contains(&x)) {
            errors.push("sentiment must be between -1 and 1".to_string());
        }
        if errors.is_empty() && self.is_empty() {
            errors.push("no valid fields provided for update".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }

    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.source.is_none()
            && self.url.is_none()
            && self.topic.is_none()
            && self.processing_status.is_none()
            && self.bias_score.is_none()
            && self.misinformation_risk.is_none()
            && self.credibility_score.is_none()
            && self.sentiment.is_none()
    }

    pub fn apply(&self, a: &mut StoredArticle, now: DateTime<Utc>) {
        if let Some(v) = &self.title {
            a.title = v.trim().to_string();
        }
        if let Some(v) = &self.content {
            a.content = v.trim().to_string();
        }
        if let Some(v) = &self.source {
            a.source = v.trim().to_string();
        }
        if let Some(v) = &self.url {
            a.url = Some(v.trim().to_string());
        }
        if let Some(v) = self.topic {
            a.topic = v;
        }
        if let Some(v) = self.processing_status {
            a.processing_status = v;
        }
        if let Some(v) = self.bias_score {
            a.analysis.bias.overall_score = v;
        }
        if let Some(v) = self.misinformation_risk {
            a.analysis.misinformation.risk_score = v;
        }
        if let Some(v) = self.credibility_score {
            a.analysis.credibility.overall_score = v;
        }
        if let Some(v) = self.sentiment {
            a.analysis.sentiment.overall_sentiment = v;
        }
        a.updated_at = Some(now);
    }

    /// The new url, when it could collide with another article.
    pub fn new_url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Updated(Box<StoredArticle>),
    NotFound,
    /// Another article already has the requested url.
    UrlConflict,
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Insert unless the key is already present.
    async fn insert(&self, article: StoredArticle) -> Result<InsertOutcome, StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn get(&self, key: &str) -> Result<Option<StoredArticle>, StoreError>;
    /// One page of matches, ordered by `sort_by`/`sort_order`.
    async fn list(&self, query: &ArticleQuery) -> Result<ArticlePage, StoreError>;
    /// Highest similarity first. The query's filters and limit apply; its
    /// page and sort do not.
    async fn similar(
        &self,
        embedding: &[f32],
        query: &ArticleQuery,
    ) -> Result<Vec<ScoredArticle>, StoreError>;
    /// Analyzed articles stored at or after `cutoff`.
    async fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<StoredArticle>, StoreError>;
    async fn update(
        &self,
        key: &str,
        update: &ArticleUpdate,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, StoreError>;
    /// `false` when nothing had the key.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
    /// Pending or previously failed articles, oldest first.
    async fn awaiting_analysis(&self, limit: usize) -> Result<Vec<StoredArticle>, StoreError>;
    /// Overwrite the article with the same key; `false` when it is gone.
    async fn replace(&self, article: StoredArticle) -> Result<bool, StoreError>;
    async fn analytics(
        &self,
        params: &AnalyticsParams,
        now: DateTime<Utc>,
    ) -> Result<AnalyticsReport, StoreError>;
    fn backend_name(&self) -> &'static str;
}

/// In-process store: a bounded queue, oldest evicted first.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<VecDeque<StoredArticle>>,
    cap: usize,
}

impl MemoryStore {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap.min(1024))),
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<StoredArticle>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_capacity(10_000)
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn insert(&self, article: StoredArticle) -> Result<InsertOutcome, StoreError> {
        let mut v = self.lock();
        if v.iter().any(|a| a.key == article.key) {
            return Ok(InsertOutcome::AlreadyExists);
        }
        v.push_back(article);
        while v.len() > self.cap {
            v.pop_front();
        }
        Ok(InsertOutcome::Inserted)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock().iter().any(|a| a.key == key))
    }

    async fn get(&self, key: &str) -> Result<Option<StoredArticle>, StoreError> {
        Ok(self.lock().iter().find(|a| a.key == key).cloned())
    }

    async fn list(&self, query: &ArticleQuery) -> Result<ArticlePage, StoreError> {
        let v = self.lock();
        let mut hits: Vec<(usize, &StoredArticle)> =
            v.iter().enumerate().filter(|(_, a)| query.matches(a)).collect();
        // insertion order breaks ties, newest insert first on desc
        hits.sort_by(|(ia, a), (ib, b)| query.sort_by.compare(a, b).then(ia.cmp(ib)));
        if query.sort_order == SortOrder::Desc {
            hits.reverse();
        }
        let total = hits.len() as u64;
        let articles = hits
            .into_iter()
            .skip(query.skip())
            .take(query.effective_limit())
            .map(|(_, a)| a.clone())
            .collect();
        Ok(ArticlePage { total, articles })
    }

    async fn similar(
        &self,
        embedding: &[f32],
        query: &ArticleQuery,
    ) -> Result<Vec<ScoredArticle>, StoreError> {
        let v = self.lock();
        let mut out: Vec<ScoredArticle> = v
            .iter()
            .filter(|a| !a.embedding.is_empty() && query.matches(a))
            .map(|a| ScoredArticle {
                similarity: cosine(embedding, &a.embedding),
                article: a.clone(),
            })
            .collect();
        out.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        out.truncate(query.effective_limit());
        Ok(out)
    }

    async fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<StoredArticle>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .filter(|a| a.timestamp >= cutoff && a.processing_status.is_analyzed())
            .cloned()
            .collect())
    }

    async fn update(
        &self,
        key: &str,
        update: &ArticleUpdate,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, StoreError> {
        let mut v = self.lock();
        if let Some(url) = update.new_url() {
            let taken = v
                .iter()
                .any(|o| o.key != key && (o.key == url || o.url.as_deref() == Some(url)));
            if taken {
                return Ok(UpdateOutcome::UrlConflict);
            }
        }
        match v.iter_mut().find(|a| a.key == key) {
            Some(a) => {
                update.apply(a, now);
                Ok(UpdateOutcome::Updated(Box::new(a.clone())))
            }
            None => Ok(UpdateOutcome::NotFound),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut v = self.lock();
        let before = v.len();
        v.retain(|a| a.key != key);
        Ok(v.len() != before)
    }

    async fn awaiting_analysis(&self, limit: usize) -> Result<Vec<StoredArticle>, StoreError> {
        let v = self.lock();
        let mut out: Vec<StoredArticle> = v
            .iter()
            .filter(|a| a.processing_status.awaiting_analysis())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        out.truncate(limit);
        Ok(out)
    }

    async fn replace(&self, article: StoredArticle) -> Result<bool, StoreError> {
        let mut v = self.lock();
        match v.iter_mut().find(|a| a.key == article.key) {
            Some(slot) => {
                *slot = article;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn analytics(
        &self,
        params: &AnalyticsParams,
        now: DateTime<Utc>,
    ) -> Result<AnalyticsReport, StoreError> {
        // borrowed under the lock; nothing is cloned
        Ok(analytics::compute(self.lock().iter(), params, now))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn article(key: &str, source: &str, topic: Topic, age_hours: i64) -> StoredArticle {
        StoredArticle {
            key: key.to_string(),
            title: format!("title {key}"),
            content: format!("article {key} from {source}"),
            source: source.to_string(),
            url: None,
            topic,
            timestamp: Utc::now() - Duration::hours(age_hours),
            embedding: Vec::new(),
            processing_status: ProcessingStatus::AnalyzedFallback,
            updated_at: None,
            analysis: AnalysisRecord::neutral(ProcessingModel::FallbackHeuristic),
        }
    }

    fn keys(page: &ArticlePage) -> Vec<&str> {
        page.articles.iter().map(|a| a.key.as_str()).collect()
    }

    #[test]
    fn natural_key_prefers_url() {
        assert_eq!(natural_key(Some("https://x.test/a"), "body"), "https://x.test/a");
        let k = natural_key(None, "body");
        assert!(k.starts_with("sha256:"));
        assert_eq!(k.len(), "sha256:".len() + 64);
        assert_eq!(natural_key(Some("  "), "body"), k);
    }

    #[test]
    fn status_labels_round_trip() {
        for st in ProcessingStatus::ALL {
            assert_eq!(st.as_str().parse::<ProcessingStatus>().unwrap(), st);
        }
        assert!("done".parse::<ProcessingStatus>().is_err());
        assert_eq!(
            ProcessingStatus::for_model(ProcessingModel::PrimaryAi),
            ProcessingStatus::Analyzed
        );
    }

    #[tokio::test]
    async fn duplicate_insert_is_reported() {
        let s = MemoryStore::default();
        let a = article("k1", "Reuters", Topic::Politics, 1);
        assert_eq!(s.insert(a.clone()).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(s.insert(a).await.unwrap(), InsertOutcome::AlreadyExists);
        assert_eq!(s.len(), 1);
        assert!(s.exists("k1").await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_sorts_and_limits() {
        let s = MemoryStore::default();
        s.insert(article("old", "Reuters", Topic::Politics, 5)).await.unwrap();
        s.insert(article("new", "reuters", Topic::Politics, 1)).await.unwrap();
        s.insert(article("other", "AP", Topic::Sports, 2)).await.unwrap();

        let q = ArticleQuery {
            source: Some("REUTERS".into()),
            ..Default::default()
        };
        let page = s.list(&q).await.unwrap();
        assert_eq!(keys(&page), vec!["new", "old"]);
        assert_eq!(page.total, 2);

        let q = ArticleQuery {
            topic: Some(Topic::Sports),
            limit: Some(1000),
            ..Default::default()
        };
        assert_eq!(q.effective_limit(), MAX_LIST_LIMIT);
        assert_eq!(s.list(&q).await.unwrap().articles.len(), 1);
    }

    #[tokio::test]
    async fn pages_and_sorts_by_score() {
        let s = MemoryStore::default();
        for (i, bias) in [0.2f32, 0.9, 0.5, 0.75, 0.1].iter().enumerate() {
            let mut a = article(&format!("b{i}"), "X", Topic::General, 10 - i as i64);
            a.analysis.bias.overall_score = *bias;
            s.insert(a).await.unwrap();
        }

        let mut q = ArticleQuery {
            sort_by: SortField::Bias,
            limit: Some(2),
            ..Default::default()
        };
        let first = s.list(&q).await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(keys(&first), vec!["b1", "b3"]);

        q.page = Some(3);
        assert_eq!(keys(&s.list(&q).await.unwrap()), vec!["b4"]);
        q.page = Some(4);
        assert!(s.list(&q).await.unwrap().articles.is_empty());

        let q = ArticleQuery {
            min_bias: Some(HIGH_BIAS_MIN_SCORE),
            sort_by: SortField::Bias,
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        assert_eq!(keys(&s.list(&q).await.unwrap()), vec!["b3", "b1"]);
    }

    #[tokio::test]
    async fn text_search_matches_title_or_content() {
        let s = MemoryStore::default();
        let mut a = article("a", "X", Topic::General, 1);
        a.title = "Senate passes Budget".into();
        let mut b = article("b", "X", Topic::General, 2);
        b.content = "The budget office warned of deficits.".into();
        s.insert(a).await.unwrap();
        s.insert(b).await.unwrap();
        s.insert(article("c", "X", Topic::General, 3)).await.unwrap();

        let q = ArticleQuery {
            text: Some("BUDGET".into()),
            ..Default::default()
        };
        assert_eq!(keys(&s.list(&q).await.unwrap()), vec!["a", "b"]);
    }

    #[test]
    fn sort_names_fall_back_to_timestamp() {
        assert_eq!(SortField::parse_or_default("bias_score"), SortField::Bias);
        assert_eq!(SortField::parse_or_default("published_at"), SortField::Timestamp);
        assert_eq!(SortField::parse_or_default("$where"), SortField::Timestamp);
        assert_eq!(SortOrder::parse_or_default("ASC"), SortOrder::Asc);
        assert_eq!(SortOrder::parse_or_default("sideways"), SortOrder::Desc);
    }

    #[tokio::test]
    async fn similar_respects_filters_and_skips_missing_vectors() {
        let s = MemoryStore::default();
        let mut sports = article("s", "AP", Topic::Sports, 1);
        sports.embedding = vec![1.0, 0.0];
        let mut politics = article("p", "AP", Topic::Politics, 1);
        politics.embedding = vec![0.9, 0.1];
        let mut other = article("o", "Reuters", Topic::Sports, 1);
        other.embedding = vec![0.8, 0.2];
        s.insert(sports).await.unwrap();
        s.insert(politics).await.unwrap();
        s.insert(other).await.unwrap();
        s.insert(article("bare", "AP", Topic::Sports, 1)).await.unwrap();

        let all = s.similar(&[1.0, 0.0], &ArticleQuery::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].article.key, "s");

        let q = ArticleQuery {
            source: Some("ap".into()),
            topic: Some(Topic::Sports),
            ..Default::default()
        };
        let hits = s.similar(&[1.0, 0.0], &q).await.unwrap();
        let keys: Vec<_> = hits.iter().map(|h| h.article.key.as_str()).collect();
        assert_eq!(keys, vec!["s"]);
    }

    #[tokio::test]
    async fn update_applies_fields_and_detects_url_conflicts() {
        let s = MemoryStore::default();
        let mut taken = article("https://x.test/taken", "X", Topic::General, 1);
        taken.url = Some("https://x.test/taken".into());
        s.insert(taken).await.unwrap();
        s.insert(article("k", "X", Topic::General, 1)).await.unwrap();

        let now = Utc::now();
        let conflict = ArticleUpdate {
            url: Some("https://x.test/taken".into()),
            ..Default::default()
        };
        assert_eq!(s.update("k", &conflict, now).await.unwrap(), UpdateOutcome::UrlConflict);

        let edit = ArticleUpdate {
            title: Some("  Fixed headline ".into()),
            bias_score: Some(0.8),
            ..Default::default()
        };
        match s.update("k", &edit, now).await.unwrap() {
            UpdateOutcome::Updated(a) => {
                assert_eq!(a.title, "Fixed headline");
                assert_eq!(a.analysis.bias.overall_score, 0.8);
                assert_eq!(a.updated_at, Some(now));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.update("missing", &edit, now).await.unwrap(), UpdateOutcome::NotFound);
    }

    #[test]
    fn update_validation() {
        assert!(ArticleUpdate::default().validate().is_err());
        let bad = ArticleUpdate {
            url: Some("ftp://x".into()),
            sentiment: Some(-1.5),
            credibility_score: Some(2.0),
            ..Default::default()
        };
        let msg = bad.validate().unwrap_err();
        assert!(msg.contains("url") && msg.contains("sentiment") && msg.contains("credibility_score"));
        let ok = ArticleUpdate {
            sentiment: Some(-1.0),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[tokio::test]
    async fn delete_and_replace() {
        let s = MemoryStore::default();
        s.insert(article("k", "X", Topic::General, 1)).await.unwrap();
        let mut a = s.get("k").await.unwrap().unwrap();
        a.title = "replaced".into();
        assert!(s.replace(a.clone()).await.unwrap());
        assert_eq!(s.get("k").await.unwrap().unwrap().title, "replaced");

        assert!(s.delete("k").await.unwrap());
        assert!(!s.delete("k").await.unwrap());
        assert!(!s.replace(a).await.unwrap());
    }

    #[tokio::test]
    async fn awaiting_analysis_is_oldest_first_and_limited() {
        let s = MemoryStore::default();
        for (key, status, age) in [
            ("done", ProcessingStatus::Analyzed, 9),
            ("p-new", ProcessingStatus::Pending, 1),
            ("failed", ProcessingStatus::FailedAnalysis, 5),
            ("p-old", ProcessingStatus::Pending, 8),
        ] {
            let mut a = article(key, "X", Topic::General, age);
            a.processing_status = status;
            s.insert(a).await.unwrap();
        }
        let batch = s.awaiting_analysis(2).await.unwrap();
        let keys: Vec<_> = batch.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["p-old", "failed"]);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let s = MemoryStore::with_capacity(2);
        for k in ["a", "b", "c"] {
            s.insert(article(k, "X", Topic::General, 0)).await.unwrap();
        }
        assert!(!s.exists("a").await.unwrap());
        assert_eq!(s.len(), 2);
    }

    #[tokio::test]
    async fn since_filters_by_time_and_status() {
        let s = MemoryStore::default();
        s.insert(article("fresh", "X", Topic::General, 1)).await.unwrap();
        s.insert(article("stale", "X", Topic::General, 24 * 30)).await.unwrap();
        let mut pending = article("pending", "X", Topic::General, 1);
        pending.processing_status = ProcessingStatus::Pending;
        s.insert(pending).await.unwrap();

        let cutoff = Utc::now() - Duration::days(7);
        let recent = s.since(cutoff).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].key, "fresh");
    }
}

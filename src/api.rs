use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::analyze::orchestrator::{
    AnalyzeRequest, CreateArticle, Orchestrator, DEFAULT_BATCH_SIZE,
};
use crate::analyze::record::AnalysisRecord;
use crate::analyze::topic::Topic;
use crate::error::{AnalyzeError, ApiError};
use crate::feed::{self, FeedHub};
use crate::metrics::Metrics;
use crate::store::{
    ArticlePage, ArticleQuery, ArticleStore, ArticleUpdate, ProcessingStatus, SortField,
    SortOrder, StoredArticle, UpdateOutcome, HIGH_BIAS_MIN_SCORE, MISINFORMATION_MIN_RISK,
};
use crate::{analytics, trends};

pub const HEADER_AI_USED: HeaderName = HeaderName::from_static("x-ai-used");
pub const HEADER_AI_REASON: HeaderName = HeaderName::from_static("x-ai-reason");

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<dyn ArticleStore>,
    pub feed: FeedHub,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, store: Arc<dyn ArticleStore>, feed: FeedHub) -> Self {
        Self {
            orchestrator,
            store,
            feed,
        }
    }
}

/// `Query` whose rejection is the JSON error envelope.
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(ApiQuery(value))
    }
}

/// Build the public router. `/metrics` is mounted when a recorder is given.
pub fn router(state: AppState, metrics: Option<&Metrics>) -> Router {
    // literal segments win over the `{*key}` catch-all
    let api = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/analyze", post(analyze))
        .route("/api/analyze/batch", post(run_batch))
        .route("/api/articles", get(list_articles).post(create_article))
        .route("/api/articles/high-bias", get(high_bias_articles))
        .route("/api/articles/misinformation-risk", get(misinformation_risk_articles))
        .route("/api/articles/search", get(search_articles))
        .route(
            "/api/articles/{*key}",
            get(get_article).put(update_article).delete(delete_article),
        )
        .route("/api/trends", get(get_trends))
        .route("/api/analytics", get(get_analytics))
        .route("/api/feed", get(feed::feed_handler))
        .layer(CorsLayer::very_permissive())
        .with_state(state);

    match metrics {
        Some(m) => api.merge(m.router()),
        None => api,
    }
}

async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rej) => return AnalyzeError::InvalidRequest(rej.body_text()).into_response(),
    };

    match state.orchestrator.submit(req).await {
        Ok(done) => {
            let mut headers = HeaderMap::new();
            match done.metadata.fallback_reason {
                None => {
                    headers.insert(HEADER_AI_USED, HeaderValue::from_static("1"));
                }
                Some(reason) => {
                    headers.insert(HEADER_AI_USED, HeaderValue::from_static("0"));
                    headers.insert(HEADER_AI_REASON, HeaderValue::from_static(reason.as_str()));
                }
            }
            (headers, Json(done)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct BatchParams {
    batch_size: Option<usize>,
    /// Run inline and return the stats instead of 202.
    #[serde(default)]
    wait: bool,
}

async fn run_batch(
    State(state): State<AppState>,
    ApiQuery(p): ApiQuery<BatchParams>,
) -> Response {
    let batch_size = p.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
    if p.wait {
        return match state.orchestrator.run_batch(batch_size).await {
            Ok(stats) => Json(json!({ "success": true, "stats": stats })).into_response(),
            Err(e) => e.into_response(),
        };
    }

    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        match orchestrator.run_batch(batch_size).await {
            Ok(stats) => info!(status = ?stats.status, "background batch done"),
            Err(e) => warn!(error = %e, "background batch did not run"),
        }
    });
    (
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "status": "processing", "batch_size": batch_size })),
    )
        .into_response()
}

/// Article as returned by the API: everything but the embedding vector.
#[derive(Debug, Serialize)]
pub struct ArticleView {
    pub key: String,
    pub title: String,
    pub content: String,
    pub source: String,
    pub url: Option<String>,
    pub topic: Topic,
    pub timestamp: DateTime<Utc>,
    pub processing_status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub analysis: AnalysisRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

impl From<StoredArticle> for ArticleView {
    fn from(a: StoredArticle) -> Self {
        Self {
            key: a.key,
            title: a.title,
            content: a.content,
            source: a.source,
            url: a.url,
            topic: a.topic,
            timestamp: a.timestamp,
            processing_status: a.processing_status,
            updated_at: a.updated_at,
            analysis: a.analysis,
            similarity: None,
        }
    }
}

/// Query string shared by every listing; each endpoint reads what it needs.
#[derive(Debug, Default, Deserialize)]
struct ListParams {
    source: Option<String>,
    topic: Option<String>,
    status: Option<String>,
    page: Option<usize>,
    #[serde(alias = "per_page")]
    limit: Option<usize>,
    sort_by: Option<String>,
    sort_order: Option<String>,
    /// Free text; switches `/api/articles` to similarity ranking.
    similar_to: Option<String>,
    q: Option<String>,
    min_score: Option<f32>,
    min_risk: Option<f32>,
}

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|t| !t.is_empty())
}

fn unit_threshold(name: &str, v: Option<f32>, default: f32) -> Result<f32, ApiError> {
    match v {
        None => Ok(default),
        Some(x) if (0.0..=1.0).contains(&x) => Ok(x),
        Some(x) => Err(ApiError::BadQuery(format!("{name} must be between 0 and 1, got {x}"))),
    }
}

impl ListParams {
    /// Filters and paging common to all listings; `default_sort` applies
    /// when `sort_by` is absent.
    fn query(&self, default_sort: SortField) -> Result<ArticleQuery, ApiError> {
        let topic = match non_blank(&self.topic) {
            Some(t) => Some(t.parse::<Topic>().map_err(ApiError::BadQuery)?),
            None => None,
        };
        let status = match non_blank(&self.status) {
            Some(s) => Some(s.parse::<ProcessingStatus>().map_err(ApiError::BadQuery)?),
            None => None,
        };
        Ok(ArticleQuery {
            source: non_blank(&self.source).map(str::to_string),
            topic,
            status,
            page: self.page,
            limit: self.limit,
            sort_by: non_blank(&self.sort_by).map_or(default_sort, SortField::parse_or_default),
            sort_order: non_blank(&self.sort_order).map_or(SortOrder::Desc, SortOrder::parse_or_default),
            ..Default::default()
        })
    }
}

#[derive(Serialize)]
struct ListResp {
    success: bool,
    page: usize,
    per_page: usize,
    total_articles: u64,
    count: usize,
    articles: Vec<ArticleView>,
}

impl ListResp {
    fn new(query: &ArticleQuery, total: u64, articles: Vec<ArticleView>) -> Self {
        Self {
            success: true,
            page: query.effective_page(),
            per_page: query.effective_limit(),
            total_articles: total,
            count: articles.len(),
            articles,
        }
    }
}

async fn page_of(store: &dyn ArticleStore, query: ArticleQuery) -> Result<Json<ListResp>, ApiError> {
    let ArticlePage { total, articles } = store.list(&query).await?;
    let views = articles.into_iter().map(ArticleView::from).collect();
    Ok(Json(ListResp::new(&query, total, views)))
}

async fn list_articles(
    State(state): State<AppState>,
    ApiQuery(p): ApiQuery<ListParams>,
) -> Result<Json<ListResp>, ApiError> {
    let query = p.query(SortField::Timestamp)?;

    let Some(text) = non_blank(&p.similar_to) else {
        return page_of(state.store.as_ref(), query).await;
    };
    let vector = state.orchestrator.embedder().embed(text).await?;
    let articles: Vec<ArticleView> = state
        .store
        .similar(&vector, &query)
        .await?
        .into_iter()
        .map(|scored| {
            let mut view = ArticleView::from(scored.article);
            view.similarity = Some(scored.similarity);
            view
        })
        .collect();
    let total = articles.len() as u64;
    Ok(Json(ListResp::new(&query, total, articles)))
}

async fn high_bias_articles(
    State(state): State<AppState>,
    ApiQuery(p): ApiQuery<ListParams>,
) -> Result<Json<ListResp>, ApiError> {
    let mut query = p.query(SortField::Bias)?;
    query.min_bias = Some(unit_threshold("min_score", p.min_score, HIGH_BIAS_MIN_SCORE)?);
    page_of(state.store.as_ref(), query).await
}

async fn misinformation_risk_articles(
    State(state): State<AppState>,
    ApiQuery(p): ApiQuery<ListParams>,
) -> Result<Json<ListResp>, ApiError> {
    let mut query = p.query(SortField::MisinformationRisk)?;
    query.min_risk = Some(unit_threshold("min_risk", p.min_risk, MISINFORMATION_MIN_RISK)?);
    page_of(state.store.as_ref(), query).await
}

async fn search_articles(
    State(state): State<AppState>,
    ApiQuery(p): ApiQuery<ListParams>,
) -> Result<Json<ListResp>, ApiError> {
    let Some(text) = non_blank(&p.q) else {
        return Err(ApiError::BadQuery("query parameter 'q' is required".to_string()));
    };
    let mut query = p.query(SortField::Timestamp)?;
    query.text = Some(text.to_string());
    page_of(state.store.as_ref(), query).await
}

async fn create_article(
    State(state): State<AppState>,
    payload: Result<Json<CreateArticle>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rej) => return AnalyzeError::InvalidRequest(rej.body_text()).into_response(),
    };
    match state.orchestrator.create(req).await {
        Ok(article) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "message": "Article created",
                "article": ArticleView::from(article),
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn get_article(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ArticleView>, ApiError> {
    match state.store.get(&key).await? {
        Some(a) => Ok(Json(a.into())),
        None => Err(ApiError::NotFound(key)),
    }
}

async fn update_article(
    State(state): State<AppState>,
    Path(key): Path<String>,
    payload: Result<Json<ArticleUpdate>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(update) = payload.map_err(|rej| ApiError::BadBody(rej.body_text()))?;
    update.validate().map_err(ApiError::BadBody)?;

    match state.store.update(&key, &update, Utc::now()).await? {
        UpdateOutcome::Updated(article) => {
            info!(key = %key, "article updated");
            Ok(Json(json!({
                "success": true,
                "message": "Article updated",
                "article": ArticleView::from(*article),
            })))
        }
        UpdateOutcome::NotFound => Err(ApiError::NotFound(key)),
        UpdateOutcome::UrlConflict => Err(ApiError::Conflict(
            "another article already has that url".to_string(),
        )),
    }
}

async fn delete_article(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.store.delete(&key).await? {
        return Err(ApiError::NotFound(key));
    }
    info!(key = %key, "article deleted");
    Ok(Json(json!({ "success": true, "message": "Article deleted", "key": key })))
}

async fn get_trends(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<trends::TrendParams>,
) -> Result<Json<trends::TrendReport>, ApiError> {
    let recent = state.store.since(params.cutoff(Utc::now())).await?;
    Ok(Json(trends::compute(&recent, &params)))
}

async fn get_analytics(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<analytics::AnalyticsParams>,
) -> Result<Json<analytics::AnalyticsReport>, ApiError> {
    Ok(Json(state.store.analytics(&params, Utc::now()).await?))
}

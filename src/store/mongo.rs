//! MongoDB article store.
//!
//! One pooled `mongodb::Client` is created at startup and handed to the store;
//! each operation checks a connection out of the driver's pool and returns it
//! when the future completes. Similarity search uses an Atlas vector index
//! named `embedding_index` on the `embedding` field.

use std::collections::HashMap;

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use chrono::{DateTime, NaiveDate, Utc};
use futures::TryStreamExt;
use mongodb::{
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::IndexOptions,
    Client, Collection, IndexModel,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    ArticlePage, ArticleQuery, ArticleStore, ArticleUpdate, InsertOutcome, ProcessingStatus,
    ScoredArticle, SortOrder, StoreError, StoredArticle, UpdateOutcome,
};
use crate::analytics::{self, AnalyticsParams, AnalyticsReport, Averages};
use crate::analyze::record::AnalysisRecord;
use crate::analyze::topic::Topic;

pub const ARTICLES_COLLECTION: &str = "articles";
const VECTOR_INDEX: &str = "embedding_index";
const DUPLICATE_KEY_CODE: i32 = 11000;
/// Extra vector candidates fetched when filters run after the search.
const FILTERED_OVERFETCH: i64 = 10;

/// On-disk shape: the same fields with a native BSON timestamp so range
/// queries and the timestamp index work.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArticleDoc {
    key: String,
    title: String,
    content: String,
    source: String,
    url: Option<String>,
    topic: Topic,
    timestamp: bson::DateTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    embedding: Vec<f32>,
    #[serde(default)]
    processing_status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<bson::DateTime>,
    #[serde(flatten)]
    analysis: AnalysisRecord,
}

impl From<StoredArticle> for ArticleDoc {
    fn from(a: StoredArticle) -> Self {
        Self {
            key: a.key,
            title: a.title,
            content: a.content,
            source: a.source,
            url: a.url,
            topic: a.topic,
            timestamp: bson::DateTime::from_chrono(a.timestamp),
            embedding: a.embedding,
            processing_status: a.processing_status,
            updated_at: a.updated_at.map(bson::DateTime::from_chrono),
            analysis: a.analysis,
        }
    }
}

impl From<ArticleDoc> for StoredArticle {
    fn from(d: ArticleDoc) -> Self {
        Self {
            key: d.key,
            title: d.title,
            content: d.content,
            source: d.source,
            url: d.url,
            topic: d.topic,
            timestamp: d.timestamp.to_chrono(),
            embedding: d.embedding,
            processing_status: d.processing_status,
            updated_at: d.updated_at.map(|t| t.to_chrono()),
            analysis: d.analysis,
        }
    }
}

#[derive(Clone)]
pub struct MongoStore {
    articles: Collection<ArticleDoc>,
}

fn backend(e: MongoError) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn decode(e: bson::de::Error) -> StoreError {
    StoreError::Backend(format!("decoding article: {e}"))
}

fn is_duplicate_key(e: &MongoError) -> bool {
    matches!(
        e.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY_CODE
    )
}

fn case_insensitive(exact: &str) -> Document {
    doc! { "$regex": format!("^{}$", regex::escape(exact)), "$options": "i" }
}

/// Documents written before `processing_status` existed read as analyzed.
fn status_filter(status: ProcessingStatus) -> Bson {
    match status {
        ProcessingStatus::Analyzed => doc! { "$in": ["analyzed", Bson::Null] }.into(),
        other => other.as_str().into(),
    }
}

/// Query filters as a `find`/`$match` document.
fn filter_doc(query: &ArticleQuery) -> Document {
    let mut filter = Document::new();
    if let Some(source) = query.source.as_deref() {
        filter.insert("source", case_insensitive(source));
    }
    if let Some(topic) = query.topic {
        filter.insert("topic", topic.as_str());
    }
    if let Some(status) = query.status {
        filter.insert("processing_status", status_filter(status));
    }
    if let Some(text) = query.text.as_deref() {
        let re = doc! { "$regex": regex::escape(text), "$options": "i" };
        filter.insert(
            "$or",
            vec![
                Bson::from(doc! { "title": re.clone() }),
                Bson::from(doc! { "content": re }),
            ],
        );
    }
    if let Some(min) = query.min_bias {
        filter.insert("bias.overall_score", doc! { "$gte": f64::from(min) });
    }
    if let Some(min) = query.min_risk {
        filter.insert("misinformation.risk_score", doc! { "$gte": f64::from(min) });
    }
    filter
}

fn has_filters(query: &ArticleQuery) -> bool {
    !filter_doc(query).is_empty()
}

fn count(row: &Document) -> usize {
    match row.get("n") {
        Some(Bson::Int32(n)) => (*n).max(0) as usize,
        Some(Bson::Int64(n)) => (*n).max(0) as usize,
        Some(Bson::Double(n)) => n.max(0.0) as usize,
        _ => 0,
    }
}

fn number(row: &Document, field: &str) -> f32 {
    match row.get(field) {
        Some(Bson::Double(x)) => *x as f32,
        Some(Bson::Int32(x)) => *x as f32,
        Some(Bson::Int64(x)) => *x as f32,
        _ => 0.0,
    }
}

/// Rows of one `$facet` output.
fn facet<'a>(result: &'a Document, name: &str) -> impl Iterator<Item = &'a Document> + 'a {
    result
        .get_array(name)
        .into_iter()
        .flatten()
        .filter_map(Bson::as_document)
}

fn analytics_pipeline(params: &AnalyticsParams, now: DateTime<Utc>) -> Vec<Document> {
    let cutoff = bson::DateTime::from_chrono(params.cutoff(now));
    let analyzed = doc! {
        "$match": { "processing_status": { "$nin": ["pending", "failed_analysis"] } }
    };
    vec![doc! {
        "$facet": {
            "total": [ { "$count": "n" } ],
            "by_status": [
                { "$group": { "_id": { "$ifNull": ["$processing_status", "analyzed"] }, "n": { "$sum": 1 } } }
            ],
            "by_model": [
                analyzed.clone(),
                { "$group": { "_id": "$processing_model", "n": { "$sum": 1 } } }
            ],
            "sources": [
                { "$group": { "_id": "$source", "n": { "$sum": 1 } } },
                { "$sort": { "n": -1, "_id": 1 } },
                { "$limit": analytics::TOP_SOURCES as i64 }
            ],
            "averages": [
                analyzed.clone(),
                { "$group": {
                    "_id": Bson::Null,
                    "n": { "$sum": 1 },
                    "bias": { "$avg": "$bias.overall_score" },
                    "risk": { "$avg": "$misinformation.risk_score" },
                    "credibility": { "$avg": "$credibility.overall_score" },
                    "sentiment": { "$avg": "$sentiment.overall_sentiment" }
                } }
            ],
            "risk": [
                analyzed,
                { "$bucket": {
                    "groupBy": "$misinformation.risk_score",
                    "boundaries": [0.0, 0.3, 0.7, 1.01],
                    "default": "out_of_range",
                    "output": { "n": { "$sum": 1 } }
                } }
            ],
            "per_day": [
                { "$match": { "timestamp": { "$gte": cutoff } } },
                { "$group": {
                    "_id": { "$dateToString": { "format": "%Y-%m-%d", "date": "$timestamp" } },
                    "n": { "$sum": 1 }
                } }
            ]
        }
    }]
}

fn report_from_facets(result: &Document) -> AnalyticsReport {
    let mut report = AnalyticsReport::empty();
    report.total_articles = facet(result, "total").map(count).sum();

    for row in facet(result, "by_status") {
        let status = row
            .get_str("_id")
            .ok()
            .and_then(|s| s.parse::<ProcessingStatus>().ok());
        if let Some(st) = status {
            *report.by_processing_status.entry(st.as_str()).or_insert(0) += count(row);
        }
    }
    for row in facet(result, "by_model") {
        let label = row.get_str("_id").unwrap_or_default();
        if let Some(n) = report.by_processing_model.get_mut(label) {
            *n += count(row);
        }
    }

    let sources: HashMap<String, usize> = facet(result, "sources")
        .filter_map(|row| Some((row.get_str("_id").ok()?.to_string(), count(row))))
        .collect();
    report.top_sources = analytics::top_sources(sources);

    if let Some(row) = facet(result, "averages").next() {
        report.analyzed_articles = count(row);
        report.averages = Averages {
            bias: number(row, "bias"),
            misinformation_risk: number(row, "risk"),
            credibility: number(row, "credibility"),
            sentiment: number(row, "sentiment"),
        };
    }

    for row in facet(result, "risk") {
        let n = count(row);
        match row.get("_id") {
            Some(Bson::Double(lower)) if *lower < 0.3 => report.risk_distribution.low += n,
            Some(Bson::Double(lower)) if *lower < 0.7 => report.risk_distribution.medium += n,
            Some(Bson::Double(_)) => report.risk_distribution.high += n,
            _ => {}
        }
    }

    for row in facet(result, "per_day") {
        let day = row
            .get_str("_id")
            .ok()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
        if let Some(day) = day {
            report.stored_per_day.insert(day, count(row));
        }
    }
    report
}

impl MongoStore {
    /// Connect, ping, and ensure indexes.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, StoreError> {
        // fail fast when the server is unreachable
        let uri = if uri.contains('?') {
            format!("{uri}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000")
        } else {
            format!("{uri}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000")
        };
        let client = Client::with_uri_str(&uri)
            .await
            .map_err(|e| StoreError::Unavailable(format!("connecting to MongoDB: {e}")))?;
        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Unavailable(format!("MongoDB ping failed: {e}")))?;
        info!(db = db_name, "connected to MongoDB");
        Self::from_client(&client, db_name).await
    }

    /// Build on an existing pooled client.
    pub async fn from_client(client: &Client, db_name: &str) -> Result<Self, StoreError> {
        let store = Self {
            articles: client.database(db_name).collection(ARTICLES_COLLECTION),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique = IndexOptions::builder().unique(true).build();
        let models = vec![
            IndexModel::builder()
                .keys(doc! { "key": 1 })
                .options(unique)
                .build(),
            IndexModel::builder().keys(doc! { "timestamp": -1 }).build(),
            IndexModel::builder().keys(doc! { "source": 1 }).build(),
            IndexModel::builder().keys(doc! { "topic": 1 }).build(),
            IndexModel::builder().keys(doc! { "url": 1 }).build(),
            IndexModel::builder()
                .keys(doc! { "processing_status": 1, "timestamp": 1 })
                .build(),
            IndexModel::builder().keys(doc! { "bias.overall_score": -1 }).build(),
            IndexModel::builder()
                .keys(doc! { "misinformation.risk_score": -1 })
                .build(),
        ];
        self.articles
            .create_indexes(models)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn find_all(
        &self,
        filter: Document,
        sort: Document,
        limit: i64,
    ) -> Result<Vec<StoredArticle>, StoreError> {
        let docs: Vec<ArticleDoc> = self
            .articles
            .find(filter)
            .sort(sort)
            .limit(limit)
            .await
            .map_err(backend)?
            .try_collect()
            .await
            .map_err(backend)?;
        Ok(docs.into_iter().map(StoredArticle::from).collect())
    }
}

#[async_trait]
impl ArticleStore for MongoStore {
    async fn insert(&self, article: StoredArticle) -> Result<InsertOutcome, StoreError> {
        match self.articles.insert_one(ArticleDoc::from(article)).await {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if is_duplicate_key(&e) => Ok(InsertOutcome::AlreadyExists),
            Err(e) => Err(backend(e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let n = self
            .articles
            .count_documents(doc! { "key": key })
            .limit(1)
            .await
            .map_err(backend)?;
        Ok(n > 0)
    }

    async fn get(&self, key: &str) -> Result<Option<StoredArticle>, StoreError> {
        let found = self
            .articles
            .find_one(doc! { "key": key })
            .await
            .map_err(backend)?;
        Ok(found.map(StoredArticle::from))
    }

    async fn list(&self, query: &ArticleQuery) -> Result<ArticlePage, StoreError> {
        let filter = filter_doc(query);
        let total = self
            .articles
            .count_documents(filter.clone())
            .await
            .map_err(backend)?;

        let dir = match query.sort_order {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        };
        let mut sort = Document::new();
        sort.insert(query.sort_by.field_path(), dir);
        sort.insert("key", dir);
        let docs: Vec<ArticleDoc> = self
            .articles
            .find(filter)
            .sort(sort)
            .skip(query.skip() as u64)
            .limit(query.effective_limit() as i64)
            .projection(doc! { "embedding": 0 })
            .await
            .map_err(backend)?
            .try_collect()
            .await
            .map_err(backend)?;
        Ok(ArticlePage {
            total,
            articles: docs.into_iter().map(StoredArticle::from).collect(),
        })
    }

    async fn similar(
        &self,
        embedding: &[f32],
        query: &ArticleQuery,
    ) -> Result<Vec<ScoredArticle>, StoreError> {
        let limit = query.effective_limit() as i64;
        let filtered = has_filters(query);
        // filters run after the vector stage, so fetch more candidates
        let candidates = if filtered { limit * FILTERED_OVERFETCH } else { limit };
        let vector: Vec<f64> = embedding.iter().map(|x| f64::from(*x)).collect();

        let mut pipeline = vec![
            doc! {
                "$vectorSearch": {
                    "index": VECTOR_INDEX,
                    "path": "embedding",
                    "queryVector": vector,
                    "numCandidates": candidates * 10,
                    "limit": candidates,
                }
            },
            doc! { "$addFields": { "similarity": { "$meta": "vectorSearchScore" } } },
        ];
        if filtered {
            pipeline.push(doc! { "$match": filter_doc(query) });
            pipeline.push(doc! { "$limit": limit });
        }
        pipeline.push(doc! { "$project": { "embedding": 0 } });

        let raw: Vec<Document> = self
            .articles
            .aggregate(pipeline)
            .await
            .map_err(backend)?
            .try_collect()
            .await
            .map_err(backend)?;

        let mut out = Vec::with_capacity(raw.len());
        for mut d in raw {
            let similarity = match d.remove("similarity") {
                Some(Bson::Double(s)) => s as f32,
                _ => 0.0,
            };
            let doc: ArticleDoc = bson::from_document(d).map_err(decode)?;
            out.push(ScoredArticle {
                article: doc.into(),
                similarity,
            });
        }
        debug!(filtered, hits = out.len(), "vector search");
        Ok(out)
    }

    async fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<StoredArticle>, StoreError> {
        let filter = doc! {
            "timestamp": { "$gte": bson::DateTime::from_chrono(cutoff) },
            "processing_status": { "$nin": ["pending", "failed_analysis"] },
        };
        let docs: Vec<ArticleDoc> = self
            .articles
            .find(filter)
            .projection(doc! { "embedding": 0, "content": 0 })
            .await
            .map_err(backend)?
            .try_collect()
            .await
            .map_err(backend)?;
        Ok(docs.into_iter().map(StoredArticle::from).collect())
    }

    async fn update(
        &self,
        key: &str,
        update: &ArticleUpdate,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, StoreError> {
        if let Some(url) = update.new_url() {
            let clash = doc! {
                "key": { "$ne": key },
                "$or": [ { "url": url }, { "key": url } ],
            };
            let taken = self
                .articles
                .count_documents(clash)
                .limit(1)
                .await
                .map_err(backend)?;
            if taken > 0 {
                return Ok(UpdateOutcome::UrlConflict);
            }
        }
        let Some(mut article) = self.get(key).await? else {
            return Ok(UpdateOutcome::NotFound);
        };
        update.apply(&mut article, now);
        if self.replace(article.clone()).await? {
            Ok(UpdateOutcome::Updated(Box::new(article)))
        } else {
            Ok(UpdateOutcome::NotFound)
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let res = self
            .articles
            .delete_one(doc! { "key": key })
            .await
            .map_err(backend)?;
        Ok(res.deleted_count > 0)
    }

    async fn awaiting_analysis(&self, limit: usize) -> Result<Vec<StoredArticle>, StoreError> {
        let filter = doc! { "processing_status": { "$in": ["pending", "failed_analysis"] } };
        self.find_all(filter, doc! { "timestamp": 1 }, limit.max(1) as i64)
            .await
    }

    async fn replace(&self, article: StoredArticle) -> Result<bool, StoreError> {
        let key = article.key.clone();
        let res = self
            .articles
            .replace_one(doc! { "key": key }, ArticleDoc::from(article))
            .await
            .map_err(backend)?;
        Ok(res.matched_count > 0)
    }

    async fn analytics(
        &self,
        params: &AnalyticsParams,
        now: DateTime<Utc>,
    ) -> Result<AnalyticsReport, StoreError> {
        let mut cursor = self
            .articles
            .aggregate(analytics_pipeline(params, now))
            .await
            .map_err(backend)?;
        let result = cursor.try_next().await.map_err(backend)?.unwrap_or_default();
        Ok(report_from_facets(&result))
    }

    fn backend_name(&self) -> &'static str {
        "mongo"
    }
}

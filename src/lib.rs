// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod ai_bootstrap;
pub mod analytics;
pub mod analyze;
pub mod api;
pub mod config;
pub mod embedding;
pub mod error;
pub mod feed;
pub mod fetch;
pub mod metrics;
pub mod store;
pub mod trends;

// ---- Re-exports for stable public API ----
pub use analyze::ai_adapter;
pub use crate::api::{router, AppState};

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tracing::info;

use crate::ai_bootstrap::AiRuntime;
use crate::analyze::orchestrator::Orchestrator;
use crate::config::scoring::ScoringConfig;
use crate::config::{AppConfig, StoreBackend};
use crate::feed::FeedHub;
use crate::fetch::HttpFetcher;
use crate::metrics::Metrics;
use crate::store::{ArticleStore, MemoryStore};

async fn build_store(cfg: &AppConfig) -> anyhow::Result<Arc<dyn ArticleStore>> {
    match cfg.store_backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::with_capacity(cfg.memory_store_cap))),
        #[cfg(feature = "mongo")]
        StoreBackend::Mongo => {
            let uri = cfg
                .mongodb_uri
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("MONGODB_URI is not set"))?;
            let store = store::mongo::MongoStore::connect(uri, &cfg.mongodb_db).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "mongo"))]
        StoreBackend::Mongo => {
            anyhow::bail!("STORE_BACKEND=mongo needs a build with the `mongo` feature")
        }
    }
}

/// Wire config, AI runtime, store, and feed into shared state.
pub async fn build_state(cfg: &AppConfig) -> anyhow::Result<(AppState, AiRuntime)> {
    let scoring = ScoringConfig::load_or_default(&cfg.scoring_config_path)?;
    let ai = AiRuntime::from_path(&cfg.ai_config_path)?;
    let adapter = Arc::new(ai.adapter(scoring));
    let store = build_store(cfg).await?;
    let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(cfg.fetch_timeout_secs))?);
    let feed = FeedHub::new(cfg.feed_capacity);

    let embedder = embedding::from_config(cfg.embeddings_enabled, &cfg.embedding_cache_dir);

    info!(
        store = store.backend_name(),
        provider = adapter.provider_name(),
        embedder = embedder.name(),
        "state ready"
    );

    let orchestrator = Arc::new(
        Orchestrator::new(adapter, Arc::clone(&store), fetcher, feed.clone()).with_embedder(embedder),
    );
    Ok((AppState::new(orchestrator, store, feed), ai))
}

/// Full in-process app from the environment (used by the binary and tests).
pub async fn app() -> anyhow::Result<Router> {
    let cfg = AppConfig::from_env()?;
    let (state, _ai) = build_state(&cfg).await?;
    let metrics = if cfg.metrics_enabled {
        Some(Metrics::init()?)
    } else {
        None
    };
    Ok(router(state, metrics.as_ref()))
}

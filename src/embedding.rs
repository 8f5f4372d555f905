//! Sentence embeddings for "more like this" queries.
//!
//! `FastEmbedder` runs the all-MiniLM-L6-v2 ONNX model through fastembed.
//! The model is loaded on first use and both loading and inference run on
//! the blocking pool. Articles whose embedding fails are stored without one.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Output width of all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embeddings are disabled")]
    Disabled,
    #[error("embedding model unavailable: {0}")]
    Model(String),
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
    /// Load whatever the first `embed` would, ahead of traffic.
    async fn warm_up(&self) -> Result<(), EmbedError> {
        Ok(())
    }
    fn name(&self) -> &'static str;
}

/// Always `Disabled`; similarity search is then unavailable.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Disabled)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

#[cfg(feature = "embeddings")]
pub use self::fast::FastEmbedder;

#[cfg(feature = "embeddings")]
mod fast {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Instant;

    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use tokio::sync::OnceCell;
    use tracing::{info, warn};

    use super::{EmbedError, Embedder};

    /// The model only sees its first 256 tokens; no point shipping more.
    const MAX_EMBED_CHARS: usize = 2_000;

    pub struct FastEmbedder {
        cache_dir: PathBuf,
        model: OnceCell<Arc<TextEmbedding>>,
    }

    impl FastEmbedder {
        pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
            Self {
                cache_dir: cache_dir.into(),
                model: OnceCell::new(),
            }
        }

        async fn model(&self) -> Result<Arc<TextEmbedding>, EmbedError> {
            let model = self
                .model
                .get_or_try_init(|| async {
                    let cache_dir = self.cache_dir.clone();
                    let t0 = Instant::now();
                    let loaded = tokio::task::spawn_blocking(move || {
                        let mut options = InitOptions::new(EmbeddingModel::AllMiniLML6V2);
                        options.show_download_progress = false;
                        options.cache_dir = cache_dir;
                        TextEmbedding::try_new(options)
                    })
                    .await
                    .map_err(|e| EmbedError::Model(e.to_string()))?;
                    match loaded {
                        Ok(model) => {
                            info!(elapsed_ms = t0.elapsed().as_millis() as u64, "embedding model loaded");
                            Ok(Arc::new(model))
                        }
                        Err(e) => {
                            // cell stays empty; the next call retries
                            warn!(error = %e, "embedding model failed to load");
                            Err(EmbedError::Model(e.to_string()))
                        }
                    }
                })
                .await?;
            Ok(Arc::clone(model))
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            let model = self.model().await?;
            let input: String = text.chars().take(MAX_EMBED_CHARS).collect();
            let mut vectors = tokio::task::spawn_blocking(move || model.embed(vec![input], None))
                .await
                .map_err(|e| EmbedError::Model(e.to_string()))?
                .map_err(|e| EmbedError::Model(e.to_string()))?;
            vectors
                .pop()
                .ok_or_else(|| EmbedError::Model("model returned no vector".to_string()))
        }

        async fn warm_up(&self) -> Result<(), EmbedError> {
            self.model().await.map(|_| ())
        }

        fn name(&self) -> &'static str {
            "fastembed"
        }
    }
}

/// The configured embedder: fastembed when enabled and compiled in.
pub fn from_config(enabled: bool, cache_dir: &Path) -> Arc<dyn Embedder> {
    if !enabled {
        return Arc::new(DisabledEmbedder);
    }
    enabled_embedder(cache_dir)
}

#[cfg(feature = "embeddings")]
fn enabled_embedder(cache_dir: &Path) -> Arc<dyn Embedder> {
    Arc::new(FastEmbedder::new(cache_dir))
}

#[cfg(not(feature = "embeddings"))]
fn enabled_embedder(_cache_dir: &Path) -> Arc<dyn Embedder> {
    tracing::warn!("EMBEDDINGS_ENABLED is set but the build lacks the `embeddings` feature");
    Arc::new(DisabledEmbedder)
}

/// Cosine similarity in [-1, 1]; 0 for mismatched lengths or zero vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_edges() {
        assert!((cosine(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn disabled_embedder_refuses() {
        let e = from_config(false, Path::new(".fastembed_cache"));
        assert_eq!(e.name(), "disabled");
        assert!(matches!(e.embed("text").await, Err(EmbedError::Disabled)));
    }

    #[cfg(feature = "embeddings")]
    #[tokio::test]
    #[ignore = "downloads model weights"]
    async fn minilm_ranks_related_text_higher() {
        let e = FastEmbedder::new(".fastembed_cache");
        let base = e.embed("central bank raises interest rates to fight inflation").await.unwrap();
        let near = e
            .embed("the central bank raised interest rates again as inflation persists")
            .await
            .unwrap();
        let far = e.embed("local team wins the championship after dramatic overtime").await.unwrap();
        assert_eq!(base.len(), EMBEDDING_DIM);
        assert!(cosine(&base, &near) > cosine(&base, &far));
    }
}

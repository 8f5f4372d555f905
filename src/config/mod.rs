// src/config/mod.rs
//! Process configuration from the environment (after `.env` is loaded).

pub mod ai;
pub mod scoring;

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::bail;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Mongo,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "memory" | "mem" => Ok(StoreBackend::Memory),
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            other => bail!("unknown STORE_BACKEND '{other}' (expected memory|mongo)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ai_config_path: PathBuf,
    pub scoring_config_path: PathBuf,
    pub store_backend: StoreBackend,
    pub mongodb_uri: Option<String>,
    pub mongodb_db: String,
    pub memory_store_cap: usize,
    pub metrics_enabled: bool,
    pub feed_capacity: usize,
    pub fetch_timeout_secs: u64,
    pub embeddings_enabled: bool,
    pub embedding_cache_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ai_config_path: PathBuf::from(ai::DEFAULT_AI_CONFIG_PATH),
            scoring_config_path: PathBuf::from(scoring::DEFAULT_SCORING_CONFIG_PATH),
            store_backend: StoreBackend::Memory,
            mongodb_uri: None,
            mongodb_db: "truthguard".to_string(),
            memory_store_cap: 10_000,
            metrics_enabled: true,
            feed_capacity: 256,
            fetch_timeout_secs: 15,
            embeddings_enabled: true,
            embedding_cache_dir: PathBuf::from(".fastembed_cache"),
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {name}='{raw}': {e}")),
        None => Ok(default),
    }
}

fn flag(name: &str, default: bool) -> bool {
    match var(name) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let d = Self::default();
        let cfg = Self {
            ai_config_path: var("AI_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.ai_config_path),
            scoring_config_path: var("SCORING_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.scoring_config_path),
            store_backend: parse_var("STORE_BACKEND", d.store_backend)?,
            mongodb_uri: var("MONGODB_URI"),
            mongodb_db: var("MONGODB_DB").unwrap_or(d.mongodb_db),
            memory_store_cap: parse_var("MEMORY_STORE_CAP", d.memory_store_cap)?,
            metrics_enabled: flag("METRICS_ENABLED", d.metrics_enabled),
            feed_capacity: parse_var("FEED_CAPACITY", d.feed_capacity)?,
            fetch_timeout_secs: parse_var("FETCH_TIMEOUT_SECS", d.fetch_timeout_secs)?,
            embeddings_enabled: flag("EMBEDDINGS_ENABLED", d.embeddings_enabled),
            embedding_cache_dir: var("EMBEDDING_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.embedding_cache_dir),
        };
        if cfg.store_backend == StoreBackend::Mongo && cfg.mongodb_uri.is_none() {
            bail!("STORE_BACKEND=mongo requires MONGODB_URI");
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 8] = [
        "STORE_BACKEND",
        "MONGODB_URI",
        "MEMORY_STORE_CAP",
        "METRICS_ENABLED",
        "FEED_CAPACITY",
        "AI_CONFIG_PATH",
        "EMBEDDINGS_ENABLED",
        "EMBEDDING_CACHE_DIR",
    ];

    #[test]
    #[serial]
    fn defaults_without_env() {
        for v in VARS {
            env::remove_var(v);
        }
        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.store_backend, StoreBackend::Memory);
        assert_eq!(cfg.memory_store_cap, 10_000);
        assert!(cfg.metrics_enabled);
        assert_eq!(cfg.feed_capacity, 256);
        assert_eq!(cfg.ai_config_path, PathBuf::from("config/ai.json"));
        assert!(cfg.embeddings_enabled);
        assert_eq!(cfg.embedding_cache_dir, PathBuf::from(".fastembed_cache"));
    }

    #[test]
    #[serial]
    fn embeddings_can_be_switched_off() {
        for v in VARS {
            env::remove_var(v);
        }
        env::set_var("EMBEDDINGS_ENABLED", "0");
        env::set_var("EMBEDDING_CACHE_DIR", "/var/cache/models");
        let cfg = AppConfig::from_env().unwrap();
        assert!(!cfg.embeddings_enabled);
        assert_eq!(cfg.embedding_cache_dir, PathBuf::from("/var/cache/models"));
        for v in VARS {
            env::remove_var(v);
        }
    }

    #[test]
    #[serial]
    fn mongo_requires_uri_and_bad_numbers_fail() {
        for v in VARS {
            env::remove_var(v);
        }
        env::set_var("STORE_BACKEND", "mongo");
        assert!(AppConfig::from_env().is_err());
        env::set_var("STORE_BACKEND", "memory");
        env::set_var("MEMORY_STORE_CAP", "lots");
        assert!(AppConfig::from_env().is_err());
        for v in VARS {
            env::remove_var(v);
        }
    }
}

// src/config/scoring.rs
//! Tunables for the heuristic scorer, loaded from `config/scoring.toml`.
//!
//! ```toml
//! k_bias = 10.0
//! k_misinfo = 4.0
//! length_unit_words = 100.0
//! max_scan_chars = 20000
//! fallback_confidence = 0.3
//! credibility_floor = 0.3
//! ```
//!
//! The constants are empirical; tests only assert the direction of each rule.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

pub const DEFAULT_SCORING_CONFIG_PATH: &str = "config/scoring.toml";

/// Confidence at or above which a record is treated as AI-grade.
/// Heuristic confidence is always kept below it.
pub const AI_TRUSTED_CONFIDENCE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Bias hits that saturate the bias score.
    pub k_bias: f32,
    /// Red-flag hits that saturate the misinformation risk.
    pub k_misinfo: f32,
    /// Sentiment is normalized per this many words (floor of one unit).
    pub length_unit_words: f32,
    pub max_scan_chars: usize,
    pub fallback_confidence: f32,
    pub credibility_floor: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            k_bias: 10.0,
            k_misinfo: 4.0,
            length_unit_words: 100.0,
            max_scan_chars: 20_000,
            fallback_confidence: 0.3,
            credibility_floor: 0.3,
        }
    }
}

impl ScoringConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading scoring config from {}", path.display()))?;
        let cfg: ScoringConfig = toml::from_str(&data)
            .with_context(|| format!("parsing scoring config {}", path.display()))?;
        Ok(cfg.sanitized())
    }

    /// Load from `path` if it exists; otherwise defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Replace unusable values with defaults.
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        if !(self.k_bias.is_finite() && self.k_bias > 0.0) {
            self.k_bias = d.k_bias;
        }
        if !(self.k_misinfo.is_finite() && self.k_misinfo > 0.0) {
            self.k_misinfo = d.k_misinfo;
        }
        if !(self.length_unit_words.is_finite() && self.length_unit_words > 0.0) {
            self.length_unit_words = d.length_unit_words;
        }
        if self.max_scan_chars == 0 {
            self.max_scan_chars = d.max_scan_chars;
        }
        if !(0.0..AI_TRUSTED_CONFIDENCE).contains(&self.fallback_confidence) {
            self.fallback_confidence = d.fallback_confidence;
        }
        if !(0.0..=1.0).contains(&self.credibility_floor) {
            self.credibility_floor = d.credibility_floor;
        }
        self
    }
}

//! AnalysisRecord: the per-article bias / misinformation / sentiment / narrative /
//! credibility result, shared by the AI path and the heuristic fallback.
//!
//! Ranges: every score is in [0,1] except `overall_sentiment` which is in [-1,1].
//! `clamped()` enforces that for records whose numbers came from outside.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which path produced a record. Always serialized; consumers rely on it to tell
/// AI-derived results from heuristic ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingModel {
    PrimaryAi,
    FallbackHeuristic,
}

impl ProcessingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingModel::PrimaryAi => "primary-ai",
            ProcessingModel::FallbackHeuristic => "fallback-heuristic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PoliticalLeaning {
    FarLeft,
    Left,
    CenterLeft,
    #[default]
    Center,
    CenterRight,
    Right,
    FarRight,
}

impl PoliticalLeaning {
    /// Wire label, same as the serde form.
    pub fn as_str(&self) -> &'static str {
        match self {
            PoliticalLeaning::FarLeft => "far-left",
            PoliticalLeaning::Left => "left",
            PoliticalLeaning::CenterLeft => "center-left",
            PoliticalLeaning::Center => "center",
            PoliticalLeaning::CenterRight => "center-right",
            PoliticalLeaning::Right => "right",
            PoliticalLeaning::FarRight => "far-right",
        }
    }

    /// Lenient parse for model output ("Center Left", "center_left", "CENTER-LEFT").
    /// Anything unrecognized maps to `Center`.
    pub fn parse_lenient(raw: &str) -> Self {
        match normalize_label(raw).as_str() {
            "far-left" => PoliticalLeaning::FarLeft,
            "left" | "liberal" | "progressive" => PoliticalLeaning::Left,
            "center-left" | "centre-left" | "lean-left" => PoliticalLeaning::CenterLeft,
            "center-right" | "centre-right" | "lean-right" => PoliticalLeaning::CenterRight,
            "right" | "conservative" => PoliticalLeaning::Right,
            "far-right" => PoliticalLeaning::FarRight,
            _ => PoliticalLeaning::Center,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmotionalTone {
    #[default]
    Neutral,
    Positive,
    Negative,
    Mixed,
    Alarmist,
    Angry,
    Fearful,
    Hopeful,
}

impl EmotionalTone {
    pub fn parse_lenient(raw: &str) -> Self {
        match normalize_label(raw).as_str() {
            "positive" | "optimistic" | "joyful" | "celebratory" => EmotionalTone::Positive,
            "negative" | "pessimistic" | "critical" | "somber" => EmotionalTone::Negative,
            "mixed" | "ambivalent" | "balanced" => EmotionalTone::Mixed,
            "alarmist" | "sensational" | "sensationalist" | "urgent" => EmotionalTone::Alarmist,
            "angry" | "outraged" | "hostile" => EmotionalTone::Angry,
            "fearful" | "anxious" | "concerned" | "worried" => EmotionalTone::Fearful,
            "hopeful" | "inspiring" => EmotionalTone::Hopeful,
            _ => EmotionalTone::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FactVerdict {
    True,
    False,
    Misleading,
    #[default]
    Unverified,
    PartiallyTrue,
}

impl FactVerdict {
    pub fn parse_lenient(raw: &str) -> Self {
        match normalize_label(raw).as_str() {
            "true" | "accurate" | "correct" => FactVerdict::True,
            "false" | "inaccurate" | "incorrect" => FactVerdict::False,
            "misleading" => FactVerdict::Misleading,
            "partially-true" | "partly-true" | "mostly-true" | "half-true" => {
                FactVerdict::PartiallyTrue
            }
            _ => FactVerdict::Unverified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BiasAnalysis {
    pub overall_score: f32,
    pub political_leaning: PoliticalLeaning,
    pub language_bias: f32,
    pub source_bias: f32,
    pub framing_bias: f32,
    pub selection_bias: f32,
    pub confirmation_bias: f32,
    pub indicators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FactCheck {
    pub claim: String,
    pub verdict: FactVerdict,
    pub confidence: f32,
    pub explanation: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MisinformationAnalysis {
    pub risk_score: f32,
    pub fact_checks: Vec<FactCheck>,
    pub red_flags: Vec<String>,
    pub evidence_quality: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SentimentAnalysis {
    pub overall_sentiment: f32,
    pub emotional_tone: EmotionalTone,
    pub emotional_manipulation: f32,
    pub subjectivity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeAnalysis {
    pub primary_frame: String,
    pub secondary_frames: BTreeSet<String>,
    pub perspective_diversity: f32,
}

impl Default for NarrativeAnalysis {
    fn default() -> Self {
        Self {
            primary_frame: GENERAL_FRAME.to_string(),
            secondary_frames: BTreeSet::new(),
            perspective_diversity: 0.0,
        }
    }
}

/// Frame name used when no framing signal is present.
pub const GENERAL_FRAME: &str = "general";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CredibilityAssessment {
    pub overall_score: f32,
    pub evidence_quality: f32,
    pub source_reliability: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub bias: BiasAnalysis,
    pub misinformation: MisinformationAnalysis,
    pub sentiment: SentimentAnalysis,
    pub narrative: NarrativeAnalysis,
    pub credibility: CredibilityAssessment,
    pub confidence: f32,
    pub processing_model: ProcessingModel,
}

impl AnalysisRecord {
    /// Neutral record for the given provenance: zero scores, center, neutral, general.
    pub fn neutral(processing_model: ProcessingModel) -> Self {
        Self {
            bias: BiasAnalysis::default(),
            misinformation: MisinformationAnalysis::default(),
            sentiment: SentimentAnalysis::default(),
            narrative: NarrativeAnalysis::default(),
            credibility: CredibilityAssessment::default(),
            confidence: 0.0,
            processing_model,
        }
    }

    /// Force every bounded field into its declared range. NaN and infinities become 0.
    pub fn clamped(mut self) -> Self {
        let b = &mut self.bias;
        for v in [
            &mut b.overall_score,
            &mut b.language_bias,
            &mut b.source_bias,
            &mut b.framing_bias,
            &mut b.selection_bias,
            &mut b.confirmation_bias,
        ] {
            *v = unit(*v);
        }

        let m = &mut self.misinformation;
        m.risk_score = unit(m.risk_score);
        m.evidence_quality = unit(m.evidence_quality);
        for fc in m.fact_checks.iter_mut() {
            fc.confidence = unit(fc.confidence);
        }

        let s = &mut self.sentiment;
        s.overall_sentiment = signed_unit(s.overall_sentiment);
        s.emotional_manipulation = unit(s.emotional_manipulation);
        s.subjectivity = unit(s.subjectivity);

        self.narrative.perspective_diversity = unit(self.narrative.perspective_diversity);

        let c = &mut self.credibility;
        c.overall_score = unit(c.overall_score);
        c.evidence_quality = unit(c.evidence_quality);
        c.source_reliability = unit(c.source_reliability);

        self.confidence = unit(self.confidence);
        self
    }

    /// True when every bounded field lies in its declared range.
    pub fn in_bounds(&self) -> bool {
        let u = |v: f32| (0.0..=1.0).contains(&v);
        let b = &self.bias;
        let m = &self.misinformation;
        let s = &self.sentiment;
        let c = &self.credibility;
        u(b.overall_score)
            && u(b.language_bias)
            && u(b.source_bias)
            && u(b.framing_bias)
            && u(b.selection_bias)
            && u(b.confirmation_bias)
            && u(m.risk_score)
            && u(m.evidence_quality)
            && m.fact_checks.iter().all(|fc| u(fc.confidence))
            && (-1.0..=1.0).contains(&s.overall_sentiment)
            && u(s.emotional_manipulation)
            && u(s.subjectivity)
            && u(self.narrative.perspective_diversity)
            && u(c.overall_score)
            && u(c.evidence_quality)
            && u(c.source_reliability)
            && u(self.confidence)
    }
}

fn unit(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn signed_unit(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Lowercase, trim, and turn spaces/underscores into hyphens.
fn normalize_label(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

//! Heuristic scorer: network-free keyword counting used when the AI path is
//! unavailable or returns unusable output.
//!
//! Total and deterministic: any input (including empty) yields a structurally
//! valid record with every score already in range.

use std::collections::BTreeSet;

use crate::analyze::lexicon::{self, count_phrases};
use crate::analyze::record::{
    AnalysisRecord, BiasAnalysis, CredibilityAssessment, EmotionalTone, MisinformationAnalysis,
    NarrativeAnalysis, PoliticalLeaning, ProcessingModel, SentimentAnalysis, GENERAL_FRAME,
};
use crate::analyze::topic::{self, Topic};
use crate::config::scoring::ScoringConfig;

/// Hits that saturate emotional manipulation / subjectivity.
const K_EMOTIVE: f32 = 5.0;
const K_SUBJECTIVE: f32 = 5.0;
/// |sentiment| below this reads as neutral (or mixed when both polarities hit).
const TONE_DEADBAND: f32 = 0.1;

/// Score `content` without any network access.
pub fn score(content: &str, cfg: &ScoringConfig) -> AnalysisRecord {
    score_with_topic(content, cfg).0
}

/// Score and classify in one scan.
pub fn score_with_topic(content: &str, cfg: &ScoringConfig) -> (AnalysisRecord, Topic) {
    let cfg = cfg.sanitized();
    let text = scan_prefix(content, cfg.max_scan_chars).to_lowercase();
    let word_count = text.split_whitespace().count();
    let lx = lexicon::lexicon();

    // Bias
    let left = count_phrases(&text, &lx.bias_left);
    let right = count_phrases(&text, &lx.bias_right);
    let bias_score = ratio(left.total + right.total, cfg.k_bias);
    let mut indicators = left.matched.clone();
    indicators.extend(right.matched.iter().cloned());
    let bias = BiasAnalysis {
        overall_score: bias_score,
        political_leaning: leaning(left.total, right.total),
        language_bias: bias_score,
        source_bias: 0.0,
        framing_bias: bias_score * 0.8,
        selection_bias: 0.0,
        confirmation_bias: 0.0,
        indicators,
    };

    // Sentiment
    let pos = count_phrases(&text, &lx.positive).total;
    let neg = count_phrases(&text, &lx.negative).total;
    let length_units = (word_count as f32 / cfg.length_unit_words).max(1.0);
    let overall_sentiment = ((pos as f32 - neg as f32) / length_units).clamp(-1.0, 1.0);
    let emotive = count_phrases(&text, &lx.emotive).total;
    let subjective = count_phrases(&text, &lx.subjective).total;
    let emotional_manipulation = ratio(emotive, K_EMOTIVE);
    let sentiment = SentimentAnalysis {
        overall_sentiment,
        emotional_tone: tone(overall_sentiment, emotional_manipulation, pos, neg),
        emotional_manipulation,
        subjectivity: ratio(subjective, K_SUBJECTIVE),
    };

    // Misinformation
    let flags = count_phrases(&text, &lx.red_flags);
    let risk_score = ratio(flags.total, cfg.k_misinfo);
    let misinformation = MisinformationAnalysis {
        risk_score,
        fact_checks: Vec::new(),
        red_flags: flags.matched,
        evidence_quality: 0.0,
    };

    // Narrative
    let narrative = narrative(&text, left.total, right.total);

    // Credibility
    let credibility = CredibilityAssessment {
        overall_score: (1.0 - (bias_score + risk_score) / 2.0)
            .max(cfg.credibility_floor)
            .clamp(0.0, 1.0),
        evidence_quality: 0.0,
        source_reliability: 0.0,
    };

    let record = AnalysisRecord {
        bias,
        misinformation,
        sentiment,
        narrative,
        credibility,
        confidence: cfg.fallback_confidence,
        processing_model: ProcessingModel::FallbackHeuristic,
    };
    (record, topic::classify_lowercased(&text))
}

/// Longest prefix of at most `max_chars` characters, cut on a char boundary.
fn scan_prefix(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn ratio(hits: usize, saturation: f32) -> f32 {
    (hits as f32 / saturation).min(1.0)
}

fn leaning(left: usize, right: usize) -> PoliticalLeaning {
    use std::cmp::Ordering::*;
    match left.cmp(&right) {
        Equal => PoliticalLeaning::Center,
        Greater if right == 0 => PoliticalLeaning::Left,
        Greater => PoliticalLeaning::CenterLeft,
        Less if left == 0 => PoliticalLeaning::Right,
        Less => PoliticalLeaning::CenterRight,
    }
}

fn tone(sentiment: f32, manipulation: f32, pos: usize, neg: usize) -> EmotionalTone {
    if manipulation >= 0.5 {
        EmotionalTone::Alarmist
    } else if sentiment > TONE_DEADBAND {
        EmotionalTone::Positive
    } else if sentiment < -TONE_DEADBAND {
        EmotionalTone::Negative
    } else if pos > 0 && neg > 0 {
        EmotionalTone::Mixed
    } else {
        EmotionalTone::Neutral
    }
}

fn narrative(text: &str, left: usize, right: usize) -> NarrativeAnalysis {
    let frames = &lexicon::lexicon().frames;
    let counts: Vec<(&str, usize)> = frames
        .iter()
        .map(|f| (f.frame.as_str(), count_phrases(text, &f.keywords).total))
        .collect();

    let mut primary: Option<(&str, usize)> = None;
    for &(name, n) in &counts {
        if n > 0 && primary.map_or(true, |(_, best)| n > best) {
            primary = Some((name, n));
        }
    }
    let primary_frame = primary.map(|(name, _)| name).unwrap_or(GENERAL_FRAME);
    let secondary_frames: BTreeSet<String> = counts
        .iter()
        .filter(|(name, n)| *n > 0 && *name != primary_frame)
        .map(|(name, _)| name.to_string())
        .collect();

    // Balance of opposing viewpoints and breadth of framing, equally weighted.
    let balance = if left > 0 && right > 0 {
        left.min(right) as f32 / left.max(right) as f32
    } else {
        0.0
    };
    let present = counts.iter().filter(|(_, n)| *n > 0).count();
    let coverage = if frames.is_empty() {
        0.0
    } else {
        present as f32 / frames.len() as f32
    };

    NarrativeAnalysis {
        primary_frame: primary_frame.to_string(),
        secondary_frames,
        perspective_diversity: (0.5 * balance + 0.5 * coverage).clamp(0.0, 1.0),
    }
}

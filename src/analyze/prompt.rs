//! Fixed-structure analysis prompt.

use crate::analyze::topic::Topic;

const SYSTEM_PREAMBLE: &str = "You are TruthGuard, an expert media bias and misinformation \
detection system. Analyze the article below and reply with JSON only, no prose and no markdown.";

const SCHEMA_HINT: &str = r#"{
  "bias_analysis": {
    "overall_score": 0.0-1.0,
    "political_leaning": "far-left|left|center-left|center|center-right|right|far-right",
    "language_bias": 0.0-1.0,
    "source_bias": 0.0-1.0,
    "framing_bias": 0.0-1.0,
    "selection_bias": 0.0-1.0,
    "confirmation_bias": 0.0-1.0,
    "indicators": ["specific phrases or techniques"]
  },
  "misinformation_analysis": {
    "risk_score": 0.0-1.0,
    "fact_checks": [
      {"claim": "...", "verdict": "true|false|misleading|unverified|partially-true",
       "confidence": 0.0-1.0, "explanation": "...", "sources": ["..."]}
    ],
    "red_flags": ["..."],
    "evidence_quality": 0.0-1.0
  },
  "sentiment_analysis": {
    "overall_sentiment": -1.0-1.0,
    "emotional_tone": "neutral|positive|negative|mixed|alarmist|angry|fearful|hopeful",
    "emotional_manipulation": 0.0-1.0,
    "subjectivity": 0.0-1.0
  },
  "narrative_analysis": {
    "primary_frame": "...",
    "secondary_frames": ["..."],
    "perspective_diversity": 0.0-1.0
  },
  "credibility_assessment": {
    "overall_score": 0.0-1.0,
    "evidence_quality": 0.0-1.0,
    "source_reliability": 0.0-1.0
  },
  "topic": "TOPICS",
  "confidence": 0.0-1.0
}"#;

/// Build the user prompt. `content` is cut to `max_chars` characters.
pub fn build_prompt(
    content: &str,
    title: Option<&str>,
    source: Option<&str>,
    max_chars: usize,
) -> String {
    let topics = Topic::ALL
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join("|");
    let schema = SCHEMA_HINT.replace("TOPICS", &topics);

    format!(
        "{SYSTEM_PREAMBLE}\n\nTitle: {}\nSource: {}\nContent: {}\n\nRespond with this exact JSON structure:\n{schema}\n",
        title.unwrap_or("Unknown"),
        source.unwrap_or("Unknown"),
        truncate_chars(content, max_chars),
    )
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

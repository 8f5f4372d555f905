//! Typed decoding of the model's JSON reply.
//!
//! Two failure classes are kept apart so the caller can report them:
//! the text is not JSON at all, or it is JSON of the wrong shape.
//! Both send the request down the heuristic path.
//!
//! Required sections: `bias_analysis`, `misinformation_analysis`,
//! `sentiment_analysis`, `credibility_assessment`. Inside a section every
//! field is optional: missing or `null`, numbers default to 0 and labels to
//! their neutral value.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::analyze::record::{
    AnalysisRecord, BiasAnalysis, CredibilityAssessment, EmotionalTone, FactCheck, FactVerdict,
    MisinformationAnalysis, NarrativeAnalysis, PoliticalLeaning, ProcessingModel,
    SentimentAnalysis, GENERAL_FRAME,
};
use crate::analyze::topic::Topic;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("model reply is not JSON: {0}")]
    NotJson(#[source] serde_json::Error),
    #[error("model reply does not match the analysis schema: {0}")]
    Shape(#[source] serde_json::Error),
}

/// `null` reads the same as an absent field.
fn nullable<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Option::unwrap_or_default)
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiPayload {
    pub bias_analysis: BiasSection,
    pub misinformation_analysis: MisinformationSection,
    pub sentiment_analysis: SentimentSection,
    pub credibility_assessment: CredibilitySection,
    #[serde(default)]
    pub narrative_analysis: Option<NarrativeSection>,
    #[serde(default, deserialize_with = "nullable")]
    pub confidence: f32,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BiasSection {
    #[serde(deserialize_with = "nullable")]
    pub overall_score: f32,
    #[serde(deserialize_with = "nullable")]
    pub political_leaning: String,
    #[serde(deserialize_with = "nullable")]
    pub language_bias: f32,
    #[serde(deserialize_with = "nullable")]
    pub source_bias: f32,
    #[serde(deserialize_with = "nullable")]
    pub framing_bias: f32,
    #[serde(deserialize_with = "nullable")]
    pub selection_bias: f32,
    #[serde(deserialize_with = "nullable")]
    pub confirmation_bias: f32,
    #[serde(alias = "bias_indicators", deserialize_with = "nullable")]
    pub indicators: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FactCheckEntry {
    #[serde(deserialize_with = "nullable")]
    pub claim: String,
    #[serde(deserialize_with = "nullable")]
    pub verdict: String,
    #[serde(deserialize_with = "nullable")]
    pub confidence: f32,
    #[serde(deserialize_with = "nullable")]
    pub explanation: String,
    #[serde(deserialize_with = "nullable")]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MisinformationSection {
    #[serde(deserialize_with = "nullable")]
    pub risk_score: f32,
    #[serde(deserialize_with = "nullable")]
    pub fact_checks: Vec<FactCheckEntry>,
    #[serde(deserialize_with = "nullable")]
    pub red_flags: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub evidence_quality: f32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SentimentSection {
    #[serde(deserialize_with = "nullable")]
    pub overall_sentiment: f32,
    #[serde(deserialize_with = "nullable")]
    pub emotional_tone: String,
    #[serde(deserialize_with = "nullable")]
    pub emotional_manipulation: f32,
    #[serde(deserialize_with = "nullable")]
    pub subjectivity: f32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NarrativeSection {
    #[serde(deserialize_with = "nullable")]
    pub primary_frame: String,
    #[serde(deserialize_with = "nullable")]
    pub secondary_frames: Vec<String>,
    #[serde(deserialize_with = "nullable")]
    pub perspective_diversity: f32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredibilitySection {
    #[serde(deserialize_with = "nullable")]
    pub overall_score: f32,
    #[serde(deserialize_with = "nullable")]
    pub evidence_quality: f32,
    #[serde(deserialize_with = "nullable")]
    pub source_reliability: f32,
}

/// Models like to wrap JSON in a markdown fence; drop it.
pub fn strip_code_fence(raw: &str) -> &str {
    let t = raw.trim();
    let Some(rest) = t.strip_prefix("```") else {
        return t;
    };
    let body = rest.strip_suffix("```").unwrap_or(rest);
    // info string ("json"), on its own line or not
    body.trim_start_matches(|c: char| c.is_ascii_alphanumeric()).trim()
}

pub fn decode(raw: &str) -> Result<AiPayload, SchemaError> {
    let value: serde_json::Value =
        serde_json::from_str(strip_code_fence(raw)).map_err(SchemaError::NotJson)?;
    serde_json::from_value(value).map_err(SchemaError::Shape)
}

impl AiPayload {
    /// Map onto the shared record (clamped, tagged `primary-ai`) plus the topic,
    /// when the model named one from the closed set.
    pub fn into_record(self) -> (AnalysisRecord, Option<Topic>) {
        let b = self.bias_analysis;
        let m = self.misinformation_analysis;
        let s = self.sentiment_analysis;
        let c = self.credibility_assessment;

        let narrative = match self.narrative_analysis {
            Some(n) => {
                let primary = n.primary_frame.trim().to_lowercase();
                NarrativeAnalysis {
                    primary_frame: if primary.is_empty() {
                        GENERAL_FRAME.to_string()
                    } else {
                        primary
                    },
                    secondary_frames: n
                        .secondary_frames
                        .into_iter()
                        .map(|f| f.trim().to_lowercase())
                        .filter(|f| !f.is_empty())
                        .collect::<BTreeSet<_>>(),
                    perspective_diversity: n.perspective_diversity,
                }
            }
            None => NarrativeAnalysis::default(),
        };

        let record = AnalysisRecord {
            bias: BiasAnalysis {
                overall_score: b.overall_score,
                political_leaning: PoliticalLeaning::parse_lenient(&b.political_leaning),
                language_bias: b.language_bias,
                source_bias: b.source_bias,
                framing_bias: b.framing_bias,
                selection_bias: b.selection_bias,
                confirmation_bias: b.confirmation_bias,
                indicators: b.indicators,
            },
            misinformation: MisinformationAnalysis {
                risk_score: m.risk_score,
                fact_checks: m
                    .fact_checks
                    .into_iter()
                    .map(|fc| FactCheck {
                        claim: fc.claim,
                        verdict: FactVerdict::parse_lenient(&fc.verdict),
                        confidence: fc.confidence,
                        explanation: fc.explanation,
                        sources: fc.sources,
                    })
                    .collect(),
                red_flags: m.red_flags,
                evidence_quality: m.evidence_quality,
            },
            sentiment: SentimentAnalysis {
                overall_sentiment: s.overall_sentiment,
                emotional_tone: EmotionalTone::parse_lenient(&s.emotional_tone),
                emotional_manipulation: s.emotional_manipulation,
                subjectivity: s.subjectivity,
            },
            narrative,
            credibility: CredibilityAssessment {
                overall_score: c.overall_score,
                evidence_quality: c.evidence_quality,
                source_reliability: c.source_reliability,
            },
            confidence: self.confidence,
            processing_model: ProcessingModel::PrimaryAi,
        }
        .clamped();

        let topic = self.topic.as_deref().and_then(|t| t.parse::<Topic>().ok());
        (record, topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "bias_analysis": {"overall_score": 1.4, "political_leaning": "Center Right",
                          "bias_indicators": ["loaded adjectives"]},
        "misinformation_analysis": {"risk_score": 0.2,
            "fact_checks": [{"claim": "c", "verdict": "Partially True", "confidence": 0.9}],
            "red_flags": []},
        "sentiment_analysis": {"overall_sentiment": -2.0, "emotional_tone": "anxious"},
        "credibility_assessment": {"overall_score": 0.8},
        "confidence": 0.85,
        "topic": "Economy"
    }"#;

    #[test]
    fn full_payload_maps_and_clamps() {
        let (r, topic) = decode(FULL).unwrap().into_record();
        assert_eq!(r.processing_model, ProcessingModel::PrimaryAi);
        assert_eq!(r.bias.overall_score, 1.0);
        assert_eq!(r.bias.political_leaning, PoliticalLeaning::CenterRight);
        assert_eq!(r.bias.indicators, vec!["loaded adjectives"]);
        assert_eq!(r.sentiment.overall_sentiment, -1.0);
        assert_eq!(r.sentiment.emotional_tone, EmotionalTone::Fearful);
        assert_eq!(
            r.misinformation.fact_checks[0].verdict,
            FactVerdict::PartiallyTrue
        );
        assert_eq!(r.narrative.primary_frame, GENERAL_FRAME);
        assert_eq!(topic, Some(Topic::Economy));
        assert!(r.in_bounds());
    }

    #[test]
    fn non_json_is_reported_as_such() {
        assert!(matches!(
            decode("I'm sorry, I can't do that."),
            Err(SchemaError::NotJson(_))
        ));
    }

    #[test]
    fn missing_section_is_a_shape_error() {
        let raw = r#"{"bias_analysis": {}, "sentiment_analysis": {}, "credibility_assessment": {}}"#;
        assert!(matches!(decode(raw), Err(SchemaError::Shape(_))));
    }

    #[test]
    fn wrong_type_is_a_shape_error() {
        let raw = r#"{"bias_analysis": {"overall_score": "very"},
            "misinformation_analysis": {}, "sentiment_analysis": {},
            "credibility_assessment": {}}"#;
        assert!(matches!(decode(raw), Err(SchemaError::Shape(_))));
    }

    #[test]
    fn fenced_reply_is_accepted() {
        let fenced = format!("```json\n{FULL}\n```");
        assert!(decode(&fenced).is_ok());
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {} "), "{}");
    }

    #[test]
    fn single_line_fence_is_accepted() {
        let raw = r#"```json {"bias_analysis": {}, "misinformation_analysis": {},
            "sentiment_analysis": {}, "credibility_assessment": {}} ```"#;
        assert!(decode(raw).is_ok());
        assert_eq!(strip_code_fence("```{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn null_fields_read_as_missing() {
        let raw = r#"{
            "bias_analysis": {"overall_score": 0.2, "source_bias": null,
                              "political_leaning": null, "indicators": null},
            "misinformation_analysis": {"risk_score": null, "red_flags": null,
                "fact_checks": [{"claim": "c", "verdict": null, "confidence": null}]},
            "sentiment_analysis": {"overall_sentiment": null, "emotional_tone": null},
            "credibility_assessment": {"overall_score": 0.7, "evidence_quality": null},
            "narrative_analysis": null,
            "confidence": null,
            "topic": null
        }"#;
        let (r, topic) = decode(raw).unwrap().into_record();
        assert_eq!(r.bias.overall_score, 0.2);
        assert_eq!(r.bias.source_bias, 0.0);
        assert_eq!(r.bias.political_leaning, PoliticalLeaning::Center);
        assert!(r.bias.indicators.is_empty());
        assert_eq!(r.misinformation.risk_score, 0.0);
        assert_eq!(r.misinformation.fact_checks[0].verdict, FactVerdict::Unverified);
        assert_eq!(r.sentiment.emotional_tone, EmotionalTone::Neutral);
        assert_eq!(r.credibility.overall_score, 0.7);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(topic, None);
    }

    #[test]
    fn unknown_topic_is_dropped() {
        let raw = r#"{"bias_analysis": {}, "misinformation_analysis": {},
            "sentiment_analysis": {}, "credibility_assessment": {}, "topic": "weather"}"#;
        let (r, topic) = decode(raw).unwrap().into_record();
        assert_eq!(topic, None);
        assert_eq!(r.bias.political_leaning, PoliticalLeaning::Center);
        assert_eq!(r.confidence, 0.0);
    }
}

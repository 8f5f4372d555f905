//! Advisory flags derived from a finished record. Pure projection: no new analysis.

use serde::{Deserialize, Serialize};

use crate::analyze::record::AnalysisRecord;

pub const HIGH_BIAS_THRESHOLD: f32 = 0.7;
pub const HIGH_MISINFO_THRESHOLD: f32 = 0.6;
pub const LOW_CREDIBILITY_THRESHOLD: f32 = 0.4;
pub const LOW_DIVERSITY_THRESHOLD: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    BiasWarning,
    MisinformationAlert,
    CredibilityConcern,
    PerspectiveLimitation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub severity: Severity,
    pub message: String,
}

/// Every rule is checked independently; output keeps rule order.
pub fn generate(record: &AnalysisRecord) -> Vec<Insight> {
    let mut out = Vec::new();

    if record.bias.overall_score > HIGH_BIAS_THRESHOLD {
        out.push(Insight {
            kind: InsightKind::BiasWarning,
            severity: Severity::High,
            message: format!(
                "High bias detected (score {:.2}, leaning {}).",
                record.bias.overall_score,
                record.bias.political_leaning.as_str()
            ),
        });
    }
    if record.misinformation.risk_score > HIGH_MISINFO_THRESHOLD {
        out.push(Insight {
            kind: InsightKind::MisinformationAlert,
            severity: Severity::High,
            message: format!(
                "Elevated misinformation risk ({:.2}); verify claims against primary sources.",
                record.misinformation.risk_score
            ),
        });
    }
    if record.credibility.overall_score < LOW_CREDIBILITY_THRESHOLD {
        out.push(Insight {
            kind: InsightKind::CredibilityConcern,
            severity: Severity::Medium,
            message: format!(
                "Low credibility score ({:.2}).",
                record.credibility.overall_score
            ),
        });
    }
    if record.narrative.perspective_diversity < LOW_DIVERSITY_THRESHOLD {
        out.push(Insight {
            kind: InsightKind::PerspectiveLimitation,
            severity: Severity::Medium,
            message: "Limited range of perspectives presented.".to_string(),
        });
    }

    out
}

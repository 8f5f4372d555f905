//! System-wide analytics over the stored corpus.
//!
//! Computed where the data lives: the memory store folds over borrowed
//! articles, the Mongo store runs an aggregation pipeline.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::analyze::record::ProcessingModel;
use crate::store::{ProcessingStatus, StoredArticle};

pub const TOP_SOURCES: usize = 20;
const MAX_ANALYTICS_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct AnalyticsParams {
    pub days: u32,
}

impl Default for AnalyticsParams {
    fn default() -> Self {
        Self { days: 7 }
    }
}

impl AnalyticsParams {
    /// Start of the per-day window.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.days.clamp(1, MAX_ANALYTICS_DAYS)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceCount {
    pub source: String,
    pub articles: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Averages {
    pub bias: f32,
    pub misinformation_risk: f32,
    pub credibility: f32,
    pub sentiment: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RiskDistribution {
    /// [0, 0.3)
    pub low: usize,
    /// [0.3, 0.7)
    pub medium: usize,
    /// [0.7, 1.0]
    pub high: usize,
}

impl RiskDistribution {
    pub fn add(&mut self, risk: f32) {
        match risk {
            x if x < 0.3 => self.low += 1,
            x if x < 0.7 => self.medium += 1,
            _ => self.high += 1,
        }
    }
}

/// Scores, provenance and risk cover analyzed articles only; totals, sources
/// and per-day counts cover everything stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsReport {
    pub total_articles: usize,
    pub analyzed_articles: usize,
    pub by_processing_status: BTreeMap<&'static str, usize>,
    pub by_processing_model: BTreeMap<&'static str, usize>,
    pub top_sources: Vec<SourceCount>,
    pub averages: Averages,
    pub risk_distribution: RiskDistribution,
    pub stored_per_day: BTreeMap<NaiveDate, usize>,
}

impl AnalyticsReport {
    /// Zero counts with every status and provenance label present.
    pub fn empty() -> Self {
        Self {
            total_articles: 0,
            analyzed_articles: 0,
            by_processing_status: ProcessingStatus::ALL
                .iter()
                .map(|s| (s.as_str(), 0))
                .collect(),
            by_processing_model: [ProcessingModel::PrimaryAi, ProcessingModel::FallbackHeuristic]
                .iter()
                .map(|m| (m.as_str(), 0))
                .collect(),
            top_sources: Vec::new(),
            averages: Averages::default(),
            risk_distribution: RiskDistribution::default(),
            stored_per_day: BTreeMap::new(),
        }
    }
}

/// Sort by count desc then name, keep the top entries.
pub fn top_sources(counts: impl IntoIterator<Item = (String, usize)>) -> Vec<SourceCount> {
    let mut out: Vec<SourceCount> = counts
        .into_iter()
        .map(|(source, articles)| SourceCount { source, articles })
        .collect();
    out.sort_by(|a, b| b.articles.cmp(&a.articles).then_with(|| a.source.cmp(&b.source)));
    out.truncate(TOP_SOURCES);
    out
}

pub fn compute<'a>(
    articles: impl IntoIterator<Item = &'a StoredArticle>,
    params: &AnalyticsParams,
    now: DateTime<Utc>,
) -> AnalyticsReport {
    let mut report = AnalyticsReport::empty();
    let mut sources: HashMap<&str, usize> = HashMap::new();
    let mut sums = Averages::default();
    let cutoff = params.cutoff(now);

    for a in articles {
        report.total_articles += 1;
        *report
            .by_processing_status
            .entry(a.processing_status.as_str())
            .or_insert(0) += 1;
        *sources.entry(a.source.as_str()).or_default() += 1;
        if a.timestamp >= cutoff {
            *report
                .stored_per_day
                .entry(a.timestamp.date_naive())
                .or_insert(0) += 1;
        }

        if !a.processing_status.is_analyzed() {
            continue;
        }
        let r = &a.analysis;
        report.analyzed_articles += 1;
        *report
            .by_processing_model
            .entry(r.processing_model.as_str())
            .or_insert(0) += 1;
        sums.bias += r.bias.overall_score;
        sums.misinformation_risk += r.misinformation.risk_score;
        sums.credibility += r.credibility.overall_score;
        sums.sentiment += r.sentiment.overall_sentiment;
        report.risk_distribution.add(r.misinformation.risk_score);
    }

    if report.analyzed_articles > 0 {
        let d = report.analyzed_articles as f32;
        report.averages = Averages {
            bias: sums.bias / d,
            misinformation_risk: sums.misinformation_risk / d,
            credibility: sums.credibility / d,
            sentiment: sums.sentiment / d,
        };
    }
    report.top_sources = top_sources(sources.into_iter().map(|(s, n)| (s.to_string(), n)));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::topic::Topic;
    use crate::store::tests::article;

    #[test]
    fn buckets_and_averages() {
        let mut arts = Vec::new();
        for (i, risk) in [0.0f32, 0.29, 0.3, 0.69, 0.7, 1.0].iter().enumerate() {
            let mut a = article(&format!("k{i}"), if i < 4 { "A" } else { "B" }, Topic::General, 0);
            a.analysis.misinformation.risk_score = *risk;
            a.analysis.credibility.overall_score = 0.5;
            if i == 0 {
                a.analysis.processing_model = ProcessingModel::PrimaryAi;
                a.processing_status = ProcessingStatus::Analyzed;
            }
            arts.push(a);
        }
        let mut old = article("old", "B", Topic::General, 24 * 40);
        old.analysis.credibility.overall_score = 0.5;
        arts.push(old);

        let r = compute(&arts, &AnalyticsParams::default(), Utc::now());
        assert_eq!(r.total_articles, 7);
        assert_eq!(r.analyzed_articles, 7);
        assert_eq!(r.risk_distribution, RiskDistribution { low: 3, medium: 2, high: 2 });
        assert_eq!(r.by_processing_model["primary-ai"], 1);
        assert_eq!(r.by_processing_model["fallback-heuristic"], 6);
        assert_eq!(r.by_processing_status["analyzed"], 1);
        assert_eq!(r.by_processing_status["analyzed_fallback"], 6);
        assert_eq!(r.top_sources[0], SourceCount { source: "A".into(), articles: 4 });
        assert!((r.averages.credibility - 0.5).abs() < 1e-6);
        // the 40-day-old article falls outside the per-day window
        assert_eq!(r.stored_per_day.values().sum::<usize>(), 6);
    }

    #[test]
    fn pending_articles_count_but_do_not_score() {
        let mut scored = article("a", "A", Topic::General, 0);
        scored.analysis.bias.overall_score = 0.8;
        let mut pending = article("p", "A", Topic::General, 0);
        pending.processing_status = ProcessingStatus::Pending;

        let r = compute([&scored, &pending], &AnalyticsParams::default(), Utc::now());
        assert_eq!(r.total_articles, 2);
        assert_eq!(r.analyzed_articles, 1);
        assert_eq!(r.by_processing_status["pending"], 1);
        assert!((r.averages.bias - 0.8).abs() < 1e-6);
        assert_eq!(r.risk_distribution.low, 1);
    }

    #[test]
    fn empty_corpus() {
        let r = compute(&[], &AnalyticsParams::default(), Utc::now());
        assert_eq!(r.total_articles, 0);
        assert_eq!(r.averages, Averages::default());
        assert_eq!(r.by_processing_model["primary-ai"], 0);
        assert_eq!(r.by_processing_status["failed_analysis"], 0);
    }
}

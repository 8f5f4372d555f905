//! Trend aggregation over recently stored articles.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::analyze::topic::Topic;
use crate::store::StoredArticle;

pub const DEFAULT_TREND_DAYS: u32 = 7;
pub const MAX_TREND_DAYS: u32 = 365;
const TOP_RED_FLAGS: usize = 10;
const TOP_BIASED_SOURCES: usize = 5;
const MAX_DAILY_POINTS: usize = 30;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TrendParams {
    pub days: u32,
    pub min_articles_source: usize,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            days: DEFAULT_TREND_DAYS,
            min_articles_source: 3,
        }
    }
}

impl TrendParams {
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.days.clamp(1, MAX_TREND_DAYS)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagCount {
    pub flag: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceBias {
    pub source: String,
    pub avg_bias: f32,
    pub articles: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub value: f32,
    pub articles: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub days: u32,
    pub articles: usize,
    pub top_red_flags: Vec<FlagCount>,
    pub high_bias_sources: Vec<SourceBias>,
    pub sentiment_by_day: Vec<DailyPoint>,
    pub misinformation_by_day: Vec<DailyPoint>,
    pub topics: BTreeMap<Topic, usize>,
}

/// `articles` should already be limited to the window.
pub fn compute(articles: &[StoredArticle], params: &TrendParams) -> TrendReport {
    // red flags, case-folded
    let mut flags: HashMap<String, usize> = HashMap::new();
    for a in articles {
        for f in &a.analysis.misinformation.red_flags {
            let f = f.trim().to_lowercase();
            if !f.is_empty() {
                *flags.entry(f).or_default() += 1;
            }
        }
    }
    let mut top_red_flags: Vec<FlagCount> = flags
        .into_iter()
        .map(|(flag, count)| FlagCount { flag, count })
        .collect();
    top_red_flags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.flag.cmp(&b.flag)));
    top_red_flags.truncate(TOP_RED_FLAGS);

    // sources by average bias
    let mut per_source: HashMap<&str, (f32, usize)> = HashMap::new();
    for a in articles {
        let e = per_source.entry(a.source.as_str()).or_default();
        e.0 += a.analysis.bias.overall_score;
        e.1 += 1;
    }
    let mut high_bias_sources: Vec<SourceBias> = per_source
        .into_iter()
        .filter(|(_, (_, n))| *n >= params.min_articles_source.max(1))
        .map(|(source, (sum, n))| SourceBias {
            source: source.to_string(),
            avg_bias: sum / n as f32,
            articles: n,
        })
        .collect();
    high_bias_sources.sort_by(|a, b| {
        b.avg_bias
            .total_cmp(&a.avg_bias)
            .then_with(|| a.source.cmp(&b.source))
    });
    high_bias_sources.truncate(TOP_BIASED_SOURCES);

    let sentiment_by_day = daily_average(articles, |a| a.analysis.sentiment.overall_sentiment);
    let misinformation_by_day = daily_average(articles, |a| a.analysis.misinformation.risk_score);

    let mut topics = BTreeMap::new();
    for a in articles {
        *topics.entry(a.topic).or_insert(0) += 1;
    }

    TrendReport {
        days: params.days.clamp(1, MAX_TREND_DAYS),
        articles: articles.len(),
        top_red_flags,
        high_bias_sources,
        sentiment_by_day,
        misinformation_by_day,
        topics,
    }
}

/// Date-ascending, most recent `MAX_DAILY_POINTS` days.
fn daily_average(articles: &[StoredArticle], value: impl Fn(&StoredArticle) -> f32) -> Vec<DailyPoint> {
    let mut by_day: BTreeMap<NaiveDate, (f32, usize)> = BTreeMap::new();
    for a in articles {
        let e = by_day.entry(a.timestamp.date_naive()).or_default();
        e.0 += value(a);
        e.1 += 1;
    }
    let skip = by_day.len().saturating_sub(MAX_DAILY_POINTS);
    by_day
        .into_iter()
        .skip(skip)
        .map(|(date, (sum, n))| DailyPoint {
            date,
            value: sum / n as f32,
            articles: n,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::article;

    #[test]
    fn aggregates_flags_sources_and_days() {
        let mut arts = Vec::new();
        for (i, bias) in [0.9f32, 0.8, 0.7].iter().enumerate() {
            let mut a = article(&format!("fox{i}"), "Loud", Topic::Politics, i as i64);
            a.analysis.bias.overall_score = *bias;
            a.analysis.misinformation.red_flags = vec!["Shocking".into(), "hoax".into()];
            arts.push(a);
        }
        let mut calm = article("calm", "Quiet", Topic::Economy, 0);
        calm.analysis.misinformation.red_flags = vec!["shocking".into()];
        arts.push(calm);

        let r = compute(&arts, &TrendParams::default());
        assert_eq!(r.articles, 4);
        assert_eq!(r.top_red_flags[0], FlagCount { flag: "shocking".into(), count: 4 });
        assert_eq!(r.top_red_flags[1].flag, "hoax");
        // "Quiet" has one article, below the minimum of three
        assert_eq!(r.high_bias_sources.len(), 1);
        assert_eq!(r.high_bias_sources[0].source, "Loud");
        assert!((r.high_bias_sources[0].avg_bias - 0.8).abs() < 1e-5);
        assert_eq!(r.topics.get(&Topic::Politics), Some(&3));
        let days: Vec<_> = r.sentiment_by_day.iter().map(|p| p.date).collect();
        let mut sorted = days.clone();
        sorted.sort();
        assert_eq!(days, sorted);
    }

    #[test]
    fn empty_window_is_empty_report() {
        let r = compute(&[], &TrendParams::default());
        assert_eq!(r.articles, 0);
        assert!(r.top_red_flags.is_empty());
        assert!(r.sentiment_by_day.is_empty());
    }
}

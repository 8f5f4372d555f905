//! Topic extraction: keyword-count majority over a closed topic set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::analyze::lexicon::{self, count_phrases};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Politics,
    Economy,
    Healthcare,
    Technology,
    Climate,
    Sports,
    #[default]
    General,
}

impl Topic {
    pub const ALL: [Topic; 7] = [
        Topic::Politics,
        Topic::Economy,
        Topic::Healthcare,
        Topic::Technology,
        Topic::Climate,
        Topic::Sports,
        Topic::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Politics => "politics",
            Topic::Economy => "economy",
            Topic::Healthcare => "healthcare",
            Topic::Technology => "technology",
            Topic::Climate => "climate",
            Topic::Sports => "sports",
            Topic::General => "general",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        Topic::ALL
            .iter()
            .copied()
            .find(|topic| topic.as_str() == t)
            .ok_or_else(|| format!("unknown topic '{s}'"))
    }
}

/// Classify `text` into the topic with the most keyword hits.
/// Ties go to the topic declared first in the lexicon; no hits → `General`.
pub fn extract_topic(text: &str) -> Topic {
    classify_lowercased(&text.to_lowercase())
}

/// Same as [`extract_topic`] for text that is already lowercased.
pub(crate) fn classify_lowercased(lower: &str) -> Topic {
    let mut best = Topic::General;
    let mut best_count = 0usize;
    for entry in &lexicon::lexicon().topics {
        let n = count_phrases(lower, &entry.keywords).total;
        // strict `>` keeps the earlier topic on ties
        if n > best_count {
            best = entry.topic;
            best_count = n;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn politics_keywords_win() {
        let text = "Election news. The senate met. Congress adjourned. \
                    Another election, the senate again, congress again. \
                    Final election, senate, congress.";
        assert_eq!(extract_topic(text), Topic::Politics);
    }

    #[test]
    fn no_keywords_is_general() {
        assert_eq!(extract_topic("A quiet afternoon by the lake."), Topic::General);
        assert_eq!(extract_topic(""), Topic::General);
    }

    #[test]
    fn tie_goes_to_first_declared() {
        // one politics hit, one sports hit
        assert_eq!(extract_topic("The senate visited the stadium."), Topic::Politics);
    }

    #[test]
    fn parse_round_trips_names() {
        for t in Topic::ALL {
            assert_eq!(t.as_str().parse::<Topic>().unwrap(), t);
        }
        assert!("weather".parse::<Topic>().is_err());
    }
}

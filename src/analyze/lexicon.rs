//! Keyword lexicons shared by the heuristic scorer and topic extraction.
//! Embedded at build time from `keyword_lexicon.json`; read-only after first use.

use once_cell::sync::Lazy;
use serde::Deserialize;

use crate::analyze::topic::Topic;

static LEXICON: Lazy<Lexicon> = Lazy::new(|| {
    let raw = include_str!("../../keyword_lexicon.json");
    serde_json::from_str::<Lexicon>(raw).expect("valid keyword lexicon")
});

#[derive(Debug, Clone, Deserialize)]
pub struct Lexicon {
    pub bias_left: Vec<String>,
    pub bias_right: Vec<String>,
    pub positive: Vec<String>,
    pub negative: Vec<String>,
    pub red_flags: Vec<String>,
    pub emotive: Vec<String>,
    pub subjective: Vec<String>,
    /// Declaration order is the tie-break order.
    pub frames: Vec<FrameKeywords>,
    /// Declaration order is the tie-break order.
    pub topics: Vec<TopicKeywords>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameKeywords {
    pub frame: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicKeywords {
    pub topic: Topic,
    pub keywords: Vec<String>,
}

pub fn lexicon() -> &'static Lexicon {
    &LEXICON
}

/// Per-phrase hit counts for one category, in lexicon order.
#[derive(Debug, Clone, Default)]
pub struct PhraseHits {
    pub total: usize,
    /// Phrases with at least one hit, in lexicon order.
    pub matched: Vec<String>,
}

/// Count non-overlapping occurrences of every phrase in `haystack`.
/// `haystack` must already be lowercased; phrases are lowercased here.
pub fn count_phrases(haystack: &str, phrases: &[String]) -> PhraseHits {
    let mut hits = PhraseHits::default();
    for p in phrases {
        let n = count_occurrences(haystack, p);
        if n > 0 {
            hits.total += n;
            hits.matched.push(p.clone());
        }
    }
    hits
}

pub fn count_occurrences(haystack: &str, phrase: &str) -> usize {
    let needle = phrase.trim().to_lowercase();
    if needle.is_empty() {
        return 0;
    }
    haystack.matches(needle.as_str()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_lexicon_parses_with_all_topics() {
        let lx = lexicon();
        assert!(!lx.bias_left.is_empty());
        assert!(!lx.bias_right.is_empty());
        assert!(!lx.red_flags.is_empty());
        let topics: Vec<Topic> = lx.topics.iter().map(|t| t.topic).collect();
        assert_eq!(
            topics,
            vec![
                Topic::Politics,
                Topic::Economy,
                Topic::Healthcare,
                Topic::Technology,
                Topic::Climate,
                Topic::Sports
            ]
        );
    }

    #[test]
    fn counts_every_occurrence() {
        let phrases = vec!["cover-up".to_string(), "Shocking".to_string()];
        let hits = count_phrases("shocking! a cover-up, another cover-up", &phrases);
        assert_eq!(hits.total, 3);
        assert_eq!(hits.matched, vec!["cover-up", "Shocking"]);
    }

    #[test]
    fn empty_phrase_never_matches() {
        assert_eq!(count_occurrences("anything", "  "), 0);
    }
}

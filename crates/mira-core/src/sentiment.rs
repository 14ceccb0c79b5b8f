//! Sentiment scorer: sums per-token valence weights from a lexicon and buckets the total.
//!
//! The lexicon is a data asset (`token<TAB>weight` lines). A built-in subset is compiled
//! in; `sentiment_lexicon_path` in the config replaces it at startup.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{MiraError, MiraResult};
use crate::types::{EmotionAssessment, EmotionCategory, EmotionSource};

const BUILTIN_LEXICON: &str = include_str!("../data/afinn_subset.tsv");

/// Scores above this are positive.
pub const POSITIVE_THRESHOLD: i32 = 2;
/// Scores below this are negative.
pub const NEGATIVE_THRESHOLD: i32 = -2;

/// Tokens that flip the weight of the token right after them.
const NEGATORS: &[&str] = &[
    "not", "no", "never", "dont", "don't", "cant", "can't", "cannot", "wont", "won't", "isn't",
    "wasn't", "aren't", "didn't", "doesn't", "couldn't", "shouldn't", "wouldn't", "hardly",
];

/// Token → weight table. Immutable once built.
#[derive(Debug, Clone)]
pub struct SentimentLexicon {
    weights: HashMap<String, i32>,
}

impl SentimentLexicon {
    /// Parses `token<TAB>weight` lines. `#` comments and blank lines are skipped.
    pub fn parse(source: &str) -> MiraResult<Self> {
        let mut weights = HashMap::new();
        for (lineno, line) in source.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (token, weight) = line
                .rsplit_once(|c: char| c == '\t' || c == ' ')
                .ok_or_else(|| MiraError::Config(format!("lexicon line {}: missing weight", lineno + 1)))?;
            let weight: i32 = weight.trim().parse().map_err(|_| {
                MiraError::Config(format!("lexicon line {}: bad weight {:?}", lineno + 1, weight))
            })?;
            weights.insert(token.trim().to_lowercase(), weight);
        }
        Ok(Self { weights })
    }

    pub fn from_path(path: &Path) -> MiraResult<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| MiraError::Config(format!("read lexicon {}: {}", path.display(), e)))?;
        Self::parse(&source)
    }

    pub fn builtin() -> Self {
        Self::parse(BUILTIN_LEXICON).unwrap_or_else(|e| {
            tracing::error!(target: "mira::sentiment", error = %e, "built-in lexicon unreadable; every message will score neutral");
            Self {
                weights: HashMap::new(),
            }
        })
    }

    pub fn weight(&self, token: &str) -> Option<i32> {
        self.weights.get(token).copied()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl Default for SentimentLexicon {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Stateless scorer over a lexicon.
#[derive(Debug, Clone, Default)]
pub struct SentimentScorer {
    lexicon: SentimentLexicon,
}

impl SentimentScorer {
    pub fn new(lexicon: SentimentLexicon) -> Self {
        Self { lexicon }
    }

    /// Sums token weights. A token directly after a negator counts with flipped sign.
    pub fn score(&self, text: &str) -> i32 {
        let mut total = 0;
        let mut negate = false;
        for token in tokenize(text) {
            if let Some(w) = self.lexicon.weight(&token) {
                total += if negate { -w } else { w };
            }
            negate = NEGATORS.contains(&token.as_str());
        }
        total
    }

    pub fn assess(&self, text: &str) -> EmotionAssessment {
        let score = self.score(text);
        EmotionAssessment {
            source: EmotionSource::Heuristic,
            category: categorize(score),
            score: Some(f64::from(score)),
        }
    }
}

/// Fixed thresholds: `> 2` positive, `< -2` negative, otherwise neutral.
pub fn categorize(score: i32) -> EmotionCategory {
    if score > POSITIVE_THRESHOLD {
        EmotionCategory::Positive
    } else if score < NEGATIVE_THRESHOLD {
        EmotionCategory::Negative
    } else {
        EmotionCategory::Neutral
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}'))
        .map(|t| t.trim_matches(|c: char| c == '\'' || c == '\u{2019}').replace('\u{2019}', "'").to_lowercase())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lexicon_parses() {
        let lexicon = SentimentLexicon::parse(BUILTIN_LEXICON).unwrap();
        assert!(lexicon.len() > 100);
        assert_eq!(lexicon.weight("wonderful"), Some(4));
        assert_eq!(SentimentLexicon::builtin().len(), lexicon.len());
    }

    #[test]
    fn wonderful_day_is_positive() {
        let scorer = SentimentScorer::default();
        let a = scorer.assess("I had a wonderful day");
        assert_eq!(a.category, EmotionCategory::Positive);
        assert_eq!(a.source, EmotionSource::Heuristic);
        assert_eq!(a.score, Some(4.0));
    }

    #[test]
    fn sad_and_lonely_is_negative() {
        let scorer = SentimentScorer::default();
        assert_eq!(scorer.assess("I feel sad and lonely and tired").category, EmotionCategory::Negative);
    }

    #[test]
    fn negation_flips_weight() {
        let scorer = SentimentScorer::default();
        assert_eq!(scorer.score("I am happy"), 3);
        assert_eq!(scorer.score("I am not happy"), -3);
        assert_eq!(scorer.score("I don't feel good"), 3);
        assert_eq!(scorer.score("I don't good"), -3);
    }

    #[test]
    fn thresholds_are_exclusive() {
        assert_eq!(categorize(3), EmotionCategory::Positive);
        assert_eq!(categorize(2), EmotionCategory::Neutral);
        assert_eq!(categorize(-2), EmotionCategory::Neutral);
        assert_eq!(categorize(-3), EmotionCategory::Negative);
    }

    #[test]
    fn categorization_is_monotonic() {
        let mut prev = categorize(-50).rank();
        for s in -49..=50 {
            let r = categorize(s).rank();
            assert!(r >= prev, "rank dropped at score {}", s);
            prev = r;
        }
    }

    #[test]
    fn custom_lexicon_and_bad_lines() {
        let lexicon = SentimentLexicon::parse("# c\nzorp\t5\n\nblip -4\n").unwrap();
        let scorer = SentimentScorer::new(lexicon);
        assert_eq!(scorer.score("zorp zorp blip"), 6);
        assert!(matches!(SentimentLexicon::parse("oops"), Err(MiraError::Config(_))));
        assert!(matches!(SentimentLexicon::parse("oops\tx"), Err(MiraError::Config(_))));
    }
}

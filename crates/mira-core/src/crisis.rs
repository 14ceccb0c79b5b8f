//! Crisis keyword scan: the local, always-on last line of defense.
//!
//! The phrase list is configuration data. [`CrisisLexicon::default`] carries the built-in
//! list; deployments and tests swap it via `crisis_phrases` in [`crate::MiraConfig`].

/// Built-in crisis phrases, in match-report order.
pub const DEFAULT_CRISIS_PHRASES: &[&str] = &[
    "suicide",
    "kill myself",
    "end my life",
    "take my own life",
    "i want to die",
    "ready to die",
    "better off dead",
    "no reason to live",
    "tired of living",
    "can't go on",
    "goodbye forever",
    "i have a plan",
    "tonight is the night",
    "done with life",
    "cut myself",
    "hurt myself",
    "hopeless",
    "worthless",
];

/// Ordered, de-duplicated set of crisis phrases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrisisLexicon {
    phrases: Vec<String>,
}

impl CrisisLexicon {
    /// Builds a lexicon from any phrase list. Phrases are lowercased and apostrophe-folded;
    /// blanks and later duplicates are dropped, first occurrence keeps its position.
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for p in phrases {
            let folded = fold(p.as_ref().trim());
            if !folded.is_empty() && !out.contains(&folded) {
                out.push(folded);
            }
        }
        Self { phrases: out }
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// Returns every configured phrase contained in `text`, in lexicon order.
    pub fn scan(&self, text: &str) -> Vec<String> {
        let haystack = fold(text);
        self.phrases
            .iter()
            .filter(|p| haystack.contains(p.as_str()))
            .cloned()
            .collect()
    }
}

impl Default for CrisisLexicon {
    fn default() -> Self {
        Self::new(DEFAULT_CRISIS_PHRASES.iter().copied())
    }
}

/// Lowercase and fold typographic apostrophes so "can’t" and "can't" compare equal.
fn fold(s: &str) -> String {
    s.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

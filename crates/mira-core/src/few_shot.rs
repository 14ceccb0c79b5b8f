//! Few-shot grounding examples for the reflection prompt.
//!
//! Loaded once at startup from a JSON dataset of `{question, answer}` pairs (the merged
//! training export). A missing or unreadable file degrades to an empty set. The only
//! way to replace the set afterwards is [`FewShotLibrary::reload`], an admin operation.

use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound on examples embedded in one prompt.
pub const MAX_FEW_SHOT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub question: String,
    pub answer: String,
}

/// Immutable example set shared by every request.
pub type FewShotSet = Arc<[FewShotExample]>;

/// Reads up to `limit` (capped at [`MAX_FEW_SHOT`]) examples from `path`.
/// Never fails: errors are logged and produce an empty set.
pub fn load_examples(path: &Path, limit: usize) -> FewShotSet {
    let limit = limit.min(MAX_FEW_SHOT);
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(
                target: "mira::few_shot",
                path = %path.display(),
                error = %e,
                "few-shot examples not loaded; continuing without grounding"
            );
            return Arc::from(Vec::new());
        }
    };
    match parse_examples(&raw, limit) {
        Some(examples) => {
            tracing::info!(target: "mira::few_shot", count = examples.len(), "few-shot examples loaded");
            Arc::from(examples)
        }
        None => {
            tracing::warn!(
                target: "mira::few_shot",
                path = %path.display(),
                "few-shot file is not a JSON list; continuing without grounding"
            );
            Arc::from(Vec::new())
        }
    }
}

/// Accepts a top-level array or `{ "data": [...] }`. Each entry may name its sides
/// `question|input|user|text` and `answer|output|response|reply`; incomplete entries are skipped.
pub fn parse_examples(raw: &str, limit: usize) -> Option<Vec<FewShotExample>> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let entries = match &value {
        Value::Array(items) => items,
        Value::Object(map) => map.get("data")?.as_array()?,
        _ => return None,
    };
    Some(
        entries
            .iter()
            .filter_map(normalize_entry)
            .take(limit.min(MAX_FEW_SHOT))
            .collect(),
    )
}

fn normalize_entry(entry: &Value) -> Option<FewShotExample> {
    let pick = |keys: &[&str]| {
        keys.iter()
            .filter_map(|k| entry.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    };
    let question = pick(&["question", "input", "user", "text"])?;
    let answer = pick(&["answer", "output", "response", "reply"])?;
    Some(FewShotExample { question, answer })
}

/// Holder for the process-wide example set.
///
/// Readers take an `Arc` snapshot and never observe a partially replaced set.
#[derive(Debug)]
pub struct FewShotLibrary {
    current: RwLock<FewShotSet>,
}

impl FewShotLibrary {
    pub fn new(examples: FewShotSet) -> Self {
        Self {
            current: RwLock::new(examples),
        }
    }

    pub fn empty() -> Self {
        Self::new(Arc::from(Vec::new()))
    }

    pub fn snapshot(&self) -> FewShotSet {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Administrative reload. Returns the number of examples now active.
    pub fn reload(&self, path: &Path, limit: usize) -> usize {
        let fresh = load_examples(path, limit);
        let count = fresh.len();
        match self.current.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        count
    }
}

impl Default for FewShotLibrary {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_key_names_and_caps_at_five() {
        let raw = r#"[
            {"input": "I can't sleep", "output": "That sounds exhausting."},
            {"user": "", "reply": "skipped"},
            {"text": "Work is a lot", "response": "It sounds heavy."},
            {"question": "q3", "answer": "a3"},
            {"question": "q4", "answer": "a4"},
            {"question": "q5", "answer": "a5"},
            {"question": "q6", "answer": "a6"}
        ]"#;
        let examples = parse_examples(raw, 10).unwrap();
        assert_eq!(examples.len(), MAX_FEW_SHOT);
        assert_eq!(examples[0].question, "I can't sleep");
        assert_eq!(examples[1].answer, "It sounds heavy.");
    }

    #[test]
    fn accepts_data_wrapper() {
        let raw = r#"{"data": [{"question": "hi", "answer": "hello"}]}"#;
        assert_eq!(parse_examples(raw, 5).unwrap().len(), 1);
        assert!(parse_examples("\"just a string\"", 5).is_none());
    }

    #[test]
    fn missing_file_degrades_to_empty() {
        let set = load_examples(Path::new("/definitely/not/here.json"), 5);
        assert!(set.is_empty());
    }

    #[test]
    fn reload_swaps_snapshot_without_touching_old_readers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("examples.json");
        std::fs::write(&path, r#"[{"question":"a","answer":"b"}]"#).unwrap();

        let library = FewShotLibrary::new(load_examples(&path, 5));
        let before = library.snapshot();
        assert_eq!(before.len(), 1);

        std::fs::write(&path, r#"[{"question":"a","answer":"b"},{"question":"c","answer":"d"}]"#).unwrap();
        assert_eq!(library.reload(&path, 5), 2);
        assert_eq!(before.len(), 1);
        assert_eq!(library.snapshot().len(), 2);
    }
}

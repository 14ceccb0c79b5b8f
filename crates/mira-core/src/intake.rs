//! Intake: validates raw message text before anything else sees it.

use crate::error::{MiraError, MiraResult};

/// Trims the raw text and rejects empty or missing input.
pub fn normalize(raw: Option<&str>) -> MiraResult<String> {
    let text = raw.map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return Err(MiraError::Validation("Message required".to_string()));
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(normalize(Some("  hello there \n")).unwrap(), "hello there");
    }

    #[test]
    fn rejects_empty_blank_and_missing() {
        assert!(matches!(normalize(Some("")), Err(MiraError::Validation(_))));
        assert!(matches!(normalize(Some(" \t\n")), Err(MiraError::Validation(_))));
        assert!(matches!(normalize(None), Err(MiraError::Validation(_))));
    }
}

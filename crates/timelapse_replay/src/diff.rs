//! Divergence between two serialized DOMs.

use serde::{Deserialize, Serialize};

const EXCERPT_RADIUS: usize = 24;

/// First point where two serializations differ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomDivergence {
    /// Byte offset of the first difference
    pub offset: usize,
    /// Expected text around the offset
    pub expected_excerpt: String,
    /// Actual text around the offset
    pub actual_excerpt: String,
    /// Length of the expected serialization
    pub expected_len: usize,
    /// Length of the actual serialization
    pub actual_len: usize,
}

impl DomDivergence {
    /// Compare two serializations; `None` when they are identical
    #[must_use]
    pub fn compare(expected: &str, actual: &str) -> Option<Self> {
        if expected == actual {
            return None;
        }
        let offset = expected
            .bytes()
            .zip(actual.bytes())
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| expected.len().min(actual.len()));
        Some(Self {
            offset,
            expected_excerpt: excerpt(expected, offset),
            actual_excerpt: excerpt(actual, offset),
            expected_len: expected.len(),
            actual_len: actual.len(),
        })
    }
}

impl std::fmt::Display for DomDivergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DOM diverges at byte {} (expected {} bytes, got {}): expected …{}… got …{}…",
            self.offset, self.expected_len, self.actual_len, self.expected_excerpt, self.actual_excerpt
        )
    }
}

fn excerpt(text: &str, offset: usize) -> String {
    let mut start = offset.saturating_sub(EXCERPT_RADIUS).min(text.len());
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = offset.saturating_add(EXCERPT_RADIUS).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical() {
        assert!(DomDivergence::compare("<p></p>", "<p></p>").is_none());
    }

    #[test]
    fn test_first_difference() {
        let divergence = DomDivergence::compare("<ul><li>a</li></ul>", "<ul><li>b</li></ul>").unwrap();
        assert_eq!(divergence.offset, 8);
        assert_eq!(divergence.expected_excerpt, "<ul><li>a</li></ul>");
        assert!(divergence.to_string().contains("byte 8"));
    }

    #[test]
    fn test_prefix() {
        let divergence = DomDivergence::compare("<p>", "<p></p>").unwrap();
        assert_eq!(divergence.offset, 3);
        assert_eq!(divergence.expected_len, 3);
        assert_eq!(divergence.actual_len, 7);
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        let expected = format!("{}é{}", "a".repeat(30), "x");
        let actual = format!("{}é{}", "a".repeat(30), "y");
        let divergence = DomDivergence::compare(&expected, &actual).unwrap();
        assert_eq!(divergence.offset, 32);
        assert!(divergence.expected_excerpt.ends_with("éx"));
    }
}

//! Text budgeting and whitespace helpers shared by the generation stages.

use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Fraction of the ceiling below which a line-boundary cut is not taken.
const LINE_BOUNDARY_FLOOR: f64 = 0.6;

/// Collapse every run of whitespace into a single space and trim.
pub fn clean_text(value: &str) -> String {
    WHITESPACE.replace_all(value.trim(), " ").into_owned()
}

/// Join `sections` with `separator` and truncate the result to `limit` characters.
///
/// When truncating, the cut moves back to the last line break if that break
/// sits at or after 60% of the limit; otherwise the cut is a hard one.
/// The result is never longer than `limit` characters.
pub fn budget_text<S: AsRef<str>>(sections: &[S], separator: &str, limit: usize) -> String {
    let joined = sections
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(separator);
    truncate_chars(&joined, limit)
}

/// Truncate a single string with the same line-boundary rule as [`budget_text`].
pub fn truncate_chars(text: &str, limit: usize) -> String {
    let Some((byte_limit, _)) = text.char_indices().nth(limit) else {
        return text.to_string();
    };
    let truncated = &text[..byte_limit];

    if let Some(cutoff) = truncated.rfind('\n') {
        let cutoff_chars = truncated[..cutoff].chars().count();
        if cutoff_chars as f64 >= limit as f64 * LINE_BOUNDARY_FLOOR {
            return truncated[..cutoff].to_string();
        }
    }
    truncated.to_string()
}

/// Split prose into sentences on terminal punctuation followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        let boundary = matches!(ch, '.' | '!' | '?')
            && chars.peek().map(|next| next.is_whitespace()).unwrap_or(false);
        if boundary {
            let sentence = current.trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Ordered de-duplication of non-empty, trimmed strings.
pub fn dedupe_preserving_order<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let trimmed = item.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_under_limit_is_untouched() {
        let text = budget_text(&["alpha", "beta"], "\n\n", 100);
        assert_eq!(text, "alpha\n\nbeta");
    }

    #[test]
    fn test_budget_prefers_late_line_boundary() {
        let first = "a".repeat(70);
        let second = "b".repeat(70);
        let text = budget_text(&[first.as_str(), second.as_str()], "\n", 100);
        assert_eq!(text, first);
    }

    #[test]
    fn test_budget_hard_cut_when_boundary_too_early() {
        let first = "a".repeat(10);
        let second = "b".repeat(200);
        let text = budget_text(&[first.as_str(), second.as_str()], "\n", 100);
        assert_eq!(text.chars().count(), 100);
        assert!(text.starts_with(&first));
    }

    #[test]
    fn test_budget_never_exceeds_limit() {
        let sections: Vec<String> = (0..50).map(|i| format!("line {} é", i)).collect();
        for limit in [1, 7, 33, 120, 500] {
            assert!(budget_text(&sections, "\n", limit).chars().count() <= limit);
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "ééééé";
        assert_eq!(truncate_chars(text, 3), "ééé");
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  a \t b\n\nc  "), "a b c");
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("First one. Second one! Third? trailing");
        assert_eq!(
            sentences,
            vec!["First one.", "Second one!", "Third?", "trailing"]
        );
        assert_eq!(split_sentences("v1.2 is out."), vec!["v1.2 is out."]);
    }

    #[test]
    fn test_dedupe_preserving_order() {
        assert_eq!(
            dedupe_preserving_order(["b", "a", " b ", "", "c"]),
            vec!["b", "a", "c"]
        );
    }
}

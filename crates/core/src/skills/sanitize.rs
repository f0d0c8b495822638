//! Identifier sanitization.

use once_cell::sync::Lazy;
use regex::Regex;

static DISALLOWED: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9-]+").expect("valid regex"));
static HYPHENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").expect("valid regex"));

/// Normalize a model-supplied identifier into `[a-z0-9-]+`.
///
/// Lowercases, replaces runs of other characters with a hyphen, collapses
/// repeated hyphens and trims them from both ends. An empty result becomes
/// `m{NN}` when a fallback index is given, otherwise the empty string.
/// The function is idempotent.
pub fn sanitize_id(candidate: &str, fallback_index: Option<usize>) -> String {
    let lowered = candidate.trim().to_lowercase();
    let replaced = DISALLOWED.replace_all(&lowered, "-");
    let collapsed = HYPHENS.replace_all(&replaced, "-");
    let cleaned = collapsed.trim_matches('-');

    if cleaned.is_empty() {
        return fallback_index
            .map(|index| format!("m{:02}", index + 1))
            .unwrap_or_default();
    }
    cleaned.to_string()
}

/// Slug for a free-text name, never empty.
pub fn slugify(name: &str, fallback: &str) -> String {
    let slug = sanitize_id(name, None);
    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug
    }
}

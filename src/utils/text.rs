use std::sync::OnceLock;

use regex::Regex;

/// Trims, strips wrapping quotes, and collapses internal whitespace while keeping case.
pub(crate) fn clean_input(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-folded lookup key for names.
pub(crate) fn normalize_key(raw: &str) -> String {
    clean_input(raw).to_lowercase()
}

fn strength_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)\b\d+(?:[.,]\d+)?\s*(?:mg|mcg|µg|ug|g|ml|l|iu|units?|%)",
            r"(?:\s*/\s*\d+(?:[.,]\d+)?\s*(?:mg|mcg|µg|ug|g|ml|l|iu|%)?)?",
            r"(?:\b|$)"
        ))
        .expect("valid strength regex")
    })
}

/// Lookup key with dosage strength tokens ("500mg", "0.5 g", "800mg/160mg") removed.
pub(crate) fn strip_strength(key: &str) -> String {
    let stripped = strength_re().replace_all(key, " ");
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn tokens(key: &str) -> Vec<String> {
    key.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

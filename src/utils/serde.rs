use serde::Deserialize;

/// A JSON field that may hold one string, a list of strings, or nothing.
///
/// Provider output and batch files use all three shapes for recommendation
/// and medicine lists.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringOrVec {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl StringOrVec {
    /// Trimmed, non-empty values in their original order.
    pub fn into_clean_vec(self) -> Vec<String> {
        let values = match self {
            Self::None => Vec::new(),
            Self::Single(value) => vec![value],
            Self::Multiple(values) => values,
        };
        values
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    }
}

use crate::Labels;

/// An error for a malformed inline tag segment.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    /// A `;`-delimited chunk has no `=` separator.
    #[error("tag {0:?} is not a key=value pair")]
    MissingSeparator(String),
    /// A chunk has an empty key, such as `=value`.
    #[error("tag has an empty key")]
    EmptyKey,
}

impl TagError {
    /// Returns a short identifier used to tag internal metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingSeparator(_) => "missing_separator",
            Self::EmptyKey => "empty_key",
        }
    }
}

/// Parses the inline tag segment of a line, the part of the name token after the first `;`.
///
/// Each `;`-delimited chunk must be a `key=value` pair, split on the first `=`. Values may be empty
/// and may contain further `=` characters. If a key is repeated, the last occurrence wins.
///
/// ```
/// let labels = carbon_metrics::parse_tags("env=prod;region=eu").unwrap();
/// assert_eq!(labels.get("region"), Some("eu"));
/// ```
pub fn parse_tags(segment: &str) -> Result<Labels, TagError> {
    let mut labels = Labels::new();

    for chunk in segment.split(';') {
        let (key, value) = chunk
            .split_once('=')
            .ok_or_else(|| TagError::MissingSeparator(chunk.to_owned()))?;

        if key.is_empty() {
            return Err(TagError::EmptyKey);
        }

        labels.insert(key, value);
    }

    Ok(labels)
}

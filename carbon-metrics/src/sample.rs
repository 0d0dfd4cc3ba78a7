use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use carbon_common::UnixTimestamp;

use crate::Labels;

/// Where the labels of a [`Sample`] come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LabelSource {
    /// Parsed from the inline tags of the line.
    ///
    /// Tag-derived labels must keep the label keys first seen for the metric name.
    #[default]
    Tags,
    /// Supplied by a matching mapping rule. Exempt from the label key check.
    Mapping,
}

/// A resolved observation, ready to be stored by the collector.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// The escaped metric name.
    pub name: String,
    /// Labels from either the mapping or the inline tags.
    pub labels: Labels,
    /// Whether [`labels`](Self::labels) were parsed from tags or supplied by a mapping.
    pub label_source: LabelSource,
    /// The observed value.
    pub value: f64,
    /// The time of the observation, defaulting to the time the line was processed.
    pub timestamp: UnixTimestamp,
}

impl Sample {
    /// Returns the identity of this sample in the store.
    pub fn key(&self) -> SampleKey {
        SampleKey {
            name: self.name.clone(),
            labels: self.labels.to_sorted(),
        }
    }
}

/// Renders the sample as `name{labels} value`.
impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} {}", self.name, self.labels, self.value)
    }
}

/// Identity of a sample: its name and its labels independent of their order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleKey {
    /// The metric name.
    pub name: String,
    /// The labels, sorted by key.
    pub labels: BTreeMap<String, String>,
}

/// Replaces every character that is not allowed in scraped metric names with `_`.
///
/// Allowed characters are ASCII letters, digits, `_` and `:`.
///
/// ```
/// use carbon_metrics::escape_metric_name;
///
/// assert_eq!(escape_metric_name("my.simple-metric"), "my_simple_metric");
/// assert_eq!(escape_metric_name("already_valid:total"), "already_valid:total");
/// ```
pub fn escape_metric_name(name: &str) -> Cow<'_, str> {
    fn is_valid(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_' || c == ':'
    }

    if name.chars().all(is_valid) {
        return Cow::Borrowed(name);
    }

    let escaped = name
        .chars()
        .map(|c| if is_valid(c) { c } else { '_' })
        .collect();

    Cow::Owned(escaped)
}

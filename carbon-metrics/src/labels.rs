use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;

/// An ordered set of `key=value` labels attached to a sample.
///
/// Keys are unique. Inserting an existing key replaces its value but keeps its original position,
/// so the last occurrence of a key wins. Equality ignores the order of labels, while [`Display`]
/// renders them in insertion order:
///
/// ```
/// use carbon_metrics::Labels;
///
/// let labels = Labels::from_iter([("zip", "zot"), ("foo", "bar")]);
/// assert_eq!(labels.to_string(), r#"{zip="zot", foo="bar"}"#);
/// assert_eq!(labels, Labels::from_iter([("foo", "bar"), ("zip", "zot")]));
/// ```
///
/// [`Display`]: fmt::Display
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Labels(IndexMap<String, String>);

impl Labels {
    /// Creates an empty label set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a label and returns the previous value of the key, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Returns the value of the label with the given key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns `true` if a label with the given key exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the number of labels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no labels.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over all labels in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterates over all label keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns the label keys in sorted order.
    pub fn sorted_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.0.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    /// Returns the labels sorted by key, which identifies the label set independent of order.
    pub fn to_sorted(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for Labels
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut labels = Self::new();
        for (key, value) in iter {
            labels.insert(key, value);
        }
        labels
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = (&'a String, &'a String);
    type IntoIter = indexmap::map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Renders labels as `{key="value", ...}`. An empty label set renders as an empty string.
impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }

        f.write_str("{")?;
        for (index, (key, value)) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value:?}")?;
        }
        f.write_str("}")
    }
}

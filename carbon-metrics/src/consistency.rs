use hashbrown::HashMap;

use crate::Labels;

/// A sample's label keys differ from the keys previously accepted for its metric name.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("metric {name:?} has label keys {actual:?}, but previously had {expected:?}")]
pub struct InconsistentLabels {
    /// The resolved metric name.
    pub name: String,
    /// The sorted label keys recorded for the name.
    pub expected: Vec<String>,
    /// The sorted label keys of the rejected sample.
    pub actual: Vec<String>,
}

/// Remembers the label keys of every metric name seen.
///
/// The first accepted sample for a name fixes its label keys for the lifetime of the cache. Later
/// samples must have exactly the same keys, while their values are free to change. Entries are
/// never evicted or replaced.
#[derive(Debug, Default)]
pub struct ConsistencyCache {
    shapes: HashMap<String, Box<[String]>>,
}

impl ConsistencyCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the labels against the keys recorded for `name`.
    ///
    /// Records the keys and accepts if `name` has not been seen before.
    pub fn check(&mut self, name: &str, labels: &Labels) -> Result<(), InconsistentLabels> {
        let Some(expected) = self.shapes.get(name) else {
            self.shapes
                .insert(name.to_owned(), labels.sorted_keys().into_boxed_slice());
            return Ok(());
        };

        let compatible = expected.len() == labels.len()
            && expected.iter().all(|key| labels.contains_key(key));

        if compatible {
            Ok(())
        } else {
            Err(InconsistentLabels {
                name: name.to_owned(),
                expected: expected.to_vec(),
                actual: labels.sorted_keys(),
            })
        }
    }

    /// Returns the number of metric names recorded.
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Returns `true` if no metric name has been recorded.
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

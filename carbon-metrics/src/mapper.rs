use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::Labels;

/// The kind of metric a name is resolved for.
///
/// Graphite lines carry no type information, so ingested lines always resolve as
/// [`Gauge`](Self::Gauge). Mapping engines may still restrict rules to a type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// A monotonically increasing counter.
    Counter,
    /// A value that can go up and down.
    Gauge,
    /// Observations aggregated into a histogram or summary.
    Observer,
}

impl MetricType {
    /// Returns the lowercase name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Observer => "observer",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a line whose name matched a mapping rule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MappingAction {
    /// Ingest the line under the mapped name and labels.
    #[default]
    Keep,
    /// Discard the line.
    Drop,
}

impl fmt::Display for MappingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep => f.write_str("keep"),
            Self::Drop => f.write_str("drop"),
        }
    }
}

/// An error returned when parsing an unknown [`MappingAction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown mapping action")]
pub struct ParseMappingActionError;

impl FromStr for MappingAction {
    type Err = ParseMappingActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep" => Ok(Self::Keep),
            "drop" => Ok(Self::Drop),
            _ => Err(ParseMappingActionError),
        }
    }
}

carbon_common::impl_str_serde!(MappingAction, "a mapping action (keep or drop)");

/// The outcome of resolving a metric name through a [`Mapper`].
#[derive(Clone, Debug, PartialEq)]
pub struct MappingResult {
    /// The rewritten metric name.
    pub target_name: String,
    /// Labels replacing any inline tags of the line.
    pub static_labels: Labels,
    /// Whether to keep or drop the line.
    pub action: MappingAction,
    /// Whether any rule matched. All other fields are meaningless if this is `false`.
    pub matched: bool,
}

impl MappingResult {
    /// A result for names that no rule matched.
    pub fn unmatched() -> Self {
        Self {
            target_name: String::new(),
            static_labels: Labels::new(),
            action: MappingAction::Keep,
            matched: false,
        }
    }

    /// A matching rule that keeps the line under a new name and labels.
    pub fn keep(target_name: impl Into<String>, static_labels: Labels) -> Self {
        Self {
            target_name: target_name.into(),
            static_labels,
            action: MappingAction::Keep,
            matched: true,
        }
    }

    /// A matching rule that drops the line.
    pub fn dropped() -> Self {
        Self {
            target_name: String::new(),
            static_labels: Labels::new(),
            action: MappingAction::Drop,
            matched: true,
        }
    }
}

/// Resolves metric names into target names and labels.
///
/// This is the boundary to the mapping rule engine. Implementations are shared by all producers
/// and must be safe to call concurrently.
pub trait Mapper: fmt::Debug + Send + Sync {
    /// Resolves a metric name for the given type.
    fn resolve(&self, name: &str, ty: MetricType) -> MappingResult;
}

impl<M: Mapper + ?Sized> Mapper for Arc<M> {
    fn resolve(&self, name: &str, ty: MetricType) -> MappingResult {
        (**self).resolve(name, ty)
    }
}

impl<M: Mapper + ?Sized> Mapper for Box<M> {
    fn resolve(&self, name: &str, ty: MetricType) -> MappingResult {
        (**self).resolve(name, ty)
    }
}

/// A mapper that never matches.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMapper;

impl Mapper for NoopMapper {
    fn resolve(&self, _name: &str, _ty: MetricType) -> MappingResult {
        MappingResult::unmatched()
    }
}

/// A mapper with a fixed table of exact metric names.
///
/// ```
/// use carbon_metrics::{Labels, Mapper, MappingResult, MetricType, StaticMapper};
///
/// let mut mapper = StaticMapper::new();
/// mapper.insert(
///     "my.simple.metric",
///     MappingResult::keep("my_simple_metric", Labels::from_iter([("foo", "bar")])),
/// );
///
/// assert!(mapper.resolve("my.simple.metric", MetricType::Gauge).matched);
/// assert!(!mapper.resolve("my.other.metric", MetricType::Gauge).matched);
/// ```
#[derive(Clone, Debug, Default)]
pub struct StaticMapper {
    rules: HashMap<String, MappingResult>,
}

impl StaticMapper {
    /// Creates an empty mapper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule for an exact metric name, replacing any previous rule for that name.
    pub fn insert(&mut self, name: impl Into<String>, result: MappingResult) {
        self.rules.insert(name.into(), result);
    }

    /// Returns the number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Mapper for StaticMapper {
    fn resolve(&self, name: &str, _ty: MetricType) -> MappingResult {
        match self.rules.get(name) {
            Some(result) => result.clone(),
            None => MappingResult::unmatched(),
        }
    }
}

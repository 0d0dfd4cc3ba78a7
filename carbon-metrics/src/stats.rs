use std::sync::atomic::{AtomicU64, Ordering};

use carbon_common::UnixTimestamp;

/// Counters shared between all producers and the collector.
///
/// Producers record rejected lines, the collector records rejected and stored samples. Each field
/// is an independent atomic, so a [snapshot](Self::snapshot) is not a consistent cut across all
/// counters.
#[derive(Debug, Default)]
pub struct IngestStats {
    invalid_lines: AtomicU64,
    tag_errors: AtomicU64,
    last_processed: AtomicU64,
}

impl IngestStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_invalid_line(&self) {
        self.invalid_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tag_error(&self) {
        self.tag_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_processed(&self, now: UnixTimestamp) {
        self.last_processed.store(now.as_secs(), Ordering::Relaxed);
    }

    /// Returns the current values of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let last_processed = self.last_processed.load(Ordering::Relaxed);

        StatsSnapshot {
            invalid_lines: self.invalid_lines.load(Ordering::Relaxed),
            tag_errors: self.tag_errors.load(Ordering::Relaxed),
            last_processed: (last_processed > 0).then(|| UnixTimestamp::from_secs(last_processed)),
        }
    }
}

/// A point-in-time copy of [`IngestStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Lines that failed to parse.
    pub invalid_lines: u64,
    /// Lines with malformed tags and samples with inconsistent label keys.
    pub tag_errors: u64,
    /// The last time a sample was stored, if any.
    pub last_processed: Option<UnixTimestamp>,
}

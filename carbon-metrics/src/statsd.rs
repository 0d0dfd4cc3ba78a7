use carbon_statsd::{CounterMetric, GaugeMetric, HistogramMetric, TimerMetric};

/// Counter metrics for line ingestion.
pub enum MetricCounters {
    /// Incremented for every line that failed to parse.
    ///
    /// This metric is tagged with:
    ///  - `reason`: `malformed_line`, `invalid_value` or `invalid_timestamp`.
    LinesInvalid,

    /// Incremented for every line with malformed tags and every sample rejected because its label
    /// keys differ from the keys previously seen for its name.
    ///
    /// This metric is tagged with:
    ///  - `reason`: `missing_separator`, `empty_key` or `inconsistent_labels`.
    TagsInvalid,

    /// Incremented for every line discarded on purpose.
    ///
    /// This metric is tagged with:
    ///  - `reason`: `mapping` if a rule dropped the line, `strict` if no rule matched in strict
    ///    mode.
    LinesDropped,

    /// Incremented for every sample written to the store.
    SamplesAccepted,

    /// Incremented for every sample removed from the store because it was too old.
    SamplesExpired,
}

impl CounterMetric for MetricCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::LinesInvalid => "ingest.lines.invalid",
            Self::TagsInvalid => "ingest.tags.invalid",
            Self::LinesDropped => "ingest.lines.dropped",
            Self::SamplesAccepted => "ingest.samples.accepted",
            Self::SamplesExpired => "ingest.samples.expired",
        }
    }
}

/// Gauge metrics for line ingestion.
pub enum MetricGauges {
    /// The number of samples in the collector's store.
    ///
    /// Reported on every housekeeping tick and after every scrape.
    Samples,

    /// The number of messages waiting in the collector's inbox.
    ///
    /// Reported after every processed payload.
    CollectorQueueSize,
}

impl GaugeMetric for MetricGauges {
    fn name(&self) -> &'static str {
        match *self {
            Self::Samples => "ingest.samples",
            Self::CollectorQueueSize => "ingest.collector.queue_size",
        }
    }
}

/// Histogram metrics for line ingestion.
pub enum MetricHistograms {
    /// The number of non-empty lines in a payload passed to the pipeline at once.
    PayloadLines,
}

impl HistogramMetric for MetricHistograms {
    fn name(&self) -> &'static str {
        match *self {
            Self::PayloadLines => "ingest.payload.lines",
        }
    }
}

/// Timer metrics for line ingestion.
pub enum MetricTimers {
    /// Time spent by the collector handling a single message.
    ///
    /// This metric is tagged with:
    ///  - `message`: The type of message that was handled.
    CollectorMessageDuration,
}

impl TimerMetric for MetricTimers {
    fn name(&self) -> &'static str {
        match *self {
            Self::CollectorMessageDuration => "ingest.collector.message_duration",
        }
    }
}

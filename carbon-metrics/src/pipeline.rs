use std::fmt;
use std::sync::Arc;

use carbon_common::UnixTimestamp;
use carbon_system::{Addr, SendError};

use crate::Labels;
use crate::collector::Collector;
use crate::line::{self, ParseLineError, ParsedLine};
use crate::mapper::{Mapper, MappingAction, MetricType};
use crate::sample::{LabelSource, Sample, escape_metric_name};
use crate::stats::IngestStats;
use crate::statsd::{MetricCounters, MetricGauges, MetricHistograms};
use crate::tags::{TagError, parse_tags};

/// An error for a line that did not result in a sample.
#[derive(Debug, thiserror::Error)]
pub enum LineError {
    /// The line does not follow the protocol.
    #[error("failed to parse line")]
    Parse(#[from] ParseLineError),
    /// The inline tags of the line are malformed.
    #[error("failed to parse tags")]
    Tag(#[from] TagError),
    /// The collector has shut down and did not accept the sample.
    #[error("failed to dispatch sample")]
    Closed(#[from] SendError),
}

/// Why a valid line was discarded on purpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// A matching mapping rule has the [`Drop`](MappingAction::Drop) action.
    Mapping,
    /// No mapping rule matched and strict matching is enabled.
    StrictNoMatch,
}

impl DropReason {
    /// Returns a short identifier used to tag internal metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mapping => "mapping",
            Self::StrictNoMatch => "strict",
        }
    }
}

/// The result of assembling a line, before it is dispatched.
#[derive(Clone, Debug, PartialEq)]
pub enum Assembled {
    /// The line resolved into a sample.
    Sample(Sample),
    /// The line was valid, but discarded.
    Dropped(DropReason),
}

/// What happened to a successfully processed line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// A sample was handed to the collector.
    ///
    /// The collector may still reject a sample with tag-derived labels whose keys differ from
    /// earlier samples of the same name. Such rejections are counted as tag errors in
    /// [`IngestStats`].
    Dispatched,
    /// The line was discarded on purpose.
    Dropped(DropReason),
}

/// Totals for a payload processed through [`LinePipeline::process_payload`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PayloadSummary {
    /// Lines dispatched to the collector.
    ///
    /// Includes samples the collector later rejects for inconsistent label keys.
    pub dispatched: usize,
    /// Lines discarded on purpose.
    pub dropped: usize,
    /// Lines rejected as invalid.
    pub rejected: usize,
}

/// Turns lines into samples and dispatches them to the collector.
///
/// The pipeline is the entry point for every producer, such as a connection or a datagram socket.
/// It is cheap to clone and can be shared across threads: all producers run parsing, tag
/// extraction and mapping independently, and only meet at the bounded channel of the
/// [`CollectorService`](crate::CollectorService). When that channel is full, dispatching waits.
///
/// Failed lines are counted in [`IngestStats`] and never reach the collector.
#[derive(Clone)]
pub struct LinePipeline {
    mapper: Arc<dyn Mapper>,
    strict_match: bool,
    collector: Addr<Collector>,
    stats: Arc<IngestStats>,
}

impl LinePipeline {
    /// Creates a pipeline dispatching into the given collector.
    ///
    /// The statistics should be the same that were passed to the collector.
    pub fn new(
        mapper: Arc<dyn Mapper>,
        collector: Addr<Collector>,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self {
            mapper,
            strict_match: false,
            collector,
            stats,
        }
    }

    /// Drops all lines that do not match a mapping rule if set to `true`.
    pub fn strict_match(mut self, strict_match: bool) -> Self {
        self.strict_match = strict_match;
        self
    }

    /// Returns the statistics this pipeline reports into.
    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    /// Resolves a line into a sample without dispatching it.
    ///
    /// Lines without a timestamp are stamped with `now`. Parse and tag errors are counted before
    /// they are returned.
    pub fn assemble(&self, line: &str, now: UnixTimestamp) -> Result<Assembled, LineError> {
        let parsed = ParsedLine::parse(line).map_err(|error| self.reject(line, error.into()))?;

        let tags = match parsed.tags {
            Some(segment) => parse_tags(segment).map_err(|error| self.reject(line, error.into()))?,
            None => Labels::new(),
        };

        let mapping = self.mapper.resolve(parsed.name, MetricType::Gauge);

        let (name, labels, label_source) = if mapping.matched {
            match mapping.action {
                MappingAction::Drop => return Ok(self.discard(line, DropReason::Mapping)),
                MappingAction::Keep => (
                    escape_metric_name(&mapping.target_name).into_owned(),
                    mapping.static_labels,
                    LabelSource::Mapping,
                ),
            }
        } else if self.strict_match {
            return Ok(self.discard(line, DropReason::StrictNoMatch));
        } else {
            (
                escape_metric_name(parsed.name).into_owned(),
                tags,
                LabelSource::Tags,
            )
        };

        Ok(Assembled::Sample(Sample {
            name,
            labels,
            label_source,
            value: parsed.value,
            timestamp: parsed.timestamp.unwrap_or(now),
        }))
    }

    /// Processes a single line and sends the resulting sample to the collector.
    ///
    /// Waits while the collector's inbox is full.
    pub async fn process_line(&self, line: &str) -> Result<Disposition, LineError> {
        match self.assemble(line, UnixTimestamp::now())? {
            Assembled::Sample(sample) => {
                self.collector.send(sample).await?;
                Ok(Disposition::Dispatched)
            }
            Assembled::Dropped(reason) => Ok(Disposition::Dropped(reason)),
        }
    }

    /// Processes a single line read as raw bytes.
    ///
    /// A line that is not valid UTF-8 is rejected and counted as an invalid line, like any other
    /// line that fails to parse.
    pub async fn process_raw_line(&self, line: &[u8]) -> Result<Disposition, LineError> {
        match std::str::from_utf8(line) {
            Ok(line) => self.process_line(line).await,
            Err(_) => Err(self.reject(
                &String::from_utf8_lossy(line),
                ParseLineError::InvalidUtf8.into(),
            )),
        }
    }

    /// Processes a single line from a thread outside of the async runtime.
    ///
    /// Blocks the thread while the collector's inbox is full.
    ///
    /// # Panics
    ///
    /// This function panics if called within an asynchronous execution context.
    pub fn process_line_blocking(&self, line: &str) -> Result<Disposition, LineError> {
        match self.assemble(line, UnixTimestamp::now())? {
            Assembled::Sample(sample) => {
                self.collector.blocking_send(sample)?;
                Ok(Disposition::Dispatched)
            }
            Assembled::Dropped(reason) => Ok(Disposition::Dropped(reason)),
        }
    }

    /// Processes every non-empty line of a payload.
    ///
    /// Invalid lines are skipped. Fails only if the collector has shut down, in which case the
    /// remaining lines are not processed.
    pub async fn process_payload(&self, payload: &str) -> Result<PayloadSummary, SendError> {
        let mut summary = PayloadSummary::default();

        for line in line::lines(payload) {
            match self.process_line(line).await {
                Ok(Disposition::Dispatched) => summary.dispatched += 1,
                Ok(Disposition::Dropped(_)) => summary.dropped += 1,
                Err(LineError::Closed(error)) => return Err(error),
                Err(_) => summary.rejected += 1,
            }
        }

        carbon_statsd::metric!(
            gauge(MetricGauges::CollectorQueueSize) = self.collector.queue_size() as u64
        );
        carbon_statsd::metric!(
            histogram(MetricHistograms::PayloadLines) =
                (summary.dispatched + summary.dropped + summary.rejected) as u64
        );

        Ok(summary)
    }

    fn reject(&self, line: &str, error: LineError) -> LineError {
        match &error {
            LineError::Parse(parse_error) => {
                self.stats.record_invalid_line();
                carbon_statsd::metric!(
                    counter(MetricCounters::LinesInvalid) += 1,
                    reason = parse_error.reason()
                );
            }
            LineError::Tag(tag_error) => {
                self.stats.record_tag_error();
                carbon_statsd::metric!(
                    counter(MetricCounters::TagsInvalid) += 1,
                    reason = tag_error.reason()
                );
            }
            LineError::Closed(_) => (),
        }

        carbon_log::debug!(
            error = &error as &dyn std::error::Error,
            line,
            "rejecting invalid line"
        );

        error
    }

    fn discard(&self, line: &str, reason: DropReason) -> Assembled {
        carbon_log::trace!(line, reason = reason.as_str(), "dropping line");
        carbon_statsd::metric!(
            counter(MetricCounters::LinesDropped) += 1,
            reason = reason.as_str()
        );
        Assembled::Dropped(reason)
    }
}

impl fmt::Debug for LinePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinePipeline")
            .field("mapper", &self.mapper)
            .field("strict_match", &self.strict_match)
            .field("collector", &self.collector)
            .finish()
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use carbon_common::UnixTimestamp;
use carbon_system::{AsyncResponse, FromMessage, Interface, NoResponse, Receiver, Sender, Service};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;

use crate::consistency::ConsistencyCache;
use crate::sample::{LabelSource, Sample, SampleKey};
use crate::stats::IngestStats;
use crate::statsd::{MetricCounters, MetricGauges, MetricTimers};

/// Lower bound for the housekeeping interval of the [`CollectorService`].
const MIN_HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// What happens to stored samples after they have been scraped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Samples stay in the store until they are overwritten or expire.
    #[default]
    Persist,
    /// Every scrape empties the store.
    ClearOnScrape,
}

/// Parameters used by the [`CollectorService`].
#[derive(Clone, Debug)]
pub struct CollectorConfig {
    /// Retention of samples between scrapes.
    pub retention: Retention,

    /// Samples with a timestamp older than this are hidden from scrapes and purged.
    ///
    /// Defaults to 5 minutes. A zero duration disables expiry.
    pub sample_expiry: Duration,

    /// Interval of the housekeeping cycle that purges expired samples and reports the store size.
    ///
    /// Defaults to 1 minute.
    pub expiry_interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            retention: Retention::Persist,
            sample_expiry: Duration::from_secs(300),
            expiry_interval: Duration::from_secs(60),
        }
    }
}

/// Requests a response once all previously sent messages have been applied.
#[derive(Clone, Copy, Debug)]
pub struct Flush;

/// Requests the current samples of the store.
#[derive(Clone, Copy, Debug)]
pub struct Scrape;

/// The message interface of the [`CollectorService`].
#[derive(Debug)]
pub enum Collector {
    /// Stores a sample, replacing the previous sample with the same identity.
    Insert(Sample),
    /// Synchronizes with the collector.
    Flush(Flush, Sender<()>),
    /// Returns all samples that have not expired.
    Scrape(Scrape, Sender<Vec<Sample>>),
}

impl Collector {
    /// Returns the name of the message variant.
    fn variant(&self) -> &'static str {
        match self {
            Collector::Insert(_) => "Insert",
            Collector::Flush(_, _) => "Flush",
            Collector::Scrape(_, _) => "Scrape",
        }
    }
}

impl Interface for Collector {}

impl FromMessage<Sample> for Collector {
    type Response = NoResponse;

    fn from_message(message: Sample, _: ()) -> Self {
        Self::Insert(message)
    }
}

impl FromMessage<Flush> for Collector {
    type Response = AsyncResponse<()>;

    fn from_message(message: Flush, sender: Sender<()>) -> Self {
        Self::Flush(message, sender)
    }
}

impl FromMessage<Scrape> for Collector {
    type Response = AsyncResponse<Vec<Sample>>;

    fn from_message(message: Scrape, sender: Sender<Vec<Sample>>) -> Self {
        Self::Scrape(message, sender)
    }
}

/// The single owner of the sample store.
///
/// All samples dispatched by the pipeline end up here. The service applies the label consistency
/// check to samples with tag-derived labels, since it exclusively owns the [`ConsistencyCache`],
/// and then upserts the sample. Mapped samples skip the check. The last write for an identity
/// wins, there is no aggregation.
///
/// Besides handling messages, the service runs a housekeeping cycle every
/// [`expiry_interval`](CollectorConfig::expiry_interval) that purges expired samples. The service
/// stops once all addresses have been dropped.
#[derive(Debug)]
pub struct CollectorService {
    config: CollectorConfig,
    store: BTreeMap<SampleKey, Sample>,
    consistency: ConsistencyCache,
    stats: Arc<IngestStats>,
}

impl CollectorService {
    /// Creates a new collector reporting into the given statistics.
    pub fn new(config: CollectorConfig, stats: Arc<IngestStats>) -> Self {
        Self {
            config,
            store: BTreeMap::new(),
            consistency: ConsistencyCache::new(),
            stats,
        }
    }

    fn is_expired(&self, sample: &Sample, now: UnixTimestamp) -> bool {
        let expiry = self.config.sample_expiry;
        !expiry.is_zero() && sample.timestamp < now.saturating_sub(expiry)
    }

    fn handle_insert(&mut self, sample: Sample, now: UnixTimestamp) {
        let checked = match sample.label_source {
            LabelSource::Tags => self.consistency.check(&sample.name, &sample.labels),
            LabelSource::Mapping => Ok(()),
        };

        if let Err(error) = checked {
            carbon_log::debug!(
                error = &error as &dyn std::error::Error,
                "rejecting sample with inconsistent labels"
            );
            self.stats.record_tag_error();
            carbon_statsd::metric!(
                counter(MetricCounters::TagsInvalid) += 1,
                reason = "inconsistent_labels"
            );
            return;
        }

        carbon_log::trace!("storing sample {sample}");
        self.store.insert(sample.key(), sample);
        self.stats.record_processed(now);
        carbon_statsd::metric!(counter(MetricCounters::SamplesAccepted) += 1);
    }

    fn handle_scrape(&mut self, now: UnixTimestamp) -> Vec<Sample> {
        let samples = match self.config.retention {
            Retention::Persist => self
                .store
                .values()
                .filter(|sample| !self.is_expired(sample, now))
                .cloned()
                .collect(),
            Retention::ClearOnScrape => std::mem::take(&mut self.store)
                .into_values()
                .filter(|sample| !self.is_expired(sample, now))
                .collect(),
        };

        self.report_size();
        samples
    }

    fn purge_expired(&mut self, now: UnixTimestamp) {
        if self.config.sample_expiry.is_zero() {
            return;
        }

        let expiry = self.config.sample_expiry;
        let before = self.store.len();
        self.store
            .retain(|_, sample| sample.timestamp >= now.saturating_sub(expiry));

        let expired = before - self.store.len();
        if expired > 0 {
            carbon_log::debug!("purged {expired} expired samples");
            carbon_statsd::metric!(counter(MetricCounters::SamplesExpired) += expired as i64);
        }
    }

    fn report_size(&self) {
        carbon_statsd::metric!(gauge(MetricGauges::Samples) = self.store.len() as u64);
    }

    fn handle_housekeeping(&mut self, now: UnixTimestamp) {
        self.purge_expired(now);
        self.report_size();
    }

    fn handle_message(&mut self, message: Collector) {
        let ty = message.variant();
        carbon_statsd::metric!(
            timer(MetricTimers::CollectorMessageDuration),
            message = ty,
            {
                let now = UnixTimestamp::now();
                match message {
                    Collector::Insert(sample) => self.handle_insert(sample, now),
                    Collector::Flush(_, sender) => sender.send(()),
                    Collector::Scrape(_, sender) => sender.send(self.handle_scrape(now)),
                }
            }
        )
    }
}

impl Service for CollectorService {
    type Interface = Collector;

    fn spawn_handler(mut self, mut rx: Receiver<Self::Interface>) {
        tokio::spawn(async move {
            let period = self.config.expiry_interval.max(MIN_HOUSEKEEPING_INTERVAL);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            carbon_log::debug!("collector started");

            loop {
                tokio::select! {
                    biased;

                    message = rx.recv() => match message {
                        Some(message) => self.handle_message(message),
                        None => break,
                    },
                    _ = ticker.tick() => self.handle_housekeeping(UnixTimestamp::now()),
                }
            }

            carbon_log::debug!("collector stopped");
        });
    }
}

impl Drop for CollectorService {
    fn drop(&mut self) {
        let remaining = self.store.len();
        if remaining > 0 {
            carbon_log::debug!("collector dropping {remaining} samples");
        }
    }
}

#[cfg(test)]
mod tests {
    use carbon_system::Addr;

    use crate::Labels;

    use super::*;

    fn sample(name: &str, labels: &[(&str, &str)], value: f64, timestamp: u64) -> Sample {
        Sample {
            name: name.to_owned(),
            labels: labels.iter().copied().collect(),
            label_source: LabelSource::Tags,
            value,
            timestamp: UnixTimestamp::from_secs(timestamp),
        }
    }

    fn mapped(name: &str, labels: &[(&str, &str)], value: f64, timestamp: u64) -> Sample {
        Sample {
            label_source: LabelSource::Mapping,
            ..sample(name, labels, value, timestamp)
        }
    }

    fn persistent(sample_expiry: u64) -> CollectorService {
        let config = CollectorConfig {
            sample_expiry: Duration::from_secs(sample_expiry),
            ..Default::default()
        };
        CollectorService::new(config, Arc::new(IngestStats::new()))
    }

    #[test]
    fn test_last_write_wins() {
        let mut collector = persistent(0);
        let now = UnixTimestamp::from_secs(1000);

        collector.handle_insert(sample("m", &[("a", "1")], 1.0, 10), now);
        collector.handle_insert(sample("m", &[("a", "1")], 2.0, 20), now);
        collector.handle_insert(sample("m", &[("a", "2")], 3.0, 30), now);

        let samples = collector.handle_scrape(now);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].value, 2.0);
        assert_eq!(samples[0].timestamp, UnixTimestamp::from_secs(20));
        assert_eq!(samples[1].value, 3.0);
    }

    #[test]
    fn test_inconsistent_labels_are_rejected() {
        let mut collector = persistent(0);
        let now = UnixTimestamp::from_secs(1000);

        collector.handle_insert(sample("m", &[("a", "1")], 1.0, 10), now);
        collector.handle_insert(sample("m", &[("b", "1")], 2.0, 10), now);
        collector.handle_insert(sample("m", &[], 3.0, 10), now);

        let samples = collector.handle_scrape(now);
        assert_eq!(samples, vec![sample("m", &[("a", "1")], 1.0, 10)]);

        let stats = collector.stats.snapshot();
        assert_eq!(stats.tag_errors, 2);
        assert_eq!(stats.last_processed, Some(now));
    }

    #[test]
    fn test_mapped_samples_skip_consistency_check() {
        let mut collector = persistent(0);
        let now = UnixTimestamp::from_secs(1000);

        collector.handle_insert(mapped("m", &[("a", "1")], 1.0, 10), now);
        collector.handle_insert(mapped("m", &[("b", "1")], 2.0, 10), now);
        // Mapped samples never record a label shape.
        collector.handle_insert(sample("m", &[("c", "1")], 3.0, 10), now);
        collector.handle_insert(mapped("m", &[], 4.0, 10), now);

        let mut samples = collector.handle_scrape(now);
        samples.sort_by(|a, b| a.key().cmp(&b.key()));
        assert_eq!(
            samples,
            vec![
                mapped("m", &[], 4.0, 10),
                mapped("m", &[("a", "1")], 1.0, 10),
                mapped("m", &[("b", "1")], 2.0, 10),
                sample("m", &[("c", "1")], 3.0, 10),
            ]
        );

        let stats = collector.stats.snapshot();
        assert_eq!(stats.tag_errors, 0);

        // The shape recorded by the tagged sample still applies to tagged samples.
        collector.handle_insert(sample("m", &[("a", "1")], 5.0, 10), now);
        assert_eq!(collector.stats.snapshot().tag_errors, 1);
    }

    #[test]
    fn test_expired_samples_are_hidden_and_purged() {
        let mut collector = persistent(300);
        let now = UnixTimestamp::from_secs(10_000);

        collector.handle_insert(sample("old", &[], 1.0, 9_000), now);
        collector.handle_insert(sample("fresh", &[], 2.0, 9_800), now);

        let names: Vec<_> = collector
            .handle_scrape(now)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, ["fresh"]);
        assert_eq!(collector.store.len(), 2);

        collector.purge_expired(now);
        assert_eq!(collector.store.len(), 1);
    }

    #[test]
    fn test_zero_expiry_keeps_everything() {
        let mut collector = persistent(0);
        let now = UnixTimestamp::from_secs(2_000_000_000);

        collector.handle_insert(sample("ancient", &[], 1.0, 1), now);
        collector.purge_expired(now);

        assert_eq!(collector.handle_scrape(now).len(), 1);
    }

    #[test]
    fn test_clear_on_scrape() {
        let config = CollectorConfig {
            retention: Retention::ClearOnScrape,
            sample_expiry: Duration::ZERO,
            ..Default::default()
        };
        let mut collector = CollectorService::new(config, Arc::new(IngestStats::new()));
        let now = UnixTimestamp::from_secs(1000);

        collector.handle_insert(sample("m", &[], 1.0, 10), now);
        assert_eq!(collector.handle_scrape(now).len(), 1);
        assert!(collector.handle_scrape(now).is_empty());

        // The label shape survives clearing the store.
        collector.handle_insert(sample("m", &[("a", "b")], 1.0, 10), now);
        assert!(collector.handle_scrape(now).is_empty());
    }

    #[test]
    fn test_statsd_metrics() {
        let mut collector = persistent(0);
        let now = UnixTimestamp::from_secs(1000);

        let captures = carbon_statsd::with_capturing_test_client(|| {
            collector.handle_insert(sample("m", &[("a", "1")], 1.0, 10), now);
            collector.handle_insert(sample("m", &[], 1.0, 10), now);
        });

        assert_eq!(
            captures,
            [
                "ingest.samples.accepted:1|c",
                "ingest.tags.invalid:1|c|#reason:inconsistent_labels"
            ]
        );
    }

    #[tokio::test]
    async fn test_service_flush_and_scrape() {
        carbon_log::init_test!();

        let addr: Addr<Collector> = persistent(0).start(16);

        addr.send(sample("m", &[("a", "1")], 1.0, 10)).await.unwrap();
        addr.send(sample("m", &[("a", "2")], 2.0, 10)).await.unwrap();
        addr.request(Flush).await.unwrap();

        let samples = addr.request(Scrape).await.unwrap();
        let labels: Vec<_> = samples.iter().map(|s| s.labels.clone()).collect();
        assert_eq!(
            labels,
            [Labels::from_iter([("a", "1")]), Labels::from_iter([("a", "2")])]
        );
    }
}

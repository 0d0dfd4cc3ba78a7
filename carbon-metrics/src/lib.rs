//! Ingestion of Graphite plaintext lines into labeled samples.
//!
//! Producers hand raw lines to a [`LinePipeline`], which turns each line into a [`Sample`] and
//! dispatches it to the [`CollectorService`], the single owner of the sample store. Scrapes are
//! served by the collector from that store.
//!
//! # Protocol
//!
//! Every line consists of a metric name with optional inline tags, a value and an optional UNIX
//! timestamp in seconds, separated by single spaces:
//!
//! ```text
//! <metric-name>[;<key>=<value>]* <value> [<unix-timestamp>]
//! ```
//!
//! For example:
//!
//! ```text
//! my.simple.metric 9001 1534620625
//! my.simple.metric.with.tags;tag1=value1;tag2=value2 9002 1534620625
//! ```
//!
//! # Pipeline
//!
//! Every line passes through these stages:
//!
//!  1. [`ParsedLine::parse`] splits the line into name, tag segment, value and timestamp.
//!  2. [`parse_tags`] turns the tag segment into [`Labels`].
//!  3. The [`Mapper`] resolves the name. A matching rule either drops the line or replaces the
//!     name and all inline tags. Unmatched names pass through unchanged, unless strict matching is
//!     enabled, in which case the line is dropped.
//!  4. The name is escaped with [`escape_metric_name`] and the [`Sample`] is sent to the collector.
//!  5. For labels parsed from tags, the collector checks the label keys against all earlier
//!     tagged samples of the same name in the [`ConsistencyCache`]. It then stores the sample, replacing any earlier sample with the same name
//!     and labels.
//!
//! Lines that fail in any stage are counted in [`IngestStats`] and dropped.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use carbon_metrics::{
//!     CollectorConfig, CollectorService, Flush, IngestStats, LinePipeline, NoopMapper, Scrape,
//! };
//! use carbon_system::Service;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let stats = Arc::new(IngestStats::new());
//! let config = CollectorConfig {
//!     sample_expiry: std::time::Duration::ZERO,
//!     ..Default::default()
//! };
//! let collector = CollectorService::new(config, stats.clone()).start(1024);
//! let pipeline = LinePipeline::new(Arc::new(NoopMapper), collector.clone(), stats);
//!
//! pipeline.process_line("my.metric;env=prod 42 1534620625").await.unwrap();
//! collector.request(Flush).await.unwrap();
//!
//! let samples = collector.request(Scrape).await.unwrap();
//! assert_eq!(samples[0].to_string(), r#"my_metric{env="prod"} 42"#);
//! # }
//! ```
#![warn(missing_docs)]

mod collector;
mod consistency;
mod labels;
mod line;
mod mapper;
mod pipeline;
mod sample;
mod stats;
mod statsd;
mod tags;

pub use self::collector::*;
pub use self::consistency::*;
pub use self::labels::*;
pub use self::line::*;
pub use self::mapper::*;
pub use self::pipeline::*;
pub use self::sample::*;
pub use self::stats::*;
pub use self::tags::*;

pub use carbon_common::UnixTimestamp;

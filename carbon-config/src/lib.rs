//! Configuration for the Carbon CLI and ingestion pipeline.
//!
//! Carbon reads a single `config.yml` from its configuration directory. Every section and field
//! is optional, and a missing file is equivalent to an empty one:
//!
//! ```yaml
//! logging:
//!   level: debug
//! metrics:
//!   statsd: 127.0.0.1:8125
//! ingest:
//!   strict_match: true
//!   sample_expiry: 600
//! mappings:
//!   - match: my.simple.metric
//!     name: my_simple_metric
//!     labels:
//!       foo: bar
//!   - match: my.noisy.metric
//!     action: drop
//! ```
//!
//! Some values can be overridden from the command line or environment through
//! [`OverridableConfig`].
#![warn(missing_docs)]

mod config;

pub use crate::config::*;

//! The Carbon binary.
//!
//! Carbon reads Graphite plaintext lines from standard input, resolves them into labeled samples
//! and keeps the latest value of every sample in memory. Once the input ends, the collected
//! samples are written to standard output together with the ingestion statistics.
//!
//! ```text
//! $ printf 'my.simple.metric;env=prod 9001 1534620625\n' | carbon run --sample-expiry 0
//! my_simple_metric{env="prod"} 9001
//! # lines dispatched: 1
//! # lines dropped: 0
//! # lines rejected: 0
//! # invalid lines: 0
//! # tag errors: 0
//! # last processed: 1760872345
//! ```
//!
//! Run `carbon --help` for all commands and options.

mod cli;
mod cliapp;
mod ingest;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            carbon_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

//! Common functionality for Carbon.

#![warn(missing_docs)]

#[macro_use]
mod macros;

pub mod time;

pub use crate::time::UnixTimestamp;

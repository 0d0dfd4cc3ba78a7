//! Foundational system components for Carbon's services.
//!
//! Services are much like actors: they own their state exclusively and receive messages from a
//! bounded inbox, which they handle one by one. See [`Service`] for how to define one.

#![warn(missing_docs)]

mod service;

pub use self::service::*;

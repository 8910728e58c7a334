//! Lifecycle events
//!
//! The manager reports dialog and usage lifecycle changes as [`DumEvent`]s
//! on an optional channel, for monitoring and tests.

pub mod dum_events;

pub use dum_events::DumEvent;

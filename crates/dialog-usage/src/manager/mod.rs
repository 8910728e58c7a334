//! Dialog Usage Manager
//!
//! [`DialogUsageManager`] owns every dialog set, dialog and subscription
//! usage, routes inbound messages and timer firings to them, and is the
//! single entry point applications drive. It is synchronous and single
//! threaded; [`runtime`] wires it to tokio channels and timers.

pub mod commands;
pub mod core;
pub mod message_routing;
pub mod runtime;
pub mod subscriptions;

pub use commands::DumCommand;
pub use core::DialogUsageManager;
pub use runtime::{ChannelSink, DumRunner, DumRunnerHandle, TokioTimerService};

//! Error types for dialog-usage
//!
//! Protocol problems caused by the peer are answered on the wire and never
//! surface here; these errors are returned to application code that calls
//! the usage APIs out of contract or against handles that no longer exist.

pub mod dialog_errors;

pub use dialog_errors::{DialogError, DialogResult};

//! Dialog management
//!
//! Dialogs (RFC 3261 §12) and the dialog sets that group the dialogs forked
//! from one initial request. A [`Dialog`] carries the route set, targets and
//! CSeq counters and records which usages live in it; the usages themselves
//! are owned by the manager and addressed by handle.

pub mod dialog_id;
pub mod dialog_impl;
pub mod dialog_set;
pub mod invite;

pub use dialog_id::{DialogId, DialogSetId};
pub use dialog_impl::{Dialog, DialogType};
pub use dialog_set::{DialogSet, DialogSetState};
pub use invite::{InviteSession, InviteSessionFactory};

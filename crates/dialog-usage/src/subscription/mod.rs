//! Subscription usages (RFC 6665)
//!
//! [`ClientSubscription`] is the subscriber's view of a subscription,
//! [`ServerSubscription`] the notifier's. Both live inside a
//! [`Dialog`](crate::dialog::Dialog) and are addressed through handles.

pub mod base;
pub mod client;
pub mod event_package;
pub mod handler;
pub mod publication;
pub mod server;
pub mod state;

pub use base::SubscriptionIdentity;
pub use client::{ClientSubscription, QueuedNotify};
pub use event_package::{
    DialogPackage, EventPackage, MessageSummaryPackage, PresencePackage, ReferPackage,
};
pub use handler::{ClientSubscriptionHandler, RetryDecision, ServerSubscriptionHandler};
pub use publication::{PublicationIndex, PublicationKey};
pub use server::ServerSubscription;
pub use state::{SubDialogState, SubscriptionState, TerminateReason};

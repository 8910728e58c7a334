//! SIP dialog and subscription usage layer for the rvoip stack
//!
//! This crate sits above the transaction layer. It keeps the dialogs of RFC
//! 3261 and the subscription usages of RFC 6665 that live inside them:
//!
//! - [`dialog`]: dialog sets, dialogs and the seam to INVITE sessions
//! - [`subscription`]: subscriber ([`ClientSubscription`]) and notifier
//!   ([`ServerSubscription`]) state machines, handler traits and event
//!   packages
//! - [`manager`]: the [`DialogUsageManager`] that owns everything and routes
//!   inbound messages and timers, plus a tokio runner
//!
//! The manager is synchronous. Messages leave through a [`MessageSink`],
//! timers are requested from a [`TimerService`] and come back through
//! [`DialogUsageManager::process_timeout`].
//!
//! [`ClientSubscription`]: subscription::ClientSubscription
//! [`ServerSubscription`]: subscription::ServerSubscription
//! [`MessageSink`]: usage::MessageSink
//! [`TimerService`]: usage::TimerService

pub mod config;
pub mod dialog;
pub mod errors;
pub mod events;
pub mod logging;
pub mod manager;
pub mod message;
pub mod subscription;
pub mod usage;

pub use config::{DumConfig, DumConfigBuilder};
pub use errors::{DialogError, DialogResult};
pub use manager::{DialogUsageManager, DumCommand};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        config::DumConfig,
        dialog::{DialogId, DialogSetId, InviteSession, InviteSessionFactory},
        errors::{DialogError, DialogResult},
        events::DumEvent,
        manager::{ChannelSink, DialogUsageManager, DumCommand, DumRunner, DumRunnerHandle, TokioTimerService},
        message::{Contents, EventHeader, Method, NameAddr, SipMessage, SubscriptionStateHeader, Uri},
        subscription::{
            ClientSubscriptionHandler, EventPackage, RetryDecision, ServerSubscriptionHandler, SubscriptionState,
            TerminateReason,
        },
        usage::{
            ClientAuthManager, ClientSubscriptionHandle, Clock, DumTimeout, MessageSink, ServerSubscriptionHandle,
            TimeoutKind, TimerService,
        },
    };
}

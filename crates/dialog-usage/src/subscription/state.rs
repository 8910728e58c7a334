use std::fmt;

use serde::{Deserialize, Serialize};

/// Notifier-side subscription state. Moves forward only; nothing leaves
/// `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionState {
    Invalid,
    Init,
    Pending,
    Active,
    Waiting,
    Terminated,
}

impl SubscriptionState {
    /// Value of the Subscription-State header for this state. States that
    /// have not been decided yet are reported as pending.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Active => "active",
            SubscriptionState::Waiting => "waiting",
            SubscriptionState::Terminated => "terminated",
            SubscriptionState::Invalid | SubscriptionState::Init | SubscriptionState::Pending => {
                "pending"
            }
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the subscription's own dialog has been confirmed by a 2xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubDialogState {
    Initial,
    Established,
}

/// `reason` parameter of a terminated Subscription-State (RFC 6665 §4.2.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminateReason {
    Rejected,
    Timeout,
    Deactivated,
    Probation,
    NoResource,
    GiveUp,
}

impl TerminateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminateReason::Rejected => "rejected",
            TerminateReason::Timeout => "timeout",
            TerminateReason::Deactivated => "deactivated",
            TerminateReason::Probation => "probation",
            TerminateReason::NoResource => "noresource",
            TerminateReason::GiveUp => "giveup",
        }
    }
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

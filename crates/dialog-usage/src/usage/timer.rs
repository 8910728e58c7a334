//! Usage timers
//!
//! The core never sleeps. A usage asks the injected [`TimerService`] to hand
//! a [`DumTimeout`] back after a delay, and the manager routes the firing to
//! the owning usage. Each usage keeps a [`TimerSeq`]; arming a timer bumps
//! it, and a firing whose sequence is not current is ignored, so re-arming
//! or destroying a usage implicitly cancels what was outstanding.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::handle::UsageHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeoutKind {
    /// Client: refresh due. Server: subscription expired.
    Subscription,
    /// Client: retry after a transient failure.
    SubscriptionRetry,
    /// Client: no NOTIFY arrived after a SUBSCRIBE was confirmed.
    WaitForNotify,
    /// Client: process the next queued NOTIFY on a fresh stack.
    SendNextNotify,
}

/// A timer firing delivered back to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumTimeout {
    pub kind: TimeoutKind,
    pub usage: UsageHandle,
    pub seq: u64,
}

impl DumTimeout {
    pub fn new(kind: TimeoutKind, usage: impl Into<UsageHandle>, seq: u64) -> Self {
        Self {
            kind,
            usage: usage.into(),
            seq,
        }
    }
}

/// Delivers a [`DumTimeout`] back to the manager after `delay`.
///
/// A zero delay means "on the next turn of the processing loop", never
/// synchronously from inside `add_timer`.
pub trait TimerService: Send + Sync {
    fn add_timer(&self, timeout: DumTimeout, delay: Duration);
}

/// Timer generation counter. Sequence 0 is never handed out by [`arm`],
/// it is reserved for `SendNextNotify`.
///
/// [`arm`]: TimerSeq::arm
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimerSeq {
    current: u64,
}

impl TimerSeq {
    pub fn arm(&mut self) -> u64 {
        self.current += 1;
        self.current
    }

    pub fn is_current(&self, seq: u64) -> bool {
        seq != 0 && seq == self.current
    }

    pub fn current(&self) -> u64 {
        self.current
    }
}

/// Refresh lead time for a subscription lasting `secs`: the smaller of five
/// seconds early and 90%, never negative.
pub fn a_bit_smaller_than(secs: u64) -> u64 {
    let secs = secs as i64;
    (secs - 5).min(9 * secs / 10).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a_bit_smaller_than() {
        assert_eq!(a_bit_smaller_than(3600), 3240);
        assert_eq!(a_bit_smaller_than(3500), 3150);
        assert_eq!(a_bit_smaller_than(40), 35);
        assert_eq!(a_bit_smaller_than(10), 5);
        assert_eq!(a_bit_smaller_than(3), 0);
        assert_eq!(a_bit_smaller_than(0), 0);
    }

    #[test]
    fn test_timer_seq_supersedes_older_timers() {
        let mut seq = TimerSeq::default();
        assert!(!seq.is_current(0));
        let first = seq.arm();
        assert!(seq.is_current(first));
        let second = seq.arm();
        assert!(!seq.is_current(first));
        assert!(seq.is_current(second));
    }
}

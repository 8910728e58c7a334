//! Shared usage infrastructure
//!
//! Handles, timers, failure classification and the seams through which the
//! synchronous core talks to the outside world (message sink, clock, auth).

pub mod clock;
pub mod failure;
pub mod handle;
pub mod sink;
pub mod timer;

pub use clock::{Clock, SystemClock};
pub use failure::{determine_failure_effect, FailureEffect};
pub use handle::{ClientSubscriptionHandle, ServerSubscriptionHandle, UsageHandle};
pub(crate) use handle::HandleAllocator;
pub use sink::{ClientAuthManager, MessageSink};
pub use timer::{a_bit_smaller_than, DumTimeout, TimeoutKind, TimerSeq, TimerService};

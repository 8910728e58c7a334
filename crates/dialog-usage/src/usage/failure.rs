//! Failure response classification (RFC 5057)
//!
//! A failure response to an in-dialog request affects the transaction, the
//! usage or the whole dialog. Both subscription usages consult
//! [`determine_failure_effect`] whenever a request or response they sent
//! fails.

use serde::{Deserialize, Serialize};

use crate::message::SipMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureEffect {
    /// Every usage of the dialog is gone.
    DialogTermination,
    /// Only the transaction failed; the usage is unaffected.
    TransactionTermination,
    /// The usage the request belonged to is gone.
    UsageTermination,
    /// Retry after the advertised Retry-After.
    RetryAfter,
    /// May be retried, no Retry-After given.
    OptionalRetryAfter,
    /// Meaning is up to the application.
    ApplicationDependent,
}

/// Classifies a final failure response (>= 400).
///
/// `additional` lists codes that the local configuration wants treated as
/// transaction-terminating on top of the built-in table.
pub fn determine_failure_effect(response: &SipMessage, additional: &[u16]) -> FailureEffect {
    let code = response.status_code().unwrap_or(500);
    if additional.contains(&code) {
        return FailureEffect::TransactionTermination;
    }
    match code {
        404 | 410 | 416 | 482 | 483 | 484 | 485 | 502 | 604 => FailureEffect::DialogTermination,
        403 | 408 | 481 | 489 | 501 => FailureEffect::UsageTermination,
        400 | 401 | 402 | 405 | 406 | 412 | 413 | 414 | 415 | 420 | 421 | 423 | 429 | 486
        | 487 | 488 | 491 | 493 | 494 | 505 | 513 | 603 | 606 => {
            FailureEffect::TransactionTermination
        }
        _ if response.retry_after.is_some() => FailureEffect::RetryAfter,
        480 | 500 | 503 | 504 | 580 | 600 => FailureEffect::OptionalRetryAfter,
        _ => FailureEffect::ApplicationDependent,
    }
}

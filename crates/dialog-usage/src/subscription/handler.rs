//! Application callbacks for subscription usages
//!
//! Handlers are registered per event package on the
//! [`DialogUsageManager`]. Every callback receives the manager and the
//! usage handle, so it may act on the usage right away (accept, reject,
//! end). When a callback destroys the usage the manager notices and stops
//! touching it.

use tracing::debug;

use crate::manager::DialogUsageManager;
use crate::message::{Contents, SipMessage};
use crate::usage::{ClientSubscriptionHandle, ServerSubscriptionHandle};

use super::event_package::EventPackage;
use super::state::TerminateReason;

/// Answer to [`ClientSubscriptionHandler::on_request_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Terminate the subscription.
    GiveUp,
    /// Retry immediately.
    RetryNow,
    /// Retry after this many seconds.
    RetryAfter(u32),
}

impl RetryDecision {
    /// Maps the signed-seconds convention (negative gives up, zero retries
    /// now, positive waits) onto a decision.
    pub fn from_seconds(seconds: i64) -> Self {
        match seconds {
            s if s < 0 => RetryDecision::GiveUp,
            0 => RetryDecision::RetryNow,
            s => RetryDecision::RetryAfter(s.min(u32::MAX as i64) as u32),
        }
    }
}

/// Subscriber-side callbacks.
pub trait ClientSubscriptionHandler: Send + Sync {
    /// NOTIFY with `Subscription-State: pending`. The application must
    /// answer it with `accept_update` or `reject_update`.
    fn on_update_pending(
        &self,
        dum: &mut DialogUsageManager,
        handle: ClientSubscriptionHandle,
        notify: &SipMessage,
        out_of_order: bool,
    );

    /// NOTIFY with `Subscription-State: active`.
    fn on_update_active(
        &self,
        dum: &mut DialogUsageManager,
        handle: ClientSubscriptionHandle,
        notify: &SipMessage,
        out_of_order: bool,
    );

    /// NOTIFY with any other state, or a provisional REFER progress report.
    fn on_update_extension(
        &self,
        dum: &mut DialogUsageManager,
        handle: ClientSubscriptionHandle,
        notify: &SipMessage,
        out_of_order: bool,
    );

    /// The subscription is gone. `msg` is the message that ended it, if any.
    fn on_terminated(
        &self,
        dum: &mut DialogUsageManager,
        handle: ClientSubscriptionHandle,
        msg: Option<&SipMessage>,
    );

    /// First 2xx or NOTIFY of a subscription.
    fn on_new_subscription(
        &self,
        dum: &mut DialogUsageManager,
        handle: ClientSubscriptionHandle,
        msg: &SipMessage,
    );

    /// A transient failure arrived for the SUBSCRIBE. `retry_after` is the
    /// Retry-After value, 0 when absent.
    fn on_request_retry(
        &self,
        _dum: &mut DialogUsageManager,
        _handle: ClientSubscriptionHandle,
        _retry_after: u32,
        _response: &SipMessage,
    ) -> RetryDecision {
        RetryDecision::GiveUp
    }

    /// A confirmed SUBSCRIBE got no NOTIFY in time.
    fn on_notify_not_received(&self, dum: &mut DialogUsageManager, handle: ClientSubscriptionHandle) {
        if let Err(e) = handle.end(dum, false) {
            debug!("Ending {} after missing NOTIFY: {}", handle, e);
        }
    }

    /// The connection carrying the dialog is gone.
    fn on_flow_terminated(&self, dum: &mut DialogUsageManager, handle: ClientSubscriptionHandle) {
        if let Err(e) = handle.re_subscribe(dum) {
            debug!("Re-subscribe of {} after flow loss failed: {}", handle, e);
        }
    }

    /// Last chance to decorate an outgoing message.
    fn on_ready_to_send(&self, _handle: ClientSubscriptionHandle, _msg: &mut SipMessage) {}
}

/// Notifier-side callbacks.
pub trait ServerSubscriptionHandler: Send + Sync {
    /// First SUBSCRIBE of a subscription. The application answers it with
    /// `accept`/`reject` and `send`, then sends the initial NOTIFY.
    fn on_new_subscription(
        &self,
        dum: &mut DialogUsageManager,
        handle: ServerSubscriptionHandle,
        subscribe: &SipMessage,
    );

    /// Implicit subscription of a REFER outside an invite session.
    fn on_new_subscription_from_refer(
        &self,
        dum: &mut DialogUsageManager,
        handle: ServerSubscriptionHandle,
        refer: &SipMessage,
    ) {
        self.on_new_subscription(dum, handle, refer);
    }

    /// Refresh SUBSCRIBE. By default grants it and sends a NOTIFY with the
    /// current state.
    fn on_refresh(
        &self,
        dum: &mut DialogUsageManager,
        handle: ServerSubscriptionHandle,
        _subscribe: &SipMessage,
    ) {
        let result = handle
            .accept(dum, 200)
            .and_then(|ok| handle.send(dum, ok))
            .and_then(|_| handle.neutral_notify(dum))
            .and_then(|notify| handle.send(dum, notify));
        if let Err(e) = result {
            debug!("Default refresh handling for {} failed: {}", handle, e);
        }
    }

    /// New state was published for the subscription's document; `None`
    /// when the document was removed.
    fn on_published(
        &self,
        _dum: &mut DialogUsageManager,
        _handle: ServerSubscriptionHandle,
        _contents: Option<&Contents>,
    ) {
    }

    fn on_notify_accepted(
        &self,
        _dum: &mut DialogUsageManager,
        _handle: ServerSubscriptionHandle,
        _response: &SipMessage,
    ) {
    }

    /// A NOTIFY failed without ending the subscription.
    fn on_notify_rejected(
        &self,
        _dum: &mut DialogUsageManager,
        _handle: ServerSubscriptionHandle,
        _response: &SipMessage,
    ) {
    }

    fn on_terminated(&self, dum: &mut DialogUsageManager, handle: ServerSubscriptionHandle);

    /// A SUBSCRIBE was refused by policy or a NOTIFY failed fatally.
    fn on_error(
        &self,
        _dum: &mut DialogUsageManager,
        _handle: ServerSubscriptionHandle,
        _msg: &SipMessage,
    ) {
    }

    /// The subscriber unsubscribed; `notify` is the final NOTIFY about to
    /// be sent and may be given a body.
    fn on_expired_by_client(
        &self,
        _dum: &mut DialogUsageManager,
        _handle: ServerSubscriptionHandle,
        _subscribe: &SipMessage,
        _notify: &mut SipMessage,
    ) {
    }

    /// The subscription expired; `notify` is the final NOTIFY about to be
    /// sent.
    fn on_expired(
        &self,
        _dum: &mut DialogUsageManager,
        _handle: ServerSubscriptionHandle,
        _notify: &mut SipMessage,
    ) {
    }

    /// Package supplying default expiry policy and accepted body types.
    fn event_package(&self) -> Option<&dyn EventPackage> {
        None
    }

    fn has_default_expires(&self) -> bool {
        self.event_package().is_some()
    }

    fn default_expires(&self) -> u32 {
        self.event_package().map_or(3600, |p| p.default_expires())
    }

    fn has_min_expires(&self) -> bool {
        self.event_package().is_some_and(|p| p.min_expires().is_some())
    }

    fn min_expires(&self) -> u32 {
        self.event_package().and_then(|p| p.min_expires()).unwrap_or(0)
    }

    fn has_max_expires(&self) -> bool {
        self.event_package().is_some_and(|p| p.max_expires().is_some())
    }

    fn max_expires(&self) -> u32 {
        self.event_package()
            .and_then(|p| p.max_expires())
            .unwrap_or(u32::MAX)
    }

    /// Granted duration for a SUBSCRIBE, or the error status to answer with.
    ///
    /// Expires present: 0 is always granted (unsubscribe / poll), below the
    /// minimum is 423, above the maximum is clamped. Absent: the default
    /// when there is one, else 400.
    fn get_expires(&self, subscribe: &SipMessage) -> Result<u32, u16> {
        match subscribe.expires {
            Some(0) => Ok(0),
            Some(requested) => {
                if self.has_min_expires() && requested < self.min_expires() {
                    Err(423)
                } else if self.has_max_expires() && requested > self.max_expires() {
                    Ok(self.max_expires())
                } else {
                    Ok(requested)
                }
            }
            None if self.has_default_expires() => Ok(self.default_expires()),
            None => Err(400),
        }
    }

    /// The connection carrying the dialog is gone.
    fn on_flow_terminated(&self, dum: &mut DialogUsageManager, handle: ServerSubscriptionHandle) {
        if let Err(e) = handle.end(dum, TerminateReason::Deactivated, None, 0) {
            debug!("Ending {} after flow loss failed: {}", handle, e);
        }
    }

    fn on_ready_to_send(&self, _handle: ServerSubscriptionHandle, _msg: &mut SipMessage) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Method, SipMessage, Uri};
    use crate::subscription::event_package::PresencePackage;

    struct Policy(Option<PresencePackage>);

    impl ServerSubscriptionHandler for Policy {
        fn on_new_subscription(&self, _: &mut DialogUsageManager, _: ServerSubscriptionHandle, _: &SipMessage) {}
        fn on_terminated(&self, _: &mut DialogUsageManager, _: ServerSubscriptionHandle) {}
        fn event_package(&self) -> Option<&dyn EventPackage> {
            self.0.as_ref().map(|p| p as &dyn EventPackage)
        }
    }

    fn subscribe(expires: Option<u32>) -> SipMessage {
        let mut msg = SipMessage::new_request(Method::Subscribe, Uri::new("sip:bob@biloxi.com"));
        msg.expires = expires;
        msg
    }

    #[test]
    fn test_get_expires_without_package() {
        let policy = Policy(None);
        assert_eq!(policy.get_expires(&subscribe(None)), Err(400));
        assert_eq!(policy.get_expires(&subscribe(Some(5))), Ok(5));
        assert_eq!(policy.get_expires(&subscribe(Some(0))), Ok(0));
    }

    #[test]
    fn test_get_expires_with_package_bounds() {
        let policy = Policy(Some(PresencePackage));
        assert_eq!(policy.get_expires(&subscribe(None)), Ok(3600));
        assert_eq!(policy.get_expires(&subscribe(Some(30))), Err(423));
        assert_eq!(policy.get_expires(&subscribe(Some(200_000))), Ok(86_400));
        assert_eq!(policy.get_expires(&subscribe(Some(0))), Ok(0));
    }

    #[test]
    fn test_retry_decision_from_seconds() {
        assert_eq!(RetryDecision::from_seconds(-1), RetryDecision::GiveUp);
        assert_eq!(RetryDecision::from_seconds(0), RetryDecision::RetryNow);
        assert_eq!(RetryDecision::from_seconds(30), RetryDecision::RetryAfter(30));
    }
}

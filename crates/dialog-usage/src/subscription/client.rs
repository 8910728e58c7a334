//! Subscriber side of a subscription (RFC 6665 §4.1)
//!
//! A [`ClientSubscription`] is created when a SUBSCRIBE (or REFER) we sent
//! is confirmed, or implicitly by the first NOTIFY for it. NOTIFYs are
//! handed to the application one at a time through a FIFO queue: the next
//! one is processed only after the previous one was answered, on a fresh
//! stack via a zero-delay `SendNextNotify` timer.
//!
//! Refreshes are scheduled from the expiry the notifier reports, a little
//! before it runs out, and at most one refresh SUBSCRIBE is in flight.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dialog::DialogId;
use crate::errors::{DialogError, DialogResult};
use crate::manager::{DialogUsageManager, DumCommand};
use crate::message::{Contents, Method, SipFrag, SipMessage};
use crate::usage::{
    a_bit_smaller_than, determine_failure_effect, ClientSubscriptionHandle, DumTimeout,
    FailureEffect, TimeoutKind, TimerSeq,
};

use super::base::SubscriptionIdentity;
use super::handler::{ClientSubscriptionHandler, RetryDecision};

/// Failure codes that are retried when the notifier sends Retry-After.
const RETRY_AFTER_CODES: [u16; 7] = [413, 480, 486, 500, 503, 600, 603];

/// A NOTIFY waiting for (or being given to) the application.
#[derive(Debug, Clone)]
pub struct QueuedNotify {
    notify: Arc<SipMessage>,
    out_of_order: bool,
}

impl QueuedNotify {
    fn new(notify: SipMessage, out_of_order: bool) -> Self {
        Self {
            notify: Arc::new(notify),
            out_of_order,
        }
    }

    pub fn notify(&self) -> &SipMessage {
        &self.notify
    }

    pub fn out_of_order(&self) -> bool {
        self.out_of_order
    }
}

#[derive(Debug)]
pub struct ClientSubscription {
    handle: ClientSubscriptionHandle,
    pub(crate) dialog_id: DialogId,
    identity: SubscriptionIdentity,
    pub(crate) last_request: SipMessage,
    on_new_subscription_called: bool,
    ended: bool,
    subscribed: bool,
    refreshing: bool,
    have_queued_refresh: bool,
    queued_refresh_expires: Option<u32>,
    next_refresh_secs: u64,
    last_sub_secs: u64,
    largest_notify_cseq: u32,
    queued_notifies: VecDeque<QueuedNotify>,
    // answered NOTIFYs, freed at the start of the next dispatch
    dustbin: Vec<QueuedNotify>,
    timer_seq: TimerSeq,
}

impl ClientSubscription {
    pub(crate) fn new(
        handle: ClientSubscriptionHandle,
        dialog_id: DialogId,
        last_request: SipMessage,
        identity: SubscriptionIdentity,
        now_secs: u64,
    ) -> Self {
        // REFER subscriptions are reported through the invite session
        let on_new_subscription_called = identity.event_type == "refer";
        Self {
            handle,
            dialog_id,
            identity,
            last_request,
            on_new_subscription_called,
            ended: false,
            subscribed: false,
            refreshing: false,
            have_queued_refresh: false,
            queued_refresh_expires: None,
            next_refresh_secs: 0,
            last_sub_secs: now_secs,
            largest_notify_cseq: 0,
            queued_notifies: VecDeque::new(),
            dustbin: Vec::new(),
            timer_seq: TimerSeq::default(),
        }
    }

    pub fn handle(&self) -> ClientSubscriptionHandle {
        self.handle
    }

    pub fn dialog_id(&self) -> &DialogId {
        &self.dialog_id
    }

    pub fn event_type(&self) -> &str {
        &self.identity.event_type
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.identity.id.as_deref()
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing
    }

    pub fn has_queued_refresh(&self) -> bool {
        self.have_queued_refresh
    }

    pub fn largest_notify_cseq(&self) -> u32 {
        self.largest_notify_cseq
    }

    pub fn queued_notify_count(&self) -> usize {
        self.queued_notifies.len()
    }

    /// Answered NOTIFYs not yet freed.
    pub fn dustbin_len(&self) -> usize {
        self.dustbin.len()
    }

    /// Absolute time (seconds) of the next scheduled refresh, 0 if none.
    pub fn next_refresh_secs(&self) -> u64 {
        self.next_refresh_secs
    }

    pub fn last_sub_secs(&self) -> u64 {
        self.last_sub_secs
    }

    /// The last SUBSCRIBE (or REFER) sent for this subscription.
    pub fn last_request(&self) -> &SipMessage {
        &self.last_request
    }

    pub(crate) fn matches(&self, msg: &SipMessage) -> bool {
        if msg.is_response() && msg.cseq == self.last_request.cseq {
            return true;
        }
        self.identity.matches(msg)
    }

    /// Keeps CSeq correlation after the dialog re-sent `old_cseq` with
    /// credentials.
    pub(crate) fn note_resent(&mut self, old_cseq: u32, request: &SipMessage) {
        if self.last_request.cseq.sequence == old_cseq && self.last_request.cseq.method == request.cseq.method {
            self.last_request = request.clone();
        }
    }

    fn handler(
        dum: &DialogUsageManager,
        handle: ClientSubscriptionHandle,
    ) -> Option<Arc<dyn ClientSubscriptionHandler>> {
        let sub = dum.client_subscriptions.get(&handle)?;
        let handler = dum.client_handler(&sub.identity.event_type);
        if handler.is_none() {
            warn!("No client subscription handler for event {}", sub.identity.event_type);
        }
        handler
    }

    pub(crate) fn dispatch(dum: &mut DialogUsageManager, handle: ClientSubscriptionHandle, msg: SipMessage) {
        let Some(sub) = dum.client_subscriptions.get_mut(&handle) else {
            return;
        };
        sub.dustbin.clear();
        let Some(handler) = Self::handler(dum, handle) else {
            return;
        };
        if msg.is_request() {
            Self::process_notify(dum, handle, &handler, msg);
        } else {
            Self::process_response(dum, handle, &handler, &msg);
        }
    }

    fn process_notify(
        dum: &mut DialogUsageManager,
        handle: ClientSubscriptionHandle,
        handler: &Arc<dyn ClientSubscriptionHandler>,
        notify: SipMessage,
    ) {
        let Some(sub) = dum.client_subscriptions.get(&handle) else {
            return;
        };
        let reused = dum.is_dialog_set_reused(&sub.dialog_id);

        let Some(sub) = dum.client_subscriptions.get_mut(&handle) else {
            return;
        };
        sub.refreshing = false;
        sub.subscribed = true;
        if !sub.on_new_subscription_called && !reused {
            sub.on_new_subscription_called = true;
            handler.on_new_subscription(dum, handle, &notify);
        }

        let Some(sub) = dum.client_subscriptions.get_mut(&handle) else {
            debug!("{} destroyed before its NOTIFY was answered", handle);
            dum.respond_without_usage(&notify, 481);
            return;
        };
        let out_of_order = sub.largest_notify_cseq > notify.cseq.sequence;
        if !out_of_order {
            sub.largest_notify_cseq = notify.cseq.sequence;
            if let Some(contact) = notify.contacts.first() {
                if let Some(dialog) = dum.dialogs.get_mut(&sub.dialog_id) {
                    dialog.remote_target = contact.clone();
                }
            }
        } else {
            debug!(
                "{} received out-of-order NOTIFY cseq={} (largest {})",
                handle, notify.cseq.sequence, sub.largest_notify_cseq
            );
        }

        sub.queued_notifies.push_back(QueuedNotify::new(notify, out_of_order));
        if sub.queued_notifies.len() == 1 {
            Self::process_next_notify(dum, handle, handler);
        } else {
            debug!("{} queued NOTIFY, {} waiting", handle, sub.queued_notifies.len());
        }
    }

    fn process_next_notify(
        dum: &mut DialogUsageManager,
        handle: ClientSubscriptionHandle,
        handler: &Arc<dyn ClientSubscriptionHandler>,
    ) {
        let now = dum.now_secs();
        let default_refresh = dum.config.default_refresh_secs;
        let Some(sub) = dum.client_subscriptions.get_mut(&handle) else {
            return;
        };
        let Some(front) = sub.queued_notifies.front() else {
            return;
        };
        let notify = Arc::clone(&front.notify);
        let out_of_order = front.out_of_order;

        let mut refresh_interval = 0;
        let mut set_refresh_timer = false;
        if !out_of_order {
            let expires = notify
                .subscription_state
                .as_ref()
                .and_then(|state| state.expires)
                .or(sub.last_request.expires)
                .unwrap_or(default_refresh);
            if sub.last_request.expires.is_none() {
                sub.last_request.expires = Some(expires);
            }
            let terminated = notify
                .subscription_state
                .as_ref()
                .is_some_and(|state| state.is_terminated());
            if !terminated {
                refresh_interval = a_bit_smaller_than(expires as u64);
                let candidate = now + refresh_interval;
                if sub.next_refresh_secs == 0 || candidate < sub.next_refresh_secs {
                    sub.next_refresh_secs = candidate;
                    set_refresh_timer = true;
                }
            }
        }

        let Some(state) = notify.subscription_state.clone() else {
            Self::process_notify_without_state(dum, handle, handler, &notify, out_of_order);
            return;
        };

        let ended = sub.ended;
        if state.is_terminated() {
            Self::accept_terminating_notify(dum, handle, &notify, now);
            Self::terminate(dum, handle, handler, Some(&notify));
        } else if ended {
            if let Err(e) = Self::reject_update(dum, handle, 481, None) {
                debug!("{} failed to reject NOTIFY after end: {}", handle, e);
            }
        } else {
            if set_refresh_timer {
                Self::schedule_refresh(dum, handle, refresh_interval);
            }
            if state.is_active() {
                handler.on_update_active(dum, handle, &notify, out_of_order);
            } else if state.is_pending() {
                handler.on_update_pending(dum, handle, &notify, out_of_order);
            } else {
                handler.on_update_extension(dum, handle, &notify, out_of_order);
            }
        }
    }

    /// NOTIFY without Subscription-State. Only REFER progress reports may
    /// omit it; their sipfrag body tells whether the referred request is
    /// still going.
    fn process_notify_without_state(
        dum: &mut DialogUsageManager,
        handle: ClientSubscriptionHandle,
        handler: &Arc<dyn ClientSubscriptionHandler>,
        notify: &SipMessage,
        out_of_order: bool,
    ) {
        let is_refer = dum
            .client_subscriptions
            .get(&handle)
            .is_some_and(|sub| sub.identity.event_type == "refer");
        if is_refer {
            match notify.contents.as_ref().and_then(Contents::sipfrag) {
                Some(SipFrag::Response(code)) if code < 200 => {
                    handler.on_update_extension(dum, handle, notify, out_of_order);
                }
                _ => {
                    if let Err(e) = Self::respond_to_front(dum, handle, 200, None) {
                        debug!("{} failed to accept final REFER NOTIFY: {}", handle, e);
                    }
                    Self::terminate(dum, handle, handler, Some(notify));
                }
            }
        } else {
            warn!("{} received NOTIFY without Subscription-State", handle);
            if let Err(e) =
                Self::respond_to_front(dum, handle, 400, Some("Missing Subscription-State header"))
            {
                debug!("{} failed to reject NOTIFY: {}", handle, e);
            }
            Self::terminate(dum, handle, handler, Some(notify));
        }
    }

    fn accept_terminating_notify(
        dum: &mut DialogUsageManager,
        handle: ClientSubscriptionHandle,
        notify: &SipMessage,
        now: u64,
    ) {
        let Some(sub) = dum.client_subscriptions.get(&handle) else {
            return;
        };
        let timed_out = notify
            .subscription_state
            .as_ref()
            .is_some_and(|state| state.reason_is("timeout"));
        let mut reason = None;
        if timed_out && sub.last_request.expires.unwrap_or(0) != 0 {
            let diagnosis = if sub.next_refresh_secs == 0 {
                if a_bit_smaller_than(now.saturating_sub(sub.last_sub_secs)) < 2 {
                    "Refresh was just sent"
                } else {
                    "No refresh was scheduled"
                }
            } else {
                "Subscription timed out before its refresh"
            };
            info!("{} terminated by timeout: {}", handle, diagnosis);
            reason = Some(diagnosis);
        }
        if let Err(e) = Self::respond_to_front(dum, handle, 200, reason) {
            debug!("{} failed to accept terminating NOTIFY: {}", handle, e);
        }
    }

    fn process_response(
        dum: &mut DialogUsageManager,
        handle: ClientSubscriptionHandle,
        handler: &Arc<dyn ClientSubscriptionHandler>,
        response: &SipMessage,
    ) {
        let code = response.status_code().unwrap_or(0);
        if code < 200 {
            return;
        }
        let Some(sub) = dum.client_subscriptions.get(&handle) else {
            return;
        };
        let reused = dum.is_dialog_set_reused(&sub.dialog_id);
        let Some(sub) = dum.client_subscriptions.get_mut(&handle) else {
            return;
        };
        sub.refreshing = false;

        if code < 300 {
            sub.subscribed = true;
            if let Some(granted) = response.expires {
                if granted < sub.last_request.expires.unwrap_or(0) {
                    sub.last_request.expires = Some(granted);
                }
            }
            if !sub.on_new_subscription_called {
                sub.on_new_subscription_called = true;
                if !reused {
                    handler.on_new_subscription(dum, handle, response);
                }
                if dum.client_subscriptions.get(&handle).is_some_and(|sub| !sub.ended) {
                    let wait = dum.config.wait_for_notify_timeout();
                    Self::arm_timer(dum, handle, TimeoutKind::WaitForNotify, wait);
                }
            } else if !sub.ended {
                Self::send_queued_refresh_request(dum, handle);
            }
            return;
        }

        if sub.ended {
            Self::terminate(dum, handle, handler, Some(response));
            return;
        }

        if code == 481 && response.expires.is_some_and(|expires| expires > 0) {
            info!("{} got 481 for a live subscription, re-subscribing", handle);
            if let Err(e) = Self::re_subscribe(dum, handle) {
                warn!("Re-subscribe of {} failed: {}", handle, e);
            }
            return;
        }

        let retry_after = response.retry_after;
        let transient = code == 408
            || (code == 503 && !response.from_wire)
            || (RETRY_AFTER_CODES.contains(&code) && retry_after.is_some());
        if transient {
            let decision = handler.on_request_retry(dum, handle, retry_after.unwrap_or(0), response);
            let Some(sub) = dum.client_subscriptions.get(&handle) else {
                return;
            };
            if sub.ended {
                return;
            }
            let confirmed = sub.on_new_subscription_called;
            let result = match decision {
                RetryDecision::GiveUp => {
                    Self::terminate(dum, handle, handler, Some(response));
                    Ok(())
                }
                RetryDecision::RetryNow if confirmed => Self::request_refresh(dum, handle, None),
                RetryDecision::RetryNow => Self::re_subscribe(dum, handle),
                RetryDecision::RetryAfter(secs) => {
                    info!("{} retrying in {}s after {}", handle, secs, code);
                    Self::arm_timer(dum, handle, TimeoutKind::SubscriptionRetry, Duration::from_secs(secs as u64));
                    Ok(())
                }
            };
            if let Err(e) = result {
                warn!("{} retry after {} failed: {}", handle, code, e);
            }
            return;
        }

        if code == 423 {
            if let Some(min_expires) = response.min_expires {
                if let Err(e) = Self::request_refresh(dum, handle, Some(min_expires)) {
                    warn!("{} refresh with Min-Expires {} failed: {}", handle, min_expires, e);
                }
                return;
            }
        }
        Self::terminate(dum, handle, handler, Some(response));
    }

    fn terminate(
        dum: &mut DialogUsageManager,
        handle: ClientSubscriptionHandle,
        handler: &Arc<dyn ClientSubscriptionHandler>,
        msg: Option<&SipMessage>,
    ) {
        let Some(sub) = dum.client_subscriptions.get_mut(&handle) else {
            return;
        };
        sub.ended = true;
        handler.on_terminated(dum, handle, msg);
        dum.destroy_client_subscription(handle);
    }

    fn arm_timer(dum: &mut DialogUsageManager, handle: ClientSubscriptionHandle, kind: TimeoutKind, delay: Duration) {
        if let Some(sub) = dum.client_subscriptions.get_mut(&handle) {
            let seq = sub.timer_seq.arm();
            dum.add_timer(DumTimeout::new(kind, handle, seq), delay);
        }
    }

    fn schedule_refresh(dum: &mut DialogUsageManager, handle: ClientSubscriptionHandle, refresh_interval: u64) {
        let min_gap = dum.config.min_refresh_gap_secs as i64;
        let Some(sub) = dum.client_subscriptions.get_mut(&handle) else {
            return;
        };
        if (sub.next_refresh_secs as i64 - sub.last_sub_secs as i64) < min_gap {
            warn!(
                "{} refusing to refresh {}s after the last SUBSCRIBE",
                handle,
                sub.next_refresh_secs as i64 - sub.last_sub_secs as i64
            );
            sub.next_refresh_secs = 0;
            return;
        }
        debug!("{} refresh in {}s", handle, refresh_interval);
        Self::arm_timer(dum, handle, TimeoutKind::Subscription, Duration::from_secs(refresh_interval));
    }

    pub(crate) fn dispatch_timeout(dum: &mut DialogUsageManager, handle: ClientSubscriptionHandle, timeout: DumTimeout) {
        let Some(sub) = dum.client_subscriptions.get_mut(&handle) else {
            debug!("Timer {:?} for destroyed {}", timeout.kind, handle);
            return;
        };
        sub.dustbin.clear();
        let Some(handler) = Self::handler(dum, handle) else {
            return;
        };
        let Some(sub) = dum.client_subscriptions.get(&handle) else {
            return;
        };

        if timeout.kind == TimeoutKind::SendNextNotify {
            if timeout.seq == 0 {
                Self::process_next_notify(dum, handle, &handler);
            }
            return;
        }
        if !sub.timer_seq.is_current(timeout.seq) {
            debug!("Stale {:?} timer for {}", timeout.kind, handle);
            return;
        }

        let ended = sub.ended;
        let confirmed = sub.on_new_subscription_called;
        let result = match timeout.kind {
            TimeoutKind::WaitForNotify if ended => {
                info!("{} no NOTIFY after unsubscribe, terminating", handle);
                Self::terminate(dum, handle, &handler, None);
                Ok(())
            }
            TimeoutKind::WaitForNotify => {
                handler.on_notify_not_received(dum, handle);
                Ok(())
            }
            TimeoutKind::SubscriptionRetry if ended => Ok(()),
            TimeoutKind::SubscriptionRetry if confirmed => Self::request_refresh(dum, handle, None),
            TimeoutKind::SubscriptionRetry => Self::re_subscribe(dum, handle),
            TimeoutKind::Subscription => Self::request_refresh(dum, handle, None),
            TimeoutKind::SendNextNotify => Ok(()),
        };
        if let Err(e) = result {
            warn!("{} timer {:?} failed: {}", handle, timeout.kind, e);
        }
    }

    fn send(dum: &mut DialogUsageManager, handle: ClientSubscriptionHandle, mut msg: SipMessage) {
        let Some(sub) = dum.client_subscriptions.get(&handle) else {
            return;
        };
        let dialog_id = sub.dialog_id.clone();
        if let Some(handler) = dum.client_handler(&sub.identity.event_type) {
            handler.on_ready_to_send(handle, &mut msg);
        }
        let is_response = msg.is_response();
        dum.send_in_dialog(&dialog_id, msg);

        if is_response {
            let more_queued = dum
                .client_subscriptions
                .get(&handle)
                .is_some_and(|sub| !sub.ended && !sub.queued_notifies.is_empty());
            if more_queued {
                dum.add_timer(DumTimeout::new(TimeoutKind::SendNextNotify, handle, 0), Duration::ZERO);
            }
        }
    }

    /// Answers the NOTIFY at the front of the queue and moves it to the
    /// dustbin. Returns the response that was sent.
    fn respond_to_front(
        dum: &mut DialogUsageManager,
        handle: ClientSubscriptionHandle,
        code: u16,
        reason: Option<&str>,
    ) -> DialogResult<SipMessage> {
        let sub = dum
            .client_subscriptions
            .get_mut(&handle)
            .ok_or_else(|| DialogError::usage_not_found(handle))?;
        let queued = sub
            .queued_notifies
            .pop_front()
            .ok_or_else(|| DialogError::invalid_state("queued NOTIFY", "empty NOTIFY queue"))?;
        let dialog = dum
            .dialogs
            .get(&sub.dialog_id)
            .ok_or_else(|| DialogError::dialog_not_found(&sub.dialog_id))?;
        let mut response = dialog.make_response(queued.notify(), code);
        if let Some(reason) = reason {
            response.set_reason(reason);
        }
        sub.dustbin.push(queued);
        Self::send(dum, handle, response.clone());
        Ok(response)
    }

    pub(crate) fn accept_update(
        dum: &mut DialogUsageManager,
        handle: ClientSubscriptionHandle,
        code: u16,
        reason: Option<&str>,
    ) -> DialogResult<()> {
        if !(200..300).contains(&code) {
            return Err(DialogError::usage_use("A NOTIFY must be accepted with a 2xx"));
        }
        Self::respond_to_front(dum, handle, code, reason).map(|_| ())
    }

    pub(crate) fn reject_update(
        dum: &mut DialogUsageManager,
        handle: ClientSubscriptionHandle,
        code: u16,
        reason: Option<&str>,
    ) -> DialogResult<()> {
        if code < 400 {
            return Err(DialogError::usage_use("A NOTIFY must be rejected with a 4xx, 5xx or 6xx"));
        }
        let response = Self::respond_to_front(dum, handle, code, reason)?;
        let effect = determine_failure_effect(&response, &dum.config.additional_transaction_terminating_responses);
        match effect {
            FailureEffect::TransactionTermination | FailureEffect::RetryAfter => Ok(()),
            FailureEffect::OptionalRetryAfter | FailureEffect::ApplicationDependent => Err(
                DialogError::usage_use("Not a reasonable code to reject a NOTIFY with inside an established dialog"),
            ),
            FailureEffect::DialogTermination | FailureEffect::UsageTermination => {
                let still_running = dum.client_subscriptions.get(&handle).is_some_and(|sub| !sub.ended);
                if still_running {
                    if let Some(handler) = Self::handler(dum, handle) {
                        Self::terminate(dum, handle, &handler, Some(&response));
                    }
                }
                Ok(())
            }
        }
    }

    pub(crate) fn request_refresh(
        dum: &mut DialogUsageManager,
        handle: ClientSubscriptionHandle,
        expires: Option<u32>,
    ) -> DialogResult<()> {
        let now = dum.now_secs();
        let wait = dum.config.wait_for_notify_timeout();
        let sub = dum
            .client_subscriptions
            .get_mut(&handle)
            .ok_or_else(|| DialogError::usage_not_found(handle))?;
        if sub.ended {
            debug!("{} is ended, not refreshing", handle);
            return Ok(());
        }
        if sub.refreshing {
            debug!("{} refresh already in flight, queueing", handle);
            sub.have_queued_refresh = true;
            sub.queued_refresh_expires = expires;
            return Ok(());
        }
        let dialog = dum
            .dialogs
            .get_mut(&sub.dialog_id)
            .ok_or_else(|| DialogError::dialog_not_found(&sub.dialog_id))?;

        let mut request = sub.last_request.clone();
        dialog.fill_request(&mut request, Method::Subscribe, true);
        if request.event.is_none() {
            request.event = Some(sub.identity.event_header());
        }
        if let Some(expires) = expires.filter(|e| *e > 0) {
            request.expires = Some(expires);
        }
        sub.last_request = request.clone();
        sub.next_refresh_secs = 0;
        sub.refreshing = true;
        sub.last_sub_secs = now;
        info!("{} sending refresh SUBSCRIBE cseq={}", handle, request.cseq.sequence);

        Self::send(dum, handle, request);
        Self::arm_timer(dum, handle, TimeoutKind::WaitForNotify, wait);
        Ok(())
    }

    fn send_queued_refresh_request(dum: &mut DialogUsageManager, handle: ClientSubscriptionHandle) {
        let Some(sub) = dum.client_subscriptions.get_mut(&handle) else {
            return;
        };
        if !sub.have_queued_refresh {
            return;
        }
        sub.have_queued_refresh = false;
        let expires = sub.queued_refresh_expires.take();
        if let Err(e) = Self::request_refresh(dum, handle, expires) {
            warn!("{} queued refresh failed: {}", handle, e);
        }
    }

    pub(crate) fn end(dum: &mut DialogUsageManager, handle: ClientSubscriptionHandle, immediate: bool) -> DialogResult<()> {
        let wait = dum.config.wait_for_notify_timeout();
        let sub = dum
            .client_subscriptions
            .get_mut(&handle)
            .ok_or_else(|| DialogError::usage_not_found(handle))?;
        if sub.ended {
            debug!("{} already ended", handle);
            return Ok(());
        }
        if immediate || !sub.subscribed {
            info!("{} ended immediately", handle);
            dum.destroy_client_subscription(handle);
            return Ok(());
        }

        let dialog = dum
            .dialogs
            .get_mut(&sub.dialog_id)
            .ok_or_else(|| DialogError::dialog_not_found(&sub.dialog_id))?;
        let mut request = sub.last_request.clone();
        dialog.fill_request(&mut request, Method::Subscribe, true);
        if request.event.is_none() {
            request.event = Some(sub.identity.event_header());
        }
        request.expires = Some(0);
        sub.ended = true;
        sub.last_request = request.clone();
        info!("{} unsubscribing", handle);

        Self::send(dum, handle, request);
        Self::arm_timer(dum, handle, TimeoutKind::WaitForNotify, wait);
        Ok(())
    }

    /// Starts over with a new SUBSCRIBE on a fresh dialog to the original
    /// target and destroys this usage.
    pub(crate) fn re_subscribe(dum: &mut DialogUsageManager, handle: ClientSubscriptionHandle) -> DialogResult<()> {
        let sub = dum
            .client_subscriptions
            .get(&handle)
            .ok_or_else(|| DialogError::usage_not_found(handle))?;
        let target = sub.last_request.to.without_tag();
        let event_type = sub.identity.event_type.clone();
        let expires = sub
            .last_request
            .expires
            .filter(|e| *e > 0)
            .unwrap_or(dum.config.default_refresh_secs);

        let result = dum
            .make_subscription(target, &event_type, expires)
            .map(|subscribe| dum.send(subscribe));
        info!("{} replaced by a new {} subscription", handle, event_type);
        dum.destroy_client_subscription(handle);
        result
    }
}

impl ClientSubscriptionHandle {
    pub fn is_valid(&self, dum: &DialogUsageManager) -> bool {
        dum.client_subscriptions.contains_key(self)
    }

    /// Ends the subscription. Unless `immediate`, a confirmed subscription
    /// is unsubscribed (SUBSCRIBE with Expires 0) and destroyed when the
    /// final NOTIFY or the WaitForNotify timer arrives. Otherwise it is
    /// destroyed right away without `on_terminated`.
    pub fn end(self, dum: &mut DialogUsageManager, immediate: bool) -> DialogResult<()> {
        ClientSubscription::end(dum, self, immediate)
    }

    /// Sends a refresh SUBSCRIBE, optionally changing the requested
    /// duration.
    pub fn request_refresh(self, dum: &mut DialogUsageManager, expires: Option<u32>) -> DialogResult<()> {
        ClientSubscription::request_refresh(dum, self, expires)
    }

    /// Answers the NOTIFY currently handed to the application.
    pub fn accept_update(self, dum: &mut DialogUsageManager, code: u16, reason: Option<&str>) -> DialogResult<()> {
        ClientSubscription::accept_update(dum, self, code, reason)
    }

    /// Rejects the NOTIFY currently handed to the application.
    pub fn reject_update(self, dum: &mut DialogUsageManager, code: u16, reason: Option<&str>) -> DialogResult<()> {
        ClientSubscription::reject_update(dum, self, code, reason)
    }

    pub fn re_subscribe(self, dum: &mut DialogUsageManager) -> DialogResult<()> {
        ClientSubscription::re_subscribe(dum, self)
    }

    pub fn end_command(self, dum: &mut DialogUsageManager, immediate: bool) {
        dum.post(DumCommand::EndClientSubscription { handle: self, immediate });
    }

    pub fn request_refresh_command(self, dum: &mut DialogUsageManager, expires: Option<u32>) {
        dum.post(DumCommand::RefreshClientSubscription { handle: self, expires });
    }

    pub fn accept_update_command(self, dum: &mut DialogUsageManager, code: u16, reason: Option<String>) {
        dum.post(DumCommand::AcceptClientUpdate { handle: self, code, reason });
    }

    pub fn reject_update_command(self, dum: &mut DialogUsageManager, code: u16, reason: Option<String>) {
        dum.post(DumCommand::RejectClientUpdate { handle: self, code, reason });
    }
}

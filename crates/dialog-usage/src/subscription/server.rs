//! Notifier side of a subscription (RFC 6665 §4.2)

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dialog::DialogId;
use crate::errors::{DialogError, DialogResult};
use crate::manager::{DialogUsageManager, DumCommand};
use crate::message::{Contents, Method, SipMessage, SubscriptionStateHeader};
use crate::usage::{
    determine_failure_effect, DumTimeout, FailureEffect, ServerSubscriptionHandle, TimeoutKind,
    TimerSeq,
};

use super::base::SubscriptionIdentity;
use super::handler::ServerSubscriptionHandler;
use super::publication::PublicationKey;
use super::state::{SubDialogState, SubscriptionState, TerminateReason};

#[derive(Debug)]
pub struct ServerSubscription {
    handle: ServerSubscriptionHandle,
    pub(crate) dialog_id: DialogId,
    identity: SubscriptionIdentity,
    document_key: String,
    subscriber: String,
    expires: u32,
    absolute_expiry_secs: u64,
    state: SubscriptionState,
    sub_dialog_state: SubDialogState,
    last_request: Option<SipMessage>,
    // pre-built answer to the SUBSCRIBE being processed
    last_response: Option<SipMessage>,
    outstanding_notifies: Vec<u32>,
    terminating: bool,
    timer_seq: TimerSeq,
}

impl ServerSubscription {
    pub(crate) fn new(handle: ServerSubscriptionHandle, dialog_id: DialogId, request: &SipMessage) -> Self {
        let document_key = request.request_uri().map(|uri| uri.aor()).unwrap_or_default();
        Self {
            handle,
            dialog_id,
            identity: SubscriptionIdentity::from_request(request),
            document_key,
            subscriber: request.from.uri.aor(),
            expires: 0,
            absolute_expiry_secs: 0,
            state: SubscriptionState::Invalid,
            sub_dialog_state: SubDialogState::Initial,
            last_request: None,
            last_response: None,
            outstanding_notifies: Vec::new(),
            terminating: false,
            timer_seq: TimerSeq::default(),
        }
    }

    pub fn handle(&self) -> ServerSubscriptionHandle {
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

    /// AOR of the watched resource.
    pub fn document_key(&self) -> &str {
        &self.document_key
    }

    /// AOR of the subscriber.
    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    /// Granted duration of the current SUBSCRIBE.
    pub fn expires(&self) -> u32 {
        self.expires
    }

    pub fn absolute_expiry_secs(&self) -> u64 {
        self.absolute_expiry_secs
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn sub_dialog_state(&self) -> SubDialogState {
        self.sub_dialog_state
    }

    pub fn last_request(&self) -> Option<&SipMessage> {
        self.last_request.as_ref()
    }

    pub fn publication_key(&self) -> PublicationKey {
        PublicationKey::new(self.identity.event_type.clone(), self.document_key.clone())
    }

    pub(crate) fn matches(&self, msg: &SipMessage) -> bool {
        if msg.is_response() {
            return msg.cseq.method == Method::Notify && self.outstanding_notifies.contains(&msg.cseq.sequence);
        }
        self.identity.matches(msg)
    }

    /// Keeps NOTIFY response correlation after the dialog re-sent
    /// `old_cseq` with credentials.
    pub(crate) fn note_resent(&mut self, old_cseq: u32, new_cseq: u32) {
        for cseq in self.outstanding_notifies.iter_mut().filter(|cseq| **cseq == old_cseq) {
            *cseq = new_cseq;
        }
    }

    fn handler(
        dum: &DialogUsageManager,
        handle: ServerSubscriptionHandle,
    ) -> Option<Arc<dyn ServerSubscriptionHandler>> {
        let sub = dum.server_subscriptions.get(&handle)?;
        let handler = dum.server_handler(&sub.identity.event_type);
        if handler.is_none() {
            warn!("No server subscription handler for event {}", sub.identity.event_type);
        }
        handler
    }

    pub(crate) fn dispatch(dum: &mut DialogUsageManager, handle: ServerSubscriptionHandle, msg: SipMessage) {
        let Some(handler) = Self::handler(dum, handle) else {
            return;
        };
        if msg.is_request() {
            Self::process_subscribe(dum, handle, &handler, msg);
        } else {
            Self::process_notify_response(dum, handle, &handler, &msg);
        }
    }

    fn process_subscribe(
        dum: &mut DialogUsageManager,
        handle: ServerSubscriptionHandle,
        handler: &Arc<dyn ServerSubscriptionHandler>,
        request: SipMessage,
    ) {
        let Some(sub) = dum.server_subscriptions.get_mut(&handle) else {
            return;
        };
        let Some(dialog) = dum.dialogs.get(&sub.dialog_id) else {
            return;
        };
        let has_session = dialog.has_invite_session();
        sub.last_response = Some(dialog.make_response(&request, 200));
        sub.last_request = Some(request.clone());

        let expires = match handler.get_expires(&request) {
            Ok(expires) => expires,
            Err(code) => {
                info!("{} refused SUBSCRIBE with {}", handle, code);
                handler.on_error(dum, handle, &request);
                let rejected = Self::reject(dum, handle, code).map(|mut response| {
                    if code == 423 {
                        response.min_expires = Some(handler.min_expires());
                    }
                    response
                });
                if let Err(e) = rejected.and_then(|response| Self::send(dum, handle, response)) {
                    debug!("{} failed to reject SUBSCRIBE: {}", handle, e);
                }
                return;
            }
        };

        let Some(sub) = dum.server_subscriptions.get_mut(&handle) else {
            return;
        };
        sub.expires = expires;
        let first = sub.state == SubscriptionState::Invalid;

        if expires == 0 {
            if first {
                // fetch: the application answers and sends the single NOTIFY
                sub.state = SubscriptionState::Terminated;
                Self::notify_new_subscription(dum, handle, handler, &request, has_session);
                return;
            }
            info!("{} unsubscribed by {}", handle, sub.subscriber);
            let result = Self::make_notify_expires(dum, handle).and_then(|mut notify| {
                handler.on_expired_by_client(dum, handle, &request, &mut notify);
                let ok = Self::accept(dum, handle, 200)?;
                Self::send(dum, handle, ok)?;
                Self::send(dum, handle, notify)
            });
            if let Err(e) = result {
                debug!("{} failed to finish unsubscribe: {}", handle, e);
            }
            return;
        }

        if first {
            sub.state = SubscriptionState::Init;
            Self::notify_new_subscription(dum, handle, handler, &request, has_session);
        } else {
            handler.on_refresh(dum, handle, &request);
        }
    }

    /// Picks the creation callback by event. A `refer` subscription inside
    /// an invite session belongs to the session, which hears of it through
    /// `InviteSession::on_refer`, so the handler is not told.
    fn notify_new_subscription(
        dum: &mut DialogUsageManager,
        handle: ServerSubscriptionHandle,
        handler: &Arc<dyn ServerSubscriptionHandler>,
        request: &SipMessage,
        has_session: bool,
    ) {
        let is_refer = dum
            .server_subscriptions
            .get(&handle)
            .is_some_and(|sub| sub.identity.event_type == "refer");
        match (is_refer, has_session) {
            (false, _) => handler.on_new_subscription(dum, handle, request),
            (true, false) => handler.on_new_subscription_from_refer(dum, handle, request),
            (true, true) => debug!("{} left to the invite session", handle),
        }
    }

    fn process_notify_response(
        dum: &mut DialogUsageManager,
        handle: ServerSubscriptionHandle,
        handler: &Arc<dyn ServerSubscriptionHandler>,
        response: &SipMessage,
    ) {
        let code = response.status_code().unwrap_or(0);
        if code < 200 {
            return;
        }
        if let Some(sub) = dum.server_subscriptions.get_mut(&handle) {
            sub.outstanding_notifies.retain(|cseq| *cseq != response.cseq.sequence);
        }

        if code < 300 {
            handler.on_notify_accepted(dum, handle, response);
        } else if code < 400 {
            handler.on_error(dum, handle, response);
            Self::terminate(dum, handle, handler);
        } else {
            let effect =
                determine_failure_effect(response, &dum.config.additional_transaction_terminating_responses);
            if effect == FailureEffect::TransactionTermination {
                debug!("{} NOTIFY rejected with {}, subscription kept", handle, code);
                handler.on_notify_rejected(dum, handle, response);
            } else {
                info!("{} NOTIFY failed with {}, terminating", handle, code);
                handler.on_error(dum, handle, response);
                Self::terminate(dum, handle, handler);
            }
        }
    }

    /// Reports `on_terminated` once and destroys the usage.
    fn terminate(
        dum: &mut DialogUsageManager,
        handle: ServerSubscriptionHandle,
        handler: &Arc<dyn ServerSubscriptionHandler>,
    ) {
        let Some(sub) = dum.server_subscriptions.get_mut(&handle) else {
            return;
        };
        if sub.terminating {
            return;
        }
        sub.terminating = true;
        sub.state = SubscriptionState::Terminated;
        handler.on_terminated(dum, handle);
        dum.destroy_server_subscription(handle);
    }

    pub(crate) fn accept(
        dum: &mut DialogUsageManager,
        handle: ServerSubscriptionHandle,
        code: u16,
    ) -> DialogResult<SipMessage> {
        if code >= 300 {
            return Err(DialogError::usage_use("accept requires a 1xx or 2xx status"));
        }
        let sub = dum
            .server_subscriptions
            .get_mut(&handle)
            .ok_or_else(|| DialogError::usage_not_found(handle))?;
        let expires = sub.expires;
        let response = sub
            .last_response
            .as_mut()
            .ok_or_else(|| DialogError::invalid_state("pending SUBSCRIBE", "no SUBSCRIBE to answer"))?;
        response.set_status(code);
        response.expires = Some(expires);
        Ok(response.clone())
    }

    pub(crate) fn reject(
        dum: &mut DialogUsageManager,
        handle: ServerSubscriptionHandle,
        code: u16,
    ) -> DialogResult<SipMessage> {
        if code < 300 {
            return Err(DialogError::usage_use("Failure responses must have a response code of at least 300"));
        }
        let sub = dum
            .server_subscriptions
            .get_mut(&handle)
            .ok_or_else(|| DialogError::usage_not_found(handle))?;
        let response = sub
            .last_response
            .as_mut()
            .ok_or_else(|| DialogError::invalid_state("pending SUBSCRIBE", "no SUBSCRIBE to answer"))?;
        response.set_status(code);
        response.contacts.clear();
        response.expires = None;
        Ok(response.clone())
    }

    pub(crate) fn send(
        dum: &mut DialogUsageManager,
        handle: ServerSubscriptionHandle,
        mut msg: SipMessage,
    ) -> DialogResult<()> {
        let handler = Self::handler(dum, handle)
            .ok_or_else(|| DialogError::internal_error("no handler for server subscription"))?;
        let now = dum.now_secs();
        let sub = dum
            .server_subscriptions
            .get_mut(&handle)
            .ok_or_else(|| DialogError::usage_not_found(handle))?;
        handler.on_ready_to_send(handle, &mut msg);
        let dialog_id = sub.dialog_id.clone();

        let Some(code) = msg.status_code() else {
            sub.outstanding_notifies.push(msg.cseq.sequence);
            let terminated = sub.state == SubscriptionState::Terminated;
            dum.send_in_dialog(&dialog_id, msg);
            if terminated {
                Self::terminate(dum, handle, &handler);
            }
            return Ok(());
        };

        if code < 200 {
            dum.send_in_dialog(&dialog_id, msg);
        } else if code < 300 {
            let expires = msg
                .expires
                .ok_or_else(|| DialogError::usage_use("2xx to SUBSCRIBE must carry Expires"))?;
            sub.last_response = None;
            sub.absolute_expiry_secs = now + expires as u64;
            sub.sub_dialog_state = SubDialogState::Established;
            let arm = sub.state != SubscriptionState::Terminated;
            dum.send_in_dialog(&dialog_id, msg);
            if arm {
                Self::arm_timer(dum, handle, Duration::from_secs(expires as u64));
            }
        } else if code < 400 {
            sub.last_response = None;
            dum.send_in_dialog(&dialog_id, msg);
            Self::terminate(dum, handle, &handler);
        } else {
            sub.last_response = None;
            let effect = determine_failure_effect(&msg, &dum.config.additional_transaction_terminating_responses);
            let should_destroy = sub.sub_dialog_state == SubDialogState::Initial
                || code == 405
                || matches!(effect, FailureEffect::DialogTermination | FailureEffect::UsageTermination);
            dum.send_in_dialog(&dialog_id, msg);
            if should_destroy {
                Self::terminate(dum, handle, &handler);
            }
        }
        Ok(())
    }

    fn arm_timer(dum: &mut DialogUsageManager, handle: ServerSubscriptionHandle, delay: Duration) {
        if let Some(sub) = dum.server_subscriptions.get_mut(&handle) {
            let seq = sub.timer_seq.arm();
            dum.add_timer(DumTimeout::new(TimeoutKind::Subscription, handle, seq), delay);
        }
    }

    /// Builds a NOTIFY whose Subscription-State reflects the current state.
    fn make_notify(
        dum: &mut DialogUsageManager,
        handle: ServerSubscriptionHandle,
        reason: Option<TerminateReason>,
    ) -> DialogResult<SipMessage> {
        let now = dum.now_secs();
        let sub = dum
            .server_subscriptions
            .get(&handle)
            .ok_or_else(|| DialogError::usage_not_found(handle))?;
        let dialog = dum
            .dialogs
            .get_mut(&sub.dialog_id)
            .ok_or_else(|| DialogError::dialog_not_found(&sub.dialog_id))?;

        let mut notify = dialog.make_request(Method::Notify);
        notify.event = Some(sub.identity.event_header());
        let mut state = SubscriptionStateHeader::new(sub.state.as_str());
        if sub.state != SubscriptionState::Terminated {
            let remaining = match sub.sub_dialog_state {
                SubDialogState::Initial => sub.expires as u64,
                SubDialogState::Established => sub.absolute_expiry_secs.saturating_sub(now),
            };
            state = state.with_expires(remaining.min(u32::MAX as u64) as u32);
        }
        if let Some(reason) = reason {
            state = state.with_reason(reason.as_str());
        }
        notify.subscription_state = Some(state);
        Ok(notify)
    }

    pub(crate) fn update(
        dum: &mut DialogUsageManager,
        handle: ServerSubscriptionHandle,
        document: Option<Contents>,
    ) -> DialogResult<SipMessage> {
        if let (Some(contents), Some(handler)) = (&document, Self::handler(dum, handle)) {
            if let Some(package) = handler.event_package() {
                if !package.accepts(&contents.content_type) {
                    return Err(DialogError::usage_use(&format!(
                        "{} does not carry {} bodies",
                        package.name(),
                        contents.content_type
                    )));
                }
            }
        }
        let mut notify = Self::make_notify(dum, handle, None)?;
        notify.contents = document;
        Ok(notify)
    }

    fn make_notify_expires(dum: &mut DialogUsageManager, handle: ServerSubscriptionHandle) -> DialogResult<SipMessage> {
        let sub = dum
            .server_subscriptions
            .get_mut(&handle)
            .ok_or_else(|| DialogError::usage_not_found(handle))?;
        sub.state = SubscriptionState::Terminated;
        Self::make_notify(dum, handle, Some(TerminateReason::Timeout))
    }

    pub(crate) fn end(
        dum: &mut DialogUsageManager,
        handle: ServerSubscriptionHandle,
        reason: TerminateReason,
        document: Option<Contents>,
        retry_after: u32,
    ) -> DialogResult<()> {
        let sub = dum
            .server_subscriptions
            .get_mut(&handle)
            .ok_or_else(|| DialogError::usage_not_found(handle))?;
        if sub.terminating {
            return Ok(());
        }
        sub.state = SubscriptionState::Terminated;
        info!("{} ending with reason {}", handle, reason);
        let mut notify = Self::make_notify(dum, handle, Some(reason))?;
        if retry_after > 0 {
            if let Some(state) = notify.subscription_state.as_mut() {
                state.retry_after = Some(retry_after);
            }
        }
        notify.contents = document;
        Self::send(dum, handle, notify)
    }

    pub(crate) fn set_subscription_state(
        dum: &mut DialogUsageManager,
        handle: ServerSubscriptionHandle,
        state: SubscriptionState,
    ) -> DialogResult<()> {
        if matches!(state, SubscriptionState::Invalid | SubscriptionState::Init) {
            return Err(DialogError::usage_use("Subscription state can only move to pending, active, waiting or terminated"));
        }
        let sub = dum
            .server_subscriptions
            .get_mut(&handle)
            .ok_or_else(|| DialogError::usage_not_found(handle))?;
        if sub.state != SubscriptionState::Terminated {
            sub.state = state;
        }
        Ok(())
    }

    pub(crate) fn dispatch_timeout(dum: &mut DialogUsageManager, handle: ServerSubscriptionHandle, timeout: DumTimeout) {
        let Some(sub) = dum.server_subscriptions.get(&handle) else {
            debug!("Timer {:?} for destroyed {}", timeout.kind, handle);
            return;
        };
        if timeout.kind != TimeoutKind::Subscription || !sub.timer_seq.is_current(timeout.seq) {
            return;
        }
        let Some(handler) = Self::handler(dum, handle) else {
            return;
        };
        info!("{} expired", handle);
        let result = Self::make_notify_expires(dum, handle).and_then(|mut notify| {
            handler.on_expired(dum, handle, &mut notify);
            Self::send(dum, handle, notify)
        });
        if let Err(e) = result {
            debug!("{} expiry NOTIFY not sent: {}", handle, e);
        }
    }

    /// Tells the application new state was published for its document.
    pub(crate) fn deliver_publication(
        dum: &mut DialogUsageManager,
        handle: ServerSubscriptionHandle,
        contents: Option<&Contents>,
    ) -> bool {
        let Some(handler) = Self::handler(dum, handle) else {
            return false;
        };
        handler.on_published(dum, handle, contents);
        true
    }
}

impl ServerSubscriptionHandle {
    pub fn is_valid(&self, dum: &DialogUsageManager) -> bool {
        dum.server_subscriptions.contains_key(self)
    }

    /// The pending answer to the current SUBSCRIBE with a success status
    /// and the granted Expires.
    pub fn accept(self, dum: &mut DialogUsageManager, code: u16) -> DialogResult<SipMessage> {
        ServerSubscription::accept(dum, self, code)
    }

    /// The pending answer to the current SUBSCRIBE with a failure status.
    pub fn reject(self, dum: &mut DialogUsageManager, code: u16) -> DialogResult<SipMessage> {
        ServerSubscription::reject(dum, self, code)
    }

    pub fn send(self, dum: &mut DialogUsageManager, msg: SipMessage) -> DialogResult<()> {
        ServerSubscription::send(dum, self, msg)
    }

    /// NOTIFY without a body, reflecting the current state.
    pub fn neutral_notify(self, dum: &mut DialogUsageManager) -> DialogResult<SipMessage> {
        ServerSubscription::update(dum, self, None)
    }

    /// NOTIFY carrying `document`, which must be a type the package accepts.
    pub fn update(self, dum: &mut DialogUsageManager, document: Option<Contents>) -> DialogResult<SipMessage> {
        ServerSubscription::update(dum, self, document)
    }

    /// Sends a terminated NOTIFY and destroys the usage once it is out.
    pub fn end(
        self,
        dum: &mut DialogUsageManager,
        reason: TerminateReason,
        document: Option<Contents>,
        retry_after: u32,
    ) -> DialogResult<()> {
        ServerSubscription::end(dum, self, reason, document, retry_after)
    }

    pub fn set_subscription_state(self, dum: &mut DialogUsageManager, state: SubscriptionState) -> DialogResult<()> {
        ServerSubscription::set_subscription_state(dum, self, state)
    }

    pub fn send_command(self, dum: &mut DialogUsageManager, msg: SipMessage) {
        dum.post(DumCommand::SendServerMessage { handle: self, msg });
    }

    pub fn end_command(self, dum: &mut DialogUsageManager, reason: TerminateReason) {
        dum.post(DumCommand::EndServerSubscription { handle: self, reason });
    }
}

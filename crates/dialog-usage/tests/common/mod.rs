//! Shared fixtures for the dialog usage test suites
//!
//! The manager is driven synchronously: outbound messages land in a
//! [`RecordingSink`], timers are recorded by [`ManualTimers`] and fired by
//! hand, and time comes from a [`ManualClock`].

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use rvoip_dialog_usage::prelude::*;
use rvoip_dialog_usage::message::{make_response, new_branch, new_call_id};
use rvoip_dialog_usage::subscription::{PresencePackage, SubscriptionState};

pub const ALICE: &str = "sip:alice@atlanta.com";
pub const ALICE_CONTACT: &str = "sip:alice@192.0.2.1";
pub const BOB: &str = "sip:bob@biloxi.com";
pub const BOB_CONTACT: &str = "sip:bob@192.0.2.2";

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<SipMessage>>,
}

impl RecordingSink {
    pub fn take(&self) -> Vec<SipMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn last(&self) -> Option<SipMessage> {
        self.sent.lock().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl MessageSink for RecordingSink {
    fn send(&self, message: SipMessage) {
        self.sent.lock().push(message);
    }
}

#[derive(Default)]
pub struct ManualTimers {
    armed: Mutex<Vec<(DumTimeout, Duration)>>,
}

impl ManualTimers {
    pub fn take(&self) -> Vec<(DumTimeout, Duration)> {
        std::mem::take(&mut *self.armed.lock())
    }

    /// Most recently armed timer of `kind`.
    pub fn last_of(&self, kind: TimeoutKind) -> Option<(DumTimeout, Duration)> {
        self.armed.lock().iter().rev().find(|(t, _)| t.kind == kind).copied()
    }

    pub fn count_of(&self, kind: TimeoutKind) -> usize {
        self.armed.lock().iter().filter(|(t, _)| t.kind == kind).count()
    }
}

impl TimerService for ManualTimers {
    fn add_timer(&self, timeout: DumTimeout, delay: Duration) {
        self.armed.lock().push((timeout, delay));
    }
}

pub struct ManualClock {
    now: Mutex<u64>,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance(&self, secs: u64) {
        *self.now.lock() += secs;
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        *self.now.lock()
    }
}

pub struct Harness {
    pub dum: DialogUsageManager,
    pub sink: Arc<RecordingSink>,
    pub timers: Arc<ManualTimers>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        let config = DumConfig::builder()
            .with_local_aor(ALICE)
            .with_contact(ALICE_CONTACT)
            .build()
            .expect("valid test configuration");
        let sink = Arc::new(RecordingSink::default());
        let timers = Arc::new(ManualTimers::default());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let dum = DialogUsageManager::new(config, sink.clone(), timers.clone()).with_clock(clock.clone());
        Self { dum, sink, timers, clock }
    }

    /// Fires the most recent timer of `kind`.
    pub fn fire(&mut self, kind: TimeoutKind) {
        let (timeout, _) = self.timers.last_of(kind).expect("timer armed");
        self.dum.process_timeout(timeout);
    }

    /// Sent messages of `method` (requests) since the last `take`.
    pub fn sent_requests(&self, method: Method) -> Vec<SipMessage> {
        self.sink
            .take()
            .into_iter()
            .filter(|m| m.method() == Some(method))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    New(ClientSubscriptionHandle),
    Pending(ClientSubscriptionHandle, bool),
    Active(ClientSubscriptionHandle, bool),
    Extension(ClientSubscriptionHandle, bool),
    Terminated(ClientSubscriptionHandle, Option<u16>),
    Retry(ClientSubscriptionHandle, u32),
    NotifyNotReceived(ClientSubscriptionHandle),
}

/// Records callbacks. With `auto_accept` every NOTIFY is answered 200 from
/// inside the callback.
pub struct RecordingClientHandler {
    pub events: Mutex<Vec<ClientEvent>>,
    pub auto_accept: bool,
    pub retry: Mutex<RetryDecision>,
}

impl RecordingClientHandler {
    pub fn new(auto_accept: bool) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            auto_accept,
            retry: Mutex::new(RetryDecision::GiveUp),
        })
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&ClientEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    fn update(&self, dum: &mut DialogUsageManager, handle: ClientSubscriptionHandle, event: ClientEvent) {
        self.events.lock().push(event);
        if self.auto_accept {
            handle.accept_update(dum, 200, None).expect("accept NOTIFY");
        }
    }
}

impl ClientSubscriptionHandler for RecordingClientHandler {
    fn on_update_pending(&self, dum: &mut DialogUsageManager, h: ClientSubscriptionHandle, _: &SipMessage, ooo: bool) {
        self.update(dum, h, ClientEvent::Pending(h, ooo));
    }

    fn on_update_active(&self, dum: &mut DialogUsageManager, h: ClientSubscriptionHandle, _: &SipMessage, ooo: bool) {
        self.update(dum, h, ClientEvent::Active(h, ooo));
    }

    fn on_update_extension(&self, dum: &mut DialogUsageManager, h: ClientSubscriptionHandle, _: &SipMessage, ooo: bool) {
        self.update(dum, h, ClientEvent::Extension(h, ooo));
    }

    fn on_terminated(&self, _: &mut DialogUsageManager, h: ClientSubscriptionHandle, msg: Option<&SipMessage>) {
        self.events
            .lock()
            .push(ClientEvent::Terminated(h, msg.and_then(SipMessage::status_code)));
    }

    fn on_new_subscription(&self, _: &mut DialogUsageManager, h: ClientSubscriptionHandle, _: &SipMessage) {
        self.events.lock().push(ClientEvent::New(h));
    }

    fn on_request_retry(
        &self,
        _: &mut DialogUsageManager,
        h: ClientSubscriptionHandle,
        retry_after: u32,
        _: &SipMessage,
    ) -> RetryDecision {
        self.events.lock().push(ClientEvent::Retry(h, retry_after));
        *self.retry.lock()
    }

    fn on_notify_not_received(&self, _: &mut DialogUsageManager, h: ClientSubscriptionHandle) {
        self.events.lock().push(ClientEvent::NotifyNotReceived(h));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    New(ServerSubscriptionHandle),
    NewFromRefer(ServerSubscriptionHandle),
    Refresh(ServerSubscriptionHandle),
    Published(ServerSubscriptionHandle, Option<String>),
    NotifyAccepted(ServerSubscriptionHandle),
    NotifyRejected(ServerSubscriptionHandle),
    Terminated(ServerSubscriptionHandle),
    Error(ServerSubscriptionHandle),
    ExpiredByClient(ServerSubscriptionHandle),
    Expired(ServerSubscriptionHandle),
}

/// Records callbacks. With `auto_accept` a new subscription is answered
/// 200, made active and sent a NOTIFY right away.
pub struct RecordingServerHandler {
    pub events: Mutex<Vec<ServerEvent>>,
    pub auto_accept: bool,
    package: Option<PresencePackage>,
}

impl RecordingServerHandler {
    pub fn new(auto_accept: bool, with_package: bool) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            auto_accept,
            package: with_package.then_some(PresencePackage),
        })
    }

    pub fn events(&self) -> Vec<ServerEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&ServerEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    fn accept_and_notify(dum: &mut DialogUsageManager, h: ServerSubscriptionHandle) {
        let ok = h.accept(dum, 200).expect("accept SUBSCRIBE");
        h.send(dum, ok).expect("send 200");
        if h.is_valid(dum) {
            h.set_subscription_state(dum, SubscriptionState::Active).expect("activate");
            let notify = h.neutral_notify(dum).expect("build NOTIFY");
            h.send(dum, notify).expect("send NOTIFY");
        }
    }
}

impl ServerSubscriptionHandler for RecordingServerHandler {
    fn on_new_subscription(&self, dum: &mut DialogUsageManager, h: ServerSubscriptionHandle, _: &SipMessage) {
        self.events.lock().push(ServerEvent::New(h));
        if self.auto_accept {
            Self::accept_and_notify(dum, h);
        }
    }

    fn on_new_subscription_from_refer(&self, dum: &mut DialogUsageManager, h: ServerSubscriptionHandle, _: &SipMessage) {
        self.events.lock().push(ServerEvent::NewFromRefer(h));
        if self.auto_accept {
            Self::accept_and_notify(dum, h);
        }
    }

    fn on_refresh(&self, dum: &mut DialogUsageManager, h: ServerSubscriptionHandle, _: &SipMessage) {
        self.events.lock().push(ServerEvent::Refresh(h));
        Self::accept_and_notify(dum, h);
    }

    fn on_published(&self, _: &mut DialogUsageManager, h: ServerSubscriptionHandle, contents: Option<&Contents>) {
        self.events
            .lock()
            .push(ServerEvent::Published(h, contents.map(|c| c.content_type.clone())));
    }

    fn on_notify_accepted(&self, _: &mut DialogUsageManager, h: ServerSubscriptionHandle, _: &SipMessage) {
        self.events.lock().push(ServerEvent::NotifyAccepted(h));
    }

    fn on_notify_rejected(&self, _: &mut DialogUsageManager, h: ServerSubscriptionHandle, _: &SipMessage) {
        self.events.lock().push(ServerEvent::NotifyRejected(h));
    }

    fn on_terminated(&self, _: &mut DialogUsageManager, h: ServerSubscriptionHandle) {
        self.events.lock().push(ServerEvent::Terminated(h));
    }

    fn on_error(&self, _: &mut DialogUsageManager, h: ServerSubscriptionHandle, _: &SipMessage) {
        self.events.lock().push(ServerEvent::Error(h));
    }

    fn on_expired_by_client(
        &self,
        _: &mut DialogUsageManager,
        h: ServerSubscriptionHandle,
        _: &SipMessage,
        _: &mut SipMessage,
    ) {
        self.events.lock().push(ServerEvent::ExpiredByClient(h));
    }

    fn on_expired(&self, _: &mut DialogUsageManager, h: ServerSubscriptionHandle, _: &mut SipMessage) {
        self.events.lock().push(ServerEvent::Expired(h));
    }

    fn event_package(&self) -> Option<&dyn EventPackage> {
        self.package.as_ref().map(|p| p as &dyn EventPackage)
    }
}

// ---------------------------------------------------------------------------
// Peer-side message builders
// ---------------------------------------------------------------------------

/// Response from the peer to one of our requests. `remote_tag` becomes the
/// To tag; 1xx-2xx carry the peer Contact.
pub fn peer_response(request: &SipMessage, code: u16, remote_tag: &str) -> SipMessage {
    let mut response = make_response(request, code);
    response.to.tag = Some(remote_tag.to_string());
    if (101..300).contains(&code) {
        response.contacts = vec![NameAddr::new(Uri::new(BOB_CONTACT))];
    }
    if code < 300 {
        response.expires = request.expires;
    }
    response.from_wire = true;
    response
}

/// NOTIFY from the peer for the subscription created by `subscribe`.
pub fn peer_notify(subscribe: &SipMessage, remote_tag: &str, cseq: u32, state: SubscriptionStateHeader) -> SipMessage {
    let mut notify = SipMessage::new_request(Method::Notify, Uri::new(ALICE_CONTACT))
        .with_from(subscribe.to.without_tag().with_tag(remote_tag))
        .with_to(subscribe.from.clone())
        .with_call_id(subscribe.call_id.clone())
        .with_cseq(cseq)
        .with_contact(NameAddr::new(Uri::new(BOB_CONTACT)))
        .with_subscription_state(state);
    notify.event = subscribe.event.clone();
    notify.via_branch = Some(new_branch());
    notify.from_wire = true;
    notify
}

/// Out-of-dialog SUBSCRIBE from Bob to Alice's presence.
pub fn peer_subscribe(event: &str, expires: Option<u32>) -> SipMessage {
    let mut subscribe = SipMessage::new_request(Method::Subscribe, Uri::new(ALICE))
        .with_from(NameAddr::new(Uri::new(BOB)).with_tag("bob-tag"))
        .with_to(NameAddr::new(Uri::new(ALICE)))
        .with_call_id(new_call_id())
        .with_cseq(1)
        .with_contact(NameAddr::new(Uri::new(BOB_CONTACT)))
        .with_event(EventHeader::new(event));
    subscribe.expires = expires;
    subscribe.via_branch = Some(new_branch());
    subscribe.from_wire = true;
    subscribe
}

/// Follow-up request from the peer inside the dialog `initial` created,
/// addressed to our tag.
pub fn peer_in_dialog(initial: &SipMessage, local_tag: &str, method: Method, cseq: u32) -> SipMessage {
    let mut request = SipMessage::new_request(method, Uri::new(ALICE_CONTACT))
        .with_from(initial.from.clone())
        .with_to(initial.to.without_tag().with_tag(local_tag))
        .with_call_id(initial.call_id.clone())
        .with_cseq(cseq)
        .with_contact(NameAddr::new(Uri::new(BOB_CONTACT)));
    request.event = initial.event.clone();
    request.via_branch = Some(new_branch());
    request.from_wire = true;
    request
}

/// Our To tag in a response we sent.
pub fn local_tag_of(response: &SipMessage) -> String {
    response.to.tag.clone().expect("response carries our tag")
}

pub fn active(expires: u32) -> SubscriptionStateHeader {
    SubscriptionStateHeader::new("active").with_expires(expires)
}

pub fn pending(expires: u32) -> SubscriptionStateHeader {
    SubscriptionStateHeader::new("pending").with_expires(expires)
}

pub fn terminated(reason: &str) -> SubscriptionStateHeader {
    SubscriptionStateHeader::new("terminated").with_reason(reason)
}

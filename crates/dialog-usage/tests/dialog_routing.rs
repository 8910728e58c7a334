//! Message routing, dialog lifecycle and the injected seams

mod common;

use std::sync::Arc;

use parking_lot::Mutex;

use common::*;
use rvoip_dialog_usage::events::DumEvent;
use rvoip_dialog_usage::message::{new_branch, new_call_id};
use rvoip_dialog_usage::prelude::*;

/// Adds credentials once per request.
struct FakeAuth;

impl ClientAuthManager for FakeAuth {
    fn handle(&self, request: &mut SipMessage, response: &SipMessage) -> bool {
        let challenged = matches!(response.status_code(), Some(401 | 407));
        if !challenged || request.authorization.is_some() {
            return false;
        }
        request.authorization = Some("Digest username=\"alice\"".to_string());
        true
    }
}

type SessionLog = Arc<Mutex<Vec<String>>>;

struct FakeSession {
    log: SessionLog,
}

impl InviteSession for FakeSession {
    fn dispatch(&mut self, msg: &SipMessage) {
        self.log.lock().push(msg.brief());
    }

    fn end(&mut self) {
        self.log.lock().push("end".to_string());
    }

    fn on_refer(&mut self, _: ServerSubscriptionHandle, _: &SipMessage) {
        self.log.lock().push("on_refer".to_string());
    }

    fn refer_no_sub(&mut self, _: &SipMessage) {
        self.log.lock().push("refer_no_sub".to_string());
    }

    fn on_refer_accepted(&mut self, subscription: Option<ClientSubscriptionHandle>, _: &SipMessage) {
        self.log
            .lock()
            .push(format!("refer_accepted:{}", subscription.is_some()));
    }

    fn flow_terminated(&mut self) {
        self.log.lock().push("flow_terminated".to_string());
    }
}

#[derive(Default)]
struct FakeFactory {
    log: SessionLog,
    dialogs: Mutex<Vec<DialogId>>,
}

impl InviteSessionFactory for FakeFactory {
    fn create(&self, dialog: &DialogId, _: &SipMessage) -> Option<Box<dyn InviteSession>> {
        self.dialogs.lock().push(dialog.clone());
        Some(Box::new(FakeSession { log: self.log.clone() }))
    }
}

fn peer_invite() -> SipMessage {
    SipMessage::new_request(Method::Invite, Uri::new(ALICE))
        .with_from(NameAddr::new(Uri::new(BOB)).with_tag("bob-call"))
        .with_to(NameAddr::new(Uri::new(ALICE)))
        .with_call_id(new_call_id())
        .with_cseq(1)
        .with_contact(NameAddr::new(Uri::new(BOB_CONTACT)))
        .from_wire()
}

/// Bob calls Alice; the factory creates the session. Returns the INVITE,
/// the dialog and the session log.
fn call(h: &mut Harness) -> (SipMessage, DialogId, Arc<FakeFactory>) {
    let factory = Arc::new(FakeFactory::default());
    h.dum.set_invite_session_factory(factory.clone());
    let invite = peer_invite();
    h.dum.process_message(invite.clone());
    let dialog_id = factory.dialogs.lock()[0].clone();
    (invite, dialog_id, factory)
}

fn status_of_last(h: &Harness) -> Option<u16> {
    h.sink.last().and_then(|m| m.status_code())
}

#[test]
fn test_request_for_unknown_dialog_gets_481() {
    let mut h = Harness::new();
    let mut notify = SipMessage::new_request(Method::Notify, Uri::new(ALICE_CONTACT))
        .with_from(NameAddr::new(Uri::new(BOB)).with_tag("bob1"))
        .with_to(NameAddr::new(Uri::new(ALICE)).with_tag("nobody"))
        .with_call_id(new_call_id())
        .with_subscription_state(active(60))
        .from_wire();
    notify.via_branch = Some(new_branch());
    h.dum.process_message(notify.clone());
    assert_eq!(status_of_last(&h), Some(481));

    // out of dialog NOTIFY as well
    notify.to.tag = None;
    h.dum.process_message(notify);
    assert_eq!(status_of_last(&h), Some(481));
    assert_eq!(h.dum.dialog_set_count(), 0);
}

#[test]
fn test_unsupported_out_of_dialog_method_gets_405() {
    let mut h = Harness::new();
    let options = SipMessage::new_request(Method::Options, Uri::new(ALICE))
        .with_from(NameAddr::new(Uri::new(BOB)).with_tag("bob1"))
        .with_to(NameAddr::new(Uri::new(ALICE)))
        .with_call_id(new_call_id())
        .from_wire();
    h.dum.process_message(options);
    assert_eq!(status_of_last(&h), Some(405));

    // INVITE without a session factory
    h.dum.process_message(peer_invite());
    assert_eq!(status_of_last(&h), Some(405));
    assert_eq!(h.dum.dialog_count(), 0);
}

#[test]
fn test_subscribe_for_unknown_package_gets_489() {
    let mut h = Harness::new();
    h.dum.process_message(peer_subscribe("message-summary", Some(3600)));
    assert_eq!(status_of_last(&h), Some(489));
    assert_eq!(h.dum.dialog_count(), 0);
    assert_eq!(h.dum.dialog_set_count(), 0);
}

#[test]
fn test_in_dialog_subscribe_checks() {
    let mut h = Harness::new();
    let handler = RecordingServerHandler::new(true, true);
    h.dum.add_server_subscription_handler("presence", handler.clone());
    let subscribe = peer_subscribe("presence", Some(3600));
    h.dum.process_message(subscribe.clone());
    let tag = local_tag_of(&h.sink.take()[0]);

    let mut no_event = peer_in_dialog(&subscribe, &tag, Method::Subscribe, 2);
    no_event.event = None;
    h.dum.process_message(no_event);
    assert_eq!(status_of_last(&h), Some(400));

    let mut refer_event = peer_in_dialog(&subscribe, &tag, Method::Subscribe, 3);
    refer_event.event = Some(EventHeader::new("refer"));
    h.dum.process_message(refer_event);
    assert_eq!(status_of_last(&h), Some(403));

    let mut unknown = peer_in_dialog(&subscribe, &tag, Method::Notify, 4);
    unknown.event = Some(EventHeader::new("dialog"));
    unknown.subscription_state = Some(active(60));
    h.dum.process_message(unknown);
    assert_eq!(status_of_last(&h), Some(406));

    // the presence subscription keeps the dialog alive
    assert_eq!(h.dum.dialog_count(), 1);
    let dialog_id = DialogId::new(subscribe.call_id.clone(), tag, "bob-tag");
    assert_eq!(h.dum.dialog(&dialog_id).unwrap().remote_cseq(), 4);
}

#[test]
fn test_refer_checks() {
    let mut h = Harness::new();
    let refer = SipMessage::new_request(Method::Refer, Uri::new(ALICE))
        .with_from(NameAddr::new(Uri::new(BOB)).with_tag("bob1"))
        .with_to(NameAddr::new(Uri::new(ALICE)))
        .with_call_id(new_call_id())
        .with_contact(NameAddr::new(Uri::new(BOB_CONTACT)))
        .from_wire();

    h.dum.process_message(refer.clone());
    assert_eq!(status_of_last(&h), Some(400));
    assert_eq!(h.dum.dialog_count(), 0);

    let no_sub = refer
        .clone()
        .with_call_id(new_call_id())
        .with_refer_to(NameAddr::new(Uri::new("sip:carol@atlanta.com")))
        .with_require("norefersub");
    h.dum.process_message(no_sub);
    assert_eq!(status_of_last(&h), Some(403));

    let no_handler = refer
        .with_call_id(new_call_id())
        .with_refer_to(NameAddr::new(Uri::new("sip:carol@atlanta.com")));
    h.dum.process_message(no_handler);
    assert_eq!(status_of_last(&h), Some(489));
    assert_eq!(h.dum.dialog_count(), 0);
}

#[test]
fn test_out_of_dialog_refer_creates_implicit_subscription() {
    let mut h = Harness::new();
    let handler = RecordingServerHandler::new(true, true);
    h.dum.add_server_subscription_handler("refer", handler.clone());

    let mut refer = SipMessage::new_request(Method::Refer, Uri::new(ALICE))
        .with_from(NameAddr::new(Uri::new(BOB)).with_tag("bob1"))
        .with_to(NameAddr::new(Uri::new(ALICE)))
        .with_call_id(new_call_id())
        .with_contact(NameAddr::new(Uri::new(BOB_CONTACT)))
        .with_refer_to(NameAddr::new(Uri::new("sip:carol@atlanta.com")))
        .from_wire();
    refer.cseq.sequence = 7;
    h.dum.process_message(refer);

    assert!(matches!(handler.events().as_slice(), [ServerEvent::NewFromRefer(_), ..]));
    let sent = h.sink.take();
    assert_eq!(sent[0].status_code(), Some(200));
    let notify = &sent[1];
    assert_eq!(notify.method(), Some(Method::Notify));
    assert_eq!(notify.event_type(), Some("refer"));
    assert_eq!(notify.event_id(), None);
}

#[test]
fn test_in_dialog_refer_reaches_invite_session() {
    let mut h = Harness::new();
    let handler = RecordingServerHandler::new(true, true);
    h.dum.add_server_subscription_handler("refer", handler.clone());
    let (invite, dialog_id, factory) = call(&mut h);

    let refer = peer_in_dialog(&invite, &dialog_id.local_tag, Method::Refer, 2)
        .with_refer_to(NameAddr::new(Uri::new("sip:carol@atlanta.com")));
    h.dum.process_message(refer);

    // the session owns the implicit subscription; the handler hears nothing
    assert!(handler.events().is_empty());
    assert!(factory.log.lock().contains(&"on_refer".to_string()));
    assert!(h.sent_requests(Method::Notify).is_empty());

    let subs = h.dum.find_server_subscriptions(&dialog_id, "refer");
    assert_eq!(subs.len(), 1);
    let sub = subs[0];
    assert_eq!(h.dum.server_subscription(sub).unwrap().state(), SubscriptionState::Init);

    let accepted = sub.accept(&mut h.dum, 202).unwrap();
    sub.send(&mut h.dum, accepted).unwrap();
    sub.set_subscription_state(&mut h.dum, SubscriptionState::Active).unwrap();
    let notify = sub.neutral_notify(&mut h.dum).unwrap();
    sub.send(&mut h.dum, notify).unwrap();
    let notify = h.sent_requests(Method::Notify).pop().unwrap();
    assert_eq!(notify.event_id(), Some("2"));
    assert!(handler.events().is_empty());

    let no_sub = peer_in_dialog(&invite, &dialog_id.local_tag, Method::Refer, 3)
        .with_refer_to(NameAddr::new(Uri::new("sip:carol@atlanta.com")))
        .with_require("norefersub");
    h.dum.process_message(no_sub);
    assert!(factory.log.lock().contains(&"refer_no_sub".to_string()));
}

#[test]
fn test_invite_family_goes_to_session() {
    let mut h = Harness::new();
    let (invite, dialog_id, factory) = call(&mut h);
    assert!(h.dum.dialog(&dialog_id).unwrap().has_invite_session());

    let bye = peer_in_dialog(&invite, &dialog_id.local_tag, Method::Bye, 2);
    h.dum.process_message(bye);
    let log = factory.log.lock().clone();
    assert_eq!(log.len(), 2);
    assert!(log[1].contains("BYE"));

    let session = h.dum.detach_invite_session(&dialog_id);
    assert!(session.is_some());
    assert_eq!(h.dum.dialog_count(), 0);
}

#[test]
fn test_bye_without_session_gets_481() {
    let mut h = Harness::new();
    let handler = RecordingServerHandler::new(true, true);
    h.dum.add_server_subscription_handler("presence", handler);
    let subscribe = peer_subscribe("presence", Some(3600));
    h.dum.process_message(subscribe.clone());
    let tag = local_tag_of(&h.sink.take()[0]);

    h.dum.process_message(peer_in_dialog(&subscribe, &tag, Method::Bye, 2));
    assert_eq!(status_of_last(&h), Some(481));
    assert_eq!(h.dum.dialog_count(), 1);
}

#[test]
fn test_notify_for_refer_creates_subscription_in_invite_dialog() {
    let mut h = Harness::new();
    let handler = RecordingClientHandler::new(true);
    h.dum.add_client_subscription_handler("refer", handler.clone());
    let (invite, dialog_id, factory) = call(&mut h);

    let notify = peer_in_dialog(&invite, &dialog_id.local_tag, Method::Notify, 2)
        .with_event(EventHeader::new("refer").with_id("7"))
        .with_subscription_state(active(60))
        .with_contents(Contents::sipfrag_status(100, "Trying"));
    h.dum.process_message(notify);

    assert!(factory.log.lock().contains(&"refer_accepted:true".to_string()));
    // REFER subscriptions are announced through the session only
    assert_eq!(handler.count(|e| matches!(e, ClientEvent::New(_))), 0);
    assert_eq!(handler.count(|e| matches!(e, ClientEvent::Active(_, false))), 1);
    let subs = h.dum.find_client_subscriptions(&dialog_id, "refer");
    assert_eq!(subs.len(), 1);
    assert_eq!(h.dum.client_subscription(subs[0]).unwrap().subscription_id(), Some("7"));
}

#[test]
fn test_out_of_dialog_refer_progress() {
    let mut h = Harness::new();
    let handler = RecordingClientHandler::new(true);
    h.dum.add_client_subscription_handler("refer", handler.clone());

    let refer = h
        .dum
        .make_refer(
            NameAddr::new(Uri::new(BOB)),
            NameAddr::new(Uri::new("sip:carol@atlanta.com")),
        )
        .unwrap();
    h.dum.send(refer.clone());
    assert_eq!(h.sink.take().len(), 1);
    h.dum.process_message(peer_response(&refer, 202, "bob1"));

    let mut progress = peer_notify(&refer, "bob1", 1, active(60))
        .with_contents(Contents::sipfrag_status(180, "Ringing"));
    progress.event = Some(EventHeader::new("refer").with_id("1"));
    h.dum.process_message(progress);
    assert_eq!(handler.count(|e| matches!(e, ClientEvent::Active(..))), 1);

    let mut done = peer_notify(&refer, "bob1", 2, active(60))
        .with_contents(Contents::sipfrag_status(200, "OK"));
    done.event = Some(EventHeader::new("refer").with_id("1"));
    done.subscription_state = None;
    h.dum.process_message(done);

    assert_eq!(status_of_last(&h), Some(200));
    assert_eq!(handler.count(|e| matches!(e, ClientEvent::Terminated(..))), 1);
    assert_eq!(h.dum.dialog_count(), 0);
}

#[test]
fn test_initial_subscribe_retried_with_credentials() {
    let mut h = Harness::new();
    let handler = RecordingClientHandler::new(true);
    h.dum.add_client_subscription_handler("presence", handler.clone());
    h.dum.set_client_auth_manager(Arc::new(FakeAuth));

    h.dum
        .subscribe(NameAddr::new(Uri::new(BOB)), "presence", 3600)
        .unwrap();
    let subscribe = h.sink.take().pop().unwrap();
    h.dum.process_message(peer_response(&subscribe, 401, "proxy"));

    let resent = h.sink.take().pop().expect("retried");
    assert_eq!(resent.cseq.sequence, subscribe.cseq.sequence + 1);
    assert!(resent.authorization.is_some());
    assert_ne!(resent.via_branch, subscribe.via_branch);
    assert_eq!(h.dum.dialog_count(), 0);

    h.dum.process_message(peer_response(&resent, 200, "bob1"));
    assert_eq!(handler.count(|e| matches!(e, ClientEvent::New(_))), 1);

    // a second challenge is not answered again
    let mut h2 = Harness::new();
    h2.dum.add_client_subscription_handler("presence", handler.clone());
    h2.dum
        .subscribe(NameAddr::new(Uri::new(BOB)), "presence", 3600)
        .unwrap();
    let subscribe = h2.sink.take().pop().unwrap();
    h2.dum.process_message(peer_response(&subscribe, 407, "proxy"));
    assert!(h2.sink.take().is_empty());
}

#[test]
fn test_initial_subscribe_retried_with_min_expires() {
    let mut h = Harness::new();
    let handler = RecordingClientHandler::new(true);
    h.dum.add_client_subscription_handler("presence", handler.clone());
    h.dum
        .subscribe(NameAddr::new(Uri::new(BOB)), "presence", 30)
        .unwrap();
    let subscribe = h.sink.take().pop().unwrap();

    h.dum
        .process_message(peer_response(&subscribe, 423, "bob1").with_min_expires(600));

    let resent = h.sink.take().pop().unwrap();
    assert_eq!(resent.expires, Some(600));
    assert_eq!(resent.call_id, subscribe.call_id);
    assert_eq!(resent.cseq.sequence, subscribe.cseq.sequence + 1);
    assert_eq!(handler.count(|_| true), 0);
}

#[test]
fn test_in_dialog_refresh_retried_with_credentials() {
    let mut h = Harness::new();
    let handler = RecordingClientHandler::new(true);
    h.dum.add_client_subscription_handler("presence", handler.clone());
    h.dum.set_client_auth_manager(Arc::new(FakeAuth));
    h.dum
        .subscribe(NameAddr::new(Uri::new(BOB)), "presence", 3600)
        .unwrap();
    let subscribe = h.sink.take().pop().unwrap();
    h.dum.process_message(peer_response(&subscribe, 200, "bob1"));
    let sub = match handler.events()[0] {
        ClientEvent::New(sub) => sub,
        ref other => panic!("unexpected {:?}", other),
    };

    sub.request_refresh(&mut h.dum, None).unwrap();
    let refresh = h.sent_requests(Method::Subscribe).pop().unwrap();
    h.dum.process_message(peer_response(&refresh, 407, "bob1"));

    let resent = h.sent_requests(Method::Subscribe).pop().expect("retried");
    assert_eq!(resent.cseq.sequence, refresh.cseq.sequence + 1);
    assert!(resent.authorization.is_some());
    assert_eq!(
        h.dum.client_subscription(sub).unwrap().last_request().cseq,
        resent.cseq
    );

    h.dum.process_message(peer_response(&resent, 200, "bob1"));
    assert!(!h.dum.client_subscription(sub).unwrap().is_refreshing());
    assert_eq!(handler.count(|e| matches!(e, ClientEvent::Terminated(..))), 0);
}

#[test]
fn test_provisional_without_contact_is_ignored() {
    let mut h = Harness::new();
    let handler = RecordingClientHandler::new(true);
    h.dum.add_client_subscription_handler("presence", handler.clone());
    h.dum
        .subscribe(NameAddr::new(Uri::new(BOB)), "presence", 3600)
        .unwrap();
    let subscribe = h.sink.take().pop().unwrap();

    let mut trying = peer_response(&subscribe, 100, "bob1");
    trying.to.tag = None;
    h.dum.process_message(trying);
    let mut ringing = peer_response(&subscribe, 180, "bob1");
    ringing.contacts.clear();
    h.dum.process_message(ringing);

    assert_eq!(h.dum.dialog_count(), 0);
    assert_eq!(h.dum.dialog_set_count(), 1);
    assert!(handler.events().is_empty());
}

#[test]
fn test_end_dialog_ends_every_usage() {
    let mut h = Harness::new();
    let server = RecordingServerHandler::new(true, true);
    h.dum.add_server_subscription_handler("refer", server.clone());
    let (invite, dialog_id, factory) = call(&mut h);
    let refer = peer_in_dialog(&invite, &dialog_id.local_tag, Method::Refer, 2)
        .with_refer_to(NameAddr::new(Uri::new("sip:carol@atlanta.com")));
    h.dum.process_message(refer);
    h.sink.take();

    h.dum.end_dialog(&dialog_id).unwrap();

    assert!(factory.log.lock().contains(&"end".to_string()));
    let notify = h.sent_requests(Method::Notify).pop().unwrap();
    let state = notify.subscription_state.unwrap();
    assert!(state.is_terminated());
    assert!(state.reason_is("timeout"));
    assert_eq!(server.count(|e| matches!(e, ServerEvent::Terminated(_))), 1);
    // the invite session still holds the dialog
    assert_eq!(h.dum.dialog_count(), 1);
    assert!(h.dum.end_dialog(&DialogId::new("nope", "a", "b")).is_err());
}

#[test]
fn test_flow_terminated_reaches_every_usage() {
    let mut h = Harness::new();
    let client = RecordingClientHandler::new(true);
    let server = RecordingServerHandler::new(true, true);
    h.dum.add_client_subscription_handler("presence", client.clone());
    h.dum.add_server_subscription_handler("presence", server.clone());

    // Bob watches Alice
    let incoming = peer_subscribe("presence", Some(3600));
    h.dum.process_message(incoming.clone());
    let tag = local_tag_of(&h.sink.take()[0]);
    let server_dialog = DialogId::new(incoming.call_id.clone(), tag, "bob-tag");
    h.dum.flow_terminated(&server_dialog).unwrap();
    let notify = h.sent_requests(Method::Notify).pop().unwrap();
    assert!(notify.subscription_state.unwrap().reason_is("deactivated"));
    assert_eq!(h.dum.dialog_count(), 0);

    // Alice watches Bob
    h.dum
        .subscribe(NameAddr::new(Uri::new(BOB)), "presence", 3600)
        .unwrap();
    let subscribe = h.sink.take().pop().unwrap();
    h.dum.process_message(peer_response(&subscribe, 200, "bob1"));
    let client_dialog = DialogId::new(subscribe.call_id.clone(), subscribe.from.tag.clone().unwrap(), "bob1");
    h.dum.flow_terminated(&client_dialog).unwrap();

    let resubscribe = h.sent_requests(Method::Subscribe).pop().unwrap();
    assert_ne!(resubscribe.call_id, subscribe.call_id);
    assert!(h.dum.dialog(&client_dialog).is_none());
}

#[test]
fn test_redirected_keeps_dialog_set() {
    let mut h = Harness::new();
    let (_, dialog_id, _) = call(&mut h);

    assert!(h.dum.redirected(&dialog_id));
    assert!(h.dum.dialog(&dialog_id).is_none());
    let set = h.dum.dialog_set(&dialog_id.dialog_set_id()).expect("set kept");
    assert!(set.is_reused());
    assert!(!h.dum.redirected(&dialog_id));
}

#[test]
fn test_attach_invite_session_once() {
    let mut h = Harness::new();
    let handler = RecordingServerHandler::new(true, true);
    h.dum.add_server_subscription_handler("presence", handler);
    let subscribe = peer_subscribe("presence", Some(3600));
    h.dum.process_message(subscribe.clone());
    let tag = local_tag_of(&h.sink.take()[0]);
    let dialog_id = DialogId::new(subscribe.call_id.clone(), tag, "bob-tag");

    let log = SessionLog::default();
    h.dum
        .attach_invite_session(&dialog_id, Box::new(FakeSession { log: log.clone() }))
        .unwrap();
    let err = h
        .dum
        .attach_invite_session(&dialog_id, Box::new(FakeSession { log }))
        .unwrap_err();
    assert!(!err.is_usage_error());
    assert!(h.dum.dialog(&dialog_id).unwrap().has_invite_session());
}

#[test]
fn test_lifecycle_events_are_emitted() {
    let mut h = Harness::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    h.dum.set_event_sender(tx);
    let handler = RecordingServerHandler::new(true, true);
    h.dum.add_server_subscription_handler("presence", handler.clone());

    let subscribe = peer_subscribe("presence", Some(3600));
    h.dum.process_message(subscribe);
    let sub = match handler.events()[0] {
        ServerEvent::New(sub) => sub,
        ref other => panic!("unexpected {:?}", other),
    };
    h.dum.publish("presence", "alice@atlanta.com", None);
    sub.end(&mut h.dum, TerminateReason::Deactivated, None, 0).unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events[0], DumEvent::DialogCreated { .. }));
    match &events[1] {
        DumEvent::ServerSubscriptionCreated { handle, event_type, document_key, .. } => {
            assert_eq!(*handle, sub);
            assert_eq!(event_type, "presence");
            assert_eq!(document_key, "alice@atlanta.com");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(events.contains(&DumEvent::PublicationDelivered {
        event_type: "presence".to_string(),
        document_key: "alice@atlanta.com".to_string(),
        subscribers: 1,
    }));
    assert!(events.contains(&DumEvent::ServerSubscriptionTerminated { handle: sub }));
    assert!(matches!(events.last(), Some(DumEvent::DialogDestroyed { .. })));
}

#[test]
fn test_posted_publish_command() {
    let mut h = Harness::new();
    let handler = RecordingServerHandler::new(true, true);
    h.dum.add_server_subscription_handler("presence", handler.clone());
    h.dum.process_message(peer_subscribe("presence", Some(3600)));

    h.dum.post(DumCommand::Publish {
        event_type: "presence".to_string(),
        document_key: "alice@atlanta.com".to_string(),
        contents: Some(Contents::new("application/pidf+xml", "<presence/>")),
    });
    assert_eq!(handler.count(|e| matches!(e, ServerEvent::Published(..))), 0);
    assert_eq!(h.dum.run_posted_commands(), 1);
    assert_eq!(handler.count(|e| matches!(e, ServerEvent::Published(..))), 1);
}

//! Inbound message routing
//!
//! Requests and responses are matched to a dialog set by Call-ID and local
//! tag, then to a dialog by remote tag, then to a usage by method, event
//! and CSeq. Messages that fit nowhere are answered with the closest SIP
//! error instead of being dropped.

use tracing::{debug, info, warn};

use crate::dialog::{Dialog, DialogId, DialogSet, DialogSetId};
use crate::events::DumEvent;
use crate::message::{make_response, new_branch, new_tag, Method, SipMessage};
use crate::subscription::{ClientSubscription, ServerSubscription, SubscriptionIdentity};
use crate::usage::{ClientSubscriptionHandle, DumTimeout, ServerSubscriptionHandle, UsageHandle};

use super::core::DialogUsageManager;

impl DialogUsageManager {
    /// Processes one inbound message, then any commands posted while doing
    /// so.
    pub fn process_message(&mut self, msg: SipMessage) {
        debug!("Received {}", msg.brief());
        if msg.is_request() {
            self.process_request(msg);
        } else {
            self.process_response(msg);
        }
        self.run_posted_commands();
    }

    /// Delivers a fired timer to its usage. Timers of destroyed usages and
    /// superseded timers are ignored.
    pub fn process_timeout(&mut self, timeout: DumTimeout) {
        match timeout.usage {
            UsageHandle::Client(handle) => ClientSubscription::dispatch_timeout(self, handle, timeout),
            UsageHandle::Server(handle) => ServerSubscription::dispatch_timeout(self, handle, timeout),
        }
        self.run_posted_commands();
    }

    fn process_request(&mut self, request: SipMessage) {
        let Some(method) = request.method() else {
            return;
        };
        if request.to.tag.is_none() {
            self.process_out_of_dialog_request(method, request);
            return;
        }
        let set_id = DialogId::from_inbound(&request).dialog_set_id();
        if !self.dialog_sets.contains_key(&set_id) {
            if method != Method::Ack {
                debug!("No dialog set {} for {}", set_id, request.brief());
                self.send_raw(make_response(&request, 481));
            }
            return;
        }
        self.dispatch_to_dialog_set(set_id, request);
    }

    fn process_out_of_dialog_request(&mut self, method: Method, request: SipMessage) {
        match method {
            Method::Subscribe | Method::Refer | Method::Invite => {
                if method == Method::Invite && self.invite_factory.is_none() {
                    self.send_raw(make_response(&request, 405));
                    return;
                }
                let set_id = DialogSetId::new(request.call_id.clone(), new_tag());
                debug!("New UAS dialog set {} for {}", set_id, request.brief());
                self.dialog_sets.insert(set_id.clone(), DialogSet::new_uas(set_id.clone()));
                self.dispatch_to_dialog_set(set_id, request);
            }
            Method::Ack => {}
            Method::Notify
            | Method::Bye
            | Method::Info
            | Method::Prack
            | Method::Update
            | Method::Cancel => {
                self.send_raw(make_response(&request, 481));
            }
            _ => {
                self.send_raw(make_response(&request, 405));
            }
        }
    }

    fn process_response(&mut self, response: SipMessage) {
        let set_id = DialogId::from_inbound(&response).dialog_set_id();
        if !self.dialog_sets.contains_key(&set_id) {
            debug!("Dropping response without dialog set: {}", response.brief());
            return;
        }
        self.dispatch_to_dialog_set(set_id, response);
    }

    fn dispatch_to_dialog_set(&mut self, set_id: DialogSetId, msg: SipMessage) {
        let remote_tag = if msg.is_request() { &msg.from.tag } else { &msg.to.tag };
        let dialog_id = DialogId::new(
            set_id.call_id.clone(),
            set_id.local_tag.clone(),
            remote_tag.clone().unwrap_or_default(),
        );

        if let Some(code) = msg.status_code() {
            if code == 100 {
                return;
            }
            if self.retry_creator(&set_id, &msg, code) {
                return;
            }
        }

        if let Some(dialog) = self.dialogs.get(&dialog_id) {
            if msg.is_request() && dialog.destroying {
                self.send_raw(dialog.make_response(&msg, 481));
                return;
            }
            self.dispatch_to_dialog(&dialog_id, msg);
            return;
        }

        let Some(set) = self.dialog_sets.get(&set_id) else {
            return;
        };
        let creator = set.creator.clone();

        if msg.is_request() {
            let forms_dialog = matches!(
                msg.method(),
                Some(Method::Subscribe | Method::Refer | Method::Notify | Method::Invite)
            );
            if !forms_dialog {
                self.send_raw(make_response(&msg, 481));
                self.cleanup_empty_dialog_set(&set_id);
                return;
            }
            match Dialog::new_uas(&msg, &set_id.local_tag, creator.as_ref(), &self.config) {
                Ok(dialog) => {
                    self.insert_dialog(&set_id, dialog);
                    self.dispatch_to_dialog(&dialog_id, msg);
                }
                Err(e) => {
                    warn!("Cannot create dialog from {}: {}", msg.brief(), e);
                    self.send_raw(make_response(&msg, 400));
                    self.cleanup_empty_dialog_set(&set_id);
                }
            }
            return;
        }

        let Some(creator) = creator else {
            return;
        };
        if !set.is_creator_response(&msg) {
            debug!("Response {} does not match the initial request", msg.brief());
            return;
        }
        let code = msg.status_code().unwrap_or(0);
        if code < 200 && (msg.to.tag.is_none() || msg.contacts.is_empty()) {
            return;
        }
        if code >= 300 && !set.dialogs.is_empty() {
            for id in set.dialogs.clone() {
                self.dispatch_to_dialog(&id, msg.clone());
            }
            return;
        }
        match Dialog::new_uac(&msg, &creator, &self.config) {
            Ok(dialog) => {
                let dialog_id = dialog.id.clone();
                self.insert_dialog(&set_id, dialog);
                self.dispatch_to_dialog(&dialog_id, msg);
            }
            Err(e) => {
                debug!("Dropping {}: {}", msg.brief(), e);
            }
        }
    }

    /// Re-sends the initial request of a locally created set after a 423 or
    /// an auth challenge. Returns true when the response was consumed.
    fn retry_creator(&mut self, set_id: &DialogSetId, response: &SipMessage, code: u16) -> bool {
        let auth = self.client_auth.clone();
        let Some(set) = self.dialog_sets.get_mut(set_id) else {
            return false;
        };
        if !set.dialogs.is_empty() || !set.is_creator_response(response) {
            return false;
        }
        let Some(creator) = set.creator.as_mut() else {
            return false;
        };

        let retried = match code {
            423 if creator.cseq.method == Method::Subscribe => match response.min_expires {
                Some(min_expires) => {
                    info!("Retrying initial SUBSCRIBE with Expires {}", min_expires);
                    creator.expires = Some(min_expires);
                    true
                }
                None => false,
            },
            401 | 407 => match &auth {
                Some(auth) => auth.handle(creator, response),
                None => false,
            },
            _ => false,
        };
        if !retried {
            return false;
        }
        creator.cseq.sequence += 1;
        creator.via_branch = Some(new_branch());
        let request = creator.clone();
        self.send_raw(request);
        true
    }

    fn insert_dialog(&mut self, set_id: &DialogSetId, dialog: Dialog) {
        let dialog_id = dialog.id.clone();
        if let Some(set) = self.dialog_sets.get_mut(set_id) {
            set.add_dialog(dialog_id.clone());
        }
        self.dialogs.insert(dialog_id.clone(), dialog);
        info!("Created dialog {}", dialog_id);
        self.emit(DumEvent::DialogCreated { dialog_id });
    }

    fn respond_in_dialog(&mut self, dialog_id: &DialogId, request: &SipMessage, code: u16) {
        let response = match self.dialogs.get(dialog_id) {
            Some(dialog) => dialog.make_response(request, code),
            None => make_response(request, code),
        };
        self.send_in_dialog(dialog_id, response);
    }

    /// Rejects a request the dialog cannot handle and lets the dialog die
    /// if nothing else lives in it.
    fn reject_in_dialog(&mut self, dialog_id: &DialogId, request: &SipMessage, code: u16) {
        debug!("Rejecting {} with {} in dialog {}", request.brief(), code, dialog_id);
        self.respond_in_dialog(dialog_id, request, code);
        self.possibly_die(dialog_id);
    }

    pub(crate) fn find_client_subscription_for(
        &self,
        dialog_id: &DialogId,
        msg: &SipMessage,
    ) -> Option<ClientSubscriptionHandle> {
        let dialog = self.dialogs.get(dialog_id)?;
        dialog
            .client_subscriptions
            .iter()
            .copied()
            .find(|h| self.client_subscriptions.get(h).is_some_and(|sub| sub.matches(msg)))
    }

    pub(crate) fn find_server_subscription_for(
        &self,
        dialog_id: &DialogId,
        msg: &SipMessage,
    ) -> Option<ServerSubscriptionHandle> {
        let dialog = self.dialogs.get(dialog_id)?;
        dialog
            .server_subscriptions
            .iter()
            .copied()
            .find(|h| self.server_subscriptions.get(h).is_some_and(|sub| sub.matches(msg)))
    }

    fn dispatch_to_dialog(&mut self, dialog_id: &DialogId, msg: SipMessage) {
        let Some(dialog) = self.dialogs.get_mut(dialog_id) else {
            return;
        };
        if msg.is_request() {
            dialog.note_remote_cseq(&msg);
            dialog.handle_target_refresh(&msg);
            self.dispatch_request(dialog_id, msg);
        } else {
            self.dispatch_response(dialog_id, msg);
        }
    }

    fn dispatch_request(&mut self, dialog_id: &DialogId, request: SipMessage) {
        let Some(method) = request.method() else {
            return;
        };
        match method {
            Method::Subscribe => self.dispatch_subscribe(dialog_id, request),
            Method::Refer => self.dispatch_refer(dialog_id, request),
            Method::Notify => self.dispatch_notify(dialog_id, request),
            Method::Invite
            | Method::Ack
            | Method::Bye
            | Method::Cancel
            | Method::Update
            | Method::Info
            | Method::Message
            | Method::Prack => self.dispatch_invite_family(dialog_id, request),
            _ => self.reject_in_dialog(dialog_id, &request, 405),
        }
    }

    fn dispatch_subscribe(&mut self, dialog_id: &DialogId, request: SipMessage) {
        if let Some(handle) = self.find_server_subscription_for(dialog_id, &request) {
            ServerSubscription::dispatch(self, handle, request);
            return;
        }
        let Some(event_type) = request.event_type() else {
            self.reject_in_dialog(dialog_id, &request, 400);
            return;
        };
        if event_type == "refer" {
            self.reject_in_dialog(dialog_id, &request, 403);
            return;
        }
        if self.server_handler(event_type).is_none() {
            info!("No server subscription handler for {}", event_type);
            self.reject_in_dialog(dialog_id, &request, 489);
            return;
        }
        match self.create_server_subscription(dialog_id, &request) {
            Some(handle) => ServerSubscription::dispatch(self, handle, request),
            None => self.respond_without_usage(&request, 481),
        }
    }

    fn dispatch_refer(&mut self, dialog_id: &DialogId, request: SipMessage) {
        if request.refer_to.is_none() {
            self.reject_in_dialog(dialog_id, &request, 400);
            return;
        }
        let no_sub = request.refer_sub == Some(false) || request.requires_option("norefersub");
        if no_sub {
            match self.dialogs.get_mut(dialog_id).and_then(|d| d.invite_session.as_mut()) {
                Some(session) => session.refer_no_sub(&request),
                None => self.reject_in_dialog(dialog_id, &request, 403),
            }
            return;
        }

        let handle = match self.find_server_subscription_for(dialog_id, &request) {
            Some(handle) => handle,
            None => {
                if self.server_handler("refer").is_none() {
                    self.reject_in_dialog(dialog_id, &request, 489);
                    return;
                }
                let Some(handle) = self.create_server_subscription(dialog_id, &request) else {
                    return;
                };
                handle
            }
        };
        ServerSubscription::dispatch(self, handle, request.clone());
        if self.server_subscriptions.contains_key(&handle) {
            if let Some(session) = self.dialogs.get_mut(dialog_id).and_then(|d| d.invite_session.as_mut()) {
                session.on_refer(handle, &request);
            }
        }
    }

    fn dispatch_notify(&mut self, dialog_id: &DialogId, notify: SipMessage) {
        if let Some(handle) = self.find_client_subscription_for(dialog_id, &notify) {
            ClientSubscription::dispatch(self, handle, notify);
            return;
        }

        let creator = self
            .dialog_sets
            .get(&dialog_id.dialog_set_id())
            .and_then(|set| set.creator.clone())
            .filter(|creator| matches!(creator.method(), Some(Method::Subscribe | Method::Refer)));
        if let Some(creator) = creator {
            let identity = SubscriptionIdentity::from_request(&creator);
            if identity.matches(&notify) && self.client_handler(&identity.event_type).is_some() {
                if let Some(handle) = self.create_client_subscription(dialog_id, creator, identity) {
                    ClientSubscription::dispatch(self, handle, notify);
                    return;
                }
            }
        }

        let has_session = self.dialogs.get(dialog_id).is_some_and(Dialog::has_invite_session);
        let refer_event = notify.event_type().is_none_or(|event| event == "refer");
        if has_session && refer_event && self.client_handler("refer").is_some() {
            let identity = SubscriptionIdentity {
                event_type: "refer".to_string(),
                id: notify.event_id().map(str::to_string),
            };
            let request = SipMessage::new_request(Method::Subscribe, notify.from.uri.clone())
                .with_to(notify.from.clone())
                .with_from(notify.to.clone())
                .with_call_id(notify.call_id.clone())
                .with_event(identity.event_header());
            if let Some(handle) = self.create_client_subscription(dialog_id, request, identity) {
                if let Some(session) = self.dialogs.get_mut(dialog_id).and_then(|d| d.invite_session.as_mut()) {
                    session.on_refer_accepted(Some(handle), &notify);
                }
                ClientSubscription::dispatch(self, handle, notify);
                return;
            }
        }

        info!("No subscription for {} in dialog {}", notify.brief(), dialog_id);
        self.reject_in_dialog(dialog_id, &notify, 406);
    }

    fn dispatch_invite_family(&mut self, dialog_id: &DialogId, request: SipMessage) {
        let method = request.method();
        let Some(dialog) = self.dialogs.get_mut(dialog_id) else {
            return;
        };
        if let Some(session) = dialog.invite_session.as_mut() {
            session.dispatch(&request);
            return;
        }
        match method {
            Some(Method::Invite) => {
                let session = self
                    .invite_factory
                    .as_ref()
                    .and_then(|factory| factory.create(dialog_id, &request));
                match session {
                    Some(mut session) => {
                        session.dispatch(&request);
                        dialog.invite_session = Some(session);
                    }
                    None => self.reject_in_dialog(dialog_id, &request, 405),
                }
            }
            Some(Method::Ack | Method::Cancel) => {
                debug!("Spurious {} in dialog {}", request.brief(), dialog_id);
            }
            _ => self.reject_in_dialog(dialog_id, &request, 481),
        }
    }

    fn dispatch_response(&mut self, dialog_id: &DialogId, response: SipMessage) {
        let code = response.status_code().unwrap_or(0);
        if (code == 401 || code == 407) && self.resend_with_credentials(dialog_id, &response) {
            return;
        }

        let is_creator_response = self
            .dialog_sets
            .get(&dialog_id.dialog_set_id())
            .is_some_and(|set| set.is_creator_response(&response));
        let Some(dialog) = self.dialogs.get_mut(dialog_id) else {
            return;
        };
        if code >= 200 {
            dialog.requests.remove(&response.cseq.sequence);
        }
        dialog.handle_target_refresh(&response);
        if (200..300).contains(&code) && is_creator_response {
            dialog.refresh_route_set(&response);
        }

        match response.cseq.method {
            Method::Invite
            | Method::Ack
            | Method::Bye
            | Method::Cancel
            | Method::Update
            | Method::Info
            | Method::Message
            | Method::Prack => {
                if let Some(session) = dialog.invite_session.as_mut() {
                    session.dispatch(&response);
                }
            }
            Method::Refer if dialog.has_invite_session() => {
                if let Some(session) = dialog.invite_session.as_mut() {
                    if code >= 300 {
                        session.on_refer_rejected(&response);
                    } else if code >= 200 && !session.refer_subscription_requested() {
                        session.on_refer_accepted(None, &response);
                    }
                    if code >= 200 {
                        session.non_invite_transaction_complete();
                    }
                }
            }
            Method::Subscribe | Method::Refer => self.dispatch_subscription_response(dialog_id, response),
            Method::Notify if code >= 300 => {
                dialog.destroying = true;
                for handle in dialog.server_subscriptions.clone() {
                    ServerSubscription::dispatch(self, handle, response.clone());
                }
                if let Some(dialog) = self.dialogs.get_mut(dialog_id) {
                    dialog.destroying = false;
                }
                self.possibly_die(dialog_id);
            }
            Method::Notify => {
                if let Some(handle) = self.find_server_subscription_for(dialog_id, &response) {
                    ServerSubscription::dispatch(self, handle, response);
                }
            }
            _ => debug!("Ignoring {} in dialog {}", response.brief(), dialog_id),
        }
    }

    fn dispatch_subscription_response(&mut self, dialog_id: &DialogId, response: SipMessage) {
        if let Some(handle) = self.find_client_subscription_for(dialog_id, &response) {
            ClientSubscription::dispatch(self, handle, response);
            return;
        }
        let creator = self
            .dialog_sets
            .get(&dialog_id.dialog_set_id())
            .and_then(|set| set.creator.clone())
            .filter(|creator| creator.cseq.method == response.cseq.method);
        if let Some(creator) = creator {
            let identity = SubscriptionIdentity::from_request(&creator);
            if self.client_handler(&identity.event_type).is_some() {
                if let Some(handle) = self.create_client_subscription(dialog_id, creator, identity) {
                    ClientSubscription::dispatch(self, handle, response);
                    return;
                }
            }
        }
        debug!("No subscription for {} in dialog {}", response.brief(), dialog_id);
        self.possibly_die(dialog_id);
    }

    /// Re-sends a challenged in-dialog request once the auth manager added
    /// credentials. Returns true when the response was consumed.
    fn resend_with_credentials(&mut self, dialog_id: &DialogId, response: &SipMessage) -> bool {
        let Some(auth) = self.client_auth.clone() else {
            return false;
        };
        let Some(dialog) = self.dialogs.get_mut(dialog_id) else {
            return false;
        };
        let old_cseq = response.cseq.sequence;
        let Some(mut request) = dialog.requests.get(&old_cseq).cloned() else {
            return false;
        };
        if !auth.handle(&mut request, response) {
            return false;
        }
        dialog.requests.remove(&old_cseq);
        dialog.local_cseq += 1;
        request.cseq.sequence = dialog.local_cseq;
        request.via_branch = Some(new_branch());
        info!("Re-sending {} with credentials", request.brief());

        for handle in dialog.client_subscriptions.clone() {
            if let Some(sub) = self.client_subscriptions.get_mut(&handle) {
                sub.note_resent(old_cseq, &request);
            }
        }
        for handle in dialog.server_subscriptions.clone() {
            if let Some(sub) = self.server_subscriptions.get_mut(&handle) {
                sub.note_resent(old_cseq, request.cseq.sequence);
            }
        }
        self.send_in_dialog(dialog_id, request);
        true
    }
}

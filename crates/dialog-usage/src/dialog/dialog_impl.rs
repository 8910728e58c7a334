//! Dialog implementation for RFC 3261 SIP dialogs
//!
//! A [`Dialog`] holds the dialog state (route set, targets, CSeq counters)
//! and the handles of the usages living in it. Message routing to usages is
//! done by the manager, which owns both the dialogs and the usages; this
//! module only builds in-dialog requests and responses and keeps the state
//! current.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DumConfig;
use crate::errors::{DialogError, DialogResult};
use crate::message::{make_response, new_branch, Method, NameAddr, SipMessage, StartLine};
use crate::usage::{ClientSubscriptionHandle, ServerSubscriptionHandle};

use super::dialog_id::{DialogId, DialogSetId};
use super::invite::InviteSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogType {
    Invitation,
    Subscription,
}

/// A SIP dialog as defined in RFC 3261
pub struct Dialog {
    pub(crate) id: DialogId,
    dialog_type: DialogType,
    pub(crate) local_name_addr: NameAddr,
    pub(crate) remote_name_addr: NameAddr,
    pub(crate) local_contact: NameAddr,
    pub(crate) remote_target: NameAddr,
    pub(crate) route_set: Vec<NameAddr>,
    pub(crate) local_cseq: u32,
    pub(crate) remote_cseq: u32,
    /// Outstanding local requests by CSeq, kept for auth retries
    pub(crate) requests: BTreeMap<u32, SipMessage>,
    pub(crate) client_subscriptions: Vec<ClientSubscriptionHandle>,
    pub(crate) server_subscriptions: Vec<ServerSubscriptionHandle>,
    pub(crate) invite_session: Option<Box<dyn InviteSession>>,
    pub(crate) destroying: bool,
    max_forwards: u32,
    allow: Vec<Method>,
    supported: Vec<String>,
}

impl fmt::Debug for Dialog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialog")
            .field("id", &self.id)
            .field("dialog_type", &self.dialog_type)
            .field("remote_target", &self.remote_target)
            .field("route_set", &self.route_set)
            .field("local_cseq", &self.local_cseq)
            .field("remote_cseq", &self.remote_cseq)
            .field("client_subscriptions", &self.client_subscriptions)
            .field("server_subscriptions", &self.server_subscriptions)
            .field("invite_session", &self.invite_session.is_some())
            .field("destroying", &self.destroying)
            .finish_non_exhaustive()
    }
}

fn dialog_type_for(method: Method) -> DialogType {
    if method == Method::Invite {
        DialogType::Invitation
    } else {
        DialogType::Subscription
    }
}

/// Dialog-forming messages must carry exactly one SIP/SIPS Contact.
fn single_sip_contact(msg: &SipMessage) -> DialogResult<NameAddr> {
    match msg.contacts.as_slice() {
        [contact] if contact.uri.is_sip() => Ok(contact.clone()),
        [_] => Err(DialogError::protocol_error("Contact is not a SIP or SIPS URI")),
        [] => Err(DialogError::protocol_error("Missing Contact in dialog-forming message")),
        _ => Err(DialogError::protocol_error("Multiple Contacts in dialog-forming message")),
    }
}

impl Dialog {
    fn blank(id: DialogId, dialog_type: DialogType, config: &DumConfig) -> Self {
        Self {
            id,
            dialog_type,
            local_name_addr: NameAddr::default(),
            remote_name_addr: NameAddr::default(),
            local_contact: config.local_contact(),
            remote_target: NameAddr::default(),
            route_set: Vec::new(),
            local_cseq: 0,
            remote_cseq: 0,
            requests: BTreeMap::new(),
            client_subscriptions: Vec::new(),
            server_subscriptions: Vec::new(),
            invite_session: None,
            destroying: false,
            max_forwards: config.max_forwards,
            allow: config.allowed_methods.clone(),
            supported: config.supported_options.clone(),
        }
    }

    /// Dialog created by an inbound request (we are the UAS of this
    /// dialog). `creator` is our own initial request when the dialog set is
    /// locally initiated, as with a NOTIFY arriving for our SUBSCRIBE.
    pub(crate) fn new_uas(
        request: &SipMessage,
        local_tag: &str,
        creator: Option<&SipMessage>,
        config: &DumConfig,
    ) -> DialogResult<Self> {
        let method = request
            .method()
            .ok_or_else(|| DialogError::internal_error("UAS dialog needs a request"))?;
        let remote_target = if method.is_dialog_forming() {
            single_sip_contact(request)?
        } else {
            return Err(DialogError::protocol_error("Request cannot create a dialog"));
        };

        let id = DialogId::new(
            request.call_id.clone(),
            local_tag,
            request.from.tag.clone().unwrap_or_default(),
        );
        let mut dialog = Self::blank(id, dialog_type_for(method), config);
        dialog.remote_target = remote_target;
        dialog.route_set = request.record_routes.clone();
        dialog.remote_name_addr = request.from.clone();
        dialog.local_name_addr = request.to.clone().with_tag(local_tag);
        dialog.remote_cseq = request.cseq.sequence;
        if let Some(creator) = creator {
            dialog.local_cseq = creator.cseq.sequence;
            if let Some(contact) = creator.contacts.first() {
                dialog.local_contact = contact.clone();
            }
        }
        debug!("Created UAS dialog {} from {}", dialog.id, request.brief());
        Ok(dialog)
    }

    /// Dialog created by a response to our initial request. Failure
    /// responses create a dialog too, so the usage can run its failure
    /// handling.
    pub(crate) fn new_uac(
        response: &SipMessage,
        creator: &SipMessage,
        config: &DumConfig,
    ) -> DialogResult<Self> {
        let code = response
            .status_code()
            .ok_or_else(|| DialogError::internal_error("UAC dialog needs a response"))?;
        let method = response.cseq.method;
        if !method.is_dialog_forming() {
            return Err(DialogError::protocol_error("Response cannot create a dialog"));
        }

        let mut dialog = Self::blank(DialogId::from_inbound(response), dialog_type_for(method), config);
        dialog.remote_target = if (101..300).contains(&code) && method != Method::Notify {
            single_sip_contact(response)?
        } else {
            response.contacts.first().cloned().unwrap_or_else(|| {
                NameAddr::new(
                    creator
                        .request_uri()
                        .cloned()
                        .unwrap_or_else(|| creator.to.uri.clone()),
                )
            })
        };
        dialog.route_set = response.record_routes.iter().rev().cloned().collect();
        dialog.local_name_addr = response.from.clone();
        dialog.remote_name_addr = response.to.clone();
        dialog.local_cseq = response.cseq.sequence.max(creator.cseq.sequence);
        if let Some(contact) = creator.contacts.first() {
            dialog.local_contact = contact.clone();
        }
        debug!("Created UAC dialog {} from {}", dialog.id, response.brief());
        Ok(dialog)
    }

    pub fn id(&self) -> &DialogId {
        &self.id
    }

    pub fn dialog_set_id(&self) -> DialogSetId {
        self.id.dialog_set_id()
    }

    pub fn dialog_type(&self) -> DialogType {
        self.dialog_type
    }

    pub fn remote_target(&self) -> &NameAddr {
        &self.remote_target
    }

    pub fn route_set(&self) -> &[NameAddr] {
        &self.route_set
    }

    pub fn local_contact(&self) -> &NameAddr {
        &self.local_contact
    }

    pub fn local_cseq(&self) -> u32 {
        self.local_cseq
    }

    pub fn remote_cseq(&self) -> u32 {
        self.remote_cseq
    }

    pub fn client_subscriptions(&self) -> &[ClientSubscriptionHandle] {
        &self.client_subscriptions
    }

    pub fn server_subscriptions(&self) -> &[ServerSubscriptionHandle] {
        &self.server_subscriptions
    }

    pub fn has_invite_session(&self) -> bool {
        self.invite_session.is_some()
    }

    /// Number of outstanding local requests.
    pub fn outstanding_requests(&self) -> usize {
        self.requests.len()
    }

    /// A dialog with no usages and no invite session has nothing left to do.
    pub fn is_empty(&self) -> bool {
        self.invite_session.is_none()
            && self.client_subscriptions.is_empty()
            && self.server_subscriptions.is_empty()
    }

    /// Rewrites `request` as an in-dialog request of `method`, keeping its
    /// other headers (Event, Expires, body).
    ///
    /// ACK and CANCEL never take a new CSeq; ACK reuses the current one.
    pub fn fill_request(&mut self, request: &mut SipMessage, method: Method, increment_cseq: bool) {
        request.start_line = StartLine::Request {
            method,
            uri: self.remote_target.uri.clone(),
        };
        request.cseq.method = method;
        request.to = self.remote_name_addr.clone();
        request.from = self.local_name_addr.clone();
        request.call_id = self.id.call_id.clone();
        request.record_routes.clear();
        request.contacts = vec![self.local_contact.clone()];
        request.max_forwards = Some(self.max_forwards);

        if method != Method::Cancel {
            request.routes = self.route_set.clone();
            request.via_branch = Some(new_branch());
        }

        if method != Method::Ack && method != Method::Cancel && increment_cseq {
            self.local_cseq += 1;
        }
        request.cseq.sequence = self.local_cseq;

        if matches!(method, Method::Invite | Method::Update) {
            request.allow = self.allow.clone();
            request.supported = self.supported.clone();
        } else {
            request.allow.clear();
            request.supported.clear();
        }
    }

    /// Builds a fresh in-dialog request with the next local CSeq.
    pub fn make_request(&mut self, method: Method) -> SipMessage {
        let mut request = SipMessage::new_request(method, self.remote_target.uri.clone());
        self.fill_request(&mut request, method, true);
        request
    }

    /// Builds a response to an in-dialog request, stamped with our tag.
    pub fn make_response(&self, request: &SipMessage, code: u16) -> SipMessage {
        let mut response = make_response(request, code);
        response.to.tag = Some(self.id.local_tag.clone());
        let method = request.cseq.method;
        if (101..300).contains(&code) && method.is_dialog_forming() {
            response.contacts = vec![self.local_contact.clone()];
        }
        if (200..300).contains(&code)
            && matches!(method, Method::Invite | Method::Update | Method::Prack)
        {
            response.allow = self.allow.clone();
            response.supported = self.supported.clone();
        }
        response
    }

    /// Applies a target refresh: in-dialog INVITE/UPDATE/SUBSCRIBE requests
    /// and their 2xx responses replace the remote target when they carry a
    /// Contact.
    pub(crate) fn handle_target_refresh(&mut self, msg: &SipMessage) {
        if !msg.cseq.method.is_target_refresh() {
            return;
        }
        let applies = msg.is_request()
            || msg
                .status_code()
                .is_some_and(|code| (200..300).contains(&code));
        if applies {
            if let Some(contact) = msg.contacts.first() {
                debug!("Target refresh for dialog {}: {}", self.id, contact.uri);
                self.remote_target = contact.clone();
            }
        }
    }

    /// Route set learned from the 2xx to our initial request.
    pub(crate) fn refresh_route_set(&mut self, response: &SipMessage) {
        self.route_set = response.record_routes.iter().rev().cloned().collect();
    }

    /// Remembers an outgoing request until its final response arrives.
    pub(crate) fn record_outgoing(&mut self, msg: &SipMessage) {
        if msg.is_request() && msg.method() != Some(Method::Ack) {
            self.requests.insert(msg.cseq.sequence, msg.clone());
        }
    }

    pub(crate) fn note_remote_cseq(&mut self, request: &SipMessage) {
        if request.method() != Some(Method::Ack) && request.cseq.sequence > self.remote_cseq {
            self.remote_cseq = request.cseq.sequence;
        }
    }

    pub(crate) fn remove_client_subscription(&mut self, handle: ClientSubscriptionHandle) {
        self.client_subscriptions.retain(|h| *h != handle);
    }

    pub(crate) fn remove_server_subscription(&mut self, handle: ServerSubscriptionHandle) {
        self.server_subscriptions.retain(|h| *h != handle);
    }
}

//! Application-facing operations on dialogs and subscriptions

use tracing::{debug, info, warn};

use crate::dialog::{DialogId, DialogSet, DialogSetId, InviteSession};
use crate::errors::{DialogError, DialogResult};
use crate::events::DumEvent;
use crate::message::{
    new_branch, new_call_id, new_tag, Contents, EventHeader, Method, NameAddr, SipMessage,
};
use crate::subscription::{ClientSubscription, PublicationKey, ServerSubscription, TerminateReason};
use crate::usage::{ClientSubscriptionHandle, ServerSubscriptionHandle};

use super::core::DialogUsageManager;

impl DialogUsageManager {
    /// Builds the initial SUBSCRIBE for `event` towards `target` on a new
    /// dialog set. The request is not sent; pass it to [`send`](Self::send).
    pub fn make_subscription(&mut self, target: NameAddr, event: &str, expires: u32) -> DialogResult<SipMessage> {
        if self.client_handler(event).is_none() {
            return Err(DialogError::usage_use(&format!(
                "No client subscription handler registered for {}",
                event
            )));
        }
        let request = self
            .make_initial_request(Method::Subscribe, target)
            .with_event(EventHeader::new(event))
            .with_expires(expires);
        self.register_creator(&request);
        Ok(request)
    }

    /// Builds an out-of-dialog REFER asking `target` to contact `refer_to`.
    /// Progress arrives as NOTIFYs to the `refer` client handler.
    pub fn make_refer(&mut self, target: NameAddr, refer_to: NameAddr) -> DialogResult<SipMessage> {
        if self.client_handler("refer").is_none() {
            return Err(DialogError::usage_use("No client subscription handler registered for refer"));
        }
        let request = self.make_initial_request(Method::Refer, target).with_refer_to(refer_to);
        self.register_creator(&request);
        Ok(request)
    }

    fn make_initial_request(&self, method: Method, target: NameAddr) -> SipMessage {
        let mut request = SipMessage::new_request(method, target.uri.clone())
            .with_to(target.without_tag())
            .with_from(self.config.local_name_addr().with_tag(new_tag()))
            .with_call_id(new_call_id())
            .with_contact(self.config.local_contact());
        request.max_forwards = Some(self.config.max_forwards);
        request.via_branch = Some(new_branch());
        request
    }

    fn register_creator(&mut self, request: &SipMessage) {
        let tag = request.from.tag.clone().unwrap_or_default();
        let set_id = DialogSetId::new(request.call_id.clone(), tag);
        debug!("New UAC dialog set {} for {}", set_id, request.brief());
        self.dialog_sets
            .insert(set_id.clone(), DialogSet::new_uac(set_id, request.clone()));
    }

    /// Sends a message built by the application. Initial requests update
    /// the creator of their dialog set; in-dialog requests are tracked for
    /// auth retries.
    pub fn send(&mut self, msg: SipMessage) {
        if msg.is_request() {
            if msg.to.tag.is_none() {
                let set_id = DialogSetId::new(msg.call_id.clone(), msg.from.tag.clone().unwrap_or_default());
                if let Some(set) = self.dialog_sets.get_mut(&set_id) {
                    set.creator = Some(msg.clone());
                }
            } else {
                let dialog_id = DialogId::new(
                    msg.call_id.clone(),
                    msg.from.tag.clone().unwrap_or_default(),
                    msg.to.tag.clone().unwrap_or_default(),
                );
                if self.dialogs.contains_key(&dialog_id) {
                    self.send_in_dialog(&dialog_id, msg);
                    return;
                }
            }
        }
        self.send_raw(msg);
    }

    /// Builds and sends an initial SUBSCRIBE. Returns the new dialog set.
    pub fn subscribe(&mut self, target: NameAddr, event: &str, expires: u32) -> DialogResult<DialogSetId> {
        let request = self.make_subscription(target, event, expires)?;
        let set_id = DialogSetId::new(request.call_id.clone(), request.from.tag.clone().unwrap_or_default());
        info!("Subscribing to {} of {}", event, request.to.uri);
        self.send(request);
        Ok(set_id)
    }

    /// Hands published state for `document_key` to every live server
    /// subscription watching it. `None` means the document was removed.
    /// Returns how many subscriptions were told.
    pub fn publish(&mut self, event_type: &str, document_key: &str, contents: Option<Contents>) -> usize {
        let key = PublicationKey::new(event_type, document_key);
        let mut delivered = 0;
        for handle in self.publications.subscribers(&key) {
            if !self.server_subscriptions.contains_key(&handle) {
                continue;
            }
            if ServerSubscription::deliver_publication(self, handle, contents.as_ref()) {
                delivered += 1;
            }
        }
        debug!("Published {} for {} to {} subscriptions", event_type, document_key, delivered);
        self.emit(DumEvent::PublicationDelivered {
            event_type: key.event_type,
            document_key: key.document_key,
            subscribers: delivered,
        });
        delivered
    }

    pub fn client_subscriptions_of(&self, dialog_id: &DialogId) -> Vec<ClientSubscriptionHandle> {
        self.dialogs
            .get(dialog_id)
            .map(|dialog| dialog.client_subscriptions.clone())
            .unwrap_or_default()
    }

    pub fn server_subscriptions_of(&self, dialog_id: &DialogId) -> Vec<ServerSubscriptionHandle> {
        self.dialogs
            .get(dialog_id)
            .map(|dialog| dialog.server_subscriptions.clone())
            .unwrap_or_default()
    }

    pub fn find_client_subscriptions(&self, dialog_id: &DialogId, event_type: &str) -> Vec<ClientSubscriptionHandle> {
        self.client_subscriptions_of(dialog_id)
            .into_iter()
            .filter(|h| {
                self.client_subscriptions
                    .get(h)
                    .is_some_and(|sub| sub.event_type() == event_type)
            })
            .collect()
    }

    pub fn find_server_subscriptions(&self, dialog_id: &DialogId, event_type: &str) -> Vec<ServerSubscriptionHandle> {
        self.server_subscriptions_of(dialog_id)
            .into_iter()
            .filter(|h| {
                self.server_subscriptions
                    .get(h)
                    .is_some_and(|sub| sub.event_type() == event_type)
            })
            .collect()
    }

    /// Calls `f` for every live server subscription watching `aor` for
    /// `event_type`. Subscriptions destroyed by an earlier call are skipped.
    pub fn apply_to_server_subscriptions<F>(&mut self, aor: &str, event_type: &str, mut f: F)
    where
        F: FnMut(&mut Self, ServerSubscriptionHandle),
    {
        let key = PublicationKey::new(event_type, aor);
        for handle in self.publications.subscribers(&key) {
            if self.server_subscriptions.contains_key(&handle) {
                f(self, handle);
            }
        }
    }

    /// Ends every server subscription with a terminated NOTIFY.
    pub fn end_all_server_subscriptions(&mut self, reason: TerminateReason) {
        let mut handles: Vec<_> = self.server_subscriptions.keys().copied().collect();
        handles.sort();
        for handle in handles {
            if let Err(e) = ServerSubscription::end(self, handle, reason, None, 0) {
                debug!("Ending {} failed: {}", handle, e);
            }
        }
    }

    /// Ends every usage of the dialog: the invite session is told to end,
    /// client subscriptions unsubscribe and server subscriptions send a
    /// terminated NOTIFY.
    pub fn end_dialog(&mut self, dialog_id: &DialogId) -> DialogResult<()> {
        let dialog = self
            .dialogs
            .get_mut(dialog_id)
            .ok_or_else(|| DialogError::dialog_not_found(dialog_id))?;
        info!("Ending dialog {}", dialog_id);
        if let Some(session) = dialog.invite_session.as_mut() {
            session.end();
        }
        let clients = dialog.client_subscriptions.clone();
        let servers = dialog.server_subscriptions.clone();
        for handle in clients {
            if let Err(e) = ClientSubscription::end(self, handle, false) {
                debug!("Ending {} failed: {}", handle, e);
            }
        }
        for handle in servers {
            if let Err(e) = ServerSubscription::end(self, handle, TerminateReason::Timeout, None, 0) {
                debug!("Ending {} failed: {}", handle, e);
            }
        }
        self.possibly_die(dialog_id);
        Ok(())
    }

    pub fn attach_invite_session(&mut self, dialog_id: &DialogId, session: Box<dyn InviteSession>) -> DialogResult<()> {
        let dialog = self
            .dialogs
            .get_mut(dialog_id)
            .ok_or_else(|| DialogError::dialog_not_found(dialog_id))?;
        if dialog.invite_session.is_some() {
            return Err(DialogError::invalid_state("dialog without invite session", "invite session attached"));
        }
        dialog.invite_session = Some(session);
        Ok(())
    }

    /// Removes the invite session, destroying the dialog if nothing else
    /// lives in it.
    pub fn detach_invite_session(&mut self, dialog_id: &DialogId) -> Option<Box<dyn InviteSession>> {
        let session = self.dialogs.get_mut(dialog_id)?.invite_session.take();
        self.possibly_die(dialog_id);
        session
    }

    /// The transport flow carrying the dialog failed. Every usage is told
    /// through its handler.
    pub fn flow_terminated(&mut self, dialog_id: &DialogId) -> DialogResult<()> {
        let dialog = self
            .dialogs
            .get_mut(dialog_id)
            .ok_or_else(|| DialogError::dialog_not_found(dialog_id))?;
        warn!("Flow terminated for dialog {}", dialog_id);
        if let Some(session) = dialog.invite_session.as_mut() {
            session.flow_terminated();
        }
        let clients = dialog.client_subscriptions.clone();
        let servers = dialog.server_subscriptions.clone();

        for handle in clients {
            let handler = self
                .client_subscriptions
                .get(&handle)
                .and_then(|sub| self.client_handler(sub.event_type()));
            if let Some(handler) = handler {
                handler.on_flow_terminated(self, handle);
            }
        }
        for handle in servers {
            let handler = self
                .server_subscriptions
                .get(&handle)
                .and_then(|sub| self.server_handler(sub.event_type()));
            if let Some(handler) = handler {
                handler.on_flow_terminated(self, handle);
            }
        }
        self.run_posted_commands();
        Ok(())
    }

    /// A redirect of the dialog's INVITE is being followed. When the invite
    /// session is all the dialog holds, the dialog goes away while its
    /// dialog set is kept for the new target. Returns whether that
    /// happened.
    pub fn redirected(&mut self, dialog_id: &DialogId) -> bool {
        let Some(dialog) = self.dialogs.get_mut(dialog_id) else {
            return false;
        };
        let only_invite = dialog.invite_session.is_some()
            && dialog.client_subscriptions.is_empty()
            && dialog.server_subscriptions.is_empty();
        if !only_invite {
            return false;
        }
        dialog.invite_session = None;
        if let Some(set) = self.dialog_sets.get_mut(&dialog_id.dialog_set_id()) {
            set.reused = true;
        }
        info!("Dialog {} redirected, keeping its dialog set", dialog_id);
        self.destroy_dialog(dialog_id);
        true
    }
}

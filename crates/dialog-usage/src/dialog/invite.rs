//! Seam to the INVITE session state machine
//!
//! The dialog layer does not implement INVITE sessions. A Dialog owns at
//! most one [`InviteSession`] and forwards INVITE-family traffic and REFER
//! outcomes to it; everything else about calls lives outside this crate.

use crate::message::SipMessage;
use crate::usage::{ClientSubscriptionHandle, ServerSubscriptionHandle};

use super::dialog_id::DialogId;

pub trait InviteSession: Send {
    /// INVITE, ACK, BYE, CANCEL, UPDATE, INFO, MESSAGE, PRACK requests and
    /// responses.
    fn dispatch(&mut self, msg: &SipMessage);

    /// The owning dialog is ending.
    fn end(&mut self);

    /// An in-dialog REFER created (or refreshed) an implicit subscription.
    fn on_refer(&mut self, _subscription: ServerSubscriptionHandle, _refer: &SipMessage) {}

    /// An in-dialog REFER that asked for no implicit subscription.
    fn refer_no_sub(&mut self, _refer: &SipMessage) {}

    /// Our REFER was accepted. `subscription` is set when the notifier
    /// created an implicit subscription.
    fn on_refer_accepted(
        &mut self,
        _subscription: Option<ClientSubscriptionHandle>,
        _msg: &SipMessage,
    ) {
    }

    fn on_refer_rejected(&mut self, _response: &SipMessage) {}

    /// Whether our last REFER asked for an implicit subscription.
    fn refer_subscription_requested(&self) -> bool {
        true
    }

    /// A non-INVITE transaction sent by the session completed.
    fn non_invite_transaction_complete(&mut self) {}

    fn flow_terminated(&mut self) {}
}

/// Creates invite sessions for dialog-forming INVITEs. Without a factory the
/// manager answers INVITE with 405.
pub trait InviteSessionFactory: Send + Sync {
    fn create(&self, dialog: &DialogId, invite: &SipMessage) -> Option<Box<dyn InviteSession>>;
}

//! Typed SIP message model
//!
//! The minimum request/response representation the dialog and subscription
//! usages need: typed accessors for the headers they route on and helpers to
//! build responses and fresh identifiers.

pub mod headers;
pub mod method;
pub mod sip_message;

pub use headers::{
    CSeq, Contents, EventHeader, NameAddr, SipFrag, SubscriptionStateHeader, Uri,
    SIPFRAG_CONTENT_TYPE,
};
pub use method::Method;
pub use sip_message::{
    make_response, new_branch, new_call_id, new_tag, reason_phrase, SipMessage, StartLine,
};

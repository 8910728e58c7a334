//! # SIP message model
//!
//! [`SipMessage`] is the in-memory request/response the dialog layer routes.
//! Headers the usages care about are stored as typed fields; everything else
//! is the transport's business. Transport code fills `from_wire = true` for
//! inbound traffic so locally generated failures (for example a 503 raised
//! when a destination is unreachable) can be told apart from real ones.
//!
//! ## Example
//!
//! ```rust
//! use rvoip_dialog_usage::message::{
//!     make_response, EventHeader, Method, NameAddr, SipMessage, Uri,
//! };
//!
//! let subscribe = SipMessage::new_request(Method::Subscribe, Uri::new("sip:bob@biloxi.com"))
//!     .with_from(NameAddr::new(Uri::new("sip:alice@atlanta.com")).with_tag("1928301774"))
//!     .with_to(NameAddr::new(Uri::new("sip:bob@biloxi.com")))
//!     .with_call_id("a84b4c76e66710")
//!     .with_event(EventHeader::new("presence"))
//!     .with_expires(3600);
//!
//! let ok = make_response(&subscribe, 200);
//! assert_eq!(ok.status_code(), Some(200));
//! assert_eq!(ok.cseq, subscribe.cseq);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::headers::{
    CSeq, Contents, EventHeader, NameAddr, SubscriptionStateHeader, Uri,
};
use super::method::Method;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartLine {
    Request { method: Method, uri: Uri },
    Response { status: u16, reason: String },
}

/// A SIP request or response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SipMessage {
    pub start_line: StartLine,
    /// Branch of the top Via.
    pub via_branch: Option<String>,
    pub to: NameAddr,
    pub from: NameAddr,
    pub call_id: String,
    pub cseq: CSeq,
    pub max_forwards: Option<u32>,
    pub contacts: Vec<NameAddr>,
    pub record_routes: Vec<NameAddr>,
    pub routes: Vec<NameAddr>,
    pub event: Option<EventHeader>,
    pub subscription_state: Option<SubscriptionStateHeader>,
    pub expires: Option<u32>,
    pub min_expires: Option<u32>,
    pub retry_after: Option<u32>,
    pub refer_to: Option<NameAddr>,
    /// Refer-Sub header (RFC 4488).
    pub refer_sub: Option<bool>,
    pub requires: Vec<String>,
    pub supported: Vec<String>,
    pub allow: Vec<Method>,
    pub authorization: Option<String>,
    pub contents: Option<Contents>,
    pub from_wire: bool,
}

impl SipMessage {
    /// Creates a request with CSeq 1 of the same method and nothing else
    /// filled in.
    pub fn new_request(method: Method, uri: Uri) -> Self {
        Self::blank(StartLine::Request { method, uri }, CSeq::new(1, method))
    }

    pub fn new_response(status: u16, cseq: CSeq) -> Self {
        Self::blank(
            StartLine::Response {
                status,
                reason: reason_phrase(status).to_string(),
            },
            cseq,
        )
    }

    fn blank(start_line: StartLine, cseq: CSeq) -> Self {
        Self {
            start_line,
            via_branch: None,
            to: NameAddr::default(),
            from: NameAddr::default(),
            call_id: String::new(),
            cseq,
            max_forwards: None,
            contacts: Vec::new(),
            record_routes: Vec::new(),
            routes: Vec::new(),
            event: None,
            subscription_state: None,
            expires: None,
            min_expires: None,
            retry_after: None,
            refer_to: None,
            refer_sub: None,
            requires: Vec::new(),
            supported: Vec::new(),
            allow: Vec::new(),
            authorization: None,
            contents: None,
            from_wire: false,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start_line, StartLine::Request { .. })
    }

    pub fn is_response(&self) -> bool {
        matches!(self.start_line, StartLine::Response { .. })
    }

    /// Method of a request; `None` for responses (use `cseq.method`).
    pub fn method(&self) -> Option<Method> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(*method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn request_uri(&self) -> Option<&Uri> {
        match &self.start_line {
            StartLine::Request { uri, .. } => Some(uri),
            StartLine::Response { .. } => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match &self.start_line {
            StartLine::Request { .. } => None,
            StartLine::Response { status, .. } => Some(*status),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match &self.start_line {
            StartLine::Request { .. } => None,
            StartLine::Response { reason, .. } => Some(reason.as_str()),
        }
    }

    /// Rewrites the status of a response, resetting the reason phrase.
    pub fn set_status(&mut self, code: u16) {
        if let StartLine::Response { status, reason } = &mut self.start_line {
            *status = code;
            *reason = reason_phrase(code).to_string();
        }
    }

    pub fn set_reason(&mut self, text: impl Into<String>) {
        if let StartLine::Response { reason, .. } = &mut self.start_line {
            *reason = text.into();
        }
    }

    /// Event package of the message; `None` when there is no Event header.
    pub fn event_type(&self) -> Option<&str> {
        self.event.as_ref().map(|e| e.event_type.as_str())
    }

    pub fn event_id(&self) -> Option<&str> {
        self.event.as_ref().and_then(|e| e.id.as_deref())
    }

    pub fn requires_option(&self, option: &str) -> bool {
        self.requires.iter().any(|r| r.eq_ignore_ascii_case(option))
    }

    pub fn with_to(mut self, to: NameAddr) -> Self {
        self.to = to;
        self
    }

    pub fn with_from(mut self, from: NameAddr) -> Self {
        self.from = from;
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }

    pub fn with_cseq(mut self, sequence: u32) -> Self {
        self.cseq.sequence = sequence;
        self
    }

    pub fn with_contact(mut self, contact: NameAddr) -> Self {
        self.contacts.push(contact);
        self
    }

    pub fn with_record_route(mut self, route: NameAddr) -> Self {
        self.record_routes.push(route);
        self
    }

    pub fn with_event(mut self, event: EventHeader) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_subscription_state(mut self, state: SubscriptionStateHeader) -> Self {
        self.subscription_state = Some(state);
        self
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_min_expires(mut self, min_expires: u32) -> Self {
        self.min_expires = Some(min_expires);
        self
    }

    pub fn with_retry_after(mut self, seconds: u32) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn with_refer_to(mut self, target: NameAddr) -> Self {
        self.refer_to = Some(target);
        self
    }

    pub fn with_require(mut self, option: impl Into<String>) -> Self {
        self.requires.push(option.into());
        self
    }

    pub fn with_contents(mut self, contents: Contents) -> Self {
        self.contents = Some(contents);
        self
    }

    pub fn from_wire(mut self) -> Self {
        self.from_wire = true;
        self
    }

    /// One-line summary for logs.
    pub fn brief(&self) -> String {
        match &self.start_line {
            StartLine::Request { method, uri } => format!(
                "{} {} cseq={} call-id={}",
                method, uri, self.cseq, self.call_id
            ),
            StartLine::Response { status, reason } => format!(
                "{} {} cseq={} call-id={}",
                status, reason, self.cseq, self.call_id
            ),
        }
    }
}

impl fmt::Display for SipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.brief())
    }
}

/// Builds a response to `request`: Via branch, To, From, Call-ID and CSeq
/// are copied, nothing else.
pub fn make_response(request: &SipMessage, code: u16) -> SipMessage {
    let mut response = SipMessage::new_response(code, request.cseq);
    response.via_branch = request.via_branch.clone();
    response.to = request.to.clone();
    response.from = request.from.clone();
    response.call_id = request.call_id.clone();
    response
}

pub fn new_branch() -> String {
    format!("z9hG4bK-{}", Uuid::new_v4().simple())
}

pub fn new_tag() -> String {
    format!("{:08x}", rand::random::<u32>())
}

pub fn new_call_id() -> String {
    Uuid::new_v4().to_string()
}

/// Default reason phrase for a status code.
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        183 => "Session Progress",
        200 => "OK",
        202 => "Accepted",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Moved Temporarily",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        410 => "Gone",
        413 => "Request Entity Too Large",
        415 => "Unsupported Media Type",
        420 => "Bad Extension",
        423 => "Interval Too Brief",
        480 => "Temporarily Unavailable",
        481 => "Call/Transaction Does Not Exist",
        482 => "Loop Detected",
        483 => "Too Many Hops",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        489 => "Bad Event",
        491 => "Request Pending",
        500 => "Server Internal Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Server Time-out",
        600 => "Busy Everywhere",
        603 => "Decline",
        604 => "Does Not Exist Anywhere",
        606 => "Not Acceptable",
        _ => match code / 100 {
            1 => "Provisional",
            2 => "Success",
            3 => "Redirection",
            4 => "Client Error",
            5 => "Server Error",
            _ => "Global Failure",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notify() -> SipMessage {
        SipMessage::new_request(Method::Notify, Uri::new("sip:alice@pc33.atlanta.com"))
            .with_from(NameAddr::new(Uri::new("sip:bob@biloxi.com")).with_tag("b1"))
            .with_to(NameAddr::new(Uri::new("sip:alice@atlanta.com")).with_tag("a1"))
            .with_call_id("call-1")
            .with_cseq(7)
    }

    #[test]
    fn test_make_response_copies_dialog_identity() {
        let mut request = notify();
        request.via_branch = Some(new_branch());
        let response = make_response(&request, 481);
        assert!(response.is_response());
        assert_eq!(response.status_code(), Some(481));
        assert_eq!(response.reason(), Some("Call/Transaction Does Not Exist"));
        assert_eq!(response.cseq, CSeq::new(7, Method::Notify));
        assert_eq!(response.to.tag.as_deref(), Some("a1"));
        assert_eq!(response.via_branch, request.via_branch);
        assert!(response.contacts.is_empty());
    }

    #[test]
    fn test_set_status_resets_reason() {
        let mut response = make_response(&notify(), 200);
        response.set_reason("Fine");
        response.set_status(423);
        assert_eq!(response.reason(), Some("Interval Too Brief"));
    }

    #[test]
    fn test_request_accessors() {
        let request = notify();
        assert_eq!(request.method(), Some(Method::Notify));
        assert_eq!(request.status_code(), None);
        assert!(request.brief().starts_with("NOTIFY sip:alice@pc33.atlanta.com"));
        assert_ne!(new_tag(), new_tag());
    }
}

//! # Typed header values
//!
//! The handful of header values the dialog layer reads and writes. Values are
//! kept in already-parsed form; nothing here deals with wire syntax beyond
//! the `Display` renderings used for logging.
//!
//! ```rust
//! use rvoip_dialog_usage::message::{NameAddr, Uri};
//!
//! let to = NameAddr::new(Uri::new("sip:bob@example.com;transport=tcp")).with_tag("a1b2");
//! assert_eq!(to.uri.aor(), "bob@example.com");
//! assert_eq!(to.tag.as_deref(), Some("a1b2"));
//! ```

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::method::Method;

/// A SIP or SIPS URI in its textual form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uri(String);

impl Uri {
    pub fn new(uri: impl Into<String>) -> Self {
        Uri(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Scheme without the trailing colon, lower-cased.
    pub fn scheme(&self) -> String {
        self.0
            .split_once(':')
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_default()
    }

    pub fn is_sip(&self) -> bool {
        matches!(self.scheme().as_str(), "sip" | "sips")
    }

    /// Address-of-record: `user@host[:port]` with scheme, parameters and
    /// headers removed.
    pub fn aor(&self) -> String {
        let rest = self
            .0
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or(self.0.as_str());
        rest.split(|c: char| c == ';' || c == '?' || c == '>')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uri {
    fn from(value: &str) -> Self {
        Uri::new(value)
    }
}

/// name-addr as used by To, From, Contact, Route and Record-Route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameAddr {
    pub display_name: Option<String>,
    pub uri: Uri,
    pub tag: Option<String>,
}

impl NameAddr {
    pub fn new(uri: Uri) -> Self {
        Self {
            display_name: None,
            uri,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn without_tag(&self) -> Self {
        Self {
            tag: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{}\" ", name)?;
        }
        write!(f, "<{}>", self.uri)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={}", tag)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CSeq {
    pub sequence: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(sequence: u32, method: Method) -> Self {
        Self { sequence, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.sequence, self.method)
    }
}

/// Event header (RFC 6665 §8.2.1): package name plus optional `id` param.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    pub event_type: String,
    pub id: Option<String>,
}

impl EventHeader {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl fmt::Display for EventHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.event_type)?;
        if let Some(id) = &self.id {
            write!(f, ";id={}", id)?;
        }
        Ok(())
    }
}

/// Subscription-State header with its `expires`, `reason` and `retry-after`
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStateHeader {
    pub value: String,
    pub expires: Option<u32>,
    pub reason: Option<String>,
    pub retry_after: Option<u32>,
}

impl SubscriptionStateHeader {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires: None,
            reason: None,
            retry_after: None,
        }
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.value.eq_ignore_ascii_case("active")
    }

    pub fn is_pending(&self) -> bool {
        self.value.eq_ignore_ascii_case("pending")
    }

    pub fn is_terminated(&self) -> bool {
        self.value.eq_ignore_ascii_case("terminated")
    }

    pub fn reason_is(&self, reason: &str) -> bool {
        self.reason
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case(reason))
    }
}

impl fmt::Display for SubscriptionStateHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)?;
        if let Some(expires) = self.expires {
            write!(f, ";expires={}", expires)?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ";reason={}", reason)?;
        }
        if let Some(retry_after) = self.retry_after {
            write!(f, ";retry-after={}", retry_after)?;
        }
        Ok(())
    }
}

pub const SIPFRAG_CONTENT_TYPE: &str = "message/sipfrag";

/// Message body with its content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contents {
    pub content_type: String,
    pub body: Bytes,
}

impl Contents {
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    /// A `message/sipfrag` body carrying a status line, as sent in REFER
    /// progress NOTIFYs.
    pub fn sipfrag_status(code: u16, reason: &str) -> Self {
        Self::new(
            SIPFRAG_CONTENT_TYPE,
            format!("SIP/2.0 {} {}\r\n", code, reason),
        )
    }

    /// Parses the start line of a `message/sipfrag` body.
    pub fn sipfrag(&self) -> Option<SipFrag> {
        if !self.content_type.eq_ignore_ascii_case(SIPFRAG_CONTENT_TYPE) {
            return None;
        }
        let text = std::str::from_utf8(&self.body).ok()?;
        let line = text.lines().next()?.trim();
        let mut parts = line.split_whitespace();
        let first = parts.next()?;
        if first.starts_with("SIP/") {
            let code = parts.next()?.parse::<u16>().ok()?;
            return Some(SipFrag::Response(code));
        }
        first.parse::<Method>().ok().map(SipFrag::Request)
    }
}

/// Start line of a sipfrag body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipFrag {
    Request(Method),
    Response(u16),
}

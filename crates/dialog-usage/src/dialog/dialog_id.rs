//! Dialog and dialog-set identifiers

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::SipMessage;

/// Identity of a dialog: Call-ID plus the local and remote tags (RFC 3261
/// §12). Dialogs forked from one initial request share the Call-ID and local
/// tag and differ in the remote tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DialogId {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
}

impl DialogId {
    pub fn new(
        call_id: impl Into<String>,
        local_tag: impl Into<String>,
        remote_tag: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            remote_tag: remote_tag.into(),
        }
    }

    /// Dialog an inbound message belongs to, seen from the local side.
    ///
    /// For requests the local tag is in To, for responses it is in From.
    pub fn from_inbound(msg: &SipMessage) -> Self {
        let (local, remote) = if msg.is_request() {
            (&msg.to, &msg.from)
        } else {
            (&msg.from, &msg.to)
        };
        Self {
            call_id: msg.call_id.clone(),
            local_tag: local.tag.clone().unwrap_or_default(),
            remote_tag: remote.tag.clone().unwrap_or_default(),
        }
    }

    pub fn dialog_set_id(&self) -> DialogSetId {
        DialogSetId::new(self.call_id.clone(), self.local_tag.clone())
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.call_id, self.local_tag, self.remote_tag)
    }
}

/// Identity of a dialog set: Call-ID plus the local tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DialogSetId {
    pub call_id: String,
    pub local_tag: String,
}

impl DialogSetId {
    pub fn new(call_id: impl Into<String>, local_tag: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
        }
    }

    /// Dialog set of an inbound message, when the message carries a local
    /// tag (To tag on requests, From tag on responses).
    pub fn from_inbound(msg: &SipMessage) -> Option<Self> {
        let local = if msg.is_request() { &msg.to } else { &msg.from };
        local
            .tag
            .as_ref()
            .map(|tag| Self::new(msg.call_id.clone(), tag.clone()))
    }
}

impl fmt::Display for DialogSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.call_id, self.local_tag)
    }
}

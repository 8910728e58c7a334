//! Identity shared by both subscription usages.

use crate::message::{EventHeader, Method, SipMessage};

/// Event package and `id` of a subscription (RFC 6665 §4.1.2.1). REFER
/// subscriptions created inside a dialog use the REFER's CSeq as their id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionIdentity {
    pub event_type: String,
    pub id: Option<String>,
}

impl SubscriptionIdentity {
    pub fn from_request(request: &SipMessage) -> Self {
        let event_type = request
            .event_type()
            .map(str::to_string)
            .unwrap_or_else(|| "refer".to_string());
        let id = if request.method() == Some(Method::Refer) && request.to.tag.is_some() {
            Some(request.cseq.sequence.to_string())
        } else {
            request.event_id().map(str::to_string)
        };
        Self { event_type, id }
    }

    pub fn event_header(&self) -> EventHeader {
        EventHeader {
            event_type: self.event_type.clone(),
            id: self.id.clone(),
        }
    }

    /// Whether an in-dialog request (or a response without CSeq
    /// correlation) belongs to this subscription.
    pub fn matches(&self, msg: &SipMessage) -> bool {
        match &msg.event {
            // an out-of-dialog REFER has no id of its own, the notifier picks one
            Some(event) => {
                event.event_type == self.event_type
                    && (event.id == self.id || (self.event_type == "refer" && self.id.is_none()))
            }
            None => {
                self.event_type == "refer"
                    && self.id.as_deref() == Some(msg.cseq.sequence.to_string().as_str())
            }
        }
    }
}

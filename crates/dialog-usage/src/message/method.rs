//! SIP request methods understood by the dialog layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DialogError;

/// SIP request method.
///
/// Only the methods that the dialog and subscription usages route on are
/// modelled; anything else is rejected when parsed from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
    Register,
    Subscribe,
    Notify,
    Refer,
    Update,
    Info,
    Message,
    Prack,
    Publish,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Options => "OPTIONS",
            Method::Register => "REGISTER",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Refer => "REFER",
            Method::Update => "UPDATE",
            Method::Info => "INFO",
            Method::Message => "MESSAGE",
            Method::Prack => "PRACK",
            Method::Publish => "PUBLISH",
        }
    }

    /// Methods that can establish a dialog (RFC 3261, RFC 6665).
    pub fn is_dialog_forming(&self) -> bool {
        matches!(
            self,
            Method::Invite | Method::Subscribe | Method::Refer | Method::Notify
        )
    }

    /// Methods whose in-dialog requests and 2xx responses refresh the
    /// remote target when they carry a Contact.
    pub fn is_target_refresh(&self) -> bool {
        matches!(self, Method::Invite | Method::Update | Method::Subscribe)
    }

    /// Methods owned by the invite session rather than a subscription.
    pub fn belongs_to_invite_session(&self) -> bool {
        matches!(
            self,
            Method::Invite
                | Method::Ack
                | Method::Bye
                | Method::Cancel
                | Method::Info
                | Method::Message
                | Method::Update
                | Method::Prack
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = DialogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = match s.to_ascii_uppercase().as_str() {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "OPTIONS" => Method::Options,
            "REGISTER" => Method::Register,
            "SUBSCRIBE" => Method::Subscribe,
            "NOTIFY" => Method::Notify,
            "REFER" => Method::Refer,
            "UPDATE" => Method::Update,
            "INFO" => Method::Info,
            "MESSAGE" => Method::Message,
            "PRACK" => Method::Prack,
            "PUBLISH" => Method::Publish,
            other => {
                return Err(DialogError::protocol_error(&format!(
                    "Unsupported method: {}",
                    other
                )));
            }
        };
        Ok(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse_is_case_insensitive() {
        assert_eq!("subscribe".parse::<Method>().unwrap(), Method::Subscribe);
        assert_eq!("NOTIFY".parse::<Method>().unwrap(), Method::Notify);
        assert!("FOO".parse::<Method>().is_err());
    }

    #[test]
    fn test_method_classification() {
        assert!(Method::Notify.is_dialog_forming());
        assert!(!Method::Bye.is_dialog_forming());
        assert!(Method::Subscribe.is_target_refresh());
        assert!(!Method::Notify.is_target_refresh());
        assert!(Method::Prack.belongs_to_invite_session());
        assert!(!Method::Refer.belongs_to_invite_session());
    }
}

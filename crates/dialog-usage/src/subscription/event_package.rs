//! Event packages (RFC 6665 §7)
//!
//! A package names the event, the body formats its NOTIFYs carry and the
//! subscription durations a notifier grants. Server handlers can expose a
//! package to get the default `get_expires` policy and body checks for free.

/// Trait for SIP event packages
pub trait EventPackage: Send + Sync {
    fn name(&self) -> &str;

    /// Content types a NOTIFY body of this package may use.
    fn accept_types(&self) -> &[&'static str];

    /// Granted duration when the SUBSCRIBE carries no Expires.
    fn default_expires(&self) -> u32;

    /// Shorter requests are answered with 423.
    fn min_expires(&self) -> Option<u32> {
        Some(60)
    }

    /// Longer requests are clamped.
    fn max_expires(&self) -> Option<u32> {
        Some(86_400)
    }

    fn accepts(&self, content_type: &str) -> bool {
        self.accept_types()
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(content_type))
    }
}

/// Presence event package (RFC 3856)
#[derive(Debug, Default, Clone, Copy)]
pub struct PresencePackage;

impl EventPackage for PresencePackage {
    fn name(&self) -> &str {
        "presence"
    }

    fn accept_types(&self) -> &[&'static str] {
        &["application/pidf+xml", "application/xpidf+xml"]
    }

    fn default_expires(&self) -> u32 {
        3600
    }
}

/// Dialog event package (RFC 4235)
#[derive(Debug, Default, Clone, Copy)]
pub struct DialogPackage;

impl EventPackage for DialogPackage {
    fn name(&self) -> &str {
        "dialog"
    }

    fn accept_types(&self) -> &[&'static str] {
        &["application/dialog-info+xml"]
    }

    fn default_expires(&self) -> u32 {
        3600
    }
}

/// Message summary event package (RFC 3842)
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageSummaryPackage;

impl EventPackage for MessageSummaryPackage {
    fn name(&self) -> &str {
        "message-summary"
    }

    fn accept_types(&self) -> &[&'static str] {
        &["application/simple-message-summary"]
    }

    fn default_expires(&self) -> u32 {
        3600
    }
}

/// Refer event package (RFC 3515). Implicit subscriptions are short lived
/// and have no lower bound.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferPackage;

impl EventPackage for ReferPackage {
    fn name(&self) -> &str {
        "refer"
    }

    fn accept_types(&self) -> &[&'static str] {
        &["message/sipfrag"]
    }

    fn default_expires(&self) -> u32 {
        60
    }

    fn min_expires(&self) -> Option<u32> {
        None
    }
}

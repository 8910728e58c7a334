use crate::message::SipMessage;

/// Outbound edge of the core: hands a fully built message to the transaction
/// layer. Must not call back into the manager.
pub trait MessageSink: Send + Sync {
    fn send(&self, message: SipMessage);
}

/// Supplies credentials for challenged requests.
pub trait ClientAuthManager: Send + Sync {
    /// Called with the original request and the failure response it got.
    /// Returns true when `request` was updated and should be re-sent.
    fn handle(&self, request: &mut SipMessage, response: &SipMessage) -> bool;
}

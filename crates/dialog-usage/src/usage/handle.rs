use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle of a client (subscriber side) subscription usage.
///
/// Handles are never reused: once the usage is destroyed every operation on
/// the handle fails with `UsageNotFound` and timers armed for it no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientSubscriptionHandle(pub(crate) u64);

/// Handle of a server (notifier side) subscription usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerSubscriptionHandle(pub(crate) u64);

impl ClientSubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl ServerSubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientSubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-sub-{}", self.0)
    }
}

impl fmt::Display for ServerSubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server-sub-{}", self.0)
    }
}

/// Any usage that can own timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UsageHandle {
    Client(ClientSubscriptionHandle),
    Server(ServerSubscriptionHandle),
}

impl From<ClientSubscriptionHandle> for UsageHandle {
    fn from(handle: ClientSubscriptionHandle) -> Self {
        UsageHandle::Client(handle)
    }
}

impl From<ServerSubscriptionHandle> for UsageHandle {
    fn from(handle: ServerSubscriptionHandle) -> Self {
        UsageHandle::Server(handle)
    }
}

impl fmt::Display for UsageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageHandle::Client(h) => h.fmt(f),
            UsageHandle::Server(h) => h.fmt(f),
        }
    }
}

/// Monotonic id source for usage handles.
#[derive(Debug, Default)]
pub(crate) struct HandleAllocator {
    last: u64,
}

impl HandleAllocator {
    pub(crate) fn next_client(&mut self) -> ClientSubscriptionHandle {
        self.last += 1;
        ClientSubscriptionHandle(self.last)
    }

    pub(crate) fn next_server(&mut self) -> ServerSubscriptionHandle {
        self.last += 1;
        ServerSubscriptionHandle(self.last)
    }
}

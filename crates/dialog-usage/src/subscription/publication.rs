//! Index of server subscriptions by published document
//!
//! Every live [`ServerSubscription`](super::server::ServerSubscription) is
//! registered under its (event type, document key) pair so state published
//! for a document can be fanned out to its watchers. Entries are added when
//! the usage is created and removed when it is destroyed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::usage::ServerSubscriptionHandle;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicationKey {
    pub event_type: String,
    /// AOR of the watched resource
    pub document_key: String,
}

impl PublicationKey {
    pub fn new(event_type: impl Into<String>, document_key: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            document_key: document_key.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PublicationIndex {
    entries: HashMap<PublicationKey, Vec<ServerSubscriptionHandle>>,
}

impl PublicationIndex {
    pub fn insert(&mut self, key: PublicationKey, handle: ServerSubscriptionHandle) {
        let handles = self.entries.entry(key).or_default();
        if !handles.contains(&handle) {
            handles.push(handle);
        }
    }

    pub fn remove(&mut self, key: &PublicationKey, handle: ServerSubscriptionHandle) {
        if let Some(handles) = self.entries.get_mut(key) {
            handles.retain(|h| *h != handle);
            if handles.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    /// Snapshot of the subscriptions watching `key`, oldest first.
    pub fn subscribers(&self, key: &PublicationKey) -> Vec<ServerSubscriptionHandle> {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    /// Total number of registered subscriptions.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

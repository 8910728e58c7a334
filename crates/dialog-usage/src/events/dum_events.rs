//! Dialog usage lifecycle events

use serde::{Deserialize, Serialize};

use crate::dialog::DialogId;
use crate::usage::{ClientSubscriptionHandle, ServerSubscriptionHandle};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DumEvent {
    /// Dialog created
    DialogCreated {
        dialog_id: DialogId,
    },

    /// Dialog destroyed
    DialogDestroyed {
        dialog_id: DialogId,
    },

    ClientSubscriptionCreated {
        handle: ClientSubscriptionHandle,
        dialog_id: DialogId,
        event_type: String,
    },

    ClientSubscriptionTerminated {
        handle: ClientSubscriptionHandle,
    },

    ServerSubscriptionCreated {
        handle: ServerSubscriptionHandle,
        dialog_id: DialogId,
        event_type: String,
        document_key: String,
    },

    ServerSubscriptionTerminated {
        handle: ServerSubscriptionHandle,
    },

    /// Published state was handed to this many subscriptions
    PublicationDelivered {
        event_type: String,
        document_key: String,
        subscribers: usize,
    },
}

impl DumEvent {
    /// Dialog the event is about, when it names one.
    pub fn dialog_id(&self) -> Option<&DialogId> {
        match self {
            DumEvent::DialogCreated { dialog_id }
            | DumEvent::DialogDestroyed { dialog_id }
            | DumEvent::ClientSubscriptionCreated { dialog_id, .. }
            | DumEvent::ServerSubscriptionCreated { dialog_id, .. } => Some(dialog_id),
            _ => None,
        }
    }
}

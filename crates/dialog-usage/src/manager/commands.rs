//! Deferred operations
//!
//! Application code that must not re-enter a usage from where it is (for
//! example from another usage's callback, or from outside the processing
//! loop) posts a [`DumCommand`]. Posted commands run after the current
//! message or timer has been fully processed.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::DialogResult;
use crate::message::{Contents, SipMessage};
use crate::subscription::{ClientSubscription, ServerSubscription, TerminateReason};
use crate::usage::{ClientSubscriptionHandle, ServerSubscriptionHandle};

use super::core::DialogUsageManager;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DumCommand {
    EndClientSubscription {
        handle: ClientSubscriptionHandle,
        immediate: bool,
    },
    RefreshClientSubscription {
        handle: ClientSubscriptionHandle,
        expires: Option<u32>,
    },
    AcceptClientUpdate {
        handle: ClientSubscriptionHandle,
        code: u16,
        reason: Option<String>,
    },
    RejectClientUpdate {
        handle: ClientSubscriptionHandle,
        code: u16,
        reason: Option<String>,
    },
    EndServerSubscription {
        handle: ServerSubscriptionHandle,
        reason: TerminateReason,
    },
    SendServerMessage {
        handle: ServerSubscriptionHandle,
        msg: SipMessage,
    },
    Publish {
        event_type: String,
        document_key: String,
        contents: Option<Contents>,
    },
}

impl DialogUsageManager {
    pub fn post(&mut self, command: DumCommand) {
        debug!("Posted {:?}", command);
        self.commands.push_back(command);
    }

    /// Runs the commands posted so far. Commands posted while these run
    /// wait for the next turn. Returns how many ran.
    pub fn run_posted_commands(&mut self) -> usize {
        let batch: Vec<_> = self.commands.drain(..).collect();
        let count = batch.len();
        for command in batch {
            if let Err(e) = self.execute(command) {
                warn!("Posted command failed: {}", e);
            }
        }
        count
    }

    fn execute(&mut self, command: DumCommand) -> DialogResult<()> {
        match command {
            DumCommand::EndClientSubscription { handle, immediate } => {
                ClientSubscription::end(self, handle, immediate)
            }
            DumCommand::RefreshClientSubscription { handle, expires } => {
                ClientSubscription::request_refresh(self, handle, expires)
            }
            DumCommand::AcceptClientUpdate { handle, code, reason } => {
                ClientSubscription::accept_update(self, handle, code, reason.as_deref())
            }
            DumCommand::RejectClientUpdate { handle, code, reason } => {
                ClientSubscription::reject_update(self, handle, code, reason.as_deref())
            }
            DumCommand::EndServerSubscription { handle, reason } => {
                ServerSubscription::end(self, handle, reason, None, 0)
            }
            DumCommand::SendServerMessage { handle, msg } => ServerSubscription::send(self, handle, msg),
            DumCommand::Publish {
                event_type,
                document_key,
                contents,
            } => {
                self.publish(&event_type, &document_key, contents);
                Ok(())
            }
        }
    }
}

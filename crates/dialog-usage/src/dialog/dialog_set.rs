use serde::{Deserialize, Serialize};

use crate::message::SipMessage;

use super::dialog_id::{DialogId, DialogSetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogSetState {
    /// Waiting for the first dialog-forming message
    Initial,
    Established,
    Destroying,
}

/// Dialogs created from one initial request (forks of the same Call-ID and
/// local tag). Locally initiated sets keep the initial request so that late
/// NOTIFYs and responses can create usages from it.
#[derive(Debug, Clone)]
pub struct DialogSet {
    pub(crate) id: DialogSetId,
    pub(crate) creator: Option<SipMessage>,
    pub(crate) dialogs: Vec<DialogId>,
    pub(crate) state: DialogSetState,
    pub(crate) reused: bool,
}

impl DialogSet {
    pub(crate) fn new_uac(id: DialogSetId, creator: SipMessage) -> Self {
        Self {
            id,
            creator: Some(creator),
            dialogs: Vec::new(),
            state: DialogSetState::Initial,
            reused: false,
        }
    }

    pub(crate) fn new_uas(id: DialogSetId) -> Self {
        Self {
            id,
            creator: None,
            dialogs: Vec::new(),
            state: DialogSetState::Initial,
            reused: false,
        }
    }

    pub fn id(&self) -> &DialogSetId {
        &self.id
    }

    /// Initial request of a locally initiated set.
    pub fn creator(&self) -> Option<&SipMessage> {
        self.creator.as_ref()
    }

    pub fn dialogs(&self) -> &[DialogId] {
        &self.dialogs
    }

    pub fn state(&self) -> DialogSetState {
        self.state
    }

    /// Set while a redirect re-uses the set for a new target.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub(crate) fn add_dialog(&mut self, id: DialogId) {
        if !self.dialogs.contains(&id) {
            self.dialogs.push(id);
        }
        self.state = DialogSetState::Established;
    }

    pub(crate) fn remove_dialog(&mut self, id: &DialogId) {
        self.dialogs.retain(|d| d != id);
    }

    /// A response correlates with the creator when its CSeq matches.
    pub(crate) fn is_creator_response(&self, response: &SipMessage) -> bool {
        self.creator
            .as_ref()
            .is_some_and(|creator| creator.cseq == response.cseq)
    }
}

//! Core DialogUsageManager implementation
//!
//! Owns the usage arenas and the seams to the outside world. Usages never
//! hold references to each other: a usage stores the [`DialogId`] of its
//! dialog and the dialog stores the handles of its usages.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::DumConfig;
use crate::dialog::{Dialog, DialogId, DialogSet, DialogSetId, InviteSessionFactory};
use crate::events::DumEvent;
use crate::message::{make_response, SipMessage};
use crate::subscription::{
    ClientSubscription, ClientSubscriptionHandler, PublicationIndex, ServerSubscription,
    ServerSubscriptionHandler, SubscriptionIdentity,
};
use crate::usage::{
    ClientAuthManager, ClientSubscriptionHandle, Clock, DumTimeout, HandleAllocator, MessageSink,
    ServerSubscriptionHandle, SystemClock, TimerService,
};

use super::commands::DumCommand;

pub struct DialogUsageManager {
    pub(crate) config: DumConfig,
    pub(crate) dialog_sets: HashMap<DialogSetId, DialogSet>,
    pub(crate) dialogs: HashMap<DialogId, Dialog>,
    pub(crate) client_subscriptions: HashMap<ClientSubscriptionHandle, ClientSubscription>,
    pub(crate) server_subscriptions: HashMap<ServerSubscriptionHandle, ServerSubscription>,
    pub(crate) publications: PublicationIndex,
    client_handlers: HashMap<String, Arc<dyn ClientSubscriptionHandler>>,
    server_handlers: HashMap<String, Arc<dyn ServerSubscriptionHandler>>,
    pub(crate) invite_factory: Option<Arc<dyn InviteSessionFactory>>,
    pub(crate) client_auth: Option<Arc<dyn ClientAuthManager>>,
    sink: Arc<dyn MessageSink>,
    timers: Arc<dyn TimerService>,
    clock: Arc<dyn Clock>,
    handles: HandleAllocator,
    pub(crate) commands: VecDeque<DumCommand>,
    event_tx: Option<mpsc::UnboundedSender<DumEvent>>,
}

impl DialogUsageManager {
    pub fn new(config: DumConfig, sink: Arc<dyn MessageSink>, timers: Arc<dyn TimerService>) -> Self {
        Self {
            config,
            dialog_sets: HashMap::new(),
            dialogs: HashMap::new(),
            client_subscriptions: HashMap::new(),
            server_subscriptions: HashMap::new(),
            publications: PublicationIndex::default(),
            client_handlers: HashMap::new(),
            server_handlers: HashMap::new(),
            invite_factory: None,
            client_auth: None,
            sink,
            timers,
            clock: Arc::new(SystemClock),
            handles: HandleAllocator::default(),
            commands: VecDeque::new(),
            event_tx: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Lifecycle events are sent here from now on.
    pub fn set_event_sender(&mut self, tx: mpsc::UnboundedSender<DumEvent>) {
        self.event_tx = Some(tx);
    }

    pub fn set_client_auth_manager(&mut self, auth: Arc<dyn ClientAuthManager>) {
        self.client_auth = Some(auth);
    }

    pub fn set_invite_session_factory(&mut self, factory: Arc<dyn InviteSessionFactory>) {
        self.invite_factory = Some(factory);
    }

    pub fn add_client_subscription_handler(
        &mut self,
        event_type: impl Into<String>,
        handler: Arc<dyn ClientSubscriptionHandler>,
    ) {
        let event_type = event_type.into();
        debug!("Registered client subscription handler for {}", event_type);
        self.client_handlers.insert(event_type, handler);
    }

    pub fn add_server_subscription_handler(
        &mut self,
        event_type: impl Into<String>,
        handler: Arc<dyn ServerSubscriptionHandler>,
    ) {
        let event_type = event_type.into();
        debug!("Registered server subscription handler for {}", event_type);
        self.server_handlers.insert(event_type, handler);
    }

    pub fn config(&self) -> &DumConfig {
        &self.config
    }

    pub fn client_handler(&self, event_type: &str) -> Option<Arc<dyn ClientSubscriptionHandler>> {
        self.client_handlers.get(event_type).cloned()
    }

    pub fn server_handler(&self, event_type: &str) -> Option<Arc<dyn ServerSubscriptionHandler>> {
        self.server_handlers.get(event_type).cloned()
    }

    pub fn dialog(&self, id: &DialogId) -> Option<&Dialog> {
        self.dialogs.get(id)
    }

    pub fn dialog_set(&self, id: &DialogSetId) -> Option<&DialogSet> {
        self.dialog_sets.get(id)
    }

    pub fn dialog_count(&self) -> usize {
        self.dialogs.len()
    }

    pub fn dialog_set_count(&self) -> usize {
        self.dialog_sets.len()
    }

    pub fn client_subscription(&self, handle: ClientSubscriptionHandle) -> Option<&ClientSubscription> {
        self.client_subscriptions.get(&handle)
    }

    pub fn server_subscription(&self, handle: ServerSubscriptionHandle) -> Option<&ServerSubscription> {
        self.server_subscriptions.get(&handle)
    }

    pub fn publications(&self) -> &PublicationIndex {
        &self.publications
    }

    pub(crate) fn now_secs(&self) -> u64 {
        self.clock.now_secs()
    }

    pub(crate) fn add_timer(&self, timeout: DumTimeout, delay: Duration) {
        self.timers.add_timer(timeout, delay);
    }

    /// Sends a message belonging to `dialog_id`, remembering requests until
    /// their final response.
    pub(crate) fn send_in_dialog(&mut self, dialog_id: &DialogId, msg: SipMessage) {
        if let Some(dialog) = self.dialogs.get_mut(dialog_id) {
            dialog.record_outgoing(&msg);
        }
        debug!("Sending {} in dialog {}", msg.brief(), dialog_id);
        self.sink.send(msg);
    }

    pub(crate) fn send_raw(&self, msg: SipMessage) {
        debug!("Sending {}", msg.brief());
        self.sink.send(msg);
    }

    /// Answers `request` from its dialog when it still exists, stateless
    /// otherwise.
    pub(crate) fn respond_without_usage(&self, request: &SipMessage, code: u16) {
        let dialog_id = DialogId::from_inbound(request);
        let response = match self.dialogs.get(&dialog_id) {
            Some(dialog) => dialog.make_response(request, code),
            None => make_response(request, code),
        };
        self.send_raw(response);
    }

    pub(crate) fn is_dialog_set_reused(&self, dialog_id: &DialogId) -> bool {
        self.dialog_sets
            .get(&dialog_id.dialog_set_id())
            .is_some_and(|set| set.reused)
    }

    pub(crate) fn emit(&self, event: DumEvent) {
        if let Some(tx) = &self.event_tx {
            if tx.send(event).is_err() {
                debug!("Event receiver dropped");
            }
        }
    }

    pub(crate) fn create_client_subscription(
        &mut self,
        dialog_id: &DialogId,
        last_request: SipMessage,
        identity: SubscriptionIdentity,
    ) -> Option<ClientSubscriptionHandle> {
        let now = self.now_secs();
        let dialog = self.dialogs.get_mut(dialog_id)?;
        let handle = self.handles.next_client();
        let event_type = identity.event_type.clone();
        let sub = ClientSubscription::new(handle, dialog_id.clone(), last_request, identity, now);
        dialog.client_subscriptions.push(handle);
        self.client_subscriptions.insert(handle, sub);
        info!("Created {} for {} in dialog {}", handle, event_type, dialog_id);
        self.emit(DumEvent::ClientSubscriptionCreated {
            handle,
            dialog_id: dialog_id.clone(),
            event_type,
        });
        Some(handle)
    }

    pub(crate) fn create_server_subscription(
        &mut self,
        dialog_id: &DialogId,
        request: &SipMessage,
    ) -> Option<ServerSubscriptionHandle> {
        let dialog = self.dialogs.get_mut(dialog_id)?;
        let handle = self.handles.next_server();
        let sub = ServerSubscription::new(handle, dialog_id.clone(), request);
        let key = sub.publication_key();
        dialog.server_subscriptions.push(handle);
        self.publications.insert(key.clone(), handle);
        self.server_subscriptions.insert(handle, sub);
        info!("Created {} for {} of {} in dialog {}", handle, key.event_type, key.document_key, dialog_id);
        self.emit(DumEvent::ServerSubscriptionCreated {
            handle,
            dialog_id: dialog_id.clone(),
            event_type: key.event_type,
            document_key: key.document_key,
        });
        Some(handle)
    }

    /// Removes the usage without callbacks and lets its dialog die if it
    /// is now empty.
    pub(crate) fn destroy_client_subscription(&mut self, handle: ClientSubscriptionHandle) {
        let Some(sub) = self.client_subscriptions.remove(&handle) else {
            return;
        };
        if let Some(dialog) = self.dialogs.get_mut(&sub.dialog_id) {
            dialog.remove_client_subscription(handle);
        }
        debug!("Destroyed {}", handle);
        self.emit(DumEvent::ClientSubscriptionTerminated { handle });
        self.possibly_die(&sub.dialog_id);
    }

    pub(crate) fn destroy_server_subscription(&mut self, handle: ServerSubscriptionHandle) {
        let Some(sub) = self.server_subscriptions.remove(&handle) else {
            return;
        };
        self.publications.remove(&sub.publication_key(), handle);
        if let Some(dialog) = self.dialogs.get_mut(&sub.dialog_id) {
            dialog.remove_server_subscription(handle);
        }
        debug!("Destroyed {}", handle);
        self.emit(DumEvent::ServerSubscriptionTerminated { handle });
        self.possibly_die(&sub.dialog_id);
    }

    /// Destroys the dialog when it owns no usage any more.
    pub(crate) fn possibly_die(&mut self, dialog_id: &DialogId) {
        let empty = self
            .dialogs
            .get(dialog_id)
            .is_some_and(|dialog| !dialog.destroying && dialog.is_empty());
        if empty {
            self.destroy_dialog(dialog_id);
        }
    }

    /// Drops the dialog and whatever usages it still owns, then its dialog
    /// set when that is empty and not being re-used.
    pub(crate) fn destroy_dialog(&mut self, dialog_id: &DialogId) {
        let Some(dialog) = self.dialogs.remove(dialog_id) else {
            return;
        };
        for handle in &dialog.client_subscriptions {
            if self.client_subscriptions.remove(handle).is_some() {
                self.emit(DumEvent::ClientSubscriptionTerminated { handle: *handle });
            }
        }
        for handle in &dialog.server_subscriptions {
            if let Some(sub) = self.server_subscriptions.remove(handle) {
                self.publications.remove(&sub.publication_key(), *handle);
                self.emit(DumEvent::ServerSubscriptionTerminated { handle: *handle });
            }
        }
        info!("Destroyed dialog {}", dialog_id);
        self.emit(DumEvent::DialogDestroyed {
            dialog_id: dialog_id.clone(),
        });

        let set_id = dialog_id.dialog_set_id();
        if let Some(set) = self.dialog_sets.get_mut(&set_id) {
            set.remove_dialog(dialog_id);
            if set.dialogs.is_empty() && !set.reused {
                debug!("Destroyed dialog set {}", set_id);
                self.dialog_sets.remove(&set_id);
            }
        }
    }

    /// Removes a dialog set that never got a dialog.
    pub(crate) fn cleanup_empty_dialog_set(&mut self, set_id: &DialogSetId) {
        let empty = self
            .dialog_sets
            .get(set_id)
            .is_some_and(|set| set.dialogs.is_empty() && !set.reused);
        if empty {
            warn!("Dropping dialog set {} without dialogs", set_id);
            self.dialog_sets.remove(set_id);
        }
    }
}

impl std::fmt::Debug for DialogUsageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogUsageManager")
            .field("dialog_sets", &self.dialog_sets.len())
            .field("dialogs", &self.dialogs.len())
            .field("client_subscriptions", &self.client_subscriptions.len())
            .field("server_subscriptions", &self.server_subscriptions.len())
            .field("pending_commands", &self.commands.len())
            .finish_non_exhaustive()
    }
}

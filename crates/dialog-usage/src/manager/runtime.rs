//! Tokio edge of the manager
//!
//! The manager itself never awaits. [`DumRunner`] owns it and feeds it
//! inbound messages and timer firings from channels, one at a time.
//!
//! ```text
//! transport ── inbound ──▶ DumRunner ── process_message ──▶ DialogUsageManager
//!                            ▲                                  │
//!       TokioTimerService ───┘ process_timeout                  └── ChannelSink ──▶ outbound
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::DumConfig;
use crate::message::SipMessage;
use crate::usage::{DumTimeout, MessageSink, TimerService, UsageHandle};

use super::core::DialogUsageManager;

/// Sleep task of the latest sequenced timer of a usage.
type ArmedTimers = Arc<Mutex<HashMap<UsageHandle, (u64, JoinHandle<()>)>>>;

/// Timer service backed by `tokio::time::sleep` tasks. Fired timeouts are
/// delivered on a channel.
///
/// A sequenced timer supersedes every earlier one of its usage, so arming
/// one aborts the sleep task it replaces. `SendNextNotify` (sequence 0) is
/// never tracked.
#[derive(Debug, Clone)]
pub struct TokioTimerService {
    tx: mpsc::UnboundedSender<DumTimeout>,
    runtime: Handle,
    armed: ArmedTimers,
}

impl TokioTimerService {
    /// Must be called from inside a tokio runtime.
    pub fn new(tx: mpsc::UnboundedSender<DumTimeout>) -> anyhow::Result<Self> {
        let runtime = Handle::try_current().context("TokioTimerService needs a tokio runtime")?;
        Ok(Self {
            tx,
            runtime,
            armed: Arc::default(),
        })
    }

    /// Sleep tasks still pending for sequenced timers.
    pub fn armed_count(&self) -> usize {
        self.armed.lock().len()
    }
}

impl TimerService for TokioTimerService {
    fn add_timer(&self, timeout: DumTimeout, delay: Duration) {
        let tx = self.tx.clone();
        if timeout.seq == 0 {
            self.runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                if tx.send(timeout).is_err() {
                    debug!("Timer {:?} fired after the runner stopped", timeout.kind);
                }
            });
            return;
        }

        let armed = Arc::clone(&self.armed);
        // held across the spawn so the task cannot finish before it is recorded
        let mut tasks = self.armed.lock();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut tasks = armed.lock();
                if tasks.get(&timeout.usage).is_some_and(|(seq, _)| *seq == timeout.seq) {
                    tasks.remove(&timeout.usage);
                }
            }
            if tx.send(timeout).is_err() {
                debug!("Timer {:?} fired after the runner stopped", timeout.kind);
            }
        });
        if let Some((seq, previous)) = tasks.insert(timeout.usage, (timeout.seq, task)) {
            debug!("Timer seq={} of {:?} superseded by seq={}", seq, timeout.usage, timeout.seq);
            previous.abort();
        }
    }
}

/// Message sink writing to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SipMessage>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<SipMessage>) -> Self {
        Self { tx }
    }
}

impl MessageSink for ChannelSink {
    fn send(&self, message: SipMessage) {
        if self.tx.send(message).is_err() {
            debug!("Outbound channel closed, message dropped");
        }
    }
}

/// Owns a [`DialogUsageManager`] and drives it from channels until shut
/// down.
pub struct DumRunner {
    dum: DialogUsageManager,
    inbound_rx: mpsc::UnboundedReceiver<SipMessage>,
    timer_rx: mpsc::UnboundedReceiver<DumTimeout>,
    shutdown_rx: oneshot::Receiver<()>,
}

/// Feeds a running [`DumRunner`].
#[derive(Debug)]
pub struct DumRunnerHandle {
    inbound_tx: mpsc::UnboundedSender<SipMessage>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl DumRunner {
    /// Creates a runner with tokio timers and a channel sink. Returns the
    /// runner, its handle and the receiver of outbound messages.
    pub fn new(
        config: DumConfig,
    ) -> anyhow::Result<(Self, DumRunnerHandle, mpsc::UnboundedReceiver<SipMessage>)> {
        config.validate().context("invalid dialog usage configuration")?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let timers = TokioTimerService::new(timer_tx)?;
        let dum = DialogUsageManager::new(config, Arc::new(ChannelSink::new(outbound_tx)), Arc::new(timers));
        let runner = Self {
            dum,
            inbound_rx,
            timer_rx,
            shutdown_rx,
        };
        let handle = DumRunnerHandle {
            inbound_tx,
            shutdown_tx: Some(shutdown_tx),
        };
        Ok((runner, handle, outbound_rx))
    }

    /// Access for registering handlers and starting subscriptions before
    /// `run`.
    pub fn manager_mut(&mut self) -> &mut DialogUsageManager {
        &mut self.dum
    }

    /// Processes messages and timers until shutdown or until every
    /// inbound sender is gone. Returns the manager for inspection.
    pub async fn run(mut self) -> anyhow::Result<DialogUsageManager> {
        info!("Dialog usage runner started");
        loop {
            tokio::select! {
                biased;
                _ = &mut self.shutdown_rx => {
                    info!("Dialog usage runner shutting down");
                    break;
                }
                Some(timeout) = self.timer_rx.recv() => {
                    self.dum.process_timeout(timeout);
                }
                inbound = self.inbound_rx.recv() => match inbound {
                    Some(msg) => self.dum.process_message(msg),
                    None => {
                        info!("Inbound channel closed, runner stopping");
                        break;
                    }
                },
            }
        }
        Ok(self.dum)
    }
}

impl DumRunnerHandle {
    pub fn deliver(&self, msg: SipMessage) -> anyhow::Result<()> {
        self.inbound_tx
            .send(msg)
            .map_err(|_| anyhow!("dialog usage runner is not running"))
    }

    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::{ClientSubscriptionHandle, ServerSubscriptionHandle, TimeoutKind};

    #[tokio::test(start_paused = true)]
    async fn test_rearming_aborts_superseded_sleep() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = TokioTimerService::new(tx).unwrap();
        let client = ClientSubscriptionHandle(1);
        let server = ServerSubscriptionHandle(1);

        timers.add_timer(DumTimeout::new(TimeoutKind::WaitForNotify, client, 1), Duration::from_secs(32));
        timers.add_timer(DumTimeout::new(TimeoutKind::Subscription, client, 2), Duration::from_secs(3150));
        timers.add_timer(DumTimeout::new(TimeoutKind::Subscription, server, 1), Duration::from_secs(60));
        timers.add_timer(DumTimeout::new(TimeoutKind::SendNextNotify, client, 0), Duration::ZERO);
        assert_eq!(timers.armed_count(), 2);

        assert_eq!(rx.recv().await.unwrap().kind, TimeoutKind::SendNextNotify);
        let expired = rx.recv().await.unwrap();
        assert_eq!(expired.usage, UsageHandle::from(server));
        assert_eq!(timers.armed_count(), 1);

        // the 32s WaitForNotify never shows up
        let refresh = rx.recv().await.unwrap();
        assert_eq!((refresh.kind, refresh.seq), (TimeoutKind::Subscription, 2));
        assert_eq!(timers.armed_count(), 0);
        assert!(rx.try_recv().is_err());
    }
}

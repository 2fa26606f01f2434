//! In-process transport over tokio channels.
//!
//! A [`ChannelHub`] owns one bounded inbound queue per registered peer.
//! Every [`ChannelTransport`] cut from the hub pushes onto those queues with
//! `try_send`, so sending never blocks.

use audit_messages::PollMessage;
use audit_types::PeerIdentity;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::{NetworkError, Transport};

const DEFAULT_QUEUE_DEPTH: usize = 1024;

#[derive(Default)]
struct HubInner {
    queues: RwLock<HashMap<PeerIdentity, mpsc::Sender<PollMessage>>>,
    sent: AtomicU64,
    dropped: AtomicU64,
}

/// Registry of per-peer inbound queues.
#[derive(Clone)]
pub struct ChannelHub {
    inner: Arc<HubInner>,
    queue_depth: usize,
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::with_queue_depth(DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(queue_depth: usize) -> Self {
        Self {
            inner: Arc::default(),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Register `peer` and return its inbound queue. Re-registering replaces
    /// the previous queue.
    pub fn register(&self, peer: PeerIdentity) -> mpsc::Receiver<PollMessage> {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        self.inner
            .queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer, tx);
        rx
    }

    pub fn unregister(&self, peer: &PeerIdentity) {
        self.inner
            .queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer);
    }

    pub fn transport(&self) -> ChannelTransport {
        ChannelTransport { hub: self.clone() }
    }

    pub fn sent_count(&self) -> u64 {
        self.inner.sent.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

/// A [`Transport`] that delivers into a [`ChannelHub`].
#[derive(Clone)]
pub struct ChannelTransport {
    hub: ChannelHub,
}

impl Transport for ChannelTransport {
    fn send(&self, to: &PeerIdentity, message: PollMessage) -> Result<(), NetworkError> {
        let queues = self
            .hub
            .inner
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let tx = queues
            .get(to)
            .ok_or_else(|| NetworkError::PeerNotFound(to.to_string()))?;
        trace!(to = %to, opcode = %message.opcode, "queueing message");
        match tx.try_send(message) {
            Ok(()) => {
                self.hub.inner.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.hub.inner.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(to = %to, "inbound queue full, message dropped");
                Err(NetworkError::QueueFull(to.to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.hub.inner.dropped.fetch_add(1, Ordering::Relaxed);
                Err(NetworkError::Closed(to.to_string()))
            }
        }
    }
}

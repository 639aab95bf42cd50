//! Radio callback surface
//!
//! The radio driver calls into the engine from its own context (an
//! interrupt-like callback on embedded targets, another thread on hosts).
//! [`RadioHandle`] is everything that context may touch:
//!
//! - [`RadioHandle::on_receive`] filters a received frame and, if it passes,
//!   hands it to the incoming channel drained by [`MeshNode::tick`].
//! - [`RadioHandle::on_send_complete`] latches the outcome of the last send.
//!
//! Neither call blocks or allocates. The receive filter state sits behind a
//! mutex taken with `try_lock`; a contended lock drops the frame.
//!
//! ## Receive filter order
//!
//! ```text
//! bytes ──► decode ──► loopback ──► network name ──► dedup ──► incoming channel
//!             │            │              │             │              │
//!         Malformed    Loopback    ForeignNetwork   Duplicate       Overflow
//! ```
//!
//! [`MeshNode::tick`]: super::node::MeshNode::tick

use super::address::NodeAddress;
use super::packet::{Envelope, IncomingEntry, NetworkName};
use super::routing::DuplicateCache;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::trace;

/// What the receive path did with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveVerdict {
    /// Queued for dispatch
    Accepted,
    /// Wrong length or undecodable
    Malformed,
    /// Originated by this node and echoed back
    Loopback,
    /// Different network name
    ForeignNetwork,
    /// Message id seen recently
    Duplicate,
    /// Filter state was locked by a concurrent call
    Busy,
    /// Incoming channel full
    Overflow,
}

impl ReceiveVerdict {
    /// Check if the frame was queued
    pub fn is_accepted(self) -> bool {
        self == ReceiveVerdict::Accepted
    }
}

/// Receive path counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStats {
    pub accepted: u64,
    pub malformed: u64,
    pub loopback: u64,
    pub foreign_network: u64,
    pub duplicates: u64,
    pub busy: u64,
    pub overflow: u64,
}

impl ReceiveStats {
    /// Frames that reached the receive path at all
    pub fn total(&self) -> u64 {
        self.accepted
            + self.malformed
            + self.loopback
            + self.foreign_network
            + self.duplicates
            + self.busy
            + self.overflow
    }
}

#[derive(Debug, Default)]
struct ReceiveCounters {
    accepted: AtomicU64,
    malformed: AtomicU64,
    loopback: AtomicU64,
    foreign_network: AtomicU64,
    duplicates: AtomicU64,
    busy: AtomicU64,
    overflow: AtomicU64,
}

impl ReceiveCounters {
    fn record(&self, verdict: ReceiveVerdict) {
        let counter = match verdict {
            ReceiveVerdict::Accepted => &self.accepted,
            ReceiveVerdict::Malformed => &self.malformed,
            ReceiveVerdict::Loopback => &self.loopback,
            ReceiveVerdict::ForeignNetwork => &self.foreign_network,
            ReceiveVerdict::Duplicate => &self.duplicates,
            ReceiveVerdict::Busy => &self.busy,
            ReceiveVerdict::Overflow => &self.overflow,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ReceiveStats {
        ReceiveStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            loopback: self.loopback.load(Ordering::Relaxed),
            foreign_network: self.foreign_network.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            overflow: self.overflow.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of the most recent send, written by the radio and consumed by
/// the tick
#[derive(Debug, Default)]
struct SendLatch {
    completed: AtomicBool,
    success: AtomicBool,
}

impl SendLatch {
    fn report(&self, success: bool) {
        self.success.store(success, Ordering::Relaxed);
        self.completed.store(true, Ordering::Release);
    }

    fn take(&self) -> Option<bool> {
        if self.completed.swap(false, Ordering::Acquire) {
            Some(self.success.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    fn clear(&self) {
        self.completed.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
struct ReceiveFilter {
    network_name: NetworkName,
    dedup: DuplicateCache,
}

#[derive(Debug)]
struct RadioShared {
    address: NodeAddress,
    filter: Mutex<ReceiveFilter>,
    incoming: SyncSender<IncomingEntry>,
    latch: SendLatch,
    counters: ReceiveCounters,
}

/// Callback-context handle to one node's receive and send-completion state
#[derive(Debug, Clone)]
pub struct RadioHandle {
    shared: Arc<RadioShared>,
}

impl RadioHandle {
    /// Create a handle and the receiving end of its incoming channel
    pub(crate) fn new(
        address: NodeAddress,
        network_name: NetworkName,
        incoming_capacity: usize,
    ) -> (Self, Receiver<IncomingEntry>) {
        let (tx, rx) = mpsc::sync_channel(incoming_capacity.max(1));
        let shared = RadioShared {
            address,
            filter: Mutex::new(ReceiveFilter {
                network_name,
                dedup: DuplicateCache::default(),
            }),
            incoming: tx,
            latch: SendLatch::default(),
            counters: ReceiveCounters::default(),
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    /// Address of the node this handle belongs to
    pub fn address(&self) -> NodeAddress {
        self.shared.address
    }

    /// Frame received from `source`
    pub fn on_receive(&self, source: NodeAddress, bytes: &[u8]) -> ReceiveVerdict {
        let verdict = self.filter_and_queue(source, bytes);
        self.shared.counters.record(verdict);
        verdict
    }

    /// Transport finished the last send.
    ///
    /// Reports carry no send id, so a report that arrives after its send
    /// timed out is credited to the send that followed. A timed-out head is
    /// normally retried, in which case that send carried the same frame.
    pub fn on_send_complete(&self, success: bool) {
        self.shared.latch.report(success);
    }

    /// Receive path counters
    pub fn stats(&self) -> ReceiveStats {
        self.shared.counters.snapshot()
    }

    fn filter_and_queue(&self, source: NodeAddress, bytes: &[u8]) -> ReceiveVerdict {
        let envelope = match Envelope::decode(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                trace!("Dropping frame from {}: {}", source, e);
                return ReceiveVerdict::Malformed;
            }
        };

        if envelope.originated_by(self.shared.address) {
            return ReceiveVerdict::Loopback;
        }

        let mut filter = match self.shared.filter.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return ReceiveVerdict::Busy,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        if !filter.network_name.accepts(&envelope.network_name) {
            return ReceiveVerdict::ForeignNetwork;
        }
        if filter.dedup.seen(envelope.message_id) {
            return ReceiveVerdict::Duplicate;
        }

        let entry = IncomingEntry {
            envelope,
            previous_hop: source,
        };
        match self.shared.incoming.try_send(entry) {
            Ok(()) => {
                // only queued ids count as seen, so a retransmission can
                // still get through once the channel drains
                filter.dedup.remember(envelope.message_id);
                ReceiveVerdict::Accepted
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                trace!("Incoming channel full, dropping {} {:04X}", envelope.message_type, envelope.message_id);
                ReceiveVerdict::Overflow
            }
        }
    }

    /// Blocking access for the owning node, never used from the callback
    /// context
    fn filter(&self) -> MutexGuard<'_, ReceiveFilter> {
        self.shared
            .filter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn set_network_name(&self, name: NetworkName) {
        self.filter().network_name = name;
    }

    pub(crate) fn take_send_result(&self) -> Option<bool> {
        self.shared.latch.take()
    }

    pub(crate) fn clear_send_result(&self) {
        self.shared.latch.clear();
    }
}

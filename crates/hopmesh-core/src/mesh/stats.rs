//! Per-node statistics

use super::radio::ReceiveStats;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Snapshot of one node's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshStats {
    /// Frames handed to the transport, retransmissions included
    pub frames_sent: u64,
    /// Sends acknowledged by the next hop
    pub sends_confirmed: u64,
    /// Sends that failed or timed out
    pub sends_failed: u64,
    /// Failed sends kept at the head for another try
    pub retransmissions: u64,
    /// SEARCH_REQUEST floods started after retry exhaustion
    pub route_searches: u64,
    /// Incoming frames taken off the channel
    pub frames_dispatched: u64,
    /// Frames forwarded on behalf of other nodes
    pub frames_relayed: u64,
    /// Route table insertions and next-hop changes
    pub routes_learned: u64,
    /// Waiting entries moved back to the outgoing queue
    pub waiting_resolved: u64,
    /// Waiting entries dropped after the route wait timeout
    pub waiting_expired: u64,
    /// Frames lost to a full outgoing or waiting queue
    pub queue_drops: u64,
    pub broadcasts_delivered: u64,
    pub unicasts_delivered: u64,
    /// End-to-end confirmations received
    pub confirmations: u64,
    /// Receive path counters
    pub receive: ReceiveStats,
}

impl fmt::Display for MeshStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  TX: {} frames ({} ok, {} failed, {} retries), {} searches",
            self.frames_sent,
            self.sends_confirmed,
            self.sends_failed,
            self.retransmissions,
            self.route_searches
        )?;
        writeln!(
            f,
            "  RX: {} accepted, {} duplicate, {} foreign, {} malformed, {} dropped",
            self.receive.accepted,
            self.receive.duplicates,
            self.receive.foreign_network,
            self.receive.malformed,
            self.receive.busy + self.receive.overflow
        )?;
        writeln!(
            f,
            "  Relayed: {}  Routes learned: {}  Waiting: {} resolved / {} expired",
            self.frames_relayed, self.routes_learned, self.waiting_resolved, self.waiting_expired
        )?;
        write!(
            f,
            "  Delivered: {} broadcast, {} unicast, {} confirms  Queue drops: {}",
            self.broadcasts_delivered,
            self.unicasts_delivered,
            self.confirmations,
            self.queue_drops
        )
    }
}

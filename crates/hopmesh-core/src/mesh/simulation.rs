//! Multi-Node Mesh Network Simulation
//!
//! Runs several [`MeshNode`]s over an in-memory radio medium without
//! hardware. It models:
//!
//! - Link topologies (line, ring, star, grid, full mesh or custom)
//! - Links cut and restored at run time
//! - Per-reception random loss
//! - MAC-layer acknowledgements for unicast frames
//!
//! All nodes share one [`ManualClock`]. Each step advances it by
//! `step_ms`, delivers the frames sent during the previous step, then ticks
//! every node. Runs are deterministic for a given seed.
//!
//! ## Example
//!
//! ```ignore
//! use hopmesh_core::mesh::simulation::{MeshSimulator, SimConfig, Topology};
//!
//! let config = SimConfig::default()
//!     .with_node_count(6)
//!     .with_topology(Topology::Ring);
//! let mut sim = MeshSimulator::new(config)?;
//!
//! sim.send_unicast(0, 3, b"hello", true)?;
//! sim.run(200);
//!
//! println!("{}", sim.stats());
//! ```

use super::address::NodeAddress;
use super::config::MeshConfig;
use super::node::MeshNode;
use super::packet::{Envelope, FRAME_SIZE};
use super::stats::MeshStats;
use super::traits::{ManualClock, Transport};
use crate::error::{ConfigError, FrameError, MeshResult, TransportError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

/// A frame handed to a [`RecordingTransport`]
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub next_hop: NodeAddress,
    pub frame: [u8; FRAME_SIZE],
}

impl SentFrame {
    /// Decode the recorded frame
    pub fn envelope(&self) -> Result<Envelope, FrameError> {
        Envelope::decode(&self.frame)
    }
}

/// Transport that keeps every frame it is given.
///
/// The simulator drains it each step; tests inspect it directly.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Vec<SentFrame>,
    refuse: Option<TransportError>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames recorded since the last drain
    pub fn sent(&self) -> &[SentFrame] {
        &self.sent
    }

    /// Drain recorded frames
    pub fn take_sent(&mut self) -> Vec<SentFrame> {
        std::mem::take(&mut self.sent)
    }

    /// Make every following `send` fail with `error`
    pub fn refuse_with(&mut self, error: TransportError) {
        self.refuse = Some(error);
    }

    /// Accept frames again
    pub fn accept(&mut self) {
        self.refuse = None;
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, next_hop: NodeAddress, frame: &[u8; FRAME_SIZE]) -> Result<(), TransportError> {
        if let Some(error) = &self.refuse {
            return Err(error.clone());
        }
        self.sent.push(SentFrame {
            next_hop,
            frame: *frame,
        });
        Ok(())
    }
}

/// Node type driven by the simulator
pub type SimNode = MeshNode<RecordingTransport, ManualClock>;

/// Which nodes can hear each other
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// 0 - 1 - 2 - ... - n-1
    Line,
    /// Line with the ends joined
    Ring,
    /// Node 0 linked to every other node
    Star,
    /// Row-major grid, `width` nodes per row
    Grid { width: usize },
    /// Every pair linked
    FullMesh,
    /// Explicit undirected links
    Custom(Vec<(usize, usize)>),
}

impl Topology {
    /// Undirected links for `n` nodes, each as `(low, high)`
    pub fn links(&self, n: usize) -> BTreeSet<(usize, usize)> {
        let mut links = BTreeSet::new();
        let mut add = |a: usize, b: usize| {
            if a != b && a < n && b < n {
                links.insert((a.min(b), a.max(b)));
            }
        };

        match self {
            Topology::Line => (1..n).for_each(|i| add(i - 1, i)),
            Topology::Ring => {
                (1..n).for_each(|i| add(i - 1, i));
                if n > 2 {
                    add(n - 1, 0);
                }
            }
            Topology::Star => (1..n).for_each(|i| add(0, i)),
            Topology::Grid { width } => {
                let width = (*width).max(1);
                for i in 0..n {
                    if (i + 1) % width != 0 {
                        add(i, i + 1);
                    }
                    add(i, i + width);
                }
            }
            Topology::FullMesh => {
                for a in 0..n {
                    for b in a + 1..n {
                        add(a, b);
                    }
                }
            }
            Topology::Custom(pairs) => pairs.iter().for_each(|&(a, b)| add(a, b)),
        }
        links
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Line => write!(f, "line"),
            Topology::Ring => write!(f, "ring"),
            Topology::Star => write!(f, "star"),
            Topology::Grid { width } => write!(f, "grid ({} wide)", width),
            Topology::FullMesh => write!(f, "full mesh"),
            Topology::Custom(pairs) => write!(f, "custom ({} links)", pairs.len()),
        }
    }
}

/// Simulation configuration
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Number of nodes in the simulation
    pub node_count: usize,
    pub topology: Topology,
    /// Simulated time per step (ms)
    pub step_ms: u64,
    /// Probability that one reception is lost (0.0 - 1.0)
    pub loss_rate: f64,
    /// Random seed for reproducibility
    pub seed: u64,
    /// Configuration applied to every node
    pub mesh: MeshConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            node_count: 5,
            topology: Topology::Line,
            step_ms: 5,
            loss_rate: 0.0,
            seed: 42,
            mesh: MeshConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn with_node_count(mut self, count: usize) -> Self {
        self.node_count = count;
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_step_ms(mut self, ms: u64) -> Self {
        self.step_ms = ms.max(1);
        self
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_mesh_config(mut self, mesh: MeshConfig) -> Self {
        self.mesh = mesh;
        self
    }
}

/// Application-visible events, in the order the callbacks fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    BroadcastDelivered {
        node_idx: usize,
        from: NodeAddress,
        payload: String,
    },
    UnicastDelivered {
        node_idx: usize,
        from: NodeAddress,
        payload: String,
    },
    ConfirmReceived {
        node_idx: usize,
        target: NodeAddress,
        success: bool,
    },
}

/// Simulation statistics
#[derive(Debug, Clone, Default)]
pub struct SimStats {
    pub steps: u64,
    /// Messages submitted by the application
    pub messages_sent: u64,
    /// Frames put on the air
    pub frames_transmitted: u64,
    /// Frames that reached a receiver's radio
    pub receptions: u64,
    /// Receptions lost to the configured loss rate
    pub receptions_lost: u64,
    pub broadcast_deliveries: u64,
    pub unicast_deliveries: u64,
    /// End-to-end confirmations (`success = true`, broadcasts excluded)
    pub confirmations: u64,
    /// Confirm-requested unicasts reported undeliverable
    pub failures: u64,
    /// Per-node statistics
    pub per_node: Vec<MeshStats>,
}

impl SimStats {
    /// Share of receptions that survived the medium (0.0 - 1.0)
    pub fn reception_rate(&self) -> f64 {
        let total = self.receptions + self.receptions_lost;
        if total == 0 {
            0.0
        } else {
            self.receptions as f64 / total as f64
        }
    }
}

impl fmt::Display for SimStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Mesh Simulation Summary ===")?;
        writeln!(f, "Steps: {}", self.steps)?;
        writeln!(f, "Nodes: {}", self.per_node.len())?;
        writeln!(f)?;
        writeln!(f, "Messages:")?;
        writeln!(f, "  Sent: {}", self.messages_sent)?;
        writeln!(f, "  Broadcast deliveries: {}", self.broadcast_deliveries)?;
        writeln!(f, "  Unicast deliveries: {}", self.unicast_deliveries)?;
        writeln!(f, "  Confirmations: {}", self.confirmations)?;
        writeln!(f, "  Failures: {}", self.failures)?;
        writeln!(f)?;
        writeln!(f, "Frames:")?;
        writeln!(f, "  Transmitted: {}", self.frames_transmitted)?;
        writeln!(f, "  Received: {}", self.receptions)?;
        writeln!(f, "  Lost: {}", self.receptions_lost)?;
        writeln!(f, "  Reception rate: {:.1}%", self.reception_rate() * 100.0)?;
        writeln!(f)?;
        write!(f, "Per-node stats:")?;
        for (i, stats) in self.per_node.iter().enumerate() {
            write!(f, "\n Node {:2}:\n{}", i, stats)?;
        }
        Ok(())
    }
}

/// Multi-node mesh network simulator
pub struct MeshSimulator {
    config: SimConfig,
    clock: ManualClock,
    nodes: Vec<SimNode>,
    index: HashMap<NodeAddress, usize>,
    links: BTreeSet<(usize, usize)>,
    rng: StdRng,
    /// Filled by node callbacks during ticks
    pending_events: Arc<Mutex<Vec<SimEvent>>>,
    event_log: Vec<SimEvent>,
    stats: SimStats,
}

impl MeshSimulator {
    /// Create a new simulator with the given configuration
    pub fn new(config: SimConfig) -> Result<Self, ConfigError> {
        config.mesh.validate()?;
        let clock = ManualClock::new(0);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let pending_events = Arc::new(Mutex::new(Vec::new()));

        let mut nodes = Vec::with_capacity(config.node_count);
        let mut index = HashMap::with_capacity(config.node_count);
        while nodes.len() < config.node_count {
            let address = NodeAddress::random(&mut rng);
            if index.contains_key(&address) {
                continue;
            }
            let idx = nodes.len();
            let mut node = MeshNode::new(
                address,
                config.mesh.clone(),
                RecordingTransport::new(),
                clock.clone(),
            )?
            .with_rng_seed(config.seed.wrapping_add(idx as u64 + 1));
            register_callbacks(&mut node, idx, &pending_events);
            index.insert(address, idx);
            nodes.push(node);
        }

        let links = config.topology.links(config.node_count);
        debug!(
            "Simulating {} nodes, {} topology, {} links",
            config.node_count,
            config.topology,
            links.len()
        );

        Ok(Self {
            clock,
            nodes,
            index,
            links,
            rng,
            pending_events,
            event_log: Vec::new(),
            stats: SimStats::default(),
            config,
        })
    }

    /// Run one simulation step
    pub fn step(&mut self) {
        self.stats.steps += 1;
        self.clock.advance(self.config.step_ms);

        // 1. Deliver frames sent during the previous step
        self.deliver_frames();

        // 2. Let every node do its maintenance
        for node in &mut self.nodes {
            node.tick();
        }

        // 3. Collect application callbacks
        self.collect_events();
    }

    /// Run simulation for a number of steps
    pub fn run(&mut self, steps: u64) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// Run until `condition` holds or `max_steps` pass; returns whether the
    /// condition was met
    pub fn run_until<F>(&mut self, max_steps: u64, condition: F) -> bool
    where
        F: Fn(&Self) -> bool,
    {
        for _ in 0..max_steps {
            self.step();
            if condition(self) {
                return true;
            }
        }
        false
    }

    /// Check if nothing is queued, waiting or on the air anywhere
    pub fn is_quiet(&self) -> bool {
        self.nodes.iter().all(|node| {
            node.outgoing_len() == 0 && node.waiting_len() == 0 && node.transport().sent().is_empty()
        })
    }

    /// Broadcast from node `from_idx`
    pub fn send_broadcast(&mut self, from_idx: usize, data: &[u8]) -> MeshResult<u16> {
        let id = self.nodes[from_idx].send_broadcast(data)?;
        self.stats.messages_sent += 1;
        Ok(id)
    }

    /// Unicast from node `from_idx` to node `to_idx`
    pub fn send_unicast(&mut self, from_idx: usize, to_idx: usize, data: &[u8], confirm: bool) -> MeshResult<u16> {
        let destination = self.nodes[to_idx].address();
        let id = self.nodes[from_idx].send_unicast(data, destination, confirm)?;
        self.stats.messages_sent += 1;
        Ok(id)
    }

    /// Cut (`up = false`) or restore a link
    pub fn set_link(&mut self, a: usize, b: usize, up: bool) {
        if a == b {
            return;
        }
        let key = (a.min(b), a.max(b));
        if up {
            self.links.insert(key);
        } else {
            self.links.remove(&key);
        }
        debug!("Link {}-{} {}", a, b, if up { "up" } else { "down" });
    }

    pub fn is_linked(&self, a: usize, b: usize) -> bool {
        self.links.contains(&(a.min(b), a.max(b)))
    }

    /// Nodes linked to `idx`
    pub fn neighbours(&self, idx: usize) -> Vec<usize> {
        self.links
            .iter()
            .filter_map(|&(a, b)| match (a == idx, b == idx) {
                (true, _) => Some(b),
                (_, true) => Some(a),
                _ => None,
            })
            .collect()
    }

    pub fn node(&self, idx: usize) -> Option<&SimNode> {
        self.nodes.get(idx)
    }

    pub fn node_mut(&mut self, idx: usize) -> Option<&mut SimNode> {
        self.nodes.get_mut(idx)
    }

    /// Address of node `idx`
    pub fn address(&self, idx: usize) -> Option<NodeAddress> {
        self.nodes.get(idx).map(|n| n.address())
    }

    /// Index of the node with `address`
    pub fn index_of(&self, address: NodeAddress) -> Option<usize> {
        self.index.get(&address).copied()
    }

    /// Get node count
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Shared simulation clock
    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Get event log
    pub fn events(&self) -> &[SimEvent] {
        &self.event_log
    }

    /// Get current statistics
    pub fn stats(&self) -> SimStats {
        let mut stats = self.stats.clone();
        stats.per_node = self.nodes.iter().map(|n| n.stats()).collect();
        stats
    }

    fn survives(&mut self) -> bool {
        self.config.loss_rate <= 0.0 || self.rng.gen::<f64>() >= self.config.loss_rate
    }

    fn deliver_frames(&mut self) {
        for src in 0..self.nodes.len() {
            let frames = self.nodes[src].transport_mut().take_sent();
            let source = self.nodes[src].address();

            for sent in frames {
                self.stats.frames_transmitted += 1;

                if sent.next_hop.is_broadcast() {
                    for dst in self.neighbours(src) {
                        self.receive(src, dst, source, &sent.frame);
                    }
                    // no acknowledgement for broadcast frames
                    self.nodes[src].radio().on_send_complete(true);
                    continue;
                }

                let acked = match self.index.get(&sent.next_hop).copied() {
                    Some(dst) if self.is_linked(src, dst) => self.receive(src, dst, source, &sent.frame),
                    _ => {
                        trace!("Node {} has no link to {}", src, sent.next_hop);
                        false
                    }
                };
                self.nodes[src].radio().on_send_complete(acked);
            }
        }
    }

    fn receive(&mut self, src: usize, dst: usize, source: NodeAddress, frame: &[u8; FRAME_SIZE]) -> bool {
        if !self.survives() {
            self.stats.receptions_lost += 1;
            trace!("Frame {} -> {} lost", src, dst);
            return false;
        }
        self.stats.receptions += 1;
        let verdict = self.nodes[dst].radio().on_receive(source, frame);
        trace!("Frame {} -> {}: {:?}", src, dst, verdict);
        true
    }

    fn collect_events(&mut self) {
        let mut pending = self
            .pending_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for event in pending.drain(..) {
            match &event {
                SimEvent::BroadcastDelivered { .. } => self.stats.broadcast_deliveries += 1,
                SimEvent::UnicastDelivered { .. } => self.stats.unicast_deliveries += 1,
                SimEvent::ConfirmReceived {
                    target, success, ..
                } => {
                    if !*success {
                        self.stats.failures += 1;
                    } else if !target.is_broadcast() {
                        self.stats.confirmations += 1;
                    }
                }
            }
            self.event_log.push(event);
        }
    }
}

fn register_callbacks(node: &mut SimNode, node_idx: usize, events: &Arc<Mutex<Vec<SimEvent>>>) {
    let sink = events.clone();
    node.on_broadcast(move |payload, from| {
        push_event(
            &sink,
            SimEvent::BroadcastDelivered {
                node_idx,
                from,
                payload: payload.to_string_lossy(),
            },
        )
    });
    let sink = events.clone();
    node.on_unicast(move |payload, from| {
        push_event(
            &sink,
            SimEvent::UnicastDelivered {
                node_idx,
                from,
                payload: payload.to_string_lossy(),
            },
        )
    });
    let sink = events.clone();
    node.on_confirm(move |target, success| {
        push_event(
            &sink,
            SimEvent::ConfirmReceived {
                node_idx,
                target,
                success,
            },
        )
    });
}

fn push_event(events: &Mutex<Vec<SimEvent>>, event: SimEvent) {
    events
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topology_links() {
        assert_eq!(Topology::Line.links(4).len(), 3);
        assert_eq!(Topology::Ring.links(4).len(), 4);
        assert_eq!(Topology::Ring.links(2).len(), 1);
        assert_eq!(Topology::Star.links(5).len(), 4);
        assert_eq!(Topology::FullMesh.links(5).len(), 10);

        // 0 1 2
        // 3 4 5
        let grid = Topology::Grid { width: 3 }.links(6);
        assert_eq!(grid.len(), 7);
        assert!(grid.contains(&(2, 5)));
        assert!(!grid.contains(&(2, 3)));

        let custom = Topology::Custom(vec![(1, 0), (0, 0), (2, 9)]).links(3);
        assert_eq!(custom.into_iter().collect::<Vec<_>>(), vec![(0, 1)]);
    }

    #[test]
    fn test_simulator_creation() {
        let sim = MeshSimulator::new(SimConfig::default().with_node_count(5)).unwrap();
        assert_eq!(sim.node_count(), 5);
        for i in 0..5 {
            let address = sim.address(i).unwrap();
            assert_eq!(sim.index_of(address), Some(i));
        }
        assert_eq!(sim.neighbours(0), vec![1]);
        assert_eq!(sim.neighbours(2), vec![1, 3]);
    }

    #[test]
    fn test_invalid_mesh_config() {
        let config = SimConfig::default().with_mesh_config(MeshConfig::default().with_max_attempts(0));
        assert!(MeshSimulator::new(config).is_err());
    }

    #[test]
    fn test_set_link() {
        let mut sim = MeshSimulator::new(SimConfig::default().with_node_count(3)).unwrap();
        assert!(sim.is_linked(1, 0));
        sim.set_link(0, 1, false);
        assert!(!sim.is_linked(0, 1));
        sim.set_link(2, 0, true);
        assert!(sim.is_linked(0, 2));
    }

    #[test]
    fn test_broadcast_reaches_line_end() {
        let mut sim = MeshSimulator::new(SimConfig::default().with_node_count(4)).unwrap();
        sim.send_broadcast(0, b"hello").unwrap();
        assert!(sim.run_until(500, |s| s.stats().broadcast_deliveries == 3 && s.is_quiet()));

        let sender = sim.address(0).unwrap();
        assert!(sim.events().iter().any(|e| matches!(
            e,
            SimEvent::BroadcastDelivered { node_idx: 3, from, payload } if *from == sender && payload == "hello"
        )));
    }

    #[test]
    fn test_total_loss_delivers_nothing() {
        let config = SimConfig::default().with_node_count(2).with_loss_rate(1.0);
        let mut sim = MeshSimulator::new(config).unwrap();
        sim.send_broadcast(0, b"void").unwrap();
        sim.run(100);

        let stats = sim.stats();
        assert_eq!(stats.broadcast_deliveries, 0);
        assert!(stats.receptions_lost > 0);
        assert_eq!(stats.reception_rate(), 0.0);
    }
}

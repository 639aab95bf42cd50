//! Mesh node: send construction, retry handling, dispatch and route repair
//!
//! A [`MeshNode`] owns every queue and table of one node. The host calls
//! [`MeshNode::tick`] from its main loop; each tick runs four steps in
//! order and never blocks:
//!
//! 1. **Finalize** the outstanding send (confirmed, retried or escalated to
//!    a route search).
//! 2. **Transmit** the head of the outgoing queue if the radio is free, the
//!    head is due and the minimum send interval has passed.
//! 3. **Dispatch** at most one received envelope.
//! 4. **Resolve** the head of the waiting queue (route found or timed out).
//!
//! Frames arrive through the node's [`RadioHandle`], which the radio driver
//! calls from its own context.

use super::address::NodeAddress;
use super::config::{
    check_range, MeshConfig, MAX_ATTEMPTS_RANGE, ROUTE_WAIT_RANGE, SEND_INTERVAL_RANGE,
    SEND_RESULT_TIMEOUT_RANGE,
};
use super::packet::{
    Envelope, IncomingEntry, MessageType, NetworkName, OutgoingEntry, Payload, WaitingEntry,
};
use super::queue::{BoundedQueue, OverflowPolicy, PushOutcome};
use super::radio::RadioHandle;
use super::routing::{RouteUpdate, RoutingTable};
use super::stats::MeshStats;
use super::tracker::{RetryDecision, SendOutcome, TransmissionTracker};
use super::traits::{Clock, Transport};
use crate::error::{ConfigError, MeshError, MeshResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::mpsc::Receiver;
use tracing::{debug, trace, warn};

type PayloadHandler = Box<dyn FnMut(&Payload, NodeAddress) + Send>;
type ConfirmHandler = Box<dyn FnMut(NodeAddress, bool) + Send>;

#[derive(Default)]
struct Handlers {
    broadcast: Option<PayloadHandler>,
    unicast: Option<PayloadHandler>,
    confirm: Option<ConfirmHandler>,
}

impl Handlers {
    fn broadcast(&mut self, payload: &Payload, sender: NodeAddress) {
        if let Some(handler) = self.broadcast.as_mut() {
            handler(payload, sender);
        }
    }

    fn unicast(&mut self, payload: &Payload, sender: NodeAddress) {
        if let Some(handler) = self.unicast.as_mut() {
            handler(payload, sender);
        }
    }

    fn confirm(&mut self, target: NodeAddress, success: bool) {
        if let Some(handler) = self.confirm.as_mut() {
            handler(target, success);
        }
    }
}

/// One mesh node
pub struct MeshNode<T: Transport, C: Clock> {
    address: NodeAddress,
    config: MeshConfig,
    transport: T,
    clock: C,
    rng: StdRng,
    radio: RadioHandle,
    incoming: Receiver<IncomingEntry>,
    outgoing: BoundedQueue<OutgoingEntry>,
    waiting: BoundedQueue<WaitingEntry>,
    routes: RoutingTable,
    tracker: TransmissionTracker,
    last_sent_at: Option<u64>,
    handlers: Handlers,
    stats: MeshStats,
}

impl<T: Transport, C: Clock> MeshNode<T, C> {
    /// Create a node after validating `config`
    pub fn new(address: NodeAddress, config: MeshConfig, transport: T, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        let (radio, incoming) =
            RadioHandle::new(address, config.network_name, config.incoming_capacity);

        Ok(Self {
            address,
            transport,
            clock,
            rng: StdRng::from_entropy(),
            radio,
            incoming,
            outgoing: BoundedQueue::new(config.outgoing_capacity, OverflowPolicy::DropNewest),
            waiting: BoundedQueue::new(config.waiting_capacity, OverflowPolicy::DropOldest),
            routes: RoutingTable::new(config.max_routes),
            tracker: TransmissionTracker::new(u64::from(config.send_result_timeout_ms)),
            last_sent_at: None,
            handlers: Handlers::default(),
            stats: MeshStats::default(),
            config,
        })
    }

    /// Use a seeded generator for message ids and jitter
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Register the broadcast receive callback
    pub fn on_broadcast<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&Payload, NodeAddress) + Send + 'static,
    {
        self.handlers.broadcast = Some(Box::new(handler));
        self
    }

    /// Register the unicast receive callback
    pub fn on_unicast<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&Payload, NodeAddress) + Send + 'static,
    {
        self.handlers.unicast = Some(Box::new(handler));
        self
    }

    /// Register the confirmation callback.
    ///
    /// Called with `(target, true)` when a DELIVERY_CONFIRM_RESPONSE arrives
    /// from `target`, with `(BROADCAST, true)` when one of our broadcasts
    /// leaves the radio, and with `(target, false)` when a confirm-requested
    /// unicast could not be routed.
    pub fn on_confirm<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(NodeAddress, bool) + Send + 'static,
    {
        self.handlers.confirm = Some(Box::new(handler));
        self
    }

    /// Flood `data` to every node. Returns the message id.
    pub fn send_broadcast(&mut self, data: &[u8]) -> MeshResult<u16> {
        let payload = Payload::new(data)?;
        let envelope = Envelope::new(
            MessageType::Broadcast,
            self.next_message_id(),
            self.config.network_name,
            NodeAddress::BROADCAST,
            self.address,
            payload,
        );
        let now = self.clock.now_ms();
        self.enqueue_local(OutgoingEntry {
            envelope,
            next_hop: NodeAddress::BROADCAST,
            not_before: now,
        })?;
        debug!("Queued BROADCAST {:04X} ({} bytes)", envelope.message_id, payload.len());
        Ok(envelope.message_id)
    }

    /// Send `data` to `destination`, requesting an end-to-end confirmation
    /// if `confirm` is set. Returns the message id.
    pub fn send_unicast(&mut self, data: &[u8], destination: NodeAddress, confirm: bool) -> MeshResult<u16> {
        if destination == self.address || destination.is_broadcast() {
            return Err(MeshError::InvalidDestination(destination));
        }
        let payload = Payload::new(data)?;
        let message_type = if confirm {
            MessageType::UnicastWithConfirm
        } else {
            MessageType::Unicast
        };
        let now = self.clock.now_ms();
        let entry = self.unicast_entry(message_type, destination, self.address, payload, now);
        self.enqueue_local(entry)?;
        debug!(
            "Queued {} {:04X} to {} via {}",
            message_type, entry.envelope.message_id, destination, entry.next_hop
        );
        Ok(entry.envelope.message_id)
    }

    /// Run one maintenance step
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        self.finalize_send(now);
        self.transmit(now);
        self.dispatch_incoming(now);
        self.resolve_waiting(now);
    }

    /// Set send attempts per hop; out-of-range values keep the current one
    pub fn set_max_attempts(&mut self, attempts: u32) -> Result<(), ConfigError> {
        self.config.max_attempts = check_range("max_attempts", attempts, &MAX_ATTEMPTS_RANGE)?;
        Ok(())
    }

    /// Set the minimum interval between transmissions
    pub fn set_min_send_interval_ms(&mut self, ms: u32) -> Result<(), ConfigError> {
        self.config.min_send_interval_ms =
            check_range("min_send_interval_ms", ms, &SEND_INTERVAL_RANGE)?;
        Ok(())
    }

    /// Set how long frames wait for a route
    pub fn set_route_wait_timeout_ms(&mut self, ms: u32) -> Result<(), ConfigError> {
        self.config.route_wait_timeout_ms =
            check_range("route_wait_timeout_ms", ms, &ROUTE_WAIT_RANGE)?;
        Ok(())
    }

    /// Set how long a send may go without a completion report
    pub fn set_send_result_timeout_ms(&mut self, ms: u32) -> Result<(), ConfigError> {
        self.config.send_result_timeout_ms =
            check_range("send_result_timeout_ms", ms, &SEND_RESULT_TIMEOUT_RANGE)?;
        self.tracker.set_result_timeout(u64::from(ms));
        Ok(())
    }

    /// Set the network name used for new frames and the receive filter
    pub fn set_network_name(&mut self, name: &str) -> Result<(), ConfigError> {
        let name = NetworkName::new(name)?;
        self.config.network_name = name;
        self.radio.set_network_name(name);
        Ok(())
    }

    /// This node's address
    pub fn address(&self) -> NodeAddress {
        self.address
    }

    /// Active configuration
    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Handle for the radio driver's callbacks
    pub fn radio(&self) -> &RadioHandle {
        &self.radio
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    /// Frames queued for transmission, head first
    pub fn outgoing(&self) -> impl Iterator<Item = &OutgoingEntry> {
        self.outgoing.iter()
    }

    /// Frames waiting for a route, oldest first
    pub fn waiting(&self) -> impl Iterator<Item = &WaitingEntry> {
        self.waiting.iter()
    }

    pub fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Attempt number of the current head frame
    pub fn attempts(&self) -> u32 {
        self.tracker.attempts()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Counter snapshot, receive path included
    pub fn stats(&self) -> MeshStats {
        let mut stats = self.stats;
        stats.receive = self.radio.stats();
        stats
    }

    fn next_message_id(&mut self) -> u16 {
        self.rng.gen()
    }

    /// Unicast-style entry with a fresh id, routed by table lookup or
    /// straight to `target` on a miss
    fn unicast_entry(
        &mut self,
        message_type: MessageType,
        target: NodeAddress,
        sender: NodeAddress,
        payload: Payload,
        now: u64,
    ) -> OutgoingEntry {
        let next_hop = self.routes.lookup(target).unwrap_or(target);
        let envelope = Envelope::new(
            message_type,
            self.next_message_id(),
            self.config.network_name,
            target,
            sender,
            payload,
        );
        OutgoingEntry {
            envelope,
            next_hop,
            not_before: now,
        }
    }

    fn enqueue_local(&mut self, entry: OutgoingEntry) -> MeshResult<()> {
        match self.outgoing.push(entry) {
            PushOutcome::Queued => Ok(()),
            PushOutcome::Rejected(_) | PushOutcome::Evicted(_) => {
                self.stats.queue_drops += 1;
                Err(MeshError::QueueFull {
                    capacity: self.outgoing.capacity(),
                })
            }
        }
    }

    /// Queue a frame the application did not ask for; a full queue drops it
    fn enqueue_internal(&mut self, entry: OutgoingEntry) -> bool {
        match self.outgoing.push(entry) {
            PushOutcome::Queued => true,
            PushOutcome::Rejected(dropped) | PushOutcome::Evicted(dropped) => {
                self.stats.queue_drops += 1;
                warn!(
                    "Outgoing queue full, dropping {} {:04X} to {}",
                    dropped.envelope.message_type,
                    dropped.envelope.message_id,
                    dropped.envelope.target
                );
                false
            }
        }
    }

    /// Re-flood unchanged after a random delay
    fn flood(&mut self, envelope: Envelope, now: u64) {
        let jitter = match self.config.forward_jitter_ms {
            0 => 0,
            max => self.rng.gen_range(0..u64::from(max)),
        };
        let entry = OutgoingEntry {
            envelope,
            next_hop: NodeAddress::BROADCAST,
            not_before: now + jitter,
        };
        if self.enqueue_internal(entry) {
            self.stats.frames_relayed += 1;
            trace!(
                "Re-flooding {} {:04X} in {} ms",
                envelope.message_type, envelope.message_id, jitter
            );
        }
    }

    /// Forward someone else's unicast-style frame toward its target
    fn relay(&mut self, envelope: Envelope, now: u64) {
        let entry = self.unicast_entry(
            envelope.message_type,
            envelope.target,
            envelope.sender,
            envelope.payload,
            now,
        );
        if self.enqueue_internal(entry) {
            self.stats.frames_relayed += 1;
            debug!(
                "Relaying {} from {} to {} via {}",
                envelope.message_type, envelope.sender, envelope.target, entry.next_hop
            );
        }
    }

    fn finalize_send(&mut self, now: u64) {
        let latched = self.radio.take_send_result();
        let Some(outcome) = self.tracker.poll(latched, now) else {
            return;
        };
        let Some(head) = self.outgoing.front().copied() else {
            return;
        };

        match outcome {
            SendOutcome::Confirmed => {
                self.outgoing.pop();
                self.tracker.record_success();
                self.stats.sends_confirmed += 1;
                trace!(
                    "{} {:04X} delivered to {}",
                    head.envelope.message_type, head.envelope.message_id, head.next_hop
                );
                if head.envelope.message_type == MessageType::Broadcast
                    && head.envelope.originated_by(self.address)
                {
                    self.handlers.confirm(head.envelope.target, true);
                }
            }
            SendOutcome::Failed { timed_out } => {
                self.stats.sends_failed += 1;
                if timed_out {
                    warn!(
                        "No send result for {} {:04X} after {} ms",
                        head.envelope.message_type,
                        head.envelope.message_id,
                        self.config.send_result_timeout_ms
                    );
                }
                match self.tracker.record_failure(self.config.max_attempts) {
                    RetryDecision::Retry { attempt } => {
                        self.stats.retransmissions += 1;
                        debug!(
                            "{} {:04X} to {} failed, attempt {}/{}",
                            head.envelope.message_type,
                            head.envelope.message_id,
                            head.next_hop,
                            attempt,
                            self.config.max_attempts
                        );
                    }
                    RetryDecision::Exhausted { attempts } => {
                        self.outgoing.pop();
                        self.escalate(head, attempts, now);
                    }
                }
            }
        }
    }

    /// Give up on the current next hop: forget the route, park the frame
    /// and flood a route search
    fn escalate(&mut self, entry: OutgoingEntry, attempts: u32, now: u64) {
        let envelope = entry.envelope;
        if entry.next_hop.is_broadcast() {
            debug!(
                "Dropping {} {:04X} after {} attempts",
                envelope.message_type, envelope.message_id, attempts
            );
            return;
        }

        let target = envelope.target;
        if let Some(route) = self.routes.invalidate(target) {
            debug!("Route to {} via {} invalidated", target, route.next_hop);
        }
        debug!(
            "{} {:04X} to {} via {} failed after {} attempts, searching for a route",
            envelope.message_type, envelope.message_id, target, entry.next_hop, attempts
        );

        self.park(WaitingEntry {
            envelope,
            next_hop: entry.next_hop,
            enqueued_at: now,
        });

        let search = Envelope::new(
            MessageType::SearchRequest,
            self.next_message_id(),
            self.config.network_name,
            target,
            self.address,
            Payload::empty(),
        );
        if self.enqueue_internal(OutgoingEntry {
            envelope: search,
            next_hop: NodeAddress::BROADCAST,
            not_before: now,
        }) {
            self.stats.route_searches += 1;
        }
    }

    fn park(&mut self, entry: WaitingEntry) {
        match self.waiting.push(entry) {
            PushOutcome::Queued => {}
            PushOutcome::Evicted(dropped) | PushOutcome::Rejected(dropped) => {
                self.stats.queue_drops += 1;
                warn!(
                    "Waiting queue full, dropping {} {:04X} to {}",
                    dropped.envelope.message_type,
                    dropped.envelope.message_id,
                    dropped.envelope.target
                );
                self.report_undeliverable(&dropped);
            }
        }
    }

    fn report_undeliverable(&mut self, entry: &WaitingEntry) {
        if entry.envelope.message_type == MessageType::UnicastWithConfirm
            && entry.envelope.originated_by(self.address)
        {
            self.handlers.confirm(entry.envelope.target, false);
        }
    }

    fn transmit(&mut self, now: u64) {
        if !self.tracker.is_idle() {
            return;
        }
        let Some(head) = self.outgoing.front().copied() else {
            return;
        };
        if head.not_before > now {
            return;
        }
        if let Some(last) = self.last_sent_at {
            if now.saturating_sub(last) < u64::from(self.config.min_send_interval_ms) {
                return;
            }
        }

        self.radio.clear_send_result();
        self.tracker.mark_sent(now);
        self.last_sent_at = Some(now);
        self.stats.frames_sent += 1;
        trace!(
            "Sending {} {:04X} from {} to {} via {} (attempt {})",
            head.envelope.message_type,
            head.envelope.message_id,
            head.envelope.sender,
            head.envelope.target,
            head.next_hop,
            self.tracker.attempts()
        );

        if let Err(e) = self.transport.send(head.next_hop, &head.envelope.encode()) {
            debug!("Transport refused frame for {}: {}", head.next_hop, e);
            self.radio.on_send_complete(false);
        }
    }

    fn dispatch_incoming(&mut self, now: u64) {
        let Ok(entry) = self.incoming.try_recv() else {
            return;
        };
        self.stats.frames_dispatched += 1;

        let envelope = entry.envelope;
        let for_me = envelope.is_for(self.address);
        trace!(
            "Dispatching {} {:04X} from {} to {} via {}",
            envelope.message_type,
            envelope.message_id,
            envelope.sender,
            envelope.target,
            entry.previous_hop
        );

        match envelope.message_type {
            MessageType::Broadcast => {
                self.stats.broadcasts_delivered += 1;
                self.handlers.broadcast(&envelope.payload, envelope.sender);
                self.flood(envelope, now);
            }
            MessageType::Unicast if for_me => {
                self.stats.unicasts_delivered += 1;
                self.handlers.unicast(&envelope.payload, envelope.sender);
            }
            MessageType::UnicastWithConfirm if for_me => {
                self.stats.unicasts_delivered += 1;
                self.handlers.unicast(&envelope.payload, envelope.sender);
                let reply = self.unicast_entry(
                    MessageType::DeliveryConfirmResponse,
                    envelope.sender,
                    self.address,
                    Payload::empty(),
                    now,
                );
                if !self.enqueue_internal(reply) {
                    debug!(
                        "Confirmation of {:04X} for {} lost",
                        envelope.message_id, envelope.sender
                    );
                }
            }
            MessageType::DeliveryConfirmResponse if for_me => {
                self.stats.confirmations += 1;
                self.handlers.confirm(envelope.sender, true);
            }
            MessageType::Unicast
            | MessageType::UnicastWithConfirm
            | MessageType::DeliveryConfirmResponse => self.relay(envelope, now),
            MessageType::SearchRequest => {
                self.learn_route(&entry, now);
                if for_me {
                    let response = Envelope::new(
                        MessageType::SearchResponse,
                        self.next_message_id(),
                        self.config.network_name,
                        envelope.sender,
                        self.address,
                        Payload::empty(),
                    );
                    debug!("Answering route search from {}", envelope.sender);
                    self.enqueue_internal(OutgoingEntry {
                        envelope: response,
                        next_hop: NodeAddress::BROADCAST,
                        not_before: now,
                    });
                } else {
                    self.flood(envelope, now);
                }
            }
            MessageType::SearchResponse => {
                self.learn_route(&entry, now);
                if !for_me {
                    self.flood(envelope, now);
                }
            }
        }
    }

    /// The node that handed us a search frame is the next hop toward its
    /// originator
    fn learn_route(&mut self, entry: &IncomingEntry, now: u64) {
        let destination = entry.envelope.sender;
        let via = entry.previous_hop;

        if destination == via {
            if let Some(stale) = self.routes.invalidate(destination) {
                debug!(
                    "{} heard directly, dropping route via {}",
                    destination, stale.next_hop
                );
            }
            return;
        }

        match self.routes.upsert(destination, via, now) {
            RouteUpdate::Added => {
                self.stats.routes_learned += 1;
                debug!("Route to {} added via {}", destination, via);
            }
            RouteUpdate::Replaced { previous } => {
                self.stats.routes_learned += 1;
                debug!("Route to {} changed from {} to {}", destination, previous, via);
            }
            RouteUpdate::Unchanged => {}
        }
    }

    fn resolve_waiting(&mut self, now: u64) {
        let Some(head) = self.waiting.front().copied() else {
            return;
        };

        if let Some(next_hop) = self.routes.lookup(head.envelope.target) {
            // stay parked until the outgoing queue has room
            if !self.outgoing.is_full() {
                self.waiting.pop();
                self.stats.waiting_resolved += 1;
                debug!(
                    "Route to {} found via {}, resuming {} {:04X}",
                    head.envelope.target, next_hop, head.envelope.message_type, head.envelope.message_id
                );
                if !self.enqueue_internal(OutgoingEntry {
                    envelope: head.envelope,
                    next_hop,
                    not_before: now,
                }) {
                    self.report_undeliverable(&head);
                }
                return;
            }
            trace!(
                "Outgoing queue full, {} {:04X} stays parked",
                head.envelope.message_type, head.envelope.message_id
            );
        }

        if now.saturating_sub(head.enqueued_at) > u64::from(self.config.route_wait_timeout_ms) {
            self.waiting.pop();
            self.stats.waiting_expired += 1;
            debug!(
                "{} {:04X} to {} not resumed within {} ms, dropping",
                head.envelope.message_type,
                head.envelope.message_id,
                head.envelope.target,
                self.config.route_wait_timeout_ms
            );
            self.report_undeliverable(&head);
        }
    }
}

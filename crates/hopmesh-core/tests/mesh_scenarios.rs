//! Multi-node scenarios for the routing engine.
//!
//! Single-node tests drive a `MeshNode` by hand through its radio handle;
//! the rest run several nodes in the simulator.

use hopmesh_core::mesh::{
    Envelope, ManualClock, MeshConfig, MeshNode, MeshSimulator, MessageType, NetworkName,
    NodeAddress, Payload, ReceiveVerdict, RecordingTransport, SimConfig, SimEvent, Topology,
};
use hopmesh_core::{ConfigError, MeshError};
use std::sync::{Arc, Mutex};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn addr(last: u8) -> NodeAddress {
    NodeAddress::from_bytes([0x02, 0x00, 0x5E, 0x00, 0x00, last])
}

type TestNode = MeshNode<RecordingTransport, ManualClock>;

fn test_node(config: MeshConfig) -> (TestNode, ManualClock) {
    let clock = ManualClock::new(1_000);
    let node = MeshNode::new(addr(1), config, RecordingTransport::new(), clock.clone())
        .expect("valid config")
        .with_rng_seed(7);
    (node, clock)
}

fn record_confirms(node: &mut TestNode) -> Arc<Mutex<Vec<(NodeAddress, bool)>>> {
    let confirms = Arc::new(Mutex::new(Vec::new()));
    let sink = confirms.clone();
    node.on_confirm(move |target, ok| sink.lock().unwrap().push((target, ok)));
    confirms
}

fn sent_envelopes(node: &TestNode) -> Vec<(NodeAddress, Envelope)> {
    node.transport()
        .sent()
        .iter()
        .map(|s| (s.next_hop, s.envelope().expect("engine frames decode")))
        .collect()
}

fn confirms_at(sim: &MeshSimulator, node: usize) -> Vec<(NodeAddress, bool)> {
    sim.events()
        .iter()
        .filter_map(|e| match e {
            SimEvent::ConfirmReceived {
                node_idx,
                target,
                success,
            } if *node_idx == node && !target.is_broadcast() => Some((*target, *success)),
            _ => None,
        })
        .collect()
}

fn unicasts_at(sim: &MeshSimulator, node: usize) -> Vec<(NodeAddress, String)> {
    sim.events()
        .iter()
        .filter_map(|e| match e {
            SimEvent::UnicastDelivered {
                node_idx,
                from,
                payload,
            } if *node_idx == node => Some((*from, payload.clone())),
            _ => None,
        })
        .collect()
}

#[test]
fn test_duplicate_frames_delivered_once() {
    init_tracing();
    let (mut node, clock) = test_node(MeshConfig::default());
    let count = Arc::new(Mutex::new(0));
    let sink = count.clone();
    node.on_broadcast(move |_, _| *sink.lock().unwrap() += 1);

    let frame = Envelope::new(
        MessageType::Broadcast,
        0x1234,
        NetworkName::any(),
        NodeAddress::BROADCAST,
        addr(9),
        Payload::new(b"once").unwrap(),
    )
    .encode();

    assert_eq!(node.radio().on_receive(addr(2), &frame), ReceiveVerdict::Accepted);
    for hop in 3..8 {
        assert_eq!(node.radio().on_receive(addr(hop), &frame), ReceiveVerdict::Duplicate);
    }
    for _ in 0..10 {
        node.tick();
        clock.advance(10);
    }

    assert_eq!(*count.lock().unwrap(), 1);
    assert_eq!(node.stats().receive.duplicates, 5);
    assert_eq!(node.stats().frames_dispatched, 1);
}

#[test]
fn test_retry_exhaustion_starts_one_search() {
    init_tracing();
    let (mut node, clock) = test_node(MeshConfig::default().with_max_attempts(3));
    let target = addr(3);
    let relay = addr(2);

    // previously learned route that has gone bad
    deliver_search_response(&node, target, relay);
    node.tick();
    assert_eq!(node.routes().lookup(target), Some(relay));

    let id = node.send_unicast(b"payload", target, true).unwrap();
    for _ in 0..4 {
        clock.advance(50);
        node.tick();
        node.radio().on_send_complete(false);
    }

    let sent = sent_envelopes(&node);
    assert_eq!(sent.len(), 4);
    for (next_hop, envelope) in &sent[..3] {
        assert_eq!(*next_hop, relay);
        assert_eq!(envelope.message_id, id);
        assert_eq!(envelope.message_type, MessageType::UnicastWithConfirm);
    }
    let (next_hop, search) = sent[3];
    assert!(next_hop.is_broadcast());
    assert_eq!(search.message_type, MessageType::SearchRequest);
    assert_eq!(search.target, target);
    assert_eq!(search.sender, node.address());

    assert_eq!(node.routes().lookup(target), None);
    assert_eq!(node.waiting_len(), 1);
    assert_eq!(node.waiting().next().unwrap().envelope.message_id, id);
    assert_eq!(node.stats().route_searches, 1);
    assert_eq!(node.attempts(), 1);
}

#[test]
fn test_waiting_timeout_reports_failure_once() {
    init_tracing();
    let (mut node, clock) = test_node(MeshConfig::default().with_max_attempts(1));
    let confirms = record_confirms(&mut node);
    let target = addr(3);

    node.send_unicast(b"payload", target, true).unwrap();
    node.tick();
    node.radio().on_send_complete(false);

    // escalation at t=1050, search sent in the same tick
    clock.advance(50);
    node.tick();
    assert_eq!(node.waiting_len(), 1);
    node.radio().on_send_complete(true);

    clock.advance(500);
    node.tick();
    assert_eq!(node.waiting_len(), 1);
    assert!(confirms.lock().unwrap().is_empty());

    clock.advance(1);
    node.tick();
    assert_eq!(node.waiting_len(), 0);

    for _ in 0..5 {
        clock.advance(100);
        node.tick();
    }
    assert_eq!(*confirms.lock().unwrap(), vec![(target, false)]);
    assert_eq!(node.stats().waiting_expired, 1);
}

#[test]
fn test_unconfirmed_unicast_expires_silently() {
    let (mut node, clock) = test_node(MeshConfig::default().with_max_attempts(1));
    let confirms = record_confirms(&mut node);

    node.send_unicast(b"payload", addr(3), false).unwrap();
    node.tick();
    node.radio().on_send_complete(false);
    for _ in 0..20 {
        clock.advance(50);
        node.tick();
        node.radio().on_send_complete(true);
    }

    assert_eq!(node.stats().waiting_expired, 1);
    assert!(confirms.lock().unwrap().is_empty());
}

#[test]
fn test_waiting_overflow_fails_oldest_confirm() {
    let config = MeshConfig::default()
        .with_max_attempts(1)
        .with_waiting_capacity(1);
    let (mut node, clock) = test_node(config);
    let confirms = record_confirms(&mut node);

    node.send_unicast(b"first", addr(3), true).unwrap();
    node.send_unicast(b"second", addr(4), true).unwrap();
    for _ in 0..3 {
        node.tick();
        node.radio().on_send_complete(false);
        clock.advance(50);
    }

    assert_eq!(*confirms.lock().unwrap(), vec![(addr(3), false)]);
    assert_eq!(node.waiting_len(), 1);
    assert_eq!(node.waiting().next().unwrap().envelope.target, addr(4));
    assert_eq!(node.stats().queue_drops, 1);
}

#[test]
fn test_resolved_entry_waits_for_outgoing_room() {
    let config = MeshConfig::default()
        .with_max_attempts(1)
        .with_outgoing_capacity(2);
    let (mut node, clock) = test_node(config);
    let confirms = record_confirms(&mut node);
    let target = addr(3);
    let relay = addr(2);

    let id = node.send_unicast(b"payload", target, true).unwrap();
    node.tick();
    node.radio().on_send_complete(false);
    clock.advance(50);
    // escalated; the search is now in flight
    node.tick();
    assert_eq!(node.waiting_len(), 1);

    node.send_broadcast(b"fill").unwrap();
    assert_eq!(node.outgoing_len(), 2);
    deliver_search_response(&node, target, relay);
    clock.advance(1);
    node.tick();

    assert_eq!(node.routes().lookup(target), Some(relay));
    assert_eq!(node.waiting_len(), 1);
    assert_eq!(node.stats().queue_drops, 0);

    for _ in 0..5 {
        node.radio().on_send_complete(true);
        clock.advance(50);
        node.tick();
    }

    assert_eq!(node.waiting_len(), 0);
    assert_eq!(node.stats().waiting_resolved, 1);
    assert_eq!(node.stats().waiting_expired, 0);
    let (next_hop, resumed) = *sent_envelopes(&node).last().unwrap();
    assert_eq!(next_hop, relay);
    assert_eq!(resumed.message_id, id);
    assert!(!confirms.lock().unwrap().iter().any(|(t, _)| *t == target));
}

#[test]
fn test_direct_unicast_with_confirm() {
    init_tracing();
    let config = SimConfig::default().with_node_count(2);
    let mut sim = MeshSimulator::new(config).unwrap();
    let x = sim.address(0).unwrap();
    let y = sim.address(1).unwrap();

    sim.send_unicast(0, 1, b"hi", true).unwrap();
    assert!(sim.run_until(200, |s| !confirms_at(s, 0).is_empty()));

    assert_eq!(unicasts_at(&sim, 1), vec![(x, "hi".to_string())]);
    assert_eq!(confirms_at(&sim, 0), vec![(y, true)]);

    let stats = sim.stats();
    assert_eq!(stats.per_node[0].route_searches, 0);
    assert_eq!(stats.per_node[0].sends_failed, 0);
    assert_eq!(stats.confirmations, 1);
}

#[test]
fn test_route_converges_through_relay() {
    init_tracing();
    let config = SimConfig::default().with_node_count(3).with_topology(Topology::Line);
    let mut sim = MeshSimulator::new(config).unwrap();
    let a = sim.address(0).unwrap();
    let r = sim.address(1).unwrap();
    let b = sim.address(2).unwrap();

    sim.send_unicast(0, 2, b"first", true).unwrap();
    assert!(sim.run_until(1_000, |s| !confirms_at(s, 0).is_empty()));

    assert_eq!(confirms_at(&sim, 0), vec![(b, true)]);
    assert_eq!(unicasts_at(&sim, 2), vec![(a, "first".to_string())]);
    assert_eq!(sim.node(0).unwrap().routes().lookup(b), Some(r));
    assert_eq!(sim.node(2).unwrap().routes().lookup(a), Some(r));
    // the relay hears both ends directly
    assert!(sim.node(1).unwrap().routes().is_empty());
    assert_eq!(sim.stats().per_node[0].route_searches, 1);

    sim.send_unicast(0, 2, b"second", true).unwrap();
    let head = sim.node(0).unwrap().outgoing().last().copied().unwrap();
    assert_eq!(head.next_hop, r);

    assert!(sim.run_until(1_000, |s| confirms_at(s, 0).len() == 2));
    assert_eq!(unicasts_at(&sim, 2).len(), 2);
    assert_eq!(sim.stats().per_node[0].route_searches, 1);
    assert_eq!(sim.stats().per_node[0].sends_failed, 3);
}

#[test]
fn test_broadcast_delivered_once_per_node() {
    init_tracing();
    let config = SimConfig::default()
        .with_node_count(9)
        .with_topology(Topology::Grid { width: 3 });
    let mut sim = MeshSimulator::new(config).unwrap();

    sim.send_broadcast(4, b"center").unwrap();
    sim.send_broadcast(0, b"corner").unwrap();
    assert!(sim.run_until(2_000, |s| s.stats().broadcast_deliveries == 16 && s.is_quiet()));
    sim.run(200);

    for payload in ["center", "corner"] {
        let mut per_node = vec![0usize; 9];
        for event in sim.events() {
            if let SimEvent::BroadcastDelivered { node_idx, payload: p, .. } = event {
                if p == payload {
                    per_node[*node_idx] += 1;
                }
            }
        }
        let origin = if payload == "center" { 4 } else { 0 };
        for (idx, count) in per_node.iter().enumerate() {
            let expected = if idx == origin { 0 } else { 1 };
            assert_eq!(*count, expected, "{} at node {}", payload, idx);
        }
    }
    assert_eq!(sim.stats().broadcast_deliveries, 16);
}

#[test]
fn test_own_broadcast_reports_hop_confirmation() {
    let mut sim = MeshSimulator::new(SimConfig::default().with_node_count(2)).unwrap();
    sim.send_broadcast(0, b"hello").unwrap();
    sim.run(50);

    assert!(sim.events().iter().any(|e| matches!(
        e,
        SimEvent::ConfirmReceived { node_idx: 0, target, success: true } if target.is_broadcast()
    )));
    // hop confirmations are not end-to-end confirmations
    assert_eq!(sim.stats().confirmations, 0);
}

#[test]
fn test_route_heals_after_link_cut() {
    init_tracing();
    let config = SimConfig::default().with_node_count(4).with_topology(Topology::Ring);
    let mut sim = MeshSimulator::new(config).unwrap();
    let target = sim.address(2).unwrap();

    sim.send_unicast(0, 2, b"before", true).unwrap();
    assert!(sim.run_until(1_000, |s| !confirms_at(s, 0).is_empty()));

    let first_hop = sim.node(0).unwrap().routes().lookup(target).unwrap();
    let first_idx = sim.index_of(first_hop).unwrap();
    assert!(first_idx == 1 || first_idx == 3);
    let other_idx = if first_idx == 1 { 3 } else { 1 };

    sim.set_link(0, first_idx, false);
    sim.send_unicast(0, 2, b"after", true).unwrap();
    assert!(sim.run_until(2_000, |s| confirms_at(s, 0).len() == 2));

    assert_eq!(confirms_at(&sim, 0), vec![(target, true), (target, true)]);
    assert_eq!(
        sim.node(0).unwrap().routes().lookup(target),
        sim.address(other_idx)
    );
    let payloads: Vec<String> = unicasts_at(&sim, 2).into_iter().map(|(_, p)| p).collect();
    assert_eq!(payloads, vec!["before".to_string(), "after".to_string()]);
    assert_eq!(sim.stats().per_node[0].route_searches, 2);
}

#[test]
fn test_unreachable_target_fails_confirm() {
    let config = SimConfig::default().with_node_count(3).with_topology(Topology::Line);
    let mut sim = MeshSimulator::new(config).unwrap();
    let target = sim.address(2).unwrap();
    sim.set_link(1, 2, false);

    sim.send_unicast(0, 2, b"lost", true).unwrap();
    assert!(sim.run_until(1_000, |s| !confirms_at(s, 0).is_empty()));

    assert_eq!(confirms_at(&sim, 0), vec![(target, false)]);
    assert!(unicasts_at(&sim, 2).is_empty());
    assert_eq!(sim.stats().failures, 1);
}

#[test]
fn test_network_names_partition_traffic() {
    init_tracing();
    let config = SimConfig::default()
        .with_node_count(4)
        .with_topology(Topology::FullMesh);
    let mut sim = MeshSimulator::new(config).unwrap();
    sim.node_mut(0).unwrap().set_network_name("home").unwrap();
    sim.node_mut(1).unwrap().set_network_name("home").unwrap();
    sim.node_mut(2).unwrap().set_network_name("work").unwrap();
    // node 3 keeps the empty name and hears everyone

    sim.send_broadcast(0, b"dinner").unwrap();
    sim.run(200);

    let delivered: Vec<usize> = sim
        .events()
        .iter()
        .filter_map(|e| match e {
            SimEvent::BroadcastDelivered { node_idx, .. } => Some(*node_idx),
            _ => None,
        })
        .collect();
    assert!(delivered.contains(&1));
    assert!(delivered.contains(&3));
    assert!(!delivered.contains(&2));
    assert!(sim.node(2).unwrap().stats().receive.foreign_network > 0);
}

#[test]
fn test_configuration_bounds() {
    let (mut node, _) = test_node(MeshConfig::default());

    for attempts in [0, 11] {
        match node.set_max_attempts(attempts) {
            Err(ConfigError::OutOfRange { field, min, max, .. }) => {
                assert_eq!(field, "max_attempts");
                assert_eq!((min, max), (1, 10));
            }
            other => panic!("expected OutOfRange, got {:?}", other),
        }
        assert_eq!(node.config().max_attempts, 3);
    }
    node.set_max_attempts(7).unwrap();
    assert!(node.set_max_attempts(0).is_err());
    assert_eq!(node.config().max_attempts, 7);

    assert!(node.set_min_send_interval_ms(19).is_err());
    node.set_min_send_interval_ms(20).unwrap();
    assert!(node.set_route_wait_timeout_ms(5_001).is_err());
    node.set_route_wait_timeout_ms(5_000).unwrap();
    assert_eq!(node.config().route_wait_timeout_ms, 5_000);

    let bad = MeshConfig::default().with_max_attempts(11);
    let clock = ManualClock::new(0);
    assert!(MeshNode::new(addr(1), bad, RecordingTransport::new(), clock).is_err());
}

#[test]
fn test_invalid_sends_rejected() {
    let (mut node, _) = test_node(MeshConfig::default());
    assert!(matches!(
        node.send_unicast(b"me", node.address(), false),
        Err(MeshError::InvalidDestination(_))
    ));
    assert!(matches!(
        node.send_broadcast(&[b'z'; 200]),
        Err(MeshError::PayloadTooLarge { len: 200, max: 199 })
    ));
    assert!(matches!(
        node.send_broadcast(b"nul\0byte"),
        Err(MeshError::PayloadContainsNul(3))
    ));
}

fn deliver_search_response(node: &TestNode, from: NodeAddress, via: NodeAddress) {
    let envelope = Envelope::new(
        MessageType::SearchResponse,
        0xAAAA,
        NetworkName::any(),
        node.address(),
        from,
        Payload::empty(),
    );
    assert!(node.radio().on_receive(via, &envelope.encode()).is_accepted());
}

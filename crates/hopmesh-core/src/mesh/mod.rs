//! Mesh Routing Engine
//!
//! The engine floods broadcasts, routes unicasts hop by hop and repairs
//! routes on demand. The layers:
//!
//! - **Packet**: fixed-size envelope and its wire codec
//! - **Routing**: learned next hops and the duplicate id window
//! - **Radio**: the non-blocking surface the radio driver calls into
//! - **Tracker**: per-frame retry state
//! - **Node**: queues, dispatch and route repair driven by `tick`
//! - **Simulation**: many nodes over an in-memory medium
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Application                                        │
//! │      send_broadcast / send_unicast        on_broadcast / on_unicast /   │
//! │                                           on_confirm                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      MeshNode::tick                                     │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │  finalize   │  │  transmit   │  │  dispatch   │  │   resolve   │     │
//! │  │  (tracker)  │  │ (outgoing)  │  │ (incoming)  │  │  (waiting)  │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! │                RoutingTable            BoundedQueue                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!            │  Transport::send                 ▲  mpsc channel
//!            ▼                                  │
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Radio driver                                       │
//! │   RadioHandle::on_receive            RadioHandle::on_send_complete      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use hopmesh_core::mesh::{MeshConfig, MeshNode, NodeAddress, SystemClock};
//!
//! let mut node = MeshNode::new(my_address, MeshConfig::default(), radio, SystemClock::new())?;
//! node.on_unicast(|payload, from| println!("{}: {}", from, payload.to_string_lossy()));
//!
//! // hand node.radio().clone() to the driver's receive and send-done hooks
//! node.send_unicast(b"hi", peer, true)?;
//! loop {
//!     node.tick();
//! }
//! ```

pub mod address;
pub mod config;
pub mod node;
pub mod packet;
pub mod queue;
pub mod radio;
pub mod routing;
pub mod simulation;
pub mod stats;
pub mod tracker;
pub mod traits;

// Re-export main types
pub use address::{AddressParseError, NodeAddress};
pub use config::MeshConfig;
pub use node::MeshNode;
pub use packet::{
    Envelope, IncomingEntry, MessageType, NetworkName, OutgoingEntry, Payload, WaitingEntry,
    FRAME_SIZE, NETWORK_NAME_CAPACITY, PAYLOAD_CAPACITY,
};
pub use queue::{BoundedQueue, OverflowPolicy, PushOutcome};
pub use radio::{RadioHandle, ReceiveStats, ReceiveVerdict};
pub use routing::{DuplicateCache, Route, RouteUpdate, RoutingTable};
pub use simulation::{MeshSimulator, RecordingTransport, SimConfig, SimEvent, SimStats, Topology};
pub use stats::MeshStats;
pub use tracker::{RetryDecision, SendOutcome, TransmissionTracker};
pub use traits::{Clock, ManualClock, SystemClock, Transport};

//! # hopmesh
//!
//! Self-healing multi-hop message routing for low-power radio meshes.
//!
//! Nodes talk over a connectionless, broadcast-capable radio with a small
//! fixed frame. No routing table is configured up front: broadcasts are
//! flooded, unicasts go straight to the destination until that fails, and
//! a failed destination triggers a SEARCH_REQUEST / SEARCH_RESPONSE flood
//! from which every node on the path learns its next hop.
//!
//! ## Message Flow
//!
//! ```text
//! send_unicast ─► outgoing ─► Transport ─► (air) ─► RadioHandle ─► incoming ─► dispatch
//!                   ▲   │ retries exhausted                                      │
//!                   │   ▼                                                        │
//!                 waiting ◄── route search ──── route learned ◄──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use hopmesh_core::mesh::{MeshSimulator, SimConfig, Topology};
//!
//! let config = SimConfig::default()
//!     .with_node_count(4)
//!     .with_topology(Topology::Line);
//! let mut sim = MeshSimulator::new(config).unwrap();
//!
//! sim.send_unicast(0, 3, b"Hello mesh!", true).unwrap();
//! sim.run(400);
//! println!("{}", sim.stats());
//! ```

pub mod error;

// Routing engine and simulator
pub mod mesh;

pub use error::{ConfigError, FrameError, MeshError, MeshResult, TransportError};
pub use mesh::{MeshConfig, MeshNode, NodeAddress};

//! termination-core: fault-tolerant termination detection on a ring.
//!
//! A probe token circulates over a logical ring of nodes. Each node adds its
//! message balance to the token; once a black node sees a balance of zero
//! over every alive node, the computation has terminated. Nodes may crash
//! (fail-stop); survivors repair the ring around them and keep probing.
//!
//! This crate provides:
//! - The token and its wire encodings
//! - Per-node state and the protocol engine
//! - Crash observation and token recovery
//! - An in-process network and a tokio runtime running one task per node

pub mod config;
pub mod engine;
pub mod events;
pub mod network;
pub mod node;
pub mod node_id;
pub mod observer;
pub mod ring;
pub mod run;
pub mod state;
pub mod token;
pub mod wire;

pub use config::{ConfigError, DetectionConfig, RingConfig};
pub use engine::{Dropped, Outcome, Phase, ProtocolEngine, Repair};
pub use events::{EventBus, ProbeEvent, Subscription};
pub use network::{Network, NetworkError};
pub use node::NodeHandle;
pub use node_id::{NodeId, NodeIdError};
pub use observer::{FailureObserver, LastToken, Recovery};
pub use ring::{Ring, RingError};
pub use run::{Announcer, RunContext, RunId, TracingAnnouncer};
pub use state::{Activity, NodeState};
pub use token::{Token, WireError};

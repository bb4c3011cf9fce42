//! Coordinator: the client-facing side of the store
//!
//! The coordinator is responsible for:
//! - Replica membership (registration into a consistent-hash ring)
//! - Placement (primary by ring position, secondary is its successor)
//! - Write orchestration (2PC across both replicas)
//! - Read path (coordinator cache, then primary, then secondary)

pub mod handler;
pub mod ring;
pub mod server;
pub mod tpc;
pub mod transport;

pub use ring::{ReplicaEndpoint, ReplicaRing};
pub use server::Coordinator;
pub use tpc::TpcMaster;
pub use transport::{ReplicaTransport, TcpTransport};

//! Replica: one of the two copies of every key
//!
//! Each replica votes on and applies the coordinator's 2PC decisions, keeping a
//! recovery log from which its store is rebuilt after a restart.

pub mod handler;
pub mod kvserver;
pub mod log;
pub mod server;

pub use handler::PhaseHandler;
pub use kvserver::KvServer;
pub use log::{LogRecord, RecoveryLog};
pub use server::ReplicaServer;

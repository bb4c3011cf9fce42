//! # tpckv
//!
//! A replicated key-value store with:
//! - Two-phase commit across two replicas per key
//! - Consistent-hash placement (primary plus its ring successor)
//! - Set-associative caches with second-chance eviction
//! - Per-replica recovery log (redo only) for crash recovery
//!
//! ## Architecture
//!
//! ```text
//!            clients (GET / PUT / DEL)
//!                      │ TCP, one request per connection
//! ┌────────────────────▼────────────────────┐
//! │               Coordinator               │
//! │   cache ─ ring ─ 2PC master             │
//! │   (client pool)      (register pool)    │
//! └───────────┬─────────────────▲───────────┘
//!             │ PUT/DEL, COMMIT/ABORT, GET
//!   ┌─────────┴──────────┐      │ REGISTER
//!   │                    │      │
//! ┌─▼──────────┐   ┌─────▼──────┴┐
//! │ Replica A  │   │ Replica B   │
//! │  cache     │   │  cache      │
//! │  + log     │   │  + log      │
//! └────────────┘   └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! tpckv-coord --client 0.0.0.0:8080 --register 0.0.0.0:9090
//! ```
//!
//! ### Start two replicas
//! ```bash
//! tpckv-replica --id 1 --bind 127.0.0.1:7001 --log ./data/r1.log
//! tpckv-replica --id 2 --bind 127.0.0.1:7002 --log ./data/r2.log
//! ```
//!
//! ### Use the CLI
//! ```bash
//! tpckv put my-key my-value
//! tpckv get my-key
//! tpckv del my-key
//! ```

#![allow(clippy::result_large_err)]

pub mod client;
pub mod common;
pub mod coordinator;
pub mod replica;

// Re-export commonly used types
pub use client::KvClient;
pub use common::{Config, Error, Result};
pub use coordinator::Coordinator;
pub use replica::ReplicaServer;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");

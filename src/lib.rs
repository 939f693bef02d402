//! # AtlasKV Cluster
//!
//! A client-side sharding layer presenting many independent key-value shards
//! as one logical store:
//! - Consistent-hash routing of structured keys
//! - Lazily opened, cached connection per shard
//! - Parallel per-shard batches with a join barrier
//! - Globally ordered scans via a k-way merge of per-shard scans
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Router                              │
//! │        put / get / del / batch / streams / close            │
//! └───────┬──────────────────────┬──────────────────────┬───────┘
//!         │                      │                      │
//!         ▼                      ▼                      ▼
//!   ┌───────────┐        ┌──────────────┐       ┌──────────────┐
//!   │ HashRing  │        │  Connection  │       │ MergeStream  │
//!   │ (owner)   │        │  Registry    │◄──────│ (k-way merge)│
//!   └───────────┘        └──────┬───────┘       └──────────────┘
//!                               │ one per shard
//!              ┌────────────────┼────────────────┐
//!              ▼                ▼                ▼
//!        ┌──────────┐     ┌──────────┐     ┌──────────┐
//!        │ Shard A  │     │ Shard B  │     │ Shard C  │
//!        │ (TCP)    │     │ (TCP)    │     │ (TCP)    │
//!        └──────────┘     └──────────┘     └──────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod key;
pub mod ring;
pub mod store;
pub mod protocol;
pub mod backend;
pub mod network;
pub mod registry;
pub mod merge;
pub mod router;

mod fanout;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ClusterError, Result};
pub use config::{Config, ServerConfig};
pub use key::{Key, KeyPart};
pub use merge::{Entry, Projection, Record, ScanOptions};
pub use router::{BatchOp, Router};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasKV Cluster
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

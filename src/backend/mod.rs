//! Backend Module
//!
//! The connection-level contract between the router and one shard.
//!
//! ## Implementations
//! - [`RemoteShard`]: TCP session to an `atlaskv-shard` server
//! - [`MemoryShard`]: in-process shard over a [`MemoryStore`](crate::store::MemoryStore)
//!
//! Keys crossing this boundary are already encoded; values are opaque bytes.
//! A connection is shared by every in-flight operation that needs its shard,
//! so implementations must be safe for concurrent use.

mod memory;
mod remote;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use memory::{MemoryConnector, MemoryShard, ShardStats};
pub use remote::{RemoteShard, TcpConnector};

/// One write inside a shard batch, on encoded keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl ShardOp {
    pub fn key(&self) -> &[u8] {
        match self {
            ShardOp::Put { key, .. } | ShardOp::Delete { key } => key,
        }
    }
}

/// Scan parameters sent to a single shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Inclusive lower bound on encoded keys
    pub start: Option<Vec<u8>>,

    /// Exclusive upper bound on encoded keys
    pub end: Option<Vec<u8>>,

    /// Return keys (when false, entries carry an empty key)
    pub keys: bool,

    /// Return values (when false, entries carry no value)
    pub values: bool,

    /// Maximum number of entries to return
    pub limit: Option<usize>,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            keys: true,
            values: true,
            limit: None,
        }
    }
}

impl ScanRequest {
    /// Shape a stored record according to the keys/values flags
    pub fn project(&self, key: Vec<u8>, value: Vec<u8>) -> ScanEntry {
        ScanEntry {
            key: if self.keys { key } else { Vec::new() },
            value: self.values.then_some(value),
        }
    }
}

/// One record of a shard scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

/// Ordered record sequence from one shard; an `Err` ends it
pub type ShardScan = Box<dyn Iterator<Item = Result<ScanEntry>> + Send>;

/// A live session to one shard
pub trait ShardBackend: Send + Sync {
    /// Identifier this connection was opened for
    fn shard(&self) -> &str;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Returns `ClusterError::KeyNotFound` for a missing key
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Apply all ops in order as one call
    fn batch(&self, ops: Vec<ShardOp>) -> Result<()>;

    /// Open an ordered scan over this shard
    fn scan(&self, request: ScanRequest) -> Result<ShardScan>;

    /// Tear the session down.
    ///
    /// Scans still running on this connection end with
    /// `ClusterError::Disconnected` rather than a transport error.
    fn close(&self) -> Result<()>;
}

/// Opens connections for shard identifiers
pub trait Connector: Send + Sync {
    fn connect(&self, shard: &str) -> Result<Arc<dyn ShardBackend>>;
}

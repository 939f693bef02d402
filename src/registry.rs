//! Connection Registry
//!
//! Owns the shard name → connection mapping for one router.
//!
//! ## Concurrency
//! - The set of slots is fixed at construction (one per shard), so the map
//!   itself is never mutated and needs no lock
//! - Each slot is a `Mutex<Option<..>>`: the first caller to find it empty
//!   connects while holding that slot's lock, so a shard is connected exactly
//!   once even when several operations resolve it concurrently
//! - Resolving one shard never waits on another shard's connect
//! - The closed flag is checked under the slot lock and set before
//!   `close_all` snapshots the slots, so no connection can be opened after
//!   close without also being closed by it

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{Connector, ShardBackend};
use crate::error::{ClusterError, Result};
use crate::fanout;

type Slot = Mutex<Option<Arc<dyn ShardBackend>>>;

/// Lazily-populated cache of shard connections
pub struct ConnectionRegistry {
    connector: Arc<dyn Connector>,

    /// Shard names in topology order
    shards: Vec<String>,

    slots: HashMap<String, Slot>,

    closed: AtomicBool,
}

impl ConnectionRegistry {
    pub fn new(shards: &[String], connector: Arc<dyn Connector>) -> Self {
        let slots = shards
            .iter()
            .map(|shard| (shard.clone(), Mutex::new(None)))
            .collect();

        Self {
            connector,
            shards: shards.to_vec(),
            slots,
            closed: AtomicBool::new(false),
        }
    }

    /// Connection for `shard`, connecting on first use.
    ///
    /// Fails with `ClusterError::Closed` once `close_all` has started.
    pub fn resolve(&self, shard: &str) -> Result<Arc<dyn ShardBackend>> {
        let slot = self
            .slots
            .get(shard)
            .ok_or_else(|| ClusterError::Resolution(format!("unknown shard: {}", shard)))?;

        let mut cached = slot.lock();
        if self.is_closed() {
            return Err(ClusterError::Closed);
        }
        if let Some(connection) = cached.as_ref() {
            return Ok(Arc::clone(connection));
        }

        tracing::debug!(shard, "opening shard connection");
        let connection = self.connector.connect(shard)?;
        *cached = Some(Arc::clone(&connection));

        Ok(connection)
    }

    /// Connections for every shard, in topology order
    pub fn resolve_all(&self) -> Result<Vec<Arc<dyn ShardBackend>>> {
        self.shards.iter().map(|shard| self.resolve(shard)).collect()
    }

    /// Connections opened so far, in topology order
    pub fn connected(&self) -> Vec<Arc<dyn ShardBackend>> {
        self.shards
            .iter()
            .filter_map(|shard| self.slots.get(shard)?.lock().clone())
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.slots.values().filter(|slot| slot.lock().is_some()).count()
    }

    pub fn shards(&self) -> &[String] {
        &self.shards
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close every open connection concurrently.
    ///
    /// All closes are attempted; returns once every one has finished, with
    /// the first failure observed. Only the first call does anything.
    pub fn close_all(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let connections = self.connected();
        tracing::debug!(count = connections.len(), "closing shard connections");

        let tasks = connections
            .into_iter()
            .map(|connection| (connection.shard().to_string(), connection))
            .collect();

        fanout::join_all(tasks, |_, connection| connection.close())
    }
}

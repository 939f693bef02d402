//! Router Module
//!
//! One logical key-value store over a fixed set of shards.
//!
//! ## Responsibilities
//! - Resolve each key's owner on the hash ring (by its encoded bytes)
//! - Forward point operations to that shard's connection unchanged
//! - Split batches per owner and run the sub-batches concurrently
//! - Open one scan per shard and merge them into a single ordered stream
//!
//! ## Topology
//! The shard list is fixed when the router is built. There is no rebalancing:
//! a router built over a different list will look for existing keys on
//! whatever shards now own them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{Connector, ShardBackend, ShardOp, TcpConnector};
use crate::config::Config;
use crate::error::{ClusterError, Result};
use crate::fanout;
use crate::key::Key;
use crate::merge::{KeyStream, MergeStream, Projection, ScanOptions, ValueStream};
use crate::registry::ConnectionRegistry;
use crate::ring::HashRing;

/// One write in a cluster batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Key, value: Vec<u8> },
    Delete { key: Key },
}

impl BatchOp {
    pub fn put(key: Key, value: impl Into<Vec<u8>>) -> Self {
        BatchOp::Put {
            key,
            value: value.into(),
        }
    }

    pub fn delete(key: Key) -> Self {
        BatchOp::Delete { key }
    }

    pub fn key(&self) -> &Key {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }

    /// Lower to the shard-level op on encoded keys
    fn into_shard_op(self) -> ShardOp {
        match self {
            BatchOp::Put { key, value } => ShardOp::Put {
                key: key.encode().into_bytes(),
                value,
            },
            BatchOp::Delete { key } => ShardOp::Delete {
                key: key.encode().into_bytes(),
            },
        }
    }
}

/// Client-side router over a sharded cluster
pub struct Router {
    ring: HashRing,
    registry: ConnectionRegistry,
}

impl Router {
    /// Build a router talking TCP to every shard in `config`
    ///
    /// Connections are opened lazily, on first use of each shard.
    pub fn connect(config: Config) -> Result<Self> {
        let connector = Arc::new(TcpConnector::new(config.clone()));
        Self::with_connector(config, connector)
    }

    /// Build a router whose shard connections come from `connector`
    pub fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;

        let ring = HashRing::new(&config.shards, config.virtual_nodes)?;
        let registry = ConnectionRegistry::new(&config.shards, connector);

        tracing::debug!(
            shards = config.shards.len(),
            virtual_nodes = config.virtual_nodes,
            "router ready"
        );

        Ok(Self { ring, registry })
    }

    // =========================================================================
    // Point Operations
    // =========================================================================

    /// Store `value` under `key` on its owning shard
    pub fn put(&self, key: &Key, value: impl AsRef<[u8]>) -> Result<()> {
        let encoded = key.encode();
        self.connection_for(encoded.as_bytes())?
            .put(encoded.as_bytes(), value.as_ref())
    }

    /// Read `key` from its owning shard
    ///
    /// A missing key is `ClusterError::KeyNotFound`.
    pub fn get(&self, key: &Key) -> Result<Vec<u8>> {
        let encoded = key.encode();
        self.connection_for(encoded.as_bytes())?
            .get(encoded.as_bytes())
    }

    /// Delete `key` from its owning shard
    pub fn del(&self, key: &Key) -> Result<()> {
        let encoded = key.encode();
        self.connection_for(encoded.as_bytes())?
            .delete(encoded.as_bytes())
    }

    // =========================================================================
    // Batch
    // =========================================================================

    /// Apply `ops`, split by owning shard.
    ///
    /// Each shard receives one batch holding its ops in their original order;
    /// sub-batches run concurrently. Returns after every sub-batch finished,
    /// with the first failure if any failed.
    pub fn batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        self.ensure_open()?;

        let sub_batches = self.partition(ops);
        if sub_batches.is_empty() {
            return Ok(());
        }

        tracing::debug!(shards = sub_batches.len(), "dispatching batch");

        // Each task connects for itself: a shard that cannot be reached is
        // one failed result, not a reason to skip the others
        fanout::join_all(sub_batches, |shard, ops| {
            self.registry.resolve(shard)?.batch(ops)
        })
    }

    /// Group ops by owner, keeping each shard's ops in submission order.
    /// Shards appear in the order of their first op.
    fn partition(&self, ops: Vec<BatchOp>) -> Vec<(String, Vec<ShardOp>)> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut sub_batches: Vec<(String, Vec<ShardOp>)> = Vec::new();

        for op in ops {
            let op = op.into_shard_op();
            let owner = self.ring.owner(op.key());

            let slot = match index.get(owner) {
                Some(&slot) => slot,
                None => {
                    index.insert(owner.to_string(), sub_batches.len());
                    sub_batches.push((owner.to_string(), Vec::new()));
                    sub_batches.len() - 1
                }
            };
            sub_batches[slot].1.push(op);
        }

        sub_batches
    }

    // =========================================================================
    // Scans
    // =========================================================================

    /// Ordered scan across every shard
    pub fn read_stream(&self, options: ScanOptions) -> Result<MergeStream> {
        self.ensure_open()?;

        let request = options.shard_request();
        let mut sources = Vec::with_capacity(self.ring.shard_count());
        for connection in self.registry.resolve_all()? {
            let scan = connection.scan(request.clone())?;
            sources.push((connection.shard().to_string(), scan));
        }

        tracing::debug!(
            sources = sources.len(),
            projection = ?options.projection,
            "scan opened"
        );

        Ok(MergeStream::new(sources, options.projection, options.limit))
    }

    /// Ordered scan emitting keys only
    pub fn key_stream(&self, options: ScanOptions) -> Result<KeyStream> {
        let stream = self.read_stream(options.projection(Projection::KeysOnly))?;
        Ok(KeyStream::new(stream))
    }

    /// Ordered scan emitting values only
    pub fn value_stream(&self, options: ScanOptions) -> Result<ValueStream> {
        let stream = self.read_stream(options.projection(Projection::ValuesOnly))?;
        Ok(ValueStream::new(stream))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Close every open shard connection.
    ///
    /// All closes run concurrently and all are attempted. Scans still being
    /// consumed end quietly instead of failing.
    pub fn close(&self) -> Result<()> {
        self.registry.close_all()
    }

    pub fn is_closed(&self) -> bool {
        self.registry.is_closed()
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Shard owning `key`
    pub fn owner(&self, key: &Key) -> &str {
        self.ring.owner(key.encode().as_bytes())
    }

    /// All shards, in configuration order
    pub fn shards(&self) -> &[String] {
        self.ring.shards()
    }

    /// Number of shard connections opened so far
    pub fn connected_count(&self) -> usize {
        self.registry.connected_count()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ClusterError::Closed);
        }
        Ok(())
    }

    fn connection_for(&self, encoded_key: &[u8]) -> Result<Arc<dyn ShardBackend>> {
        self.ensure_open()?;
        self.registry.resolve(self.ring.owner(encoded_key))
    }
}

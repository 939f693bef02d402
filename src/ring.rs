//! Consistent Hash Ring
//!
//! Maps encoded keys onto a fixed set of shards.
//!
//! Each shard is placed on a 32-bit ring at `virtual_nodes` points
//! (`crc32("{shard}#{vnode}")`). A key belongs to the first point at or after
//! `crc32(encoded_key)`, wrapping around to the lowest point.
//!
//! The ring is built once and never changes: adding or removing a shard means
//! building a new router, and keys already stored elsewhere are not migrated.

use std::collections::BTreeMap;

use crate::error::{ClusterError, Result};

/// Immutable consistent-hash ring over a fixed shard set
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Shard identifiers in construction order
    shards: Vec<String>,

    /// Ring point → index into `shards`
    points: BTreeMap<u32, usize>,

    virtual_nodes: usize,
}

impl HashRing {
    /// Build a ring over `shards` with `virtual_nodes` points per shard
    pub fn new(shards: &[String], virtual_nodes: usize) -> Result<Self> {
        if shards.is_empty() {
            return Err(ClusterError::Config(
                "hash ring needs at least one shard".to_string(),
            ));
        }
        if virtual_nodes == 0 {
            return Err(ClusterError::Config(
                "hash ring needs at least one virtual node per shard".to_string(),
            ));
        }

        let mut points: BTreeMap<u32, usize> = BTreeMap::new();
        for (index, shard) in shards.iter().enumerate() {
            for vnode in 0..virtual_nodes {
                let point = crc32fast::hash(format!("{}#{}", shard, vnode).as_bytes());
                // On a point collision the lexicographically smaller shard
                // wins, so ownership does not depend on list order.
                points
                    .entry(point)
                    .and_modify(|owner| {
                        if shards[index] < shards[*owner] {
                            *owner = index;
                        }
                    })
                    .or_insert(index);
            }
        }

        Ok(Self {
            shards: shards.to_vec(),
            points,
            virtual_nodes,
        })
    }

    /// Name of the shard owning an encoded key
    pub fn owner(&self, encoded_key: &[u8]) -> &str {
        let hash = crc32fast::hash(encoded_key);
        let index = self
            .points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next()) // Wrap around
            .map(|(_, &index)| index)
            .unwrap_or(0);
        &self.shards[index]
    }

    /// All shards, in construction order
    pub fn shards(&self) -> &[String] {
        &self.shards
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }
}

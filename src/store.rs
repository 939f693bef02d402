//! In-memory shard store
//!
//! Ordered key-value map serving one shard.
//!
//! ## Concurrency
//! - Single `RwLock` over a `BTreeMap` (many readers, one writer)
//! - A batch is applied under one write guard, so it is atomic to readers
//! - Scans do not hold the lock between records; each step re-seeks past the
//!   last key returned, so a scan may or may not observe concurrent writes

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::{ScanEntry, ScanRequest, ShardOp};

/// Ordered in-memory store for one shard
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.data.write().insert(key, value);
    }

    pub fn delete(&self, key: &[u8]) {
        self.data.write().remove(key);
    }

    /// Apply a batch in order under a single write guard
    pub fn apply(&self, ops: Vec<ShardOp>) {
        let mut data = self.data.write();
        for op in ops {
            match op {
                ShardOp::Put { key, value } => {
                    data.insert(key, value);
                }
                ShardOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
    }

    /// Next record of a scan, strictly after `after` (or from the start)
    ///
    /// Respects the request's start/end bounds.
    pub fn next_after(&self, request: &ScanRequest, after: Option<&[u8]>) -> Option<(Vec<u8>, Vec<u8>)> {
        let lower: Bound<&[u8]> = match (after, request.start.as_deref()) {
            (Some(last), _) => Bound::Excluded(last),
            (None, Some(start)) => Bound::Included(start),
            (None, None) => Bound::Unbounded,
        };

        let data = self.data.read();
        let (key, value) = data
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()?;

        if let Some(end) = request.end.as_deref() {
            if key.as_slice() >= end {
                return None;
            }
        }

        Some((key.clone(), value.clone()))
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

/// Lazy iterator over a store, re-seeking on every step
pub struct StoreScan {
    store: Arc<MemoryStore>,
    request: ScanRequest,
    last_key: Option<Vec<u8>>,
    emitted: usize,
    done: bool,
}

impl StoreScan {
    pub fn new(store: Arc<MemoryStore>, request: ScanRequest) -> Self {
        Self {
            store,
            request,
            last_key: None,
            emitted: 0,
            done: false,
        }
    }
}

impl Iterator for StoreScan {
    type Item = ScanEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.request.limit.is_some_and(|limit| self.emitted >= limit) {
            return None;
        }

        match self.store.next_after(&self.request, self.last_key.as_deref()) {
            Some((key, value)) => {
                self.last_key = Some(key.clone());
                self.emitted += 1;
                Some(self.request.project(key, value))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

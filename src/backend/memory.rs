//! In-process shard backend
//!
//! A `ShardBackend` over a shared `MemoryStore`, used for embedding the
//! router without a network and for exercising it in tests. Every call is
//! counted and batches are logged so callers can see exactly what reached a
//! shard.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::error::{ClusterError, Result};
use crate::store::{MemoryStore, StoreScan};

use super::{Connector, ScanEntry, ScanRequest, ShardBackend, ShardOp, ShardScan};

/// Snapshot of the calls a `MemoryShard` has served
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardStats {
    pub puts: usize,
    pub gets: usize,
    pub deletes: usize,
    pub batches: usize,
    pub scans: usize,
    pub closes: usize,
}

#[derive(Default)]
struct Counters {
    puts: AtomicUsize,
    gets: AtomicUsize,
    deletes: AtomicUsize,
    batches: AtomicUsize,
    scans: AtomicUsize,
    closes: AtomicUsize,
}

/// In-process connection to one shard
pub struct MemoryShard {
    name: String,
    store: Arc<MemoryStore>,
    closed: Arc<AtomicBool>,

    /// When set, every call (and every pull of an open scan) fails with it
    failure: Arc<RwLock<Option<String>>>,

    counters: Counters,
    batch_log: Mutex<Vec<Vec<ShardOp>>>,
}

impl MemoryShard {
    pub fn new(name: impl Into<String>, store: Arc<MemoryStore>) -> Self {
        Self {
            name: name.into(),
            store,
            closed: Arc::new(AtomicBool::new(false)),
            failure: Arc::new(RwLock::new(None)),
            counters: Counters::default(),
            batch_log: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Make subsequent calls fail with a backend error (None clears it)
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.write() = message.map(str::to_string);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ShardStats {
        ShardStats {
            puts: self.counters.puts.load(Ordering::SeqCst),
            gets: self.counters.gets.load(Ordering::SeqCst),
            deletes: self.counters.deletes.load(Ordering::SeqCst),
            batches: self.counters.batches.load(Ordering::SeqCst),
            scans: self.counters.scans.load(Ordering::SeqCst),
            closes: self.counters.closes.load(Ordering::SeqCst),
        }
    }

    /// Every batch this shard received, in arrival order
    pub fn batch_log(&self) -> Vec<Vec<ShardOp>> {
        self.batch_log.lock().clone()
    }

    fn check(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ClusterError::Closed);
        }
        if let Some(message) = self.failure.read().as_ref() {
            return Err(ClusterError::Backend {
                shard: self.name.clone(),
                message: message.clone(),
            });
        }
        Ok(())
    }
}

impl ShardBackend for MemoryShard {
    fn shard(&self) -> &str {
        &self.name
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.counters.puts.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.store.put(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.counters.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.store.get(key).ok_or(ClusterError::KeyNotFound)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.store.delete(key);
        Ok(())
    }

    fn batch(&self, ops: Vec<ShardOp>) -> Result<()> {
        self.counters.batches.fetch_add(1, Ordering::SeqCst);
        self.batch_log.lock().push(ops.clone());
        self.check()?;
        self.store.apply(ops);
        Ok(())
    }

    fn scan(&self, request: ScanRequest) -> Result<ShardScan> {
        self.counters.scans.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(Box::new(MemoryScan {
            shard: self.name.clone(),
            inner: StoreScan::new(Arc::clone(&self.store), request),
            closed: Arc::clone(&self.closed),
            failure: Arc::clone(&self.failure),
            finished: false,
        }))
    }

    fn close(&self) -> Result<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!(shard = %self.name, "memory shard closed");
        Ok(())
    }
}

/// Scan over a `MemoryShard` that notices close and injected failures
struct MemoryScan {
    shard: String,
    inner: StoreScan,
    closed: Arc<AtomicBool>,
    failure: Arc<RwLock<Option<String>>>,
    finished: bool,
}

impl Iterator for MemoryScan {
    type Item = Result<ScanEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if self.closed.load(Ordering::SeqCst) {
            self.finished = true;
            return Some(Err(ClusterError::Disconnected {
                shard: self.shard.clone(),
            }));
        }

        if let Some(message) = self.failure.read().as_ref() {
            self.finished = true;
            return Some(Err(ClusterError::Backend {
                shard: self.shard.clone(),
                message: message.clone(),
            }));
        }

        match self.inner.next() {
            Some(entry) => Some(Ok(entry)),
            None => {
                self.finished = true;
                None
            }
        }
    }
}

/// Connector handing out `MemoryShard`s, one store per shard name
///
/// Stores outlive connections, so data written through one router is visible
/// to the next router built on the same connector.
#[derive(Default)]
pub struct MemoryConnector {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
    shards: Mutex<HashMap<String, Arc<MemoryShard>>>,
    connects: AtomicUsize,
    connect_delay: Option<Duration>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep inside every `connect`, to widen races in tests
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Store backing a shard name (created on first use)
    pub fn store(&self, shard: &str) -> Arc<MemoryStore> {
        Arc::clone(self.stores.lock().entry(shard.to_string()).or_default())
    }

    /// Most recent connection opened for a shard
    pub fn shard(&self, shard: &str) -> Option<Arc<MemoryShard>> {
        self.shards.lock().get(shard).cloned()
    }

    /// Total number of `connect` calls served
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, shard: &str) -> Result<Arc<dyn ShardBackend>> {
        if let Some(delay) = self.connect_delay {
            thread::sleep(delay);
        }
        self.connects.fetch_add(1, Ordering::SeqCst);

        let handle = Arc::new(MemoryShard::new(shard, self.store(shard)));
        self.shards
            .lock()
            .insert(shard.to_string(), Arc::clone(&handle));

        Ok(handle)
    }
}

//! Merge Stream Engine
//!
//! Turns N per-shard scans, each already sorted by encoded key, into one
//! globally ordered stream.
//!
//! ## Algorithm (k-way merge)
//! ```text
//!   shard A ─► [a1] ─┐
//!   shard B ─► [b1] ─┼─► min-heap of heads ─► pop smallest ─► project ─► out
//!   shard C ─► [c1] ─┘         ▲                   │
//!                              └── pull next from ─┘
//!                                  the same shard
//! ```
//! - At most one buffered head per shard: memory is O(shards), not O(records)
//! - Equal keys are not deduplicated; ties come out in source index order
//! - A source that fails with `ClusterError::Disconnected` (its connection
//!   was closed on purpose) is treated as exhausted; any other source error
//!   is emitted once and ends the stream

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::iter::FusedIterator;

use crate::backend::{ScanRequest, ShardScan};
use crate::error::{ClusterError, Result};
use crate::key::{self, Key};

// =============================================================================
// Scan Options
// =============================================================================

/// Which parts of each record a scan emits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Projection {
    /// Key and value
    #[default]
    Entries,

    /// Key only; values are never requested from shards
    KeysOnly,

    /// Value only; keys are still fetched to order the merge
    ValuesOnly,
}

impl Projection {
    fn wants_values(self) -> bool {
        !matches!(self, Projection::KeysOnly)
    }
}

/// Options for a cluster-wide scan
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub projection: Projection,

    /// Inclusive lower bound
    pub start: Option<Key>,

    /// Exclusive upper bound
    pub end: Option<Key>,

    /// Maximum number of records in the merged output
    pub limit: Option<usize>,
}

impl ScanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn start(mut self, key: Key) -> Self {
        self.start = Some(key);
        self
    }

    pub fn end(mut self, key: Key) -> Self {
        self.end = Some(key);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Per-shard request. Bounds and limit are pushed down unchanged: no
    /// shard can contribute more than `limit` records to the merged prefix.
    pub fn shard_request(&self) -> ScanRequest {
        ScanRequest {
            start: self.start.as_ref().map(|k| k.encode().into_bytes()),
            end: self.end.as_ref().map(|k| k.encode().into_bytes()),
            keys: true,
            values: self.projection.wants_values(),
            limit: self.limit,
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// A key-value pair from a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    pub value: Vec<u8>,
}

/// One item of merged output, shaped by the projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Entry(Entry),
    Key(Key),
    Value(Vec<u8>),
}

impl Record {
    pub fn key(&self) -> Option<&Key> {
        match self {
            Record::Entry(entry) => Some(&entry.key),
            Record::Key(key) => Some(key),
            Record::Value(_) => None,
        }
    }

    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Record::Entry(entry) => Some(&entry.value),
            Record::Value(value) => Some(value),
            Record::Key(_) => None,
        }
    }

    pub fn into_parts(self) -> (Option<Key>, Option<Vec<u8>>) {
        match self {
            Record::Entry(Entry { key, value }) => (Some(key), Some(value)),
            Record::Key(key) => (Some(key), None),
            Record::Value(value) => (None, Some(value)),
        }
    }
}

// =============================================================================
// Merge
// =============================================================================

/// Buffered head of one source
struct Head {
    key: Vec<u8>,
    value: Option<Vec<u8>>,
    source: usize,
}

// BinaryHeap is a max-heap: invert so the smallest (key, source) pops first
impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        key::compare(&other.key, &self.key).then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

/// An open per-shard scan; `None` in the cursor list once exhausted
struct Cursor {
    shard: String,
    scan: ShardScan,
}

/// Globally ordered stream over all shards
pub struct MergeStream {
    cursors: Vec<Option<Cursor>>,
    heads: BinaryHeap<Head>,
    projection: Projection,
    remaining: Option<usize>,
    primed: bool,
    pending_error: Option<ClusterError>,
    done: bool,
}

impl MergeStream {
    /// Merge `sources` (shard name, sorted scan) under `projection`
    pub fn new(sources: Vec<(String, ShardScan)>, projection: Projection, limit: Option<usize>) -> Self {
        let heads = BinaryHeap::with_capacity(sources.len());
        let cursors = sources
            .into_iter()
            .map(|(shard, scan)| Some(Cursor { shard, scan }))
            .collect();

        Self {
            cursors,
            heads,
            projection,
            remaining: limit,
            primed: false,
            pending_error: None,
            done: false,
        }
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    /// Number of sources that have not been exhausted yet
    pub fn open_sources(&self) -> usize {
        self.cursors.iter().filter(|c| c.is_some()).count()
    }

    /// Buffer the next record of source `index`, or retire the source
    fn pull(&mut self, index: usize) -> Result<()> {
        let Some(cursor) = self.cursors[index].as_mut() else {
            return Ok(());
        };

        match cursor.scan.next() {
            Some(Ok(entry)) => {
                self.heads.push(Head {
                    key: entry.key,
                    value: entry.value,
                    source: index,
                });
                Ok(())
            }
            Some(Err(e)) if e.is_benign_disconnect() => {
                tracing::debug!(shard = %cursor.shard, "scan source closed, dropping it from merge");
                self.cursors[index] = None;
                Ok(())
            }
            Some(Err(e)) => {
                tracing::warn!(shard = %cursor.shard, error = %e, "scan source failed");
                self.cursors[index] = None;
                Err(e)
            }
            None => {
                tracing::trace!(shard = %cursor.shard, "scan source exhausted");
                self.cursors[index] = None;
                Ok(())
            }
        }
    }

    fn prime(&mut self) -> Result<()> {
        for index in 0..self.cursors.len() {
            self.pull(index)?;
        }
        Ok(())
    }

    fn project(&self, head: Head) -> Result<Record> {
        match self.projection {
            Projection::Entries => Ok(Record::Entry(Entry {
                key: key::decode(&head.key)?,
                value: head.value.unwrap_or_default(),
            })),
            Projection::KeysOnly => Ok(Record::Key(key::decode(&head.key)?)),
            Projection::ValuesOnly => Ok(Record::Value(head.value.unwrap_or_default())),
        }
    }

    /// Stop for good and release every source
    fn finish(&mut self) {
        self.done = true;
        self.heads.clear();
        self.cursors.clear();
    }
}

impl Iterator for MergeStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        // A limited scan that already emitted everything ends cleanly, even
        // if the refill after its last record failed
        if self.remaining == Some(0) {
            self.finish();
            return None;
        }

        if let Some(e) = self.pending_error.take() {
            self.finish();
            return Some(Err(e));
        }

        if !self.primed {
            self.primed = true;
            if let Err(e) = self.prime() {
                self.finish();
                return Some(Err(e));
            }
        }

        let Some(head) = self.heads.pop() else {
            self.finish();
            return None;
        };

        // Refill before emitting; a failure here is reported on the next call
        if let Err(e) = self.pull(head.source) {
            self.pending_error = Some(e);
        }

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }

        match self.project(head) {
            Ok(record) => Some(Ok(record)),
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for MergeStream {}

// =============================================================================
// Typed Streams
// =============================================================================

/// Merged stream of keys only
pub struct KeyStream {
    inner: MergeStream,
}

impl KeyStream {
    pub(crate) fn new(inner: MergeStream) -> Self {
        Self { inner }
    }
}

impl Iterator for KeyStream {
    type Item = Result<Key>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.inner.next()?;
        Some(record.and_then(|record| {
            record
                .into_parts()
                .0
                .ok_or_else(|| ClusterError::Protocol("scan record without key".to_string()))
        }))
    }
}

impl FusedIterator for KeyStream {}

/// Merged stream of values only, in key order
pub struct ValueStream {
    inner: MergeStream,
}

impl ValueStream {
    pub(crate) fn new(inner: MergeStream) -> Self {
        Self { inner }
    }
}

impl Iterator for ValueStream {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.inner.next()?;
        Some(record.and_then(|record| {
            record
                .into_parts()
                .1
                .ok_or_else(|| ClusterError::Protocol("scan record without value".to_string()))
        }))
    }
}

impl FusedIterator for ValueStream {}

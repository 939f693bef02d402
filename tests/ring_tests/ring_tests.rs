//! Hash Ring Tests
//!
//! These tests verify:
//! - Ownership is deterministic and independent of shard list order
//! - Keys spread over every shard
//! - Adding a shard only moves keys onto the new shard

use std::collections::HashMap;

use atlaskv_cluster::key;
use atlaskv_cluster::ring::HashRing;

// =============================================================================
// Helper Functions
// =============================================================================

fn shards(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn sample_keys(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| key!["key", i].encode().into_bytes())
        .collect()
}

// =============================================================================
// Construction Tests
// =============================================================================

#[test]
fn test_ring_requires_shards() {
    assert!(HashRing::new(&[], 64).is_err());
}

#[test]
fn test_ring_requires_virtual_nodes() {
    assert!(HashRing::new(&shards(&["a:1"]), 0).is_err());
}

#[test]
fn test_ring_reports_topology() {
    let ring = HashRing::new(&shards(&["a:1", "b:2"]), 16).unwrap();
    assert_eq!(ring.shards(), &["a:1".to_string(), "b:2".to_string()]);
    assert_eq!(ring.shard_count(), 2);
    assert_eq!(ring.virtual_nodes(), 16);
}

// =============================================================================
// Ownership Tests
// =============================================================================

#[test]
fn test_single_shard_owns_everything() {
    let ring = HashRing::new(&shards(&["only:1"]), 8).unwrap();
    for key in sample_keys(100) {
        assert_eq!(ring.owner(&key), "only:1");
    }
}

#[test]
fn test_owner_is_deterministic() {
    let topology = shards(&["127.0.0.1:3000", "127.0.0.1:3001", "127.0.0.1:3002"]);
    let first = HashRing::new(&topology, 64).unwrap();
    let second = HashRing::new(&topology, 64).unwrap();

    for key in sample_keys(500) {
        let owner = first.owner(&key);
        assert_eq!(owner, first.owner(&key));
        assert_eq!(owner, second.owner(&key));
        assert!(topology.iter().any(|s| s == owner));
    }
}

#[test]
fn test_owner_independent_of_shard_order() {
    let forward = HashRing::new(&shards(&["a:1", "b:2", "c:3"]), 64).unwrap();
    let reversed = HashRing::new(&shards(&["c:3", "b:2", "a:1"]), 64).unwrap();

    for key in sample_keys(500) {
        assert_eq!(forward.owner(&key), reversed.owner(&key));
    }
}

#[test]
fn test_keys_spread_over_all_shards() {
    let ring = HashRing::new(&shards(&["a:1", "b:2", "c:3"]), 64).unwrap();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for key in sample_keys(3000) {
        *counts.entry(ring.owner(&key).to_string()).or_default() += 1;
    }

    assert_eq!(counts.len(), 3);
    for (shard, count) in counts {
        assert!(count > 300, "shard {} only owns {} of 3000 keys", shard, count);
    }
}

#[test]
fn test_adding_shard_only_moves_keys_to_new_shard() {
    let before = HashRing::new(&shards(&["a:1", "b:2", "c:3"]), 64).unwrap();
    let after = HashRing::new(&shards(&["a:1", "b:2", "c:3", "d:4"]), 64).unwrap();

    let mut moved = 0;
    for key in sample_keys(2000) {
        let old = before.owner(&key);
        let new = after.owner(&key);
        if old != new {
            assert_eq!(new, "d:4");
            moved += 1;
        }
    }

    assert!(moved > 0);
    assert!(moved < 2000);
}

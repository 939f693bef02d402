//! Tests for MergeStream
//!
//! These tests verify:
//! - Output is globally ordered and loses nothing
//! - Ties are kept and come out in source order
//! - Intentional disconnects end a source quietly
//! - Other source errors are reported once and end the stream

use atlaskv_cluster::backend::{ScanEntry, ShardScan};
use atlaskv_cluster::merge::{MergeStream, Projection};
use atlaskv_cluster::{key, ClusterError, Entry, Key, Record};

// =============================================================================
// Helper Functions
// =============================================================================

fn entry(n: i64, value: &str) -> atlaskv_cluster::Result<ScanEntry> {
    Ok(ScanEntry {
        key: key!["k", n].encode().into_bytes(),
        value: Some(value.as_bytes().to_vec()),
    })
}

fn source(name: &str, items: Vec<atlaskv_cluster::Result<ScanEntry>>) -> (String, ShardScan) {
    (name.to_string(), Box::new(items.into_iter()))
}

fn numbered(name: &str, numbers: &[i64]) -> (String, ShardScan) {
    source(name, numbers.iter().map(|&n| entry(n, name)).collect())
}

fn disconnected(shard: &str) -> atlaskv_cluster::Result<ScanEntry> {
    Err(ClusterError::Disconnected {
        shard: shard.to_string(),
    })
}

fn keys_of(records: Vec<Record>) -> Vec<Key> {
    records.into_iter().filter_map(|r| r.into_parts().0).collect()
}

fn collect_ok(stream: MergeStream) -> Vec<Record> {
    stream.map(|r| r.unwrap()).collect()
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_merge_is_globally_ordered() {
    let stream = MergeStream::new(
        vec![
            numbered("a", &[1, 4, 7, 10]),
            numbered("b", &[2, 5, 8]),
            numbered("c", &[0, 3, 6, 9, 11, 12]),
        ],
        Projection::KeysOnly,
        None,
    );

    let keys = keys_of(collect_ok(stream));
    let expected: Vec<Key> = (0..13).map(|n| key!["k", n]).collect();
    assert_eq!(keys, expected);
}

#[test]
fn test_merge_orders_by_encoding_not_insertion() {
    // Numbers sort by value (-5 < 2 < 10) and numbers sort before strings
    let a = source(
        "a",
        vec![
            Ok(ScanEntry {
                key: key![-5].encode().into_bytes(),
                value: None,
            }),
            Ok(ScanEntry {
                key: key!["x"].encode().into_bytes(),
                value: None,
            }),
        ],
    );
    let b = source(
        "b",
        vec![
            Ok(ScanEntry {
                key: key![2].encode().into_bytes(),
                value: None,
            }),
            Ok(ScanEntry {
                key: key![10].encode().into_bytes(),
                value: None,
            }),
        ],
    );

    let keys = keys_of(collect_ok(MergeStream::new(vec![a, b], Projection::KeysOnly, None)));
    assert_eq!(keys, vec![key![-5], key![2], key![10], key!["x"]]);
}

#[test]
fn test_merge_keeps_duplicates_in_source_order() {
    let stream = MergeStream::new(
        vec![
            numbered("first", &[1, 2]),
            numbered("second", &[2, 3]),
            numbered("third", &[2]),
        ],
        Projection::Entries,
        None,
    );

    let records = collect_ok(stream);
    let pairs: Vec<(Key, String)> = records
        .into_iter()
        .map(|r| match r {
            Record::Entry(Entry { key, value }) => (key, String::from_utf8(value).unwrap()),
            other => panic!("Expected entry, got {:?}", other),
        })
        .collect();

    assert_eq!(
        pairs,
        vec![
            (key!["k", 1], "first".to_string()),
            (key!["k", 2], "first".to_string()),
            (key!["k", 2], "second".to_string()),
            (key!["k", 2], "third".to_string()),
            (key!["k", 3], "second".to_string()),
        ]
    );
}

#[test]
fn test_merge_size_is_sum_of_sources() {
    let sizes = [0usize, 17, 3, 40, 1];
    let sources = sizes
        .iter()
        .enumerate()
        .map(|(s, &size)| {
            let numbers: Vec<i64> = (0..size as i64).map(|n| n * 5 + s as i64).collect();
            numbered(&format!("s{}", s), &numbers)
        })
        .collect();

    let stream = MergeStream::new(sources, Projection::KeysOnly, None);
    let keys = keys_of(collect_ok(stream));

    assert_eq!(keys.len(), sizes.iter().sum::<usize>());
    assert!(keys.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_merge_of_empty_sources() {
    let stream = MergeStream::new(
        vec![source("a", Vec::new()), source("b", Vec::new())],
        Projection::Entries,
        None,
    );
    assert_eq!(stream.count(), 0);

    let mut none = MergeStream::new(Vec::new(), Projection::Entries, None);
    assert!(none.next().is_none());
}

#[test]
fn test_sources_are_retired_as_they_drain() {
    let mut stream = MergeStream::new(
        vec![numbered("a", &[1]), numbered("b", &[2, 3])],
        Projection::KeysOnly,
        None,
    );
    assert_eq!(stream.open_sources(), 2);

    stream.next().unwrap().unwrap();
    assert_eq!(stream.open_sources(), 1);

    assert_eq!(stream.by_ref().count(), 2);
    assert_eq!(stream.open_sources(), 0);
}

// =============================================================================
// Projection Tests
// =============================================================================

#[test]
fn test_values_only_projection() {
    let stream = MergeStream::new(
        vec![
            source("a", vec![entry(2, "two")]),
            source("b", vec![entry(1, "one"), entry(3, "three")]),
        ],
        Projection::ValuesOnly,
        None,
    );

    let values: Vec<Record> = collect_ok(stream);
    assert_eq!(
        values,
        vec![
            Record::Value(b"one".to_vec()),
            Record::Value(b"two".to_vec()),
            Record::Value(b"three".to_vec()),
        ]
    );
}

#[test]
fn test_keys_only_projection_drops_values() {
    let stream = MergeStream::new(vec![numbered("a", &[5, 6])], Projection::KeysOnly, None);

    for record in collect_ok(stream) {
        assert!(record.value().is_none());
        assert!(record.key().is_some());
    }
}

// =============================================================================
// Limit Tests
// =============================================================================

#[test]
fn test_limit_caps_output() {
    let stream = MergeStream::new(
        vec![numbered("a", &[1, 3, 5]), numbered("b", &[2, 4, 6])],
        Projection::KeysOnly,
        Some(4),
    );

    let keys = keys_of(collect_ok(stream));
    assert_eq!(keys, (1..5).map(|n| key!["k", n]).collect::<Vec<_>>());
}

#[test]
fn test_limit_zero_emits_nothing() {
    let stream = MergeStream::new(vec![numbered("a", &[1, 2])], Projection::Entries, Some(0));
    assert_eq!(stream.count(), 0);
}

#[test]
fn test_limit_reached_before_pending_error() {
    let failure = Err(ClusterError::Network("connection reset".to_string()));
    let stream = MergeStream::new(
        vec![
            source("a", vec![entry(1, "a"), failure]),
            numbered("b", &[2]),
        ],
        Projection::KeysOnly,
        Some(1),
    );

    // The refill after the only requested record fails, but the limited
    // scan is already complete
    let results: Vec<_> = stream.collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_ref().unwrap(), &Record::Key(key!["k", 1]));
}

// =============================================================================
// Error Handling Tests
// =============================================================================

#[test]
fn test_disconnect_ends_source_quietly() {
    let stream = MergeStream::new(
        vec![
            source("a", vec![entry(1, "a"), disconnected("a"), entry(99, "a")]),
            numbered("b", &[2, 3]),
        ],
        Projection::KeysOnly,
        None,
    );

    let results: Vec<_> = stream.collect();
    assert!(results.iter().all(|r| r.is_ok()));

    let keys = keys_of(results.into_iter().map(|r| r.unwrap()).collect());
    // Nothing after the disconnect is read from that source
    assert_eq!(keys, vec![key!["k", 1], key!["k", 2], key!["k", 3]]);
}

#[test]
fn test_disconnect_while_priming() {
    let stream = MergeStream::new(
        vec![source("a", vec![disconnected("a")]), numbered("b", &[7])],
        Projection::KeysOnly,
        None,
    );

    let keys = keys_of(collect_ok(stream));
    assert_eq!(keys, vec![key!["k", 7]]);
}

#[test]
fn test_source_error_is_emitted_then_stream_ends() {
    let failure = Err(ClusterError::Backend {
        shard: "a".to_string(),
        message: "boom".to_string(),
    });
    let mut stream = MergeStream::new(
        vec![
            source("a", vec![entry(1, "a"), failure, entry(5, "a")]),
            numbered("b", &[2, 3, 4]),
        ],
        Projection::KeysOnly,
        None,
    );

    // The buffered head is delivered before the error that followed it
    assert_eq!(
        stream.next().unwrap().unwrap(),
        Record::Key(key!["k", 1])
    );

    let err = stream.next().unwrap().unwrap_err();
    assert!(matches!(err, ClusterError::Backend { .. }));
    assert!(err.to_string().contains("boom"));

    assert!(stream.next().is_none());
    assert!(stream.next().is_none());
}

#[test]
fn test_error_while_priming() {
    let failure = Err(ClusterError::Network("connection reset".to_string()));
    let mut stream = MergeStream::new(
        vec![numbered("a", &[1]), source("b", vec![failure])],
        Projection::Entries,
        None,
    );

    assert!(matches!(
        stream.next(),
        Some(Err(ClusterError::Network(_)))
    ));
    assert!(stream.next().is_none());
}

#[test]
fn test_undecodable_key_is_an_error() {
    let garbage = Ok(ScanEntry {
        key: vec![0xEE, 0x01],
        value: None,
    });
    let mut stream = MergeStream::new(vec![source("a", vec![garbage])], Projection::KeysOnly, None);

    assert!(matches!(
        stream.next(),
        Some(Err(ClusterError::KeyEncoding(_)))
    ));
    assert!(stream.next().is_none());
}

//! Cluster Tests
//!
//! Runs real shard servers on loopback and routes through them over TCP.

use std::io::{BufReader, BufWriter};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use atlaskv_cluster::backend::ScanEntry;
use atlaskv_cluster::network::Server;
use atlaskv_cluster::protocol::{read_command, write_response, Command, Response};
use atlaskv_cluster::store::MemoryStore;
use atlaskv_cluster::{key, BatchOp, ClusterError, Config, Key, Record, Router, ScanOptions, ServerConfig};

// =============================================================================
// Helper Functions
// =============================================================================

struct TestCluster {
    servers: Vec<Arc<Server>>,
    stores: Vec<Arc<MemoryStore>>,
    handles: Vec<JoinHandle<()>>,
}

impl TestCluster {
    fn start(count: usize) -> Self {
        let mut servers = Vec::new();
        let mut stores = Vec::new();
        let mut handles = Vec::new();

        for _ in 0..count {
            let store = Arc::new(MemoryStore::new());
            let config = ServerConfig::builder().listen_addr("127.0.0.1:0").build();
            let server = Arc::new(Server::bind(config, Arc::clone(&store)).unwrap());

            let runner = Arc::clone(&server);
            handles.push(thread::spawn(move || runner.run().unwrap()));

            servers.push(server);
            stores.push(store);
        }

        Self {
            servers,
            stores,
            handles,
        }
    }

    fn addrs(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.local_addr().to_string()).collect()
    }

    fn router(&self) -> Router {
        let config = Config::builder()
            .shards(self.addrs())
            .read_timeout_ms(2000)
            .build();
        Router::connect(config).unwrap()
    }

    fn stop(self) {
        for server in &self.servers {
            server.shutdown();
        }
        for handle in self.handles {
            handle.join().unwrap();
        }
    }
}

fn value(i: usize) -> Vec<u8> {
    format!("value {}", i).into_bytes()
}

/// Shard that answers GET with the requested key as the value; its first
/// reply is held back for `first_reply_delay`
fn spawn_echo_shard(first_reply_delay: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return;
        };
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = BufWriter::new(stream);
        let mut delay = Some(first_reply_delay);

        while let Ok(command) = read_command(&mut reader) {
            let response = match command {
                Command::Get { key } => Response::ok(Some(key)),
                _ => Response::ok(None),
            };
            if let Some(delay) = delay.take() {
                thread::sleep(delay);
            }
            if write_response(&mut writer, &response).is_err() {
                return;
            }
        }
    });

    addr
}

/// Shard whose scans send one entry and then drop the socket
fn spawn_truncating_shard() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { return };
            thread::spawn(move || {
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut writer = BufWriter::new(stream);
                while let Ok(command) = read_command(&mut reader) {
                    if let Command::Scan { .. } = command {
                        let entry = ScanEntry {
                            key: key!["k", 1].encode().into_bytes(),
                            value: Some(b"v".to_vec()),
                        };
                        let payload = bincode::serialize(&entry).unwrap();
                        let _ = write_response(&mut writer, &Response::entry(payload));
                        // Dropping both halves ends the scan without its OK frame
                        return;
                    }
                    if write_response(&mut writer, &Response::ok(None)).is_err() {
                        return;
                    }
                }
            });
        }
    });

    addr
}

fn load_twenty(router: &Router) {
    let ops = (0..20).map(|i| BatchOp::put(key!["key", i], value(i))).collect();
    router.batch(ops).unwrap();
}

// =============================================================================
// Point Operation Tests
// =============================================================================

#[test]
fn test_point_operations_over_tcp() {
    let cluster = TestCluster::start(3);
    let router = cluster.router();

    let k = key!["user", 7];
    router.put(&k, b"alice").unwrap();
    assert_eq!(router.get(&k).unwrap(), b"alice");

    // Stored on exactly one shard, under the encoded key
    let holders = cluster
        .stores
        .iter()
        .filter(|store| store.get(k.encode().as_bytes()).is_some())
        .count();
    assert_eq!(holders, 1);

    router.del(&k).unwrap();
    let err = router.get(&k).unwrap_err();
    assert!(matches!(err, ClusterError::KeyNotFound));

    router.close().unwrap();
    cluster.stop();
}

#[test]
fn test_unreachable_shard_is_a_network_error() {
    // Bind then drop a listener to get a port nobody is serving
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .to_string();

    let router = Router::connect(Config::builder().shard(addr).build()).unwrap();
    let err = router.put(&key!["k"], b"v").unwrap_err();

    assert!(matches!(err, ClusterError::Network(_)));
}

#[test]
fn test_unresolvable_shard_is_a_resolution_error() {
    let router = Router::connect(Config::builder().shard("not-a-socket-address").build()).unwrap();
    let err = router.get(&key!["k"]).unwrap_err();

    assert!(matches!(err, ClusterError::Resolution(_)));
}

#[test]
fn test_timed_out_session_is_not_reused() {
    let addr = spawn_echo_shard(Duration::from_millis(600));
    let config = Config::builder().shard(addr).read_timeout_ms(200).build();
    let router = Router::connect(config).unwrap();

    assert!(router.get(&key!["first"]).is_err());

    // The late reply to the first request must not answer the second
    let second = router.get(&key!["second"]);
    assert!(
        matches!(second, Err(ClusterError::Network(_))),
        "expected a failed session, got {:?}",
        second
    );
    assert!(router.put(&key!["third"], b"v").is_err());
}

// =============================================================================
// Batch and Scan Tests
// =============================================================================

#[test]
fn test_batch_then_ordered_scans_over_tcp() {
    let cluster = TestCluster::start(3);
    let router = cluster.router();
    load_twenty(&router);

    let total: usize = cluster.stores.iter().map(|s| s.len()).sum();
    assert_eq!(total, 20);

    let entries: Vec<(Key, Vec<u8>)> = router
        .read_stream(ScanOptions::new())
        .unwrap()
        .map(|r| match r.unwrap() {
            Record::Entry(e) => (e.key, e.value),
            other => panic!("Expected entry, got {:?}", other),
        })
        .collect();
    let expected: Vec<(Key, Vec<u8>)> = (0..20).map(|i| (key!["key", i], value(i))).collect();
    assert_eq!(entries, expected);

    let keys: Vec<Key> = router
        .key_stream(ScanOptions::new())
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(keys, (0..20).map(|i| key!["key", i]).collect::<Vec<_>>());

    let values: Vec<Vec<u8>> = router
        .value_stream(ScanOptions::new())
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(values, (0..20).map(value).collect::<Vec<_>>());

    let window: Vec<Key> = router
        .key_stream(ScanOptions::new().start(key!["key", 10]).limit(3))
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(window, vec![key!["key", 10], key!["key", 11], key!["key", 12]]);

    router.close().unwrap();
    cluster.stop();
}

#[test]
fn test_close_mid_scan_over_tcp() {
    let cluster = TestCluster::start(3);
    let router = cluster.router();
    load_twenty(&router);

    let mut stream = router.read_stream(ScanOptions::new()).unwrap();
    for _ in 0..3 {
        stream.next().unwrap().unwrap();
    }

    router.close().unwrap();

    for record in stream {
        assert!(record.is_ok(), "unexpected error after close: {:?}", record);
    }
    assert!(matches!(router.get(&key!["key", 1]), Err(ClusterError::Closed)));

    cluster.stop();
}

#[test]
fn test_scan_cut_off_without_close_is_an_error() {
    let router = Router::connect(Config::builder().shard(spawn_truncating_shard()).build()).unwrap();

    let mut stream = router.read_stream(ScanOptions::new()).unwrap();

    match stream.next() {
        Some(Ok(Record::Entry(entry))) => assert_eq!(entry.key, key!["k", 1]),
        other => panic!("Expected first entry, got {:?}", other),
    }

    let err = stream.next().unwrap().unwrap_err();
    assert!(!err.is_benign_disconnect());
    assert!(
        matches!(err, ClusterError::Io(_) | ClusterError::Network(_)),
        "unexpected error: {:?}",
        err
    );
    assert!(stream.next().is_none());
    assert!(!router.is_closed());
}

#[test]
fn test_two_routers_share_a_cluster() {
    let cluster = TestCluster::start(2);
    let writer = cluster.router();
    let reader = cluster.router();

    writer.put(&key!["shared", true], b"yes").unwrap();
    assert_eq!(reader.get(&key!["shared", true]).unwrap(), b"yes");

    writer.close().unwrap();
    reader.close().unwrap();
    cluster.stop();
}

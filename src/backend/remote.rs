//! TCP shard backend
//!
//! Client side of the AtlasKV wire protocol.
//!
//! ## Sessions
//! - One request/response session per connection, serialized by a mutex
//! - A call that fails mid-exchange leaves the session out of step with the
//!   server, so the session is shut down and every later call fails
//! - Every scan runs on its own socket so a long scan never blocks point
//!   operations; open scan sockets are tracked so `close` can shut them down
//! - `close` raises the closed flag *before* tearing sockets down; a scan
//!   that then fails to read reports `Disconnected` instead of an I/O error

use std::collections::HashMap;
use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{ClusterError, Result};
use crate::protocol::{read_response, write_command, Command, Response, Status};

use super::{Connector, ScanEntry, ScanRequest, ShardBackend, ShardOp, ShardScan};

/// Request/response half of a connection
struct Session {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

/// Open scan sockets, by scan id
type ScanSockets = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// Live TCP session to one shard server
pub struct RemoteShard {
    name: String,
    addr: SocketAddr,
    config: Config,

    session: Mutex<Session>,

    /// Handle on the session socket usable without taking the session lock
    control: TcpStream,

    closed: Arc<AtomicBool>,

    /// Set once a call failed mid-exchange; the session is never reused
    broken: AtomicBool,

    scans: ScanSockets,
    next_scan_id: AtomicU64,
}

impl RemoteShard {
    /// Connect to `shard` (a `host:port` address)
    pub fn connect(shard: &str, config: &Config) -> Result<Self> {
        let addr = shard
            .to_socket_addrs()
            .map_err(|e| ClusterError::Resolution(format!("cannot resolve {}: {}", shard, e)))?
            .next()
            .ok_or_else(|| ClusterError::Resolution(format!("no address for {}", shard)))?;

        let stream = open_stream(addr, config)?;
        let control = stream.try_clone()?;
        let read_stream = stream.try_clone()?;

        tracing::debug!(shard, %addr, "connected to shard");

        Ok(Self {
            name: shard.to_string(),
            addr,
            config: config.clone(),
            session: Mutex::new(Session {
                reader: BufReader::new(read_stream),
                writer: BufWriter::new(stream),
            }),
            control,
            closed: Arc::new(AtomicBool::new(false)),
            broken: AtomicBool::new(false),
            scans: Arc::new(Mutex::new(HashMap::new())),
            next_scan_id: AtomicU64::new(0),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send one command and read its single response
    fn call(&self, command: &Command) -> Result<Response> {
        if self.is_closed() {
            return Err(ClusterError::Closed);
        }

        let mut session = self.session.lock();
        if self.broken.load(Ordering::SeqCst) {
            return Err(ClusterError::Network(format!(
                "session to {} is unusable after an earlier failure",
                self.name
            )));
        }

        let Session { reader, writer } = &mut *session;
        let result = write_command(writer, command).and_then(|_| read_response(reader));

        result.map_err(|e| {
            if self.is_closed() {
                return ClusterError::Closed;
            }
            tracing::warn!(shard = %self.name, error = %e, "shard call failed, dropping session");
            self.poison();
            e
        })
    }

    /// Retire the session: a late reply must never be read as the answer
    /// to a later request
    fn poison(&self) {
        if !self.broken.swap(true, Ordering::SeqCst) {
            let _ = self.control.shutdown(Shutdown::Both);
        }
    }

    /// Map a single-frame response to its payload
    fn expect_ok(&self, response: Response) -> Result<Option<Vec<u8>>> {
        match response.status {
            Status::Ok => Ok(response.payload),
            Status::NotFound => Err(ClusterError::KeyNotFound),
            Status::Error => Err(ClusterError::Backend {
                shard: self.name.clone(),
                message: response.message(),
            }),
            Status::Entry => Err(ClusterError::Protocol(
                "unexpected ENTRY frame outside a scan".to_string(),
            )),
        }
    }
}

impl ShardBackend for RemoteShard {
    fn shard(&self) -> &str {
        &self.name
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let response = self.call(&Command::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })?;
        self.expect_ok(response).map(|_| ())
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let response = self.call(&Command::Get { key: key.to_vec() })?;
        // An empty value travels as an OK frame without payload
        Ok(self.expect_ok(response)?.unwrap_or_default())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let response = self.call(&Command::Delete { key: key.to_vec() })?;
        self.expect_ok(response).map(|_| ())
    }

    fn batch(&self, ops: Vec<ShardOp>) -> Result<()> {
        let response = self.call(&Command::Batch { ops })?;
        self.expect_ok(response).map(|_| ())
    }

    fn scan(&self, request: ScanRequest) -> Result<ShardScan> {
        if self.is_closed() {
            return Err(ClusterError::Closed);
        }

        let stream = open_stream(self.addr, &self.config)?;
        let mut writer = BufWriter::new(stream.try_clone()?);
        write_command(&mut writer, &Command::Scan { request })?;

        let id = self.next_scan_id.fetch_add(1, Ordering::SeqCst);
        self.scans.lock().insert(id, stream.try_clone()?);

        // close() may have run between the first check and registration
        if self.is_closed() {
            self.scans.lock().remove(&id);
            let _ = stream.shutdown(Shutdown::Both);
            return Err(ClusterError::Closed);
        }

        tracing::trace!(shard = %self.name, scan = id, "scan opened");

        Ok(Box::new(RemoteScan {
            shard: self.name.clone(),
            id,
            reader: BufReader::new(stream),
            closed: Arc::clone(&self.closed),
            scans: Arc::clone(&self.scans),
            finished: false,
        }))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for (_, stream) in self.scans.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        match self.control.shutdown(Shutdown::Both) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => {}
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(shard = %self.name, "shard connection closed");
        Ok(())
    }
}

/// Streaming reader for one scan socket
struct RemoteScan {
    shard: String,
    id: u64,
    reader: BufReader<TcpStream>,
    closed: Arc<AtomicBool>,
    scans: ScanSockets,
    finished: bool,
}

impl RemoteScan {
    fn fail(&mut self, error: ClusterError) -> Option<Result<ScanEntry>> {
        self.finished = true;
        Some(Err(error))
    }
}

impl Iterator for RemoteScan {
    type Item = Result<ScanEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let response = match read_response(&mut self.reader) {
            Ok(response) => response,
            Err(_) if self.closed.load(Ordering::SeqCst) => {
                let shard = self.shard.clone();
                return self.fail(ClusterError::Disconnected { shard });
            }
            Err(e) => return self.fail(e),
        };

        match response.status {
            Status::Entry => {
                let payload = response.payload.unwrap_or_default();
                match bincode::deserialize::<ScanEntry>(&payload) {
                    Ok(entry) => Some(Ok(entry)),
                    Err(e) => self.fail(e.into()),
                }
            }
            Status::Ok => {
                self.finished = true;
                None
            }
            Status::Error => {
                let error = ClusterError::Backend {
                    shard: self.shard.clone(),
                    message: response.message(),
                };
                self.fail(error)
            }
            Status::NotFound => self.fail(ClusterError::Protocol(
                "unexpected NOT_FOUND frame in scan".to_string(),
            )),
        }
    }
}

impl Drop for RemoteScan {
    fn drop(&mut self) {
        if let Some(stream) = self.scans.lock().remove(&self.id) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Open and configure a socket to a shard
fn open_stream(addr: SocketAddr, config: &Config) -> Result<TcpStream> {
    let stream = if config.connect_timeout_ms > 0 {
        TcpStream::connect_timeout(&addr, Duration::from_millis(config.connect_timeout_ms))
    } else {
        TcpStream::connect(addr)
    }
    .map_err(|e| ClusterError::Network(format!("connect to {} failed: {}", addr, e)))?;

    // Disable Nagle's algorithm for low latency
    stream.set_nodelay(true)?;

    if config.read_timeout_ms > 0 {
        stream.set_read_timeout(Some(Duration::from_millis(config.read_timeout_ms)))?;
    }
    if config.write_timeout_ms > 0 {
        stream.set_write_timeout(Some(Duration::from_millis(config.write_timeout_ms)))?;
    }

    Ok(stream)
}

/// Connector opening `RemoteShard`s with the router's network settings
pub struct TcpConnector {
    config: Config,
}

impl TcpConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, shard: &str) -> Result<Arc<dyn ShardBackend>> {
        Ok(Arc::new(RemoteShard::connect(shard, &self.config)?))
    }
}

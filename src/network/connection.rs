//! Connection Handler
//!
//! Serves one client socket of a shard server.

use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::ScanRequest;
use crate::error::{ClusterError, Result};
use crate::protocol::{encode_response, read_command, write_response, Command, Response};
use crate::store::{MemoryStore, StoreScan};

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    /// Store this shard serves
    store: Arc<MemoryStore>,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Create a new connection handler
    ///
    /// Sets up buffered I/O on cloned handles of the stream
    pub fn new(stream: TcpStream, store: Arc<MemoryStore>) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
            store,
            peer_addr,
        })
    }

    /// Configure connection timeouts (0 leaves a direction without one)
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        if read_ms > 0 {
            self.reader
                .get_ref()
                .set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            self.writer
                .get_ref()
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Reads commands in a loop and sends responses.
    /// Returns when the client disconnects or an error occurs.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);

        loop {
            let command = match read_command(&mut self.reader) {
                Ok(cmd) => cmd,
                Err(ClusterError::Io(ref e)) if is_hangup(e.kind()) => {
                    tracing::debug!("Client {} disconnected", self.peer_addr);
                    return Ok(());
                }
                Err(ClusterError::Io(ref e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    // Read timeout (Windows reports TimedOut instead of WouldBlock)
                    tracing::debug!("Read timeout for client {}", self.peer_addr);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    let _ = write_response(&mut self.writer, &Response::error(&e.to_string()));
                    return Err(e);
                }
            };

            tracing::trace!("Received command from {}: {:?}", self.peer_addr, command);

            let result = match command {
                Command::Scan { request } => self.stream_scan(request),
                other => {
                    let response = self.execute(other);
                    write_response(&mut self.writer, &response)
                }
            };

            if let Err(e) = result {
                // The client hung up before it read our reply; not a server error.
                if let ClusterError::Io(ref io_err) = e {
                    if is_hangup(io_err.kind()) || io_err.kind() == ErrorKind::BrokenPipe {
                        tracing::debug!(
                            "Client {} disconnected before response could be sent: {}",
                            self.peer_addr,
                            e
                        );
                        return Ok(());
                    }
                }
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                return Err(e);
            }
        }
    }

    /// Execute a single-response command
    fn execute(&self, command: Command) -> Response {
        match command {
            Command::Get { key } => match self.store.get(&key) {
                Some(value) => Response::ok(Some(value)),
                None => Response::not_found(),
            },
            Command::Put { key, value } => {
                self.store.put(key, value);
                Response::ok(None)
            }
            Command::Delete { key } => {
                self.store.delete(&key);
                Response::ok(None)
            }
            Command::Batch { ops } => {
                tracing::trace!("Applying batch of {} ops for {}", ops.len(), self.peer_addr);
                self.store.apply(ops);
                Response::ok(None)
            }
            Command::Ping => Response::ok(Some(b"PONG".to_vec())),
            Command::Scan { .. } => Response::error("SCAN must be streamed"),
        }
    }

    /// Stream every matching entry as an ENTRY frame, then a closing OK
    fn stream_scan(&mut self, request: ScanRequest) -> Result<()> {
        let mut sent = 0usize;

        for entry in StoreScan::new(Arc::clone(&self.store), request) {
            let payload = bincode::serialize(&entry)?;
            self.writer.write_all(&encode_response(&Response::entry(payload)))?;
            sent += 1;
        }

        tracing::trace!("Streamed {} entries to {}", sent, self.peer_addr);
        write_response(&mut self.writer, &Response::ok(None))
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

fn is_hangup(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    )
}

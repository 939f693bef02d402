//! Network Module
//!
//! TCP server side of a shard.
//!
//! ## Architecture
//! - Single acceptor loop
//! - One thread per client connection, capped by `max_connections`
//! - Commands executed against the shard's `MemoryStore`

mod server;
mod connection;

pub use server::Server;
pub use connection::Connection;

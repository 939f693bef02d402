//! Configuration for AtlasKV Cluster
//!
//! Centralized configuration with sensible defaults for both the routing
//! client (`Config`) and the shard server (`ServerConfig`).

use std::collections::HashSet;

use crate::error::{ClusterError, Result};

/// Configuration for a cluster router
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Topology Configuration
    // -------------------------------------------------------------------------
    /// Shard identifiers (usually `host:port`), in the order given.
    /// Fixed for the lifetime of the router.
    pub shards: Vec<String>,

    /// Ring positions per shard. More points give a more even spread.
    pub virtual_nodes: usize,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP connect timeout (milliseconds, 0 = OS default)
    pub connect_timeout_ms: u64,

    /// Read timeout on shard sockets (milliseconds, 0 = none)
    pub read_timeout_ms: u64,

    /// Write timeout on shard sockets (milliseconds, 0 = none)
    pub write_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shards: Vec::new(),
            virtual_nodes: 64,
            connect_timeout_ms: 2000,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the topology before a router is built on it
    pub fn validate(&self) -> Result<()> {
        if self.shards.is_empty() {
            return Err(ClusterError::Config(
                "at least one shard is required".to_string(),
            ));
        }
        if self.virtual_nodes == 0 {
            return Err(ClusterError::Config(
                "virtual_nodes must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.shards.len());
        for shard in &self.shards {
            if shard.is_empty() {
                return Err(ClusterError::Config("empty shard identifier".to_string()));
            }
            if !seen.insert(shard.as_str()) {
                return Err(ClusterError::Config(format!("duplicate shard: {}", shard)));
            }
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Add one shard to the topology
    pub fn shard(mut self, shard: impl Into<String>) -> Self {
        self.config.shards.push(shard.into());
        self
    }

    /// Replace the whole shard list
    pub fn shards<I, S>(mut self, shards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.shards = shards.into_iter().map(Into::into).collect();
        self
    }

    /// Set the number of ring positions per shard
    pub fn virtual_nodes(mut self, count: usize) -> Self {
        self.config.virtual_nodes = count;
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Configuration for a single shard server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds, 0 = none).
    /// Router sessions idle between requests, so this defaults to off.
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 = none).
    /// A scan stalls on write while its consumer is paused, so this also
    /// defaults to off.
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7001".to_string(),
            max_connections: 1024,
            read_timeout_ms: 0,
            write_timeout_ms: 0,
        }
    }
}

impl ServerConfig {
    /// Create a new server config builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for ServerConfig
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

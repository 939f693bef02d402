//! Error types for AtlasKV Cluster
//!
//! Provides a unified error type for routing, transport and scan operations.

use thiserror::Error;

/// Result type alias using ClusterError
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Unified error type for cluster operations
#[derive(Debug, Error)]
pub enum ClusterError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Key / Resolution Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    #[error("Key encoding error: {0}")]
    KeyEncoding(String),

    #[error("Shard resolution failed: {0}")]
    Resolution(String),

    // -------------------------------------------------------------------------
    // Backend Errors
    // -------------------------------------------------------------------------
    /// Error reported by the shard itself
    #[error("Shard {shard} failed: {message}")]
    Backend { shard: String, message: String },

    /// The shard connection was torn down by an explicit close.
    ///
    /// Only raised after `close()` was requested on the connection, so a scan
    /// that was still running can tell intentional teardown apart from a
    /// transport failure.
    #[error("Shard {shard} disconnected after close")]
    Disconnected { shard: String },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Cluster is closed")]
    Closed,
}

impl ClusterError {
    /// True for the normal "no such key" outcome of a get
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::KeyNotFound)
    }

    /// True for the disconnect raised by an intentional close
    pub fn is_benign_disconnect(&self) -> bool {
        matches!(self, ClusterError::Disconnected { .. })
    }
}

impl From<bincode::Error> for ClusterError {
    fn from(e: bincode::Error) -> Self {
        ClusterError::Serialization(e.to_string())
    }
}

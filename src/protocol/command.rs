//! Command definitions
//!
//! Requests sent from a router connection to a shard server.

use crate::backend::{ScanRequest, ShardOp};

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Get = 0x01,
    Put = 0x02,
    Delete = 0x03,
    Ping = 0x04,
    Batch = 0x05,
    Scan = 0x06,
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Get a value by key
    Get { key: Vec<u8> },

    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },

    /// Ping (health check)
    Ping,

    /// Apply writes in order, atomically
    Batch { ops: Vec<ShardOp> },

    /// Stream entries in key order
    Scan { request: ScanRequest },
}

impl Command {
    /// Get the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Get { .. } => CommandType::Get,
            Command::Put { .. } => CommandType::Put,
            Command::Delete { .. } => CommandType::Delete,
            Command::Ping => CommandType::Ping,
            Command::Batch { .. } => CommandType::Batch,
            Command::Scan { .. } => CommandType::Scan,
        }
    }
}

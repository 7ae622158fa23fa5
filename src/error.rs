use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect { addr: String, source: std::io::Error },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport is not connected")]
    Closed,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// A delta arrived before any full snapshot; it is dropped.
    #[error("delta seq {seq} received before any full snapshot")]
    StaleDelta { seq: u64 },

    #[error("malformed update: {0}")]
    Malformed(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("remote rejected command: {0}")]
    CommandRejected(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
}

#[derive(Debug, Error)]
pub enum GroupStoreError {
    #[error("group store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("group store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

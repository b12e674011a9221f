//! Error taxonomy for wlpeek
//!
//! Startup errors abort before the dispatch loop is entered. Buffer errors are
//! fatal only when they block the configure handshake. Transfer errors are
//! logged and the loop carries on.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::registry::KnownInterface;

/// Failures that stop the client before it reaches the dispatch loop.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to connect to Wayland display: {0}")]
    Connect(#[from] wayland_client::ConnectError),

    #[error("missing required globals: {}", format_missing(.0))]
    MissingGlobals(Vec<KnownInterface>),

    #[error("discovery roundtrip failed: {0}")]
    Roundtrip(#[from] wayland_client::DispatchError),

    #[error("failed to create {0}")]
    ObjectCreation(&'static str),
}

impl StartupError {
    /// Interfaces that were required but never announced, if that is the failure.
    pub fn missing(&self) -> &[KnownInterface] {
        match self {
            StartupError::MissingGlobals(missing) => missing,
            _ => &[],
        }
    }
}

fn format_missing(missing: &[KnownInterface]) -> String {
    missing
        .iter()
        .map(|iface| iface.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Shared-memory pixel buffer allocation failures.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("invalid buffer size {width}x{height}")]
    InvalidSize { width: i32, height: i32 },

    #[error("memfd_create failed: {0}")]
    Memfd(#[source] io::Error),

    #[error("ftruncate to {size} bytes failed: {source}")]
    Truncate {
        size: u64,
        #[source]
        source: io::Error,
    },

    #[error("mmap failed: {0}")]
    Map(#[source] io::Error),
}

/// A single clipboard transfer failed; the selection machine abandons it.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("pipe creation failed: {0}")]
    Pipe(#[source] io::Error),

    #[error("flushing receive request failed: {0}")]
    Flush(String),

    #[error("reading clipboard pipe failed: {0}")]
    Read(#[source] io::Error),

    #[error("writing clipboard payload failed: {0}")]
    Output(#[source] io::Error),
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

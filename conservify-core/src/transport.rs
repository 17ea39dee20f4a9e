//! Transport capability: the platform side that performs discovery, web
//! transfers and file access, reporting back through [`crate::EventSink`].
//!
//! Every primitive is fire-and-forget. The outcome arrives later as an
//! [`crate::Event`] carrying the token passed in. A primitive returns an
//! error only when it could not even be issued.

use std::path::{Path, PathBuf};

use crate::discovery::{DiscoveryOptions, StopOptions};
use crate::registry::Token;
use crate::transfer::Transfer;

/// Primitive could not be issued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// File opened through the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileHandle {
    id: u64,
    path: PathBuf,
}

impl FileHandle {
    pub fn new(id: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub trait Transport: Send + Sync {
    /// Emits `Started` or `DiscoveryFailed`, then found/lost/udp events.
    fn start_discovery(&self, options: &DiscoveryOptions) -> Result<(), TransportError>;

    /// Emits `Stopped`.
    fn stop_discovery(&self, options: &StopOptions) -> Result<(), TransportError>;

    /// Emits zero or more `TransferProgress`, then one `TransferComplete` or `TransferError`.
    fn dispatch_transfer(&self, token: Token, transfer: &Transfer) -> Result<(), TransportError>;

    /// Binds a handle to `path`. No I/O.
    fn open_file(&self, path: &Path) -> Result<FileHandle, TransportError>;

    /// Emits `FileInfo` or `FileError`.
    fn read_info(&self, token: Token, file: &FileHandle) -> Result<(), TransportError>;

    /// Emits `FileRecords` batches of up to `batch_size` length-delimited
    /// records, then a batch with no records; or `FileError`.
    fn read_delimited(&self, token: Token, file: &FileHandle, batch_size: usize) -> Result<(), TransportError>;

    /// Like [`Transport::read_delimited`] with raw `block_size` blocks as records.
    fn read_blocks(
        &self,
        token: Token,
        file: &FileHandle,
        block_size: usize,
        batch_size: usize,
    ) -> Result<(), TransportError>;

    /// Emits one `NetworkStatus` with the visible networks.
    fn scan_wifi(&self) -> Result<(), TransportError>;

    /// Emits one `NetworkStatus` with the connected network.
    fn find_connected_network(&self) -> Result<(), TransportError>;
}

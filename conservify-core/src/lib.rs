//! Promise-style networking, discovery and file access over a callback-driven transport.
//! Transport-driven: the core does no I/O; the transport reports events, the core
//! correlates them with pending operations by token.

pub mod body;
pub mod client;
pub mod discovery;
pub mod error;
pub mod event;
pub mod file;
pub mod pending;
pub mod registry;
pub mod transfer;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use body::{decode, Body, DecodeError};
pub use client::{Client, ClientConfig, EventSink};
pub use discovery::{
    DiscoveryEvents, DiscoveryOptions, DiscoveryState, NetworkStatus, ServiceAnnouncement, StopOptions,
    UdpMessage, WifiNetwork,
};
pub use error::{map_error, ConnectionError, Error, ErrorContext, FileSystemError};
pub use event::Event;
pub use file::{FileInfo, FileRecordBatch, RemoteFile};
pub use pending::Pending;
pub use registry::{TaskKind, Token};
pub use transfer::{ProgressFn, RequestBody, Transfer, TransferKind, TransferRequest, TransferResult};
pub use transport::{FileHandle, Transport, TransportError};

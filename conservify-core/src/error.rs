//! Typed failures and the mapping from transport failure signals to them.

use std::path::PathBuf;

use crate::body::DecodeError;
use crate::transfer::TransferRequest;

/// Transfer-layer failure, paired with the request that failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} ({} {})", .request.method_or_default(), .request.url)]
pub struct ConnectionError {
    pub message: String,
    pub request: TransferRequest,
}

/// File-layer failure, paired with the path that failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} ({})", .path.display())]
pub struct FileSystemError {
    pub message: String,
    pub path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("file system error: {0}")]
    FileSystem(#[from] FileSystemError),
    #[error("failed to decode response from {}: {source}", .request.url)]
    Decode {
        #[source]
        source: DecodeError,
        request: Box<TransferRequest>,
    },
    #[error("discovery failed: {message}")]
    Discovery { message: String },
    #[error("network query failed: {message}")]
    NetworkQuery { message: String },
    #[error("{0} already in progress")]
    Busy(&'static str),
    #[error("transport not initialized")]
    NotInitialized,
    #[error("client disposed before the operation completed")]
    Disposed,
}

impl Error {
    /// The request this failure belongs to, for transfer failures.
    pub fn request(&self) -> Option<&TransferRequest> {
        match self {
            Error::Connection(e) => Some(&e.request),
            Error::Decode { request, .. } => Some(request.as_ref()),
            _ => None,
        }
    }
}

/// Which subsystem raised a failure, with the context the error must carry.
#[derive(Debug, Clone)]
pub enum ErrorContext {
    Transfer(TransferRequest),
    File(PathBuf),
}

/// Map a transport failure message into the typed error for its subsystem.
pub fn map_error(message: impl Into<String>, context: ErrorContext) -> Error {
    let message = message.into();
    match context {
        ErrorContext::Transfer(request) => Error::Connection(ConnectionError { message, request }),
        ErrorContext::File(path) => Error::FileSystem(FileSystemError { message, path }),
    }
}

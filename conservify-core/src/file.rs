//! File stream reader: token-keyed info and batched record reads.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::client::{Client, Inner};
use crate::error::{map_error, Error, ErrorContext};
use crate::pending::{self, Completer, Pending};
use crate::registry::{self, Task, Taken, Token};
use crate::transport::FileHandle;

/// Result of [`RemoteFile::info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub path: PathBuf,
    pub size: u64,
}

/// One batch of records from a streaming read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecordBatch {
    /// Bytes consumed from the file after this batch.
    pub position: u64,
    /// Total file size.
    pub size: u64,
    pub records: Vec<Vec<u8>>,
}

type Listener = Box<dyn FnMut(FileRecordBatch) + Send>;

/// Listener guarded per task so it never runs under the registry lock and
/// never runs after its stream has terminated.
struct StreamListener {
    callback: Listener,
    closed: bool,
}

pub(crate) struct FileInfoTask {
    path: PathBuf,
    completer: Completer<FileInfo>,
}

impl FileInfoTask {
    pub(crate) fn new(path: PathBuf, completer: Completer<FileInfo>) -> Self {
        Self { path, completer }
    }
}

pub(crate) struct FileStreamTask {
    path: PathBuf,
    listener: Arc<Mutex<StreamListener>>,
    completer: Completer<()>,
}

impl FileStreamTask {
    /// Close the listener, then settle. Waits for an in-flight batch to finish.
    fn finish(self, result: Result<(), Error>) {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
        match result {
            Ok(()) => self.completer.resolve(()),
            Err(e) => self.completer.reject(e),
        }
    }
}

pub(crate) enum FileTask {
    Info(FileInfoTask),
    Stream(FileStreamTask),
}

/// Handle to a file behind the transport. Opening performs no I/O.
pub struct RemoteFile {
    inner: Arc<Inner>,
    handle: FileHandle,
}

impl Client {
    pub fn open(&self, path: impl AsRef<Path>) -> Result<RemoteFile, Error> {
        let path = path.as_ref();
        let transport = self.inner.transport()?;
        let handle = transport
            .open_file(path)
            .map_err(|e| map_error(e.message, ErrorContext::File(path.to_path_buf())))?;
        Ok(RemoteFile {
            inner: self.inner.clone(),
            handle,
        })
    }
}

impl RemoteFile {
    pub fn path(&self) -> &Path {
        self.handle.path()
    }

    pub fn handle(&self) -> &FileHandle {
        &self.handle
    }

    /// Size of the file.
    pub fn info(&self) -> Result<Pending<FileInfo>, Error> {
        let transport = self.inner.transport()?;
        let token = Token::new();
        let (completer, pending) = pending::pending();
        tracing::debug!(%token, path = %self.path().display(), "reading file info");
        let registered = self.inner.register_task(
            token,
            Task::FileInfo(FileInfoTask::new(self.path().to_path_buf(), completer)),
        );
        if !registered {
            return Ok(pending);
        }
        if let Err(e) = transport.read_info(token, &self.handle) {
            fail_file_task(&self.inner, token, e.message);
        }
        Ok(pending)
    }

    /// Stream length-delimited records in batches to `listener`. Resolves
    /// after the final empty batch; the listener is not called after that.
    pub fn delimited<F>(&self, listener: F) -> Result<Pending<()>, Error>
    where
        F: FnMut(FileRecordBatch) + Send + 'static,
    {
        let batch_size = self.inner.config.delimited_batch_size;
        self.stream(Box::new(listener), |transport, token, handle| {
            transport.read_delimited(token, handle, batch_size)
        })
    }

    /// Stream the file as raw fixed-size blocks, batched like [`Self::delimited`].
    pub fn records<F>(&self, listener: F) -> Result<Pending<()>, Error>
    where
        F: FnMut(FileRecordBatch) + Send + 'static,
    {
        let block_size = self.inner.config.raw_block_size;
        let batch_size = self.inner.config.raw_batch_size;
        self.stream(Box::new(listener), |transport, token, handle| {
            transport.read_blocks(token, handle, block_size, batch_size)
        })
    }

    fn stream(
        &self,
        listener: Listener,
        issue: impl FnOnce(&dyn crate::Transport, Token, &FileHandle) -> Result<(), crate::TransportError>,
    ) -> Result<Pending<()>, Error> {
        let transport = self.inner.transport()?;
        let token = Token::new();
        let (completer, pending) = pending::pending();
        tracing::debug!(%token, path = %self.path().display(), "streaming file records");
        let registered = self.inner.register_task(
            token,
            Task::FileStream(FileStreamTask {
                path: self.path().to_path_buf(),
                listener: Arc::new(Mutex::new(StreamListener {
                    callback: listener,
                    closed: false,
                })),
                completer,
            }),
        );
        if !registered {
            return Ok(pending);
        }
        if let Err(e) = issue(transport.as_ref(), token, &self.handle) {
            fail_file_task(&self.inner, token, e.message);
        }
        Ok(pending)
    }
}

fn fail_file_task(inner: &Inner, token: Token, message: String) {
    tracing::warn!(%token, %message, "transport rejected file read");
    on_file_error(inner, token, message);
}

pub(crate) fn on_file_info(inner: &Inner, token: Token, size: u64) {
    match inner.registry.take(&token, Task::into_file_info) {
        Taken::Found(task) => {
            tracing::debug!(%token, size, "file info");
            task.completer.resolve(FileInfo {
                path: task.path,
                size,
            });
        }
        Taken::Missing => registry::orphaned("file info", &token),
        Taken::Mismatched(kind) => registry::mismatched("file info", &token, kind),
    }
}

pub(crate) fn on_file_records(
    inner: &Inner,
    token: Token,
    position: u64,
    size: u64,
    records: Option<Vec<Vec<u8>>>,
) {
    let records = records.unwrap_or_default();
    if records.is_empty() {
        match inner.registry.take(&token, Task::into_file_stream) {
            Taken::Found(task) => {
                tracing::debug!(%token, position, size, "file stream done");
                task.finish(Ok(()));
            }
            Taken::Missing => registry::orphaned("file records (final)", &token),
            Taken::Mismatched(kind) => registry::mismatched("file records (final)", &token, kind),
        }
        return;
    }

    let listener = inner.registry.lookup(&token, |task| match task {
        Task::FileStream(t) => Ok(t.listener.clone()),
        other => Err(other.kind()),
    });
    let listener = match listener {
        Some(Ok(l)) => l,
        None => return registry::orphaned("file records", &token),
        Some(Err(kind)) => return registry::mismatched("file records", &token, kind),
    };
    let mut listener = listener.lock().unwrap_or_else(PoisonError::into_inner);
    if listener.closed {
        tracing::warn!(%token, "file records after stream closed; ignored");
        return;
    }
    tracing::trace!(%token, position, size, count = records.len(), "file records");
    (listener.callback)(FileRecordBatch {
        position,
        size,
        records,
    });
}

pub(crate) fn on_file_error(inner: &Inner, token: Token, message: String) {
    match inner.registry.take(&token, Task::into_file_task) {
        Taken::Found(FileTask::Info(task)) => {
            tracing::debug!(%token, %message, "file info failed");
            task.completer
                .reject(map_error(message, ErrorContext::File(task.path)));
        }
        Taken::Found(FileTask::Stream(task)) => {
            tracing::debug!(%token, %message, "file stream failed");
            let error = map_error(message, ErrorContext::File(task.path.clone()));
            task.finish(Err(error));
        }
        Taken::Missing => registry::orphaned("file error", &token),
        Taken::Mismatched(kind) => registry::mismatched("file error", &token, kind),
    }
}

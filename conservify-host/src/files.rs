//! File primitives: size lookup and batched record streaming off the local disk.

use std::path::Path;

use conservify_core::{Event, Token};
use tokio::io::AsyncReadExt;

use crate::transport::Emitter;
use crate::wire::{decode_record, RecordDecodeError};

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("bad record at offset {offset}: {source}")]
    Record {
        offset: u64,
        source: RecordDecodeError,
    },
    #[error("file ends inside a record at offset {0}")]
    Truncated(u64),
}

pub async fn read_info(emit: Emitter, token: Token, path: &Path) {
    match tokio::fs::metadata(path).await {
        Ok(meta) => emit(Event::FileInfo {
            token,
            size: meta.len(),
        }),
        Err(e) => fail(&emit, token, path, FileError::Io(e)),
    }
}

/// Stream length-delimited records in batches of up to `batch_size`.
pub async fn read_delimited(emit: Emitter, token: Token, path: &Path, batch_size: usize) {
    if let Err(e) = delimited(&emit, token, path, batch_size).await {
        fail(&emit, token, path, e);
    }
}

/// Stream fixed `block_size` blocks (the last may be short) in batches of up to `batch_size`.
pub async fn read_blocks(emit: Emitter, token: Token, path: &Path, block_size: usize, batch_size: usize) {
    if let Err(e) = blocks(&emit, token, path, block_size, batch_size).await {
        fail(&emit, token, path, e);
    }
}

fn fail(emit: &Emitter, token: Token, path: &Path, error: FileError) {
    tracing::debug!(%token, path = %path.display(), %error, "file read failed");
    emit(Event::FileError {
        token,
        message: error.to_string(),
    });
}

/// Accumulates records and emits a batch whenever it fills.
struct Batcher<'a> {
    emit: &'a Emitter,
    token: Token,
    size: u64,
    batch_size: usize,
    records: Vec<Vec<u8>>,
}

impl<'a> Batcher<'a> {
    fn new(emit: &'a Emitter, token: Token, size: u64, batch_size: usize) -> Self {
        Self {
            emit,
            token,
            size,
            batch_size: batch_size.max(1),
            records: Vec::new(),
        }
    }

    fn push(&mut self, record: Vec<u8>, position: u64) {
        self.records.push(record);
        if self.records.len() >= self.batch_size {
            self.flush(position);
        }
    }

    fn flush(&mut self, position: u64) {
        if self.records.is_empty() {
            return;
        }
        (self.emit)(Event::FileRecords {
            token: self.token,
            position,
            size: self.size,
            records: Some(std::mem::take(&mut self.records)),
        });
    }

    /// Flush what is left, then the terminating empty batch.
    fn finish(mut self, position: u64) {
        self.flush(position);
        (self.emit)(Event::FileRecords {
            token: self.token,
            position,
            size: self.size,
            records: Some(Vec::new()),
        });
    }
}

async fn delimited(emit: &Emitter, token: Token, path: &Path, batch_size: usize) -> Result<(), FileError> {
    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let mut batcher = Batcher::new(emit, token, size, batch_size);
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];
    // Bytes consumed by complete records so far.
    let mut position: u64 = 0;
    loop {
        let n = file.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let mut start = 0;
        loop {
            match decode_record(&buf[start..]) {
                Ok((payload, used)) => {
                    let record = payload.to_vec();
                    start += used;
                    position += used as u64;
                    batcher.push(record, position);
                }
                Err(RecordDecodeError::NeedMore) => break,
                Err(source) => return Err(FileError::Record { offset: position, source }),
            }
        }
        buf.drain(..start);
    }
    if !buf.is_empty() {
        return Err(FileError::Truncated(position));
    }
    batcher.finish(position);
    Ok(())
}

async fn blocks(
    emit: &Emitter,
    token: Token,
    path: &Path,
    block_size: usize,
    batch_size: usize,
) -> Result<(), FileError> {
    let mut file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let mut batcher = Batcher::new(emit, token, size, batch_size);
    let block_size = block_size.max(1);
    let mut position: u64 = 0;
    loop {
        let mut block = Vec::with_capacity(block_size);
        let n = (&mut file).take(block_size as u64).read_to_end(&mut block).await?;
        if n == 0 {
            break;
        }
        position += n as u64;
        batcher.push(block, position);
    }
    batcher.finish(position);
    Ok(())
}

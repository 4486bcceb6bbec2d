use std::path::Path;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::codec::binary_encoder::BinaryEncoder;
use crate::codec::error::CodecError;
use crate::domain::TapEvent;

const READ_CHUNK: usize = 32 * 1024;

#[derive(Error, Debug)]
pub enum ArchiveReadError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record at offset {offset}: {source}")]
    Corrupt {
        offset: u64,
        #[source]
        source: CodecError,
    },

    #[error("archive ends with a partial record of {len} bytes at offset {offset}")]
    TruncatedTail { offset: u64, len: usize },
}

/// Sequential reader for archive files written by `ArchiveWriter`
pub struct ArchiveReader {
    file: File,
    buffer: BytesMut,
    offset: u64,
    eof: bool,
}

impl ArchiveReader {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveReadError> {
        let file = File::open(path.as_ref()).await?;
        Ok(Self {
            file,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            offset: 0,
            eof: false,
        })
    }

    /// Read the next record, or `None` once the file is exhausted
    pub async fn next_event(&mut self) -> Result<Option<TapEvent>, ArchiveReadError> {
        loop {
            if !self.buffer.is_empty() {
                match BinaryEncoder::decode(&self.buffer) {
                    Ok((event, consumed)) => {
                        self.buffer.advance(consumed);
                        self.offset += consumed as u64;
                        return Ok(Some(event));
                    }
                    Err(CodecError::Truncated { .. }) if !self.eof => {}
                    Err(CodecError::Truncated { .. }) => {
                        return Err(ArchiveReadError::TruncatedTail {
                            offset: self.offset,
                            len: self.buffer.len(),
                        });
                    }
                    Err(source) => {
                        return Err(ArchiveReadError::Corrupt {
                            offset: self.offset,
                            source,
                        });
                    }
                }
            } else if self.eof {
                return Ok(None);
            }

            self.buffer.reserve(READ_CHUNK);
            if self.file.read_buf(&mut self.buffer).await? == 0 {
                self.eof = true;
            }
        }
    }

    /// Read every remaining record
    pub async fn read_all(&mut self) -> Result<Vec<TapEvent>, ArchiveReadError> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await? {
            events.push(event);
        }
        Ok(events)
    }

    /// Bytes of complete records returned so far
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

use std::path::PathBuf;

use bytes::BytesMut;
use common::{BinaryEncoder, DomainError, DomainResult, TapEvent};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Encoded bytes buffered before each write to the file
pub const DEFAULT_FLUSH_THRESHOLD: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ArchiveWriterConfig {
    pub output_path: PathBuf,
    /// Advisory only: crossing it logs a warning, nothing rotates
    pub max_file_size: u64,
    /// Accepted for configuration compatibility; records are always written uncompressed
    pub compression: bool,
    pub flush_threshold: usize,
}

impl Default for ArchiveWriterConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("output/taps.dat"),
            max_file_size: 100 * 1024 * 1024,
            compression: false,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

struct WriterState {
    file: Option<File>,
    buffer: BytesMut,
    file_size: u64,
    size_warning_emitted: bool,
}

/// Appends encoded batches to one archive file, one caller at a time
///
/// After an I/O error the handle is dropped and the next batch reopens the file. A
/// failed batch may leave a partial record at the end of the file.
pub struct ArchiveWriter {
    config: ArchiveWriterConfig,
    state: Mutex<WriterState>,
}

impl ArchiveWriter {
    /// Create missing parent directories and open the file for appending
    pub async fn open(config: ArchiveWriterConfig) -> DomainResult<Self> {
        if config.compression {
            warn!("archive compression is not supported; writing uncompressed records");
        }
        if let Some(parent) = config.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(DomainError::ArchiveWriteFailed)?;
            }
        }

        let file = open_append(&config).await?;
        let file_size = file
            .metadata()
            .await
            .map_err(DomainError::ArchiveWriteFailed)?
            .len();
        info!(path = %config.output_path.display(), file_size, "archive opened");

        let buffer = BytesMut::with_capacity(config.flush_threshold);
        Ok(Self {
            config,
            state: Mutex::new(WriterState {
                file: Some(file),
                buffer,
                file_size,
                size_warning_emitted: false,
            }),
        })
    }

    /// Append `batch` and return how many of its events were written
    ///
    /// Events the codec rejects are skipped and left out of the count.
    pub async fn write_batch(&self, batch: &[TapEvent]) -> DomainResult<usize> {
        let mut state = self.state.lock().await;
        let result = self.append(&mut state, batch).await;
        if result.is_err() {
            state.file = None;
            state.buffer.clear();
        }
        result
    }

    /// Bytes in the archive, including data appended by earlier runs
    pub async fn file_size(&self) -> u64 {
        self.state.lock().await.file_size
    }

    async fn append(&self, state: &mut WriterState, batch: &[TapEvent]) -> DomainResult<usize> {
        let mut file = match state.file.take() {
            Some(file) => file,
            None => {
                debug!("reopening archive after earlier failure");
                open_append(&self.config).await?
            }
        };

        let mut encoded = 0usize;
        for event in batch {
            if let Err(e) = BinaryEncoder::encode(event, &mut state.buffer) {
                error!(message_id = %event.message_id(), error = %e, "skipping unencodable event");
                continue;
            }
            encoded += 1;
            if state.buffer.len() >= self.config.flush_threshold {
                write_buffer(&mut file, state).await?;
            }
        }
        if !state.buffer.is_empty() {
            write_buffer(&mut file, state).await?;
        }

        state.file = Some(file);
        debug!(count = encoded, file_size = state.file_size, "archived batch");

        if state.file_size > self.config.max_file_size && !state.size_warning_emitted {
            warn!(
                file_size = state.file_size,
                max_file_size = self.config.max_file_size,
                "archive exceeds its configured maximum size"
            );
            state.size_warning_emitted = true;
        }
        Ok(encoded)
    }
}

/// Write out the buffered records; `file_size` counts them once the flush succeeds
async fn write_buffer(file: &mut File, state: &mut WriterState) -> DomainResult<()> {
    file.write_all(&state.buffer)
        .await
        .map_err(DomainError::ArchiveWriteFailed)?;
    file.flush().await.map_err(DomainError::ArchiveWriteFailed)?;
    state.file_size += state.buffer.len() as u64;
    state.buffer.clear();
    Ok(())
}

async fn open_append(config: &ArchiveWriterConfig) -> DomainResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.output_path)
        .await
        .map_err(DomainError::ArchiveWriteFailed)
}

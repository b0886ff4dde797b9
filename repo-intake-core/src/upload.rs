//! Streaming ingestion of uploaded repositories.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::{self, ArchiveError, Extraction};
use crate::config::UploadConfig;
use crate::error::{FailureCause, IngestError};
use crate::name::ArtifactName;
use crate::staging::StagingDirectory;

const FALLBACK_FILE_NAME: &str = "upload.bin";

/// Copies an inbound byte stream into the staging directory in fixed-size
/// chunks and unpacks it when it is an archive.
#[derive(Debug, Clone)]
pub struct UploadIngestor {
    staging: StagingDirectory,
    chunk_size: usize,
    max_bytes: u64,
    read_timeout: Duration,
}

impl UploadIngestor {
    pub fn new(staging: StagingDirectory, config: &UploadConfig) -> Self {
        Self {
            staging,
            chunk_size: config.chunk_size.max(1),
            max_bytes: config.max_bytes,
            read_timeout: config.read_timeout(),
        }
    }

    /// Stage `stream` under `name`. The stream is consumed either way and
    /// must not be reused. On any failure the staging directory is removed.
    pub async fn ingest<R>(
        &self,
        name: &ArtifactName,
        stream: R,
        declared_filename: &str,
    ) -> Result<PathBuf, IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.ingest_until(name, stream, declared_filename, &CancellationToken::new())
            .await
    }

    /// [`UploadIngestor::ingest`] that gives up once `cancel` fires.
    ///
    /// Cancellation is observed between chunks and between archive entries.
    /// Extraction on the blocking pool is always awaited, so by the time
    /// this returns nothing is left writing into the directory it removed.
    pub async fn ingest_until<R>(
        &self,
        name: &ArtifactName,
        mut stream: R,
        declared_filename: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let file_name = sanitize_file_name(declared_filename);
        let guard = self
            .staging
            .prepare(name)
            .await
            .map_err(|e| IngestError::failed(name.as_str(), e))?;

        match self
            .write_and_extract(name, guard.path(), &mut stream, &file_name, cancel)
            .await
        {
            Ok(()) => Ok(guard.commit()),
            Err(e) => {
                error!(repo_name = %name, error = %e, "Upload ingestion failed");
                guard.discard().await;
                Err(e)
            }
        }
    }

    async fn write_and_extract<R>(
        &self,
        name: &ArtifactName,
        dir: &Path,
        stream: &mut R,
        file_name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let dest = dir.join(file_name);
        let written = self.copy_stream(name, stream, &dest, cancel).await?;
        info!(repo_name = %name, bytes = written, file = %dest.display(), "Upload written to staging");

        let target = dir.to_path_buf();
        let stop = cancel.clone();
        let extraction = tokio::task::spawn_blocking(move || archive::maybe_extract_until(&dest, &target, &stop))
            .await
            .map_err(|e| IngestError::failed(name.as_str(), FailureCause::Task(e.to_string())))?
            .map_err(|e| match e {
                ArchiveError::Cancelled => IngestError::failed(name.as_str(), FailureCause::Cancelled),
                e => IngestError::failed(name.as_str(), e),
            })?;
        if let Extraction::Extracted { format, entries } = extraction {
            info!(repo_name = %name, ?format, entries, "Upload unpacked");
        }
        Ok(())
    }

    async fn copy_stream<R>(
        &self,
        name: &ArtifactName,
        stream: &mut R,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, IngestError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let io_failed = |e: std::io::Error| IngestError::failed(name.as_str(), e);
        let mut file = File::create(dest).await.map_err(io_failed)?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut total: u64 = 0;

        loop {
            let read = tokio::select! {
                read = tokio::time::timeout(self.read_timeout, stream.read(&mut buf)) => read,
                _ = cancel.cancelled() => {
                    warn!(repo_name = %name, total, "Upload cancelled mid-stream");
                    return Err(IngestError::failed(name.as_str(), FailureCause::Cancelled));
                }
            };
            let n = read
                .map_err(|_| IngestError::Timeout {
                    operation: "upload stream read",
                    after: self.read_timeout,
                })?
                .map_err(io_failed)?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if total > self.max_bytes {
                return Err(IngestError::InvalidRequest(format!(
                    "file too large: exceeds {} bytes",
                    self.max_bytes
                )));
            }
            file.write_all(&buf[..n]).await.map_err(io_failed)?;
            debug!(repo_name = %name, total, "Copied upload chunk");
        }

        file.flush().await.map_err(io_failed)?;
        file.sync_all().await.map_err(io_failed)?;
        Ok(total)
    }
}

/// Reduce a client-supplied file name to its last path component.
fn sanitize_file_name(declared: &str) -> String {
    Path::new(declared)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or(FALLBACK_FILE_NAME)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("dir/payload.zip"), "payload.zip");
        assert_eq!(sanitize_file_name("payload.tar.gz"), "payload.tar.gz");
    }

    #[test]
    fn sanitize_falls_back_for_empty_names() {
        assert_eq!(sanitize_file_name(""), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name(".."), FALLBACK_FILE_NAME);
        assert_eq!(sanitize_file_name("/"), FALLBACK_FILE_NAME);
    }
}

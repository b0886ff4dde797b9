use std::fs::{self, File};
use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use repo_intake_core::config::UploadConfig;
use repo_intake_core::error::ErrorKind;
use repo_intake_core::name::ArtifactName;
use repo_intake_core::staging::StagingDirectory;
use repo_intake_core::upload::UploadIngestor;
use tempfile::tempdir;
use tokio::io::{AsyncRead, ReadBuf};

fn ingestor(root: &std::path::Path, config: UploadConfig) -> UploadIngestor {
    UploadIngestor::new(StagingDirectory::new(root), &config)
}

fn small_chunks() -> UploadConfig {
    UploadConfig {
        chunk_size: 7,
        ..UploadConfig::default()
    }
}

/// Yields `good` bytes, then fails.
struct FailingReader {
    good: Vec<u8>,
}

impl AsyncRead for FailingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.good.is_empty() {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")));
        }
        let n = self.good.len().min(buf.remaining());
        let chunk: Vec<u8> = self.good.drain(..n).collect();
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

/// Never yields a byte.
struct StalledReader;

impl AsyncRead for StalledReader {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

#[tokio::test]
async fn plain_file_is_stored_byte_for_byte() {
    let root = tempdir().unwrap();
    let payload: Vec<u8> = (0..=255u8).cycle().take(4096 + 3).collect();
    let name = ArtifactName::parse("demo").unwrap();

    let path = ingestor(root.path(), small_chunks())
        .ingest(&name, &payload[..], "dump.bin")
        .await
        .unwrap();

    assert_eq!(path, root.path().join("demo"));
    assert_eq!(fs::read(path.join("dump.bin")).unwrap(), payload);
}

#[tokio::test]
async fn declared_directories_are_stripped() {
    let root = tempdir().unwrap();
    let name = ArtifactName::parse("demo").unwrap();

    let path = ingestor(root.path(), UploadConfig::default())
        .ingest(&name, &b"hello"[..], "../../outside.txt")
        .await
        .unwrap();

    assert!(path.join("outside.txt").is_file());
}

#[tokio::test]
async fn zip_upload_leaves_only_extracted_contents() {
    let root = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let archive = scratch.path().join("payload.zip");
    {
        let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
        zip.start_file("src/lib.rs", zip::write::FileOptions::default()).unwrap();
        zip.write_all(b"pub fn demo() {}").unwrap();
        zip.finish().unwrap();
    }
    let bytes = fs::read(&archive).unwrap();
    let name = ArtifactName::parse("demoRepo2").unwrap();

    let path = ingestor(root.path(), UploadConfig::default())
        .ingest(&name, &bytes[..], "payload.zip")
        .await
        .unwrap();

    assert!(!path.join("payload.zip").exists());
    assert_eq!(fs::read_to_string(path.join("src/lib.rs")).unwrap(), "pub fn demo() {}");
}

#[tokio::test]
async fn reingesting_replaces_previous_artifact() {
    let root = tempdir().unwrap();
    let name = ArtifactName::parse("demo").unwrap();
    let uploads = ingestor(root.path(), UploadConfig::default());

    uploads.ingest(&name, &b"first"[..], "one.txt").await.unwrap();
    let path = uploads.ingest(&name, &b"second"[..], "two.txt").await.unwrap();

    assert!(!path.join("one.txt").exists());
    assert_eq!(fs::read_to_string(path.join("two.txt")).unwrap(), "second");
}

#[tokio::test]
async fn failing_stream_rolls_back() {
    let root = tempdir().unwrap();
    let name = ArtifactName::parse("demo").unwrap();
    let reader = FailingReader {
        good: b"partial content".to_vec(),
    };

    let err = ingestor(root.path(), small_chunks())
        .ingest(&name, reader, "dump.bin")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::IngestFailed);
    assert!(!root.path().join("demo").exists());
}

#[tokio::test]
async fn oversized_upload_is_rejected_and_rolled_back() {
    let root = tempdir().unwrap();
    let name = ArtifactName::parse("demo").unwrap();
    let config = UploadConfig {
        chunk_size: 4,
        max_bytes: 10,
        ..UploadConfig::default()
    };

    let err = ingestor(root.path(), config)
        .ingest(&name, &[7u8; 32][..], "big.bin")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert!(err.to_string().contains("too large"), "{err}");
    assert!(!root.path().join("demo").exists());
}

#[tokio::test]
async fn stalled_stream_times_out_and_rolls_back() {
    let root = tempdir().unwrap();
    let name = ArtifactName::parse("demo").unwrap();
    let config = UploadConfig {
        read_timeout_secs: 1,
        ..UploadConfig::default()
    };

    let started = std::time::Instant::now();
    let err = ingestor(root.path(), config)
        .ingest(&name, StalledReader, "dump.bin")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!root.path().join("demo").exists());
}

#[tokio::test]
async fn broken_archive_rolls_back() {
    let root = tempdir().unwrap();
    let name = ArtifactName::parse("demo").unwrap();

    let err = ingestor(root.path(), UploadConfig::default())
        .ingest(&name, &b"definitely not a zip"[..], "payload.zip")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::IngestFailed);
    assert!(!root.path().join("demo").exists());
}

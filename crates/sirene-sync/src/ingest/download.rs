//! Archive download over HTTP
//!
//! The body is streamed straight to the archive's local path. Percentage
//! samples are emitted as chunks arrive when the server announces a content
//! length, and a final 100 sample is always sent on success.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::models::RemoteArchive;
use super::progress::ProgressChannels;

/// Errors raised while downloading one archive
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download timed out after {0:?}")]
    Timeout(Duration),
}

/// Fetches one archive to its local path
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    /// Download `archive` to `archive.path`, returning the number of bytes written
    async fn fetch(&self, archive: &RemoteArchive, progress: &ProgressChannels) -> Result<u64, DownloadError>;
}

/// [`ArchiveFetcher`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn stream_to_disk(
        &self,
        archive: &RemoteArchive,
        progress: &ProgressChannels,
    ) -> Result<u64, DownloadError> {
        let response = self.client.get(&archive.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: archive.url.clone(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length().filter(|len| *len > 0);
        let mut file = File::create(&archive.path).await?;
        let mut downloaded = 0u64;
        let mut last_reported = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if let Some(total) = total {
                let percent = downloaded.saturating_mul(100) / total;
                if percent > last_reported {
                    last_reported = percent;
                    progress.download(&archive.file_name, percent as f64);
                }
            }
        }

        file.flush().await?;
        progress.download(&archive.file_name, 100.0);

        Ok(downloaded)
    }
}

#[async_trait]
impl ArchiveFetcher for HttpFetcher {
    async fn fetch(&self, archive: &RemoteArchive, progress: &ProgressChannels) -> Result<u64, DownloadError> {
        info!(file = %archive.file_name, url = %archive.url, "Downloading archive");

        let result = match tokio::time::timeout(self.timeout, self.stream_to_disk(archive, progress)).await {
            Ok(result) => result,
            Err(_) => Err(DownloadError::Timeout(self.timeout)),
        };

        match result {
            Ok(bytes) => {
                debug!(file = %archive.file_name, bytes, "Archive downloaded");
                Ok(bytes)
            },
            Err(err) => {
                remove_partial(&archive.path).await;
                Err(err)
            },
        }
    }
}

/// Remove a partially written archive, if any
pub async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial download"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
        Err(err) => warn!(path = %path.display(), error = %err, "Failed to remove partial download"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::progress::ProgressReporter;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(reqwest::Client::new(), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_fetch_writes_body_and_reports_completion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/A.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let archive = RemoteArchive::new("A.zip", format!("{}/A.zip", server.uri()), dir.path());
        let (channels, reporter) = ProgressReporter::spawn(1, false);

        let bytes = fetcher().fetch(&archive, &channels).await.unwrap();
        drop(channels);

        assert_eq!(bytes, 4096);
        assert_eq!(std::fs::read(&archive.path).unwrap().len(), 4096);
        let summary = reporter.finish().await;
        assert_eq!(summary.download.get("A.zip"), Some(&100.0));
    }

    #[tokio::test]
    async fn test_fetch_rejects_error_status_and_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let archive = RemoteArchive::new("gone.zip", format!("{}/gone.zip", server.uri()), dir.path());

        let err = fetcher()
            .fetch(&archive, &ProgressChannels::disconnected())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Status { status: 404, .. }));
        assert!(!archive.path.exists());
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let archive = RemoteArchive::new("slow.zip", format!("{}/slow.zip", server.uri()), dir.path());
        let fetcher = HttpFetcher::new(reqwest::Client::new(), Duration::from_millis(100));

        let err = fetcher
            .fetch(&archive, &ProgressChannels::disconnected())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Timeout(_)));
        assert!(!archive.path.exists());
    }
}

//! Bounded worker pool downloading and extracting archives
//!
//! A fixed number of workers pull archives from a shared queue. For each
//! archive a worker downloads it, extracts it and deletes the archive file,
//! then hands back exactly one [`ArchiveOutcome`]. Failures stay attached to
//! their archive and never stop sibling workers.
//!
//! Worker errors are funneled to a single collector task. The collector sleeps
//! on its channel and on a done signal, and emits one aggregated log entry
//! when the pool call ends.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::decompression::{extract_archive, ExtractError};
use super::download::{remove_partial, ArchiveFetcher, DownloadError};
use super::models::{ExtractedFile, RemoteArchive};
use super::progress::{ProgressChannels, ProgressReporter, ProgressSummary};

/// Why one archive produced no files
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("cannot remove archive {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("worker exited before reporting a result")]
    WorkerLost,
}

/// Result of processing one archive
#[derive(Debug)]
pub struct ArchiveOutcome {
    pub archive: RemoteArchive,
    /// Empty when `error` is set
    pub files: Vec<ExtractedFile>,
    pub error: Option<ArchiveError>,
}

impl ArchiveOutcome {
    fn extracted(archive: RemoteArchive, files: Vec<ExtractedFile>) -> Self {
        Self {
            archive,
            files,
            error: None,
        }
    }

    fn failed(archive: RemoteArchive, error: ArchiveError) -> Self {
        Self {
            archive,
            files: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything one pool invocation produced
#[derive(Debug, Default)]
pub struct PoolReport {
    /// Exactly one entry per submitted archive, in completion order
    pub outcomes: Vec<ArchiveOutcome>,
    pub progress: ProgressSummary,
}

impl PoolReport {
    /// Union of the files extracted by every archive
    pub fn extracted_files(&self) -> Vec<ExtractedFile> {
        self.outcomes.iter().flat_map(|o| o.files.iter().cloned()).collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ArchiveOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

type ErrorReport = (String, String);

/// Fixed-size pool of download/extract workers
#[derive(Clone)]
pub struct WorkerPool {
    fetcher: Arc<dyn ArchiveFetcher>,
    workers: usize,
    show_progress: bool,
}

impl WorkerPool {
    pub fn new(fetcher: Arc<dyn ArchiveFetcher>, workers: usize) -> Self {
        Self {
            fetcher,
            workers: workers.max(1),
            show_progress: false,
        }
    }

    /// Draw progress bars on the terminal
    pub fn with_progress(mut self, visible: bool) -> Self {
        self.show_progress = visible;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Process every archive and return once each one has an outcome
    pub async fn run(&self, archives: Vec<RemoteArchive>, cancel: &CancellationToken) -> PoolReport {
        let total = archives.len();
        if total == 0 {
            return PoolReport::default();
        }

        let submitted: Vec<RemoteArchive> = archives.clone();
        let worker_count = self.workers.min(total);
        info!(archives = total, workers = worker_count, "Starting worker pool");

        let (progress, reporter) = ProgressReporter::spawn(total, self.show_progress);
        let (error_tx, error_rx) = mpsc::unbounded_channel::<ErrorReport>();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let collector = tokio::spawn(collect_errors(error_rx, done_rx));

        // The queue holds every archive up front so submission never blocks
        let (queue_tx, queue_rx) = mpsc::channel::<RemoteArchive>(total);
        for archive in archives {
            if queue_tx.send(archive).await.is_err() {
                break;
            }
        }
        drop(queue_tx);
        let queue = Arc::new(Mutex::new(queue_rx));

        let (result_tx, mut result_rx) = mpsc::channel::<ArchiveOutcome>(total);
        let mut workers = JoinSet::new();
        for id in 0..worker_count {
            workers.spawn(worker_loop(
                id,
                Arc::clone(&self.fetcher),
                Arc::clone(&queue),
                result_tx.clone(),
                error_tx.clone(),
                progress.clone(),
                cancel.clone(),
            ));
        }
        drop(result_tx);
        drop(progress);

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = result_rx.recv().await {
            outcomes.push(outcome);
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "Worker task failed");
            }
        }

        let reported: HashSet<String> = outcomes.iter().map(|o| o.archive.file_name.clone()).collect();
        for archive in submitted {
            if !reported.contains(&archive.file_name) {
                let _ = error_tx.send((archive.file_name.clone(), ArchiveError::WorkerLost.to_string()));
                outcomes.push(ArchiveOutcome::failed(archive, ArchiveError::WorkerLost));
            }
        }
        drop(error_tx);

        let _ = done_tx.send(());
        if let Err(err) = collector.await {
            error!(error = %err, "Error collector failed");
        }
        let progress = reporter.finish().await;
        let failed = outcomes.iter().filter(|o| !o.is_success()).count();

        info!(
            archives = total,
            succeeded = total - failed,
            failed,
            "Worker pool finished"
        );

        PoolReport { outcomes, progress }
    }
}

async fn worker_loop(
    id: usize,
    fetcher: Arc<dyn ArchiveFetcher>,
    queue: Arc<Mutex<mpsc::Receiver<RemoteArchive>>>,
    results: mpsc::Sender<ArchiveOutcome>,
    errors: mpsc::UnboundedSender<ErrorReport>,
    progress: ProgressChannels,
    cancel: CancellationToken,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(archive) = next else {
            break;
        };

        debug!(worker = id, file = %archive.file_name, "Worker picked archive");
        let outcome = process_archive(fetcher.as_ref(), archive, &progress, &cancel).await;

        if let Some(err) = &outcome.error {
            let _ = errors.send((outcome.archive.file_name.clone(), err.to_string()));
        }
        if results.send(outcome).await.is_err() {
            break;
        }
    }
    debug!(worker = id, "Worker finished");
}

/// Download, extract, then delete one archive
async fn process_archive(
    fetcher: &dyn ArchiveFetcher,
    archive: RemoteArchive,
    progress: &ProgressChannels,
    cancel: &CancellationToken,
) -> ArchiveOutcome {
    let downloaded = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ArchiveError::Cancelled),
        result = fetcher.fetch(&archive, progress) => result.map_err(ArchiveError::from),
    };

    if let Err(err) = downloaded {
        if matches!(err, ArchiveError::Cancelled) {
            remove_partial(&archive.path).await;
        }
        // Extraction will never run for this archive
        progress.extract(&archive.file_name, 100.0);
        return ArchiveOutcome::failed(archive, err);
    }

    let files = match extract_archive(&archive, progress.clone()).await {
        Ok(files) => files,
        Err(err) => {
            progress.extract(&archive.file_name, 100.0);
            return ArchiveOutcome::failed(archive, err.into());
        },
    };

    if let Err(source) = tokio::fs::remove_file(&archive.path).await {
        let path = archive.path.clone();
        return ArchiveOutcome::failed(archive, ArchiveError::Remove { path, source });
    }

    debug!(file = %archive.file_name, extracted = files.len(), "Archive processed");
    ArchiveOutcome::extracted(archive, files)
}

/// Accumulate worker errors until `done` fires, then log them once
async fn collect_errors(
    mut errors: mpsc::UnboundedReceiver<ErrorReport>,
    mut done: oneshot::Receiver<()>,
) -> Vec<ErrorReport> {
    let mut collected = Vec::new();

    loop {
        tokio::select! {
            Some(report) = errors.recv() => collected.push(report),
            _ = &mut done => {
                while let Ok(report) = errors.try_recv() {
                    collected.push(report);
                }
                break;
            },
        }
    }

    if collected.is_empty() {
        debug!("No worker errors");
    } else {
        let details: Vec<String> = collected.iter().map(|(file, err)| format!("{file}: {err}")).collect();
        error!(count = collected.len(), errors = ?details, "Some archives could not be processed");
    }

    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FailingFetcher;

    #[async_trait]
    impl ArchiveFetcher for FailingFetcher {
        async fn fetch(&self, _: &RemoteArchive, _: &ProgressChannels) -> Result<u64, DownloadError> {
            Err(DownloadError::Status {
                url: "http://unused".into(),
                status: 503,
            })
        }
    }

    struct PendingFetcher;

    #[async_trait]
    impl ArchiveFetcher for PendingFetcher {
        async fn fetch(&self, _: &RemoteArchive, _: &ProgressChannels) -> Result<u64, DownloadError> {
            futures::future::pending().await
        }
    }

    fn archives(dir: &std::path::Path, count: usize) -> Vec<RemoteArchive> {
        (0..count)
            .map(|i| RemoteArchive::new(format!("f{i}_E_Q.zip"), "http://unused", dir))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_input_returns_immediately() {
        let pool = WorkerPool::new(Arc::new(FailingFetcher), 4);
        let report = pool.run(Vec::new(), &CancellationToken::new()).await;
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_every_failed_download_still_yields_one_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let pool = WorkerPool::new(Arc::new(FailingFetcher), 2);

        let report = pool.run(archives(dir.path(), 5), &CancellationToken::new()).await;

        assert_eq!(report.outcomes.len(), 5);
        assert!(report.outcomes.iter().all(|o| matches!(o.error, Some(ArchiveError::Download(_)))));
        assert!(report.extracted_files().is_empty());
        assert_eq!(report.progress.completed_extractions(), 5);
    }

    #[tokio::test]
    async fn test_cancellation_fails_pending_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let pool = WorkerPool::new(Arc::new(PendingFetcher), 3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = pool.run(archives(dir.path(), 4), &cancel).await;

        assert_eq!(report.outcomes.len(), 4);
        assert!(report.outcomes.iter().all(|o| matches!(o.error, Some(ArchiveError::Cancelled))));
    }

    #[tokio::test]
    async fn test_collector_drains_reports_sent_before_done() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = oneshot::channel();
        tx.send(("a".to_string(), "boom".to_string())).unwrap();
        tx.send(("b".to_string(), "bang".to_string())).unwrap();
        done_tx.send(()).unwrap();

        let collected = collect_errors(rx, done_rx).await;
        assert_eq!(collected.len(), 2);
    }
}

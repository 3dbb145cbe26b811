//! Test helpers for sirene-sync integration tests
//!
//! - In-memory history store
//! - Scripted publisher listing
//! - Scripted ingestor with concurrency tracking
//! - Canned archive fetcher and zip fixture builder
//! - Log capture
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use sirene_sync::ingest::download::DownloadError;
use sirene_sync::ingest::listing::ListingError;
use sirene_sync::ingest::progress::ProgressChannels;
use sirene_sync::ingest::tracker::TrackerError;
use sirene_sync::ingest::{
    ArchiveFetcher, HistoryEntry, HistoryStore, ImportOutcome, ImportRecord, Ingestor, RemoteArchive,
    RemoteListing,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

/// History kept in memory
#[derive(Default)]
pub struct MemoryHistory {
    pub entries: Mutex<Vec<HistoryEntry>>,
    pub fail_reads: bool,
}

impl MemoryHistory {
    pub fn with_successes(names: &[&str]) -> Self {
        let entries = names
            .iter()
            .map(|n| HistoryEntry::success(sirene_sync::ingest::FileKind::detect(n), *n))
            .collect();
        Self {
            entries: Mutex::new(entries),
            fail_reads: false,
        }
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn entries_for(&self, name: &str) -> Vec<HistoryEntry> {
        self.entries().into_iter().filter(|e| e.file_name == name).collect()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn successful_file_names(&self) -> Result<HashSet<String>, TrackerError> {
        if self.fail_reads {
            return Err(TrackerError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.is_success)
            .map(|e| e.file_name.clone())
            .collect())
    }

    async fn append(&self, entry: &HistoryEntry) -> Result<(), TrackerError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<ImportRecord>, TrackerError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .enumerate()
            .rev()
            .take(limit as usize)
            .map(|(i, e)| ImportRecord {
                id: i as i64 + 1,
                datetime: Utc::now(),
                filename: e.file_name.clone(),
                file_type: e.file_type.clone(),
                is_success: e.is_success,
                err: e.error.clone(),
            })
            .collect())
    }
}

/// Listing returning a fixed set of names
pub struct StaticListing {
    pub names: Vec<String>,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl StaticListing {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            names: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteListing for StaticListing {
    async fn list_current_files(&self, destination: &Path) -> Result<Vec<RemoteArchive>, ListingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ListingError::Status {
                url: "http://publisher.test/".to_string(),
                status: 503,
            });
        }
        Ok(self
            .names
            .iter()
            .map(|n| RemoteArchive::new(n.clone(), format!("http://publisher.test/{n}"), destination))
            .collect())
    }
}

/// How a [`ScriptedIngestor`] answers
#[derive(Clone, Default)]
pub struct Script {
    /// Archives reported as failed
    pub fail: HashSet<String>,
    /// Archives for which no outcome is returned
    pub drop: HashSet<String>,
    /// Archives reported twice
    pub duplicate: HashSet<String>,
    /// Simulated work duration, interrupted by cancellation
    pub duration: Option<Duration>,
}

/// Ingestor following a [`Script`]
#[derive(Default)]
pub struct ScriptedIngestor {
    pub script: Script,
    pub batches: Mutex<Vec<Vec<String>>>,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
}

impl ScriptedIngestor {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ingestor for ScriptedIngestor {
    async fn ingest(&self, archives: Vec<RemoteArchive>, cancel: &CancellationToken) -> Vec<ImportOutcome> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        self.batches
            .lock()
            .unwrap()
            .push(archives.iter().map(|a| a.file_name.clone()).collect());

        let mut cancelled = false;
        if let Some(duration) = self.script.duration {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {},
                _ = cancel.cancelled() => cancelled = true,
            }
        }

        let mut outcomes = Vec::new();
        for archive in &archives {
            let name = &archive.file_name;
            if self.script.drop.contains(name) {
                continue;
            }
            let outcome = if cancelled {
                ImportOutcome::failed(archive.kind(), name, "cancelled")
            } else if self.script.fail.contains(name) {
                ImportOutcome::failed(archive.kind(), name, "copy failed for data.csv: boom")
            } else {
                ImportOutcome::succeeded(archive.kind(), name)
            };
            if self.script.duplicate.contains(name) {
                outcomes.push(outcome.clone());
            }
            outcomes.push(outcome);
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        outcomes
    }
}

/// Build an in-memory zip archive
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, body) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn touch(dir: &Path, names: &[&str]) {
    for name in names {
        std::fs::write(dir.join(name), b"cached").unwrap();
    }
}

pub fn names(paths: &[std::path::PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect()
}

/// Fetcher writing canned zip archives; unknown names answer HTTP 404
#[derive(Default)]
pub struct ZipFetcher {
    archives: HashMap<String, (Vec<u8>, Duration)>,
}

impl ZipFetcher {
    pub fn with_archive(self, name: &str, entries: &[(&str, &[u8])]) -> Self {
        self.with_delayed_archive(name, Duration::ZERO, entries)
    }

    pub fn with_delayed_archive(mut self, name: &str, delay: Duration, entries: &[(&str, &[u8])]) -> Self {
        self.archives.insert(name.to_string(), (zip_bytes(entries), delay));
        self
    }
}

#[async_trait]
impl ArchiveFetcher for ZipFetcher {
    async fn fetch(&self, archive: &RemoteArchive, progress: &ProgressChannels) -> Result<u64, DownloadError> {
        let Some((bytes, delay)) = self.archives.get(&archive.file_name) else {
            return Err(DownloadError::Status {
                url: archive.url.clone(),
                status: 404,
            });
        };
        tokio::time::sleep(*delay).await;
        tokio::fs::write(&archive.path, bytes).await?;
        progress.download(&archive.file_name, 100.0);
        Ok(bytes.len() as u64)
    }
}

pub fn archives(dir: &Path, names: &[&str]) -> Vec<RemoteArchive> {
    names
        .iter()
        .map(|n| RemoteArchive::new(*n, format!("http://publisher.test/{n}"), dir))
        .collect()
}

/// Pool whose connections can never be established
pub fn unreachable_db() -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(Duration::from_millis(500))
        .connect_lazy("postgresql://sirene@127.0.0.1:1/sirene")
        .unwrap()
}

/// Formatted log output collected in memory
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(self.clone())
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

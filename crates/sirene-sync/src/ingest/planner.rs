//! Incremental update planner
//!
//! One cycle diffs the publisher listing against the import history, reclaims
//! local disk space, ingests what is missing and records exactly one history
//! entry per archive it attempted. A failed archive never reaches the success
//! history, so the next cycle picks it up again.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::listing::{ListingError, RemoteListing};
use super::models::{ImportOutcome, RemoteArchive};
use super::pipeline::Ingestor;
use super::tracker::{HistoryStore, TrackerError};

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("cannot read import history: {0}")]
    History(#[source] TrackerError),

    #[error("cannot list remote files: {0}")]
    Listing(#[from] ListingError),

    #[error("cannot clean {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot record {count} import result(s): {source}")]
    Record {
        count: usize,
        #[source]
        source: TrackerError,
    },
}

/// Remote archives not yet applied, in listing order
pub fn plan(remote: &[RemoteArchive], applied: &HashSet<String>) -> Vec<RemoteArchive> {
    remote
        .iter()
        .filter(|archive| !applied.contains(&archive.file_name))
        .cloned()
        .collect()
}

/// Local file names that survive cleanup
pub fn keep_list(applied: &HashSet<String>, to_download: &[RemoteArchive]) -> HashSet<String> {
    applied
        .iter()
        .cloned()
        .chain(to_download.iter().map(|a| a.file_name.clone()))
        .collect()
}

/// Regular files in `dir` whose name is not in `keep`
pub async fn useless_files(dir: &Path, keep: &HashSet<String>) -> Result<Vec<PathBuf>, PlannerError> {
    let cleanup_error = |source| PlannerError::Cleanup {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(cleanup_error(err)),
    };

    let mut useless = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(cleanup_error)? {
        let file_type = entry.file_type().await.map_err(cleanup_error)?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !keep.contains(&name) {
            useless.push(entry.path());
        }
    }
    useless.sort();
    Ok(useless)
}

/// Delete every regular file in `dir` whose name is not in `keep`
pub async fn remove_useless_files(dir: &Path, keep: &HashSet<String>) -> Result<Vec<PathBuf>, PlannerError> {
    let useless = useless_files(dir, keep).await?;
    for path in &useless {
        tokio::fs::remove_file(path).await.map_err(|source| PlannerError::Cleanup {
            path: path.clone(),
            source,
        })?;
    }

    if !useless.is_empty() {
        info!(files = ?useless, "Removed useless files");
    }
    Ok(useless)
}

/// What a cycle would do, computed without side effects
#[derive(Debug, Clone, Serialize)]
pub struct PlanPreview {
    pub remote: Vec<String>,
    pub applied: usize,
    pub to_download: Vec<String>,
    pub removable: Vec<PathBuf>,
}

/// What one cycle did
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub remote: usize,
    pub applied: usize,
    pub to_download: Vec<String>,
    pub removed: Vec<PathBuf>,
    pub outcomes: Vec<ImportOutcome>,
}

impl CycleReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Plans and applies incremental updates
pub struct UpdatePlanner {
    history: Arc<dyn HistoryStore>,
    listing: Arc<dyn RemoteListing>,
    ingestor: Arc<dyn Ingestor>,
    download_dir: PathBuf,
}

impl UpdatePlanner {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        listing: Arc<dyn RemoteListing>,
        ingestor: Arc<dyn Ingestor>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            history,
            listing,
            ingestor,
            download_dir: download_dir.into(),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Run one full cycle
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, PlannerError> {
        let applied = self
            .history
            .successful_file_names()
            .await
            .map_err(PlannerError::History)?;
        let remote = self.listing.list_current_files(&self.download_dir).await?;
        let to_download = plan(&remote, &applied);

        let to_download_names: Vec<String> = to_download.iter().map(|a| a.file_name.clone()).collect();
        info!(
            remote = ?remote.iter().map(|a| a.file_name.as_str()).collect::<Vec<_>>(),
            applied = applied.len(),
            to_download = ?to_download_names,
            "Update status"
        );

        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|source| PlannerError::Cleanup {
                path: self.download_dir.clone(),
                source,
            })?;
        let removed = remove_useless_files(&self.download_dir, &keep_list(&applied, &to_download)).await?;

        let outcomes = if to_download.is_empty() {
            Vec::new()
        } else {
            let outcomes = self.ingestor.ingest(to_download.clone(), cancel).await;
            self.record(&to_download, outcomes).await?
        };

        let report = CycleReport {
            remote: remote.len(),
            applied: applied.len(),
            to_download: to_download_names,
            removed,
            outcomes,
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Update cycle finished"
        );
        Ok(report)
    }

    /// Compute the next cycle's work without downloading or deleting anything
    pub async fn plan_only(&self) -> Result<PlanPreview, PlannerError> {
        let applied = self
            .history
            .successful_file_names()
            .await
            .map_err(PlannerError::History)?;
        let remote = self.listing.list_current_files(&self.download_dir).await?;
        let to_download = plan(&remote, &applied);
        let removable = useless_files(&self.download_dir, &keep_list(&applied, &to_download)).await?;

        Ok(PlanPreview {
            remote: remote.into_iter().map(|a| a.file_name).collect(),
            applied: applied.len(),
            to_download: to_download.into_iter().map(|a| a.file_name).collect(),
            removable,
        })
    }

    /// Append one history entry per submitted archive
    ///
    /// Every entry is attempted even if some fail to be written.
    async fn record(
        &self,
        submitted: &[RemoteArchive],
        outcomes: Vec<ImportOutcome>,
    ) -> Result<Vec<ImportOutcome>, PlannerError> {
        let mut by_name: HashMap<String, ImportOutcome> = HashMap::with_capacity(outcomes.len());
        for outcome in outcomes {
            if by_name.contains_key(&outcome.archive_name) {
                warn!(archive = %outcome.archive_name, "Duplicate outcome ignored");
                continue;
            }
            by_name.insert(outcome.archive_name.clone(), outcome);
        }

        let mut recorded = Vec::with_capacity(submitted.len());
        let mut failures = 0usize;
        let mut first_error = None;

        for archive in submitted {
            let outcome = by_name
                .remove(&archive.file_name)
                .unwrap_or_else(|| ImportOutcome::failed(archive.kind(), &archive.file_name, "no outcome reported"));

            if let Err(err) = self.history.append(&outcome.to_history_entry()).await {
                error!(archive = %archive.file_name, error = %err, "Cannot record import result");
                failures += 1;
                first_error.get_or_insert(err);
            }
            recorded.push(outcome);
        }

        for name in by_name.keys() {
            warn!(archive = %name, "Outcome for an archive that was not submitted");
        }

        match first_error {
            Some(source) => Err(PlannerError::Record {
                count: failures,
                source,
            }),
            None => Ok(recorded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archives(names: &[&str]) -> Vec<RemoteArchive> {
        names
            .iter()
            .map(|n| RemoteArchive::new(*n, format!("http://example.test/{n}"), Path::new("/data")))
            .collect()
    }

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_plan_skips_applied_files() {
        let remote = archives(&["A.zip", "B.zip"]);
        let to_download = plan(&remote, &set(&["A.zip"]));

        assert_eq!(to_download, archives(&["B.zip"]));
        assert_eq!(keep_list(&set(&["A.zip"]), &to_download), set(&["A.zip", "B.zip"]));
    }

    #[test]
    fn test_plan_with_empty_history_takes_everything() {
        let remote = archives(&["A.zip", "B.zip"]);
        assert_eq!(plan(&remote, &HashSet::new()), remote);
    }

    #[test]
    fn test_applied_files_absent_from_listing_are_not_downloaded() {
        let remote = archives(&["C.zip"]);
        let to_download = plan(&remote, &set(&["A.zip", "B.zip"]));
        assert_eq!(to_download, archives(&["C.zip"]));
    }

    #[tokio::test]
    async fn test_remove_useless_files_keeps_listed_names_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["A.zip", "B.zip", "old.csv", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let removed = remove_useless_files(dir.path(), &set(&["A.zip", "B.zip"])).await.unwrap();

        assert_eq!(removed, vec![dir.path().join("notes.txt"), dir.path().join("old.csv")]);
        assert!(dir.path().join("A.zip").exists());
        assert!(dir.path().join("B.zip").exists());
        assert!(dir.path().join("subdir").is_dir());
    }

    #[tokio::test]
    async fn test_useless_files_on_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(useless_files(&missing, &HashSet::new()).await.unwrap().is_empty());
    }
}

//! Ingestion entry point: fetch concurrently, import sequentially
//!
//! Archives are downloaded and extracted by the [`WorkerPool`]. Their files are
//! then imported on a single connection, archive by archive in the order the
//! archives were submitted, so a full dump is always loaded before the updates
//! listed after it. Every file of one archive is loaded inside one transaction:
//! an archive is either fully applied or not applied at all.

use async_trait::async_trait;
use sqlx::{Connection, PgConnection, PgPool};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::import::{FileImport, ImportError, ImportRegistry};
use super::models::{ExtractedFile, ImportOutcome, RemoteArchive};
use super::pool::{ArchiveOutcome, WorkerPool};

/// Runs the download/extract/import chain for a set of archives
#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Return exactly one outcome per submitted archive
    async fn ingest(&self, archives: Vec<RemoteArchive>, cancel: &CancellationToken) -> Vec<ImportOutcome>;
}

/// [`Ingestor`] loading into PostgreSQL
pub struct PipelineIngestor {
    workers: WorkerPool,
    db: PgPool,
    registry: ImportRegistry,
}

impl PipelineIngestor {
    pub fn new(workers: WorkerPool, db: PgPool, registry: ImportRegistry) -> Self {
        Self { workers, db, registry }
    }

    fn imports_for(&self, files: &[ExtractedFile]) -> Result<Vec<Box<dyn FileImport>>, ImportError> {
        files.iter().map(|file| self.registry.import_for(file)).collect()
    }
}

#[async_trait]
impl Ingestor for PipelineIngestor {
    async fn ingest(&self, archives: Vec<RemoteArchive>, cancel: &CancellationToken) -> Vec<ImportOutcome> {
        let submitted: Vec<String> = archives.iter().map(|a| a.file_name.clone()).collect();
        info!(archives = submitted.len(), workers = self.workers.workers(), "Starting ingestion");

        let report = self.workers.run(archives, cancel).await;

        let mut outcomes = Vec::with_capacity(report.outcomes.len());
        let mut pending: Vec<(RemoteArchive, Vec<Box<dyn FileImport>>)> = Vec::new();
        for outcome in in_submission_order(&submitted, report.outcomes) {
            let archive = outcome.archive;
            if let Some(err) = outcome.error {
                outcomes.push(ImportOutcome::failed(archive.kind(), &archive.file_name, err.to_string()));
                continue;
            }
            match self.imports_for(&outcome.files) {
                Ok(imports) => pending.push((archive, imports)),
                Err(err) => {
                    warn!(archive = %archive.file_name, error = %err, "Archive contains a file that cannot be imported");
                    outcomes.push(ImportOutcome::failed(archive.kind(), &archive.file_name, err.to_string()));
                },
            }
        }

        if pending.is_empty() {
            return outcomes;
        }

        let mut conn = match self.db.acquire().await {
            Ok(conn) => conn,
            Err(err) => {
                error!(error = %err, "Cannot acquire a connection for import");
                let reason = format!("cannot acquire database connection: {err}");
                outcomes.extend(
                    pending
                        .into_iter()
                        .map(|(archive, _)| ImportOutcome::failed(archive.kind(), &archive.file_name, &reason)),
                );
                return outcomes;
            },
        };

        for (archive, mut imports) in pending {
            match import_archive(&mut *conn, &mut imports, cancel).await {
                Ok(rows) => {
                    info!(archive = %archive.file_name, files = imports.len(), rows, "Archive imported");
                    outcomes.push(ImportOutcome::succeeded(archive.kind(), &archive.file_name));
                },
                Err(err) => {
                    warn!(archive = %archive.file_name, error = %err, "Archive import failed");
                    outcomes.push(ImportOutcome::failed(archive.kind(), &archive.file_name, err.to_string()));
                },
            }
        }

        outcomes
    }
}

/// Reorder pool outcomes, which arrive in completion order, to submission order
pub fn in_submission_order(submitted: &[String], mut outcomes: Vec<ArchiveOutcome>) -> Vec<ArchiveOutcome> {
    let position: HashMap<&str, usize> = submitted
        .iter()
        .enumerate()
        .map(|(index, name)| (name.as_str(), index))
        .collect();
    outcomes.sort_by_key(|o| position.get(o.archive.file_name.as_str()).copied().unwrap_or(usize::MAX));
    outcomes
}

/// Prepare, copy and update every file of one archive inside one transaction
///
/// The transaction is rolled back on the first failing file, so no row of the
/// archive survives unless all of them do.
pub async fn import_archive(
    conn: &mut PgConnection,
    imports: &mut [Box<dyn FileImport>],
    cancel: &CancellationToken,
) -> Result<u64, ImportError> {
    let mut tx = conn.begin().await.map_err(ImportError::Transaction)?;

    let mut rows = 0;
    for import in imports.iter_mut() {
        if cancel.is_cancelled() {
            return Err(ImportError::Cancelled {
                file: import.file_name().to_string(),
            });
        }
        import.prepare().await?;
        rows += import.copy(&mut *tx).await?;
        import.update(&mut *tx).await?;
    }

    tx.commit().await.map_err(ImportError::Transaction)?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::pool::ArchiveError;
    use std::path::Path;

    fn outcome(name: &str) -> ArchiveOutcome {
        ArchiveOutcome {
            archive: RemoteArchive::new(name, format!("http://example.test/{name}"), Path::new("/data")),
            files: Vec::new(),
            error: None,
        }
    }

    fn names(outcomes: &[ArchiveOutcome]) -> Vec<&str> {
        outcomes.iter().map(|o| o.archive.file_name.as_str()).collect()
    }

    #[test]
    fn test_outcomes_follow_submission_order() {
        let submitted = vec![
            "sirene_201801_L_M.zip".to_string(),
            "sirene_2018032_E_Q.zip".to_string(),
            "sirene_2018033_E_Q.zip".to_string(),
        ];
        let completed = vec![
            outcome("sirene_2018033_E_Q.zip"),
            outcome("sirene_2018032_E_Q.zip"),
            outcome("sirene_201801_L_M.zip"),
        ];

        let ordered = in_submission_order(&submitted, completed);

        assert_eq!(
            names(&ordered),
            vec!["sirene_201801_L_M.zip", "sirene_2018032_E_Q.zip", "sirene_2018033_E_Q.zip"]
        );
    }

    #[test]
    fn test_unknown_outcomes_sort_last() {
        let submitted = vec!["A.zip".to_string()];
        let mut stray = outcome("stray.zip");
        stray.error = Some(ArchiveError::WorkerLost);

        let ordered = in_submission_order(&submitted, vec![stray, outcome("A.zip")]);

        assert_eq!(names(&ordered), vec!["A.zip", "stray.zip"]);
    }
}

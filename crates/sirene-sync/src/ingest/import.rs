//! Per-file import: prepare, copy, update
//!
//! Each extracted file is loaded by a [`FileImport`] chosen from its kind.
//! Stage failures carry the stage name so the history says where a file broke.

use async_trait::async_trait;
use sqlx::PgConnection;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

use super::bulk::{copy_from, quote_ident, BulkError};
use super::copy_source::{CopyOptions, CopySource, SourceError};
use super::models::{ExtractedFile, FileKind};

/// Import stage, used to label failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStage {
    Prepare,
    Copy,
    Update,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImportStage::Prepare => "prepare",
            ImportStage::Copy => "copy",
            ImportStage::Update => "update",
        })
    }
}

/// Underlying cause of a stage failure
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Bulk(#[from] BulkError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("file was not prepared")]
    NotPrepared,

    #[error("prepare task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{stage} failed for {file}: {source}")]
    Stage {
        stage: ImportStage,
        file: String,
        #[source]
        source: StageError,
    },

    #[error("no import target for {kind} file {file}")]
    UnsupportedKind { kind: FileKind, file: String },

    #[error("import transaction failed: {0}")]
    Transaction(#[source] sqlx::Error),

    #[error("cancelled before importing {file}")]
    Cancelled { file: String },
}

impl ImportError {
    fn stage(stage: ImportStage, file: &str, source: impl Into<StageError>) -> Self {
        ImportError::Stage {
            stage,
            file: file.to_string(),
            source: source.into(),
        }
    }
}

/// The prepare/copy/update sequence for one extracted file
#[async_trait]
pub trait FileImport: Send {
    fn kind(&self) -> FileKind;

    /// Archive the file came from; the history is keyed on it
    fn archive_name(&self) -> &str;

    fn file_name(&self) -> &str;

    async fn prepare(&mut self) -> Result<(), ImportError>;

    /// Load the file, returning the number of rows copied
    async fn copy(&mut self, conn: &mut PgConnection) -> Result<u64, ImportError>;

    async fn update(&mut self, conn: &mut PgConnection) -> Result<(), ImportError>;
}

/// Where and how one file kind is loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTarget {
    pub table: String,
    /// Empty the table before loading (full dumps)
    pub truncate: bool,
    /// Statement executed after a successful copy
    pub update_sql: Option<String>,
}

/// Loads a delimited file into a table with COPY
pub struct TableImport {
    file: ExtractedFile,
    target: ImportTarget,
    options: CopyOptions,
    source: Option<CopySource>,
    columns: Vec<String>,
}

impl TableImport {
    pub fn new(file: ExtractedFile, target: ImportTarget, options: CopyOptions) -> Self {
        Self {
            file,
            target,
            options,
            source: None,
            columns: Vec::new(),
        }
    }

    /// Columns resolved from the header during prepare
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

#[async_trait]
impl FileImport for TableImport {
    fn kind(&self) -> FileKind {
        self.file.kind
    }

    fn archive_name(&self) -> &str {
        &self.file.archive_name
    }

    fn file_name(&self) -> &str {
        &self.file.file_name
    }

    async fn prepare(&mut self) -> Result<(), ImportError> {
        let path = self.file.path.clone();
        let options = self.options.clone();
        let source = tokio::task::spawn_blocking(move || CopySource::open(&path, &options))
            .await
            .map_err(|err| ImportError::stage(ImportStage::Prepare, &self.file.file_name, StageError::Task(err.to_string())))?
            .map_err(|err| ImportError::stage(ImportStage::Prepare, &self.file.file_name, err))?;

        self.columns = source.headers().to_vec();
        debug!(
            file = %self.file.file_name,
            columns = self.columns.len(),
            triggers = ?source.trigger_ordinals(),
            "Prepared import"
        );
        self.source = Some(source);
        Ok(())
    }

    async fn copy(&mut self, conn: &mut PgConnection) -> Result<u64, ImportError> {
        let file = self.file.file_name.clone();
        let source = self
            .source
            .take()
            .ok_or_else(|| ImportError::stage(ImportStage::Copy, &file, StageError::NotPrepared))?;

        if self.target.truncate {
            sqlx::query(&format!("TRUNCATE {}", quote_ident(&self.target.table)))
                .execute(&mut *conn)
                .await
                .map_err(|err| ImportError::stage(ImportStage::Copy, &file, err))?;
        }

        let rows = copy_from(conn, &self.target.table, &self.columns, source)
            .await
            .map_err(|err| ImportError::stage(ImportStage::Copy, &file, err))?;

        info!(file = %file, table = %self.target.table, rows, "Copied file");
        Ok(rows)
    }

    async fn update(&mut self, conn: &mut PgConnection) -> Result<(), ImportError> {
        let Some(sql) = &self.target.update_sql else {
            return Ok(());
        };

        let result = sqlx::query(sql)
            .execute(&mut *conn)
            .await
            .map_err(|err| ImportError::stage(ImportStage::Update, &self.file.file_name, err))?;

        debug!(file = %self.file.file_name, rows = result.rows_affected(), "Applied post-copy update");
        Ok(())
    }
}

/// Maps each file kind to its import target
#[derive(Debug, Clone)]
pub struct ImportRegistry {
    targets: HashMap<FileKind, ImportTarget>,
    options: CopyOptions,
}

impl ImportRegistry {
    pub fn new(options: CopyOptions) -> Self {
        Self {
            targets: HashMap::new(),
            options,
        }
    }

    pub fn with_target(mut self, kind: FileKind, target: ImportTarget) -> Self {
        self.targets.insert(kind, target);
        self
    }

    pub fn target(&self, kind: FileKind) -> Option<&ImportTarget> {
        self.targets.get(&kind)
    }

    /// Build the import for `file`; unknown kinds have no target
    pub fn import_for(&self, file: &ExtractedFile) -> Result<Box<dyn FileImport>, ImportError> {
        let target = self.targets.get(&file.kind).ok_or_else(|| ImportError::UnsupportedKind {
            kind: file.kind,
            file: file.file_name.clone(),
        })?;
        Ok(Box::new(TableImport::new(file.clone(), target.clone(), self.options.clone())))
    }
}

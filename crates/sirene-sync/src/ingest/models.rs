//! Data model shared by the ingestion components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of data file, stored as the `type` column of the import history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Full monthly dump (`sirene_201801_L_M.zip`)
    Stock,
    /// Daily incremental file (`sirene_2018032_E_Q.zip`)
    Update,
    Unknown,
}

impl FileKind {
    /// Detect the kind of a file from its name
    pub fn detect(file_name: &str) -> Self {
        let upper = file_name.to_uppercase();
        if upper.contains("_L_M") {
            FileKind::Stock
        } else if upper.contains("_E_Q") {
            FileKind::Update
        } else {
            FileKind::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Stock => "stock",
            FileKind::Update => "update",
            FileKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One upstream zip bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteArchive {
    /// Stable identifier, also the idempotency key in the history
    pub file_name: String,
    pub url: String,
    /// Where the archive is written once downloaded
    pub path: PathBuf,
}

impl RemoteArchive {
    pub fn new(file_name: impl Into<String>, url: impl Into<String>, destination: &Path) -> Self {
        let file_name = file_name.into();
        let path = destination.join(&file_name);
        Self {
            file_name,
            url: url.into(),
            path,
        }
    }

    pub fn kind(&self) -> FileKind {
        FileKind::detect(&self.file_name)
    }

    /// Directory the archive's contents are extracted into
    pub fn extract_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// One flat data file produced by unzipping a [`RemoteArchive`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedFile {
    pub kind: FileKind,
    pub file_name: String,
    pub path: PathBuf,
    /// Name of the archive this file came from
    pub archive_name: String,
}

/// One row of the import history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ImportRecord {
    pub id: i64,
    pub datetime: DateTime<Utc>,
    pub filename: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub file_type: String,
    pub is_success: bool,
    pub err: String,
}

/// A history entry about to be appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub file_type: String,
    pub file_name: String,
    /// Empty on success
    pub error: String,
    pub is_success: bool,
}

impl HistoryEntry {
    pub fn success(kind: FileKind, file_name: impl Into<String>) -> Self {
        Self {
            file_type: kind.to_string(),
            file_name: file_name.into(),
            error: String::new(),
            is_success: true,
        }
    }

    pub fn failure(kind: FileKind, file_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            file_type: kind.to_string(),
            file_name: file_name.into(),
            error: error.into(),
            is_success: false,
        }
    }
}

/// Result of ingesting one archive end to end
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub kind: FileKind,
    pub archive_name: String,
    /// `None` when every stage succeeded
    pub error: Option<String>,
}

impl ImportOutcome {
    pub fn succeeded(kind: FileKind, archive_name: impl Into<String>) -> Self {
        Self {
            kind,
            archive_name: archive_name.into(),
            error: None,
        }
    }

    pub fn failed(kind: FileKind, archive_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind,
            archive_name: archive_name.into(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn to_history_entry(&self) -> HistoryEntry {
        match &self.error {
            None => HistoryEntry::success(self.kind, &self.archive_name),
            Some(err) => HistoryEntry::failure(self.kind, &self.archive_name, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kind_detection() {
        assert_eq!(FileKind::detect("sirene_201801_L_M.zip"), FileKind::Stock);
        assert_eq!(FileKind::detect("sirc-17804_9075_14209_201801_L_M_20180101_030436288.csv"), FileKind::Stock);
        assert_eq!(FileKind::detect("sirene_2018032_e_q.zip"), FileKind::Update);
        assert_eq!(FileKind::detect("readme.txt"), FileKind::Unknown);
    }

    #[test]
    fn test_remote_archive_paths() {
        let archive = RemoteArchive::new("A.zip", "http://example.test/A.zip", Path::new("/data/sirene"));
        assert_eq!(archive.path, PathBuf::from("/data/sirene/A.zip"));
        assert_eq!(archive.extract_dir(), Path::new("/data/sirene"));
    }

    #[test]
    fn test_outcome_to_history_entry() {
        let ok = ImportOutcome::succeeded(FileKind::Stock, "A.zip").to_history_entry();
        assert!(ok.is_success);
        assert!(ok.error.is_empty());
        assert_eq!(ok.file_type, "stock");

        let failed = ImportOutcome::failed(FileKind::Update, "B.zip", "copy failed").to_history_entry();
        assert!(!failed.is_success);
        assert_eq!(failed.error, "copy failed");
    }
}

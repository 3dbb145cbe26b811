//! Zip extraction
//!
//! Entries are written flat, by base name, next to the archive. Directory
//! entries and entries whose path would escape the extraction directory are
//! skipped.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use super::models::{ExtractedFile, FileKind, RemoteArchive};
use super::progress::ProgressChannels;

/// Errors raised while extracting one archive
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("extraction task failed: {0}")]
    Task(String),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExtractError + '_ {
    move |source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Extract every file of `archive` on a blocking task
pub async fn extract_archive(
    archive: &RemoteArchive,
    progress: ProgressChannels,
) -> Result<Vec<ExtractedFile>, ExtractError> {
    let archive = archive.clone();
    tokio::task::spawn_blocking(move || extract_zip(&archive, &progress))
        .await
        .map_err(|err| ExtractError::Task(err.to_string()))?
}

/// Extract every file of `archive` into its extraction directory
pub fn extract_zip(archive: &RemoteArchive, progress: &ProgressChannels) -> Result<Vec<ExtractedFile>, ExtractError> {
    let file = File::open(&archive.path).map_err(io_error(&archive.path))?;
    let mut zip = zip::ZipArchive::new(file)?;
    let dir = archive.extract_dir();
    let total = zip.len();
    let mut extracted = Vec::new();

    for index in 0..total {
        let mut entry = zip.by_index(index)?;

        if !entry.is_dir() {
            let base_name = entry
                .enclosed_name()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));

            match base_name {
                Some(name) => {
                    let target = dir.join(&name);
                    let out = File::create(&target).map_err(io_error(&target))?;
                    let mut writer = BufWriter::new(out);
                    let bytes = std::io::copy(&mut entry, &mut writer).map_err(io_error(&target))?;
                    writer.flush().map_err(io_error(&target))?;

                    debug!(archive = %archive.file_name, file = %name, bytes, "Extracted entry");
                    extracted.push(ExtractedFile {
                        kind: FileKind::detect(&name),
                        file_name: name,
                        path: target,
                        archive_name: archive.file_name.clone(),
                    });
                },
                None => warn!(archive = %archive.file_name, entry = %entry.name(), "Skipping unsafe entry path"),
            }
        }

        progress.extract(&archive.file_name, ((index + 1) * 100 / total) as f64);
    }

    if total == 0 {
        progress.extract(&archive.file_name, 100.0);
    }

    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::progress::ProgressReporter;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, body) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, SimpleFileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(body).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_extracts_entries_flat_next_to_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = RemoteArchive::new("sirene_201801_L_M.zip", "http://unused", dir.path());
        write_zip(
            &archive.path,
            &[
                ("nested/", b""),
                ("nested/sirc_201801_L_M.csv", b"siren;DATEMAJ\n"),
                ("readme.txt", b"hello"),
            ],
        );

        let (channels, reporter) = ProgressReporter::spawn(1, false);
        let mut files = extract_archive(&archive, channels).await.unwrap();
        files.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].file_name, "readme.txt");
        assert_eq!(files[0].kind, FileKind::Unknown);
        assert_eq!(files[1].file_name, "sirc_201801_L_M.csv");
        assert_eq!(files[1].kind, FileKind::Stock);
        assert_eq!(files[1].archive_name, "sirene_201801_L_M.zip");
        assert_eq!(files[1].path, dir.path().join("sirc_201801_L_M.csv"));
        assert_eq!(std::fs::read(&files[1].path).unwrap(), b"siren;DATEMAJ\n");

        let summary = reporter.finish().await;
        assert_eq!(summary.extract.get("sirene_201801_L_M.zip"), Some(&100.0));
    }

    #[test]
    fn test_corrupt_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = RemoteArchive::new("broken.zip", "http://unused", dir.path());
        std::fs::write(&archive.path, b"definitely not a zip").unwrap();

        let err = extract_zip(&archive, &ProgressChannels::disconnected()).unwrap_err();
        assert!(matches!(err, ExtractError::Zip(_)));
    }

    #[test]
    fn test_missing_archive_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = RemoteArchive::new("missing.zip", "http://unused", dir.path());

        let err = extract_zip(&archive, &ProgressChannels::disconnected()).unwrap_err();
        assert!(matches!(err, ExtractError::Io { .. }));
    }
}

//! Streaming copy adapter over a delimited, Windows-1252 encoded file
//!
//! The raw bytes go through a Windows-1252 decoder before delimiter parsing.
//! The first record is the header: it is never surfaced as data and is used
//! to resolve which column ordinals are passed through the converter. The
//! resolution happens per file since column order may change between file
//! versions.
//!
//! Records whose field count differs from the header are skipped. Any other
//! read error, and any conversion failure, is terminal: the cursor stops,
//! releases the file and reports the error through [`CopySource::last_error`].

use csv::{ErrorKind, StringRecord};
use encoding_rs::WINDOWS_1252;
use encoding_rs_io::{DecodeReaderBytes, DecodeReaderBytesBuilder};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

use super::bulk::{BulkSource, CopyValue};
use super::convert::{ConvertError, Converter};

/// Errors that stop a [`CopySource`]
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing header record")]
    MissingHeader,

    #[error("read error: {0}")]
    Read(#[from] csv::Error),

    #[error("line {line}, column {column}: {source}")]
    Convert {
        line: u64,
        column: String,
        #[source]
        source: ConvertError,
    },
}

/// How to read one delimited file
#[derive(Clone)]
pub struct CopyOptions {
    pub delimiter: u8,
    /// Header names whose values go through `converter`
    pub trigger_columns: Vec<String>,
    pub converter: Converter,
}

impl std::fmt::Debug for CopyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyOptions")
            .field("delimiter", &(self.delimiter as char))
            .field("trigger_columns", &self.trigger_columns)
            .finish_non_exhaustive()
    }
}

/// Pull-based cursor producing one row of typed values at a time
pub struct CopySource<R: Read = File> {
    reader: Option<csv::Reader<DecodeReaderBytes<R, Vec<u8>>>>,
    headers: Vec<String>,
    triggers: HashSet<usize>,
    converter: Converter,
    record: StringRecord,
    values: Vec<CopyValue>,
    error: Option<SourceError>,
    skipped: u64,
}

impl CopySource<File> {
    /// Open `path` and consume its header record
    pub fn open(path: &Path, options: &CopyOptions) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Opened delimited file");
        Self::from_reader(file, options)
    }
}

impl<R: Read> CopySource<R> {
    pub fn from_reader(input: R, options: &CopyOptions) -> Result<Self, SourceError> {
        let decoded = DecodeReaderBytesBuilder::new()
            .encoding(Some(WINDOWS_1252))
            .build(input);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(true)
            .flexible(false)
            .from_reader(decoded);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
            return Err(SourceError::MissingHeader);
        }

        let triggers = resolve_triggers(&headers, &options.trigger_columns);

        Ok(Self {
            reader: Some(reader),
            headers,
            triggers,
            converter: options.converter.clone(),
            record: StringRecord::new(),
            values: Vec::new(),
            error: None,
            skipped: 0,
        })
    }

    /// Header names in file order
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Ordinals of the columns passed through the converter
    pub fn trigger_ordinals(&self) -> Vec<usize> {
        let mut ordinals: Vec<usize> = self.triggers.iter().copied().collect();
        ordinals.sort_unstable();
        ordinals
    }

    /// Number of records dropped for a field-count mismatch so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Decode the next well-formed record
    pub fn advance(&mut self) -> bool {
        let Some(reader) = self.reader.as_mut() else {
            return false;
        };

        loop {
            match reader.read_record(&mut self.record) {
                Ok(true) => break,
                Ok(false) => {
                    self.release();
                    return false;
                },
                Err(err) if matches!(err.kind(), ErrorKind::UnequalLengths { .. }) => {
                    self.skipped += 1;
                    trace!(error = %err, "Skipping malformed record");
                },
                Err(err) => {
                    self.fail(SourceError::Read(err));
                    return false;
                },
            }
        }

        let line = self.record.position().map(|p| p.line()).unwrap_or_default();
        let mut values = Vec::with_capacity(self.record.len());
        for (ordinal, raw) in self.record.iter().enumerate() {
            if !self.triggers.contains(&ordinal) {
                values.push(CopyValue::Text(raw.to_string()));
                continue;
            }
            match (self.converter)(raw) {
                Ok(value) => values.push(value),
                Err(source) => {
                    let column = self.headers.get(ordinal).cloned().unwrap_or_default();
                    self.fail(SourceError::Convert { line, column, source });
                    return false;
                },
            }
        }

        self.values = values;
        true
    }

    /// Values of the current row
    pub fn values(&self) -> &[CopyValue] {
        &self.values
    }

    pub fn last_error(&self) -> Option<&SourceError> {
        self.error.as_ref()
    }

    fn fail(&mut self, err: SourceError) {
        self.error = Some(err);
        self.release();
    }

    fn release(&mut self) {
        if self.reader.take().is_some() && self.skipped > 0 {
            debug!(skipped = self.skipped, "Skipped malformed records");
        }
    }
}

impl<R: Read> BulkSource for CopySource<R> {
    type Error = SourceError;

    fn advance(&mut self) -> bool {
        CopySource::advance(self)
    }

    fn values(&self) -> &[CopyValue] {
        CopySource::values(self)
    }

    fn last_error(&self) -> Option<&SourceError> {
        CopySource::last_error(self)
    }

    fn take_error(&mut self) -> Option<SourceError> {
        self.error.take()
    }
}

/// Map trigger column names to header ordinals; unknown names are ignored
fn resolve_triggers(headers: &[String], trigger_columns: &[String]) -> HashSet<usize> {
    trigger_columns
        .iter()
        .filter_map(|name| headers.iter().position(|h| h == name))
        .collect()
}

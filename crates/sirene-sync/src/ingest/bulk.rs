//! PostgreSQL COPY sink
//!
//! A [`BulkSource`] is pulled one row at a time on a blocking task; rows are
//! encoded in the COPY text format and streamed in chunks through
//! `PgConnection::copy_in_raw`. If the source reports an error once it stops
//! advancing, the COPY is aborted with that error and nothing is loaded.

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::PgConnection;
use std::error::Error as StdError;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Bytes buffered before a chunk is handed to the connection
const CHUNK_SIZE: usize = 256 * 1024;

/// Chunks in flight between the reading task and the connection
const CHUNK_QUEUE: usize = 4;

/// A typed cell value ready for loading
#[derive(Debug, Clone, PartialEq)]
pub enum CopyValue {
    Null,
    Text(String),
    Integer(i64),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl CopyValue {
    /// Append the COPY text representation of this value to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            CopyValue::Null => out.extend_from_slice(b"\\N"),
            CopyValue::Text(text) => escape_into(text, out),
            CopyValue::Integer(n) => out.extend_from_slice(n.to_string().as_bytes()),
            CopyValue::Date(d) => out.extend_from_slice(d.format("%Y-%m-%d").to_string().as_bytes()),
            CopyValue::Timestamp(ts) => {
                out.extend_from_slice(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string().as_bytes())
            },
        }
    }
}

/// Pull-based row source consumed by [`copy_from`]
pub trait BulkSource {
    type Error: StdError + Send + Sync + 'static;

    /// Make the next row available; `false` on exhaustion or unrecoverable error
    fn advance(&mut self) -> bool;

    /// Values of the row made available by the last successful `advance`
    fn values(&self) -> &[CopyValue];

    /// The unrecoverable error, if any
    fn last_error(&self) -> Option<&Self::Error>;

    /// Move the unrecoverable error out of the source
    fn take_error(&mut self) -> Option<Self::Error>;
}

/// Errors raised by the bulk-load sink
#[derive(Debug, Error)]
pub enum BulkError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Source error: {0}")]
    Source(#[source] Box<dyn StdError + Send + Sync>),

    #[error("Source task failed: {0}")]
    Task(String),
}

/// Encode one row, tab separated and newline terminated
pub fn encode_row(values: &[CopyValue], out: &mut Vec<u8>) {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(b'\t');
        }
        value.encode(out);
    }
    out.push(b'\n');
}

fn escape_into(text: &str, out: &mut Vec<u8>) {
    for byte in text.bytes() {
        match byte {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\t' => out.extend_from_slice(b"\\t"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            other => out.push(other),
        }
    }
}

/// Quote an identifier, keeping `schema.table` qualification
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Build the `COPY ... FROM STDIN` statement for `table` and `columns`
pub fn copy_statement(table: &str, columns: &[String]) -> String {
    let columns = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
        quote_ident(table),
        columns
    )
}

/// Bulk-load every row of `source` into `table`
///
/// Returns the number of rows the server reports as copied.
pub async fn copy_from<S>(
    conn: &mut PgConnection,
    table: &str,
    columns: &[String],
    mut source: S,
) -> Result<u64, BulkError>
where
    S: BulkSource + Send + 'static,
{
    let statement = copy_statement(table, columns);
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(CHUNK_QUEUE);

    let producer = tokio::task::spawn_blocking(move || {
        let mut buf = Vec::with_capacity(CHUNK_SIZE);
        let mut rows = 0u64;
        while source.advance() {
            encode_row(source.values(), &mut buf);
            rows += 1;
            if buf.len() >= CHUNK_SIZE && tx.blocking_send(std::mem::take(&mut buf)).is_err() {
                // The connection side went away; its error is reported there
                return Ok(rows);
            }
        }
        if let Some(err) = source.take_error() {
            return Err(err);
        }
        if !buf.is_empty() {
            let _ = tx.blocking_send(buf);
        }
        Ok(rows)
    });

    let mut copy = match conn.copy_in_raw(&statement).await {
        Ok(copy) => copy,
        Err(err) => {
            drop(rx);
            let _ = producer.await;
            return Err(err.into());
        },
    };

    while let Some(chunk) = rx.recv().await {
        if let Err(err) = copy.send(chunk).await {
            drop(rx);
            let _ = producer.await;
            return Err(err.into());
        }
    }

    match producer.await {
        Ok(Ok(rows)) => {
            let copied = copy.finish().await?;
            debug!(table, rows, copied, "COPY finished");
            Ok(copied)
        },
        Ok(Err(source_err)) => {
            if let Err(abort_err) = copy.abort(source_err.to_string()).await {
                warn!(table, error = %abort_err, "Failed to abort COPY");
            }
            Err(BulkError::Source(Box::new(source_err)))
        },
        Err(join_err) => {
            let _ = copy.abort("source task failed").await;
            Err(BulkError::Task(join_err.to_string()))
        },
    }
}

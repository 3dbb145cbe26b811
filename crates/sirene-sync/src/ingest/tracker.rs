//! Import history
//!
//! Append-only log of import attempts. File names with a successful row are
//! what the planner treats as already applied.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

use super::models::{HistoryEntry, ImportRecord};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable record of import attempts
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Names of every file with at least one successful import
    async fn successful_file_names(&self) -> Result<HashSet<String>, TrackerError>;

    async fn append(&self, entry: &HistoryEntry) -> Result<(), TrackerError>;

    /// Most recent records, newest first
    async fn recent(&self, limit: i64) -> Result<Vec<ImportRecord>, TrackerError>;
}

/// [`HistoryStore`] on the `history` table
#[derive(Debug, Clone)]
pub struct PgHistory {
    pool: PgPool,
}

impl PgHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for PgHistory {
    async fn successful_file_names(&self) -> Result<HashSet<String>, TrackerError> {
        let names: Vec<String> = sqlx::query_scalar("SELECT DISTINCT filename FROM history WHERE is_success = true")
            .fetch_all(&self.pool)
            .await?;
        Ok(names.into_iter().collect())
    }

    async fn append(&self, entry: &HistoryEntry) -> Result<(), TrackerError> {
        sqlx::query("INSERT INTO history (type, filename, err, is_success) VALUES ($1, $2, $3, $4)")
            .bind(&entry.file_type)
            .bind(&entry.file_name)
            .bind(&entry.error)
            .bind(entry.is_success)
            .execute(&self.pool)
            .await?;

        debug!(
            file = %entry.file_name,
            file_type = %entry.file_type,
            success = entry.is_success,
            "Recorded import attempt"
        );
        Ok(())
    }

    async fn recent(&self, limit: i64) -> Result<Vec<ImportRecord>, TrackerError> {
        let records = sqlx::query_as::<_, ImportRecord>(
            "SELECT id, datetime, filename, type, is_success, err FROM history ORDER BY id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

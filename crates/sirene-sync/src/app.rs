//! Wiring of the ingestion components from configuration

use sqlx::PgPool;
use std::sync::Arc;

use crate::config::{Config, ImportConfig};
use crate::ingest::convert::date_converter;
use crate::ingest::{
    CopyOptions, FileKind, HttpFetcher, HttpListing, ImportRegistry, ImportTarget, PgHistory, PipelineIngestor,
    UpdatePlanner, WorkerPool,
};

/// Import targets for stock and update files
pub fn build_registry(config: &ImportConfig) -> sirene_common::Result<ImportRegistry> {
    let options = CopyOptions {
        delimiter: config.delimiter_byte()?,
        trigger_columns: config.date_columns.clone(),
        converter: date_converter(),
    };

    Ok(ImportRegistry::new(options)
        .with_target(
            FileKind::Stock,
            ImportTarget {
                table: config.stock_table.clone(),
                truncate: true,
                update_sql: None,
            },
        )
        .with_target(
            FileKind::Update,
            ImportTarget {
                table: config.update_table.clone(),
                truncate: false,
                update_sql: config.update_sql.clone(),
            },
        ))
}

/// Build the planner with its HTTP and PostgreSQL collaborators
pub fn build_planner(config: &Config, db: PgPool) -> anyhow::Result<UpdatePlanner> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("sirene-sync/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let listing = HttpListing::new(client.clone(), &config.sync.index_url, config.sync.archive_regex()?)?;
    let fetcher = HttpFetcher::new(client, config.sync.download_timeout());
    let workers = WorkerPool::new(Arc::new(fetcher), config.sync.workers).with_progress(config.sync.show_progress);
    let ingestor = PipelineIngestor::new(workers, db.clone(), build_registry(&config.import)?);

    Ok(UpdatePlanner::new(
        Arc::new(PgHistory::new(db)),
        Arc::new(listing),
        Arc::new(ingestor),
        config.sync.download_path.clone(),
    ))
}

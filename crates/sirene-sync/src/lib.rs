//! Sirene Sync Library
//!
//! Keeps a PostgreSQL copy of the Sirene business registry in sync with the
//! archives published as open data.
//!
//! # Overview
//!
//! - **Planner**: each cycle diffs the publisher listing against the import
//!   history and fetches only archives without a successful import
//! - **Worker pool**: downloads and extracts archives concurrently
//! - **Copy adapter**: streams Windows-1252 delimited files into `COPY`
//! - **History**: one row per attempted archive, the source of idempotency
//!
//! # Example
//!
//! ```no_run
//! use sirene_sync::{app, config::Config, db};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let pool = db::create_pool(&config.database).await?;
//! db::run_migrations(&pool).await?;
//!
//! let planner = app::build_planner(&config, pool)?;
//! let report = planner.run_cycle(&CancellationToken::new()).await?;
//! println!("{} archives imported", report.succeeded());
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod config;
pub mod db;
pub mod ingest;

pub use config::Config;

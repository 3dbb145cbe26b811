//! Data ingestion infrastructure
//!
//! # Architecture
//!
//! - **planner**: diffs the publisher listing against the import history and
//!   drives one update cycle
//! - **scheduler**: periodic trigger with a skip-if-busy guard
//! - **pool**: bounded download/extract workers with error aggregation
//! - **pipeline**: pool followed by sequential per-file imports
//! - **copy_source**: streaming Windows-1252 delimited reader feeding COPY
//! - **bulk**: PostgreSQL COPY sink
//! - **import**: prepare/copy/update per file kind
//! - **listing**, **download**, **decompression**: publisher I/O
//! - **tracker**: import history store
//! - **progress**: download and extraction progress reporting

pub mod bulk;
pub mod convert;
pub mod copy_source;
pub mod decompression;
pub mod download;
pub mod import;
pub mod listing;
pub mod models;
pub mod pipeline;
pub mod planner;
pub mod pool;
pub mod progress;
pub mod scheduler;
pub mod tracker;

pub use copy_source::{CopyOptions, CopySource, SourceError};
pub use download::{ArchiveFetcher, HttpFetcher};
pub use import::{FileImport, ImportRegistry, ImportTarget, TableImport};
pub use listing::{HttpListing, RemoteListing};
pub use models::{ExtractedFile, FileKind, HistoryEntry, ImportOutcome, ImportRecord, RemoteArchive};
pub use pipeline::{Ingestor, PipelineIngestor};
pub use planner::{CycleReport, PlanPreview, UpdatePlanner};
pub use pool::{ArchiveOutcome, PoolReport, WorkerPool};
pub use scheduler::{Scheduler, SchedulerStats};
pub use tracker::{HistoryStore, PgHistory};

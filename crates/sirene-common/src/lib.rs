//! Sirene Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, environment parsing and logging setup for the
//! sirene-sync workspace members.
//!
//! # Example
//!
//! ```no_run
//! use sirene_common::env::env_or;
//! use sirene_common::Result;
//!
//! fn workers() -> Result<usize> {
//!     env_or("SIRENE_WORKERS", 4)
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, SireneError};

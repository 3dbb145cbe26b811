//! Environment variable helpers
//!
//! Unset variables fall back to their defaults; set but unparsable variables
//! are reported instead of being silently replaced.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::{Result, SireneError};

/// Read `key` and parse it, falling back to `default` when unset
pub fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_var(key, &raw),
        Err(_) => Ok(default),
    }
}

/// Read `key` as an optional value
pub fn env_opt<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => parse_var(key, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

/// Read `key` as a comma-separated list, falling back to `default` when unset
pub fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => split_list(&raw),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Parse a raw variable value, trimming surrounding whitespace
pub fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| SireneError::InvalidVar {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Split a comma-separated list, dropping empty items
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

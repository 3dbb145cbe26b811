//! Column value conversion for trigger columns

use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;
use thiserror::Error;

use super::bulk::CopyValue;

/// Conversion applied to the raw text of a trigger column
pub type Converter = Arc<dyn Fn(&str) -> Result<CopyValue, ConvertError> + Send + Sync>;

/// A raw value that could not be converted
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot convert {value:?} to {expected}")]
pub struct ConvertError {
    pub value: String,
    pub expected: &'static str,
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%d/%m/%Y"];

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y%m%d%H%M%S",
];

/// Parse a date or timestamp; empty input is NULL
pub fn parse_date(raw: &str) -> Result<CopyValue, ConvertError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(CopyValue::Null);
    }

    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(CopyValue::Timestamp(ts));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Ok(CopyValue::Date(date));
        }
    }

    Err(ConvertError {
        value: raw.to_string(),
        expected: "date",
    })
}

/// Parse an integer; empty input is NULL
pub fn parse_integer(raw: &str) -> Result<CopyValue, ConvertError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(CopyValue::Null);
    }
    trimmed
        .parse()
        .map(CopyValue::Integer)
        .map_err(|_| ConvertError {
            value: raw.to_string(),
            expected: "integer",
        })
}

pub fn date_converter() -> Converter {
    Arc::new(parse_date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_formats() {
        let expected = CopyValue::Date(NaiveDate::from_ymd_opt(2020, 2, 2).unwrap());
        assert_eq!(parse_date("2020-02-02").unwrap(), expected);
        assert_eq!(parse_date("20200202").unwrap(), expected);
        assert_eq!(parse_date("02/02/2020").unwrap(), expected);
    }

    #[test]
    fn test_parse_timestamp() {
        let value = parse_date("2017-12-31T23:59:59").unwrap();
        let expected = NaiveDate::from_ymd_opt(2017, 12, 31)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        assert_eq!(value, CopyValue::Timestamp(expected));
    }

    #[test]
    fn test_empty_is_null() {
        assert_eq!(parse_date("  ").unwrap(), CopyValue::Null);
        assert_eq!(parse_integer("").unwrap(), CopyValue::Null);
    }

    #[test]
    fn test_invalid_values() {
        let err = parse_date("2020-13-45").unwrap_err();
        assert_eq!(err.expected, "date");
        assert!(parse_integer("12a").is_err());
    }
}

//! Scalar column conversion for source records.
//!
//! Empty text means "unknown" and becomes `None`, except for price which the source
//! convention treats as free (0.0) when blank.

use chrono::NaiveDate;

use crate::database_ops::error::RecordError;

/// Trimmed text, or `None` when blank.
pub fn text(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Integer column. Accepts integral floats such as `"12.0"` written by dataframe exports.
pub fn integer(field: &'static str, raw: Option<&str>) -> Result<Option<i64>, RecordError> {
    let Some(value) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(n) = value.parse::<i64>() {
        return Ok(Some(n));
    }
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            Ok(Some(f as i64))
        }
        _ => Err(RecordError::invalid(field, value)),
    }
}

pub fn price(raw: Option<&str>) -> Result<f64, RecordError> {
    let Some(value) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(0.0);
    };
    let cleaned = value.trim_start_matches('$');
    match cleaned.parse::<f64>() {
        Ok(p) if p.is_finite() && p >= 0.0 => Ok(p),
        _ => Err(RecordError::invalid("Price", value)),
    }
}

/// Platform flags are stored as 0/1; anything that is not an explicit yes is 0.
pub fn flag(raw: Option<&str>) -> i16 {
    let v = raw.map(|s| s.trim().to_ascii_lowercase()).unwrap_or_default();
    i16::from(matches!(v.as_str(), "1" | "true" | "t" | "yes" | "y"))
}

const DATE_FORMATS: [&str; 4] = ["%b %d, %Y", "%d %b, %Y", "%Y-%m-%d", "%B %d, %Y"];

pub fn release_date(raw: Option<&str>) -> Result<Option<NaiveDate>, RecordError> {
    let Some(value) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(value, fmt) {
            return Ok(Some(d));
        }
    }
    // Month-only dates ("Oct 2008") pin to the first day.
    for fmt in ["%d %b %Y", "%d %B %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(&format!("1 {value}"), fmt) {
            return Ok(Some(d));
        }
    }
    Err(RecordError::invalid("Release date", value))
}

pub fn bounded(
    field: &'static str,
    value: Option<i64>,
    min: i64,
    max: i64,
) -> Result<Option<i64>, RecordError> {
    match value {
        Some(v) if v < min || v > max => Err(RecordError::OutOfRange {
            field,
            value: v,
            min,
            max,
        }),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_price_means_free_but_garbage_fails() {
        assert_eq!(price(None).unwrap(), 0.0);
        assert_eq!(price(Some("  ")).unwrap(), 0.0);
        assert_eq!(price(Some("19.99")).unwrap(), 19.99);
        assert_eq!(price(Some("$4.5")).unwrap(), 4.5);
        assert!(price(Some("free")).is_err());
        assert!(price(Some("-1")).is_err());
    }

    #[test]
    fn integers_keep_unknown_distinct_from_zero() {
        assert_eq!(integer("Peak CCU", None).unwrap(), None);
        assert_eq!(integer("Peak CCU", Some("")).unwrap(), None);
        assert_eq!(integer("Peak CCU", Some("0")).unwrap(), Some(0));
        assert_eq!(integer("Peak CCU", Some("1024.0")).unwrap(), Some(1024));
        let err = integer("Peak CCU", Some("12.5")).unwrap_err();
        assert!(err.to_string().contains("Peak CCU"));
    }

    #[test]
    fn flags_collapse_to_zero_or_one() {
        assert_eq!(flag(Some("True")), 1);
        assert_eq!(flag(Some("1")), 1);
        assert_eq!(flag(Some("False")), 0);
        assert_eq!(flag(Some("")), 0);
        assert_eq!(flag(None), 0);
    }

    #[test]
    fn release_dates_accept_store_formats() {
        let oct21 = NaiveDate::from_ymd_opt(2008, 10, 21);
        assert_eq!(release_date(Some("Oct 21, 2008")).unwrap(), oct21);
        assert_eq!(release_date(Some("21 Oct, 2008")).unwrap(), oct21);
        assert_eq!(release_date(Some("2008-10-21")).unwrap(), oct21);
        assert_eq!(
            release_date(Some("Oct 2008")).unwrap(),
            NaiveDate::from_ymd_opt(2008, 10, 1)
        );
        assert_eq!(release_date(Some("")).unwrap(), None);
        assert!(release_date(Some("coming soon")).is_err());
    }

    #[test]
    fn bounded_rejects_out_of_range_scores() {
        assert_eq!(bounded("Metacritic score", Some(88), 0, 100).unwrap(), Some(88));
        assert_eq!(bounded("Metacritic score", None, 0, 100).unwrap(), None);
        assert!(bounded("Metacritic score", Some(101), 0, 100).is_err());
    }
}

//! Exchange records consumed and produced by the tracker

pub mod funding;
pub mod status;
pub mod trade;

pub use funding::*;
pub use status::*;
pub use trade::*;

use chrono::{DateTime, TimeZone, Utc};

/// Convert an exchange millisecond timestamp to UTC, if it is in range
pub fn ms_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Numeric field at `index` of a raw exchange array
pub(crate) fn raw_f64(raw: &[serde_json::Value], index: usize, field: &str) -> Result<f64, String> {
    raw.get(index)
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| format!("raw record has no numeric {} at index {}", field, index))
}

pub(crate) fn raw_i64(raw: &[serde_json::Value], index: usize, field: &str) -> Result<i64, String> {
    let value = raw
        .get(index)
        .ok_or_else(|| format!("raw record has no {} at index {}", field, index))?;
    // whole-valued floats (`1700000000000.0`) are accepted, nothing is truncated
    value
        .as_i64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f as i64)
        })
        .ok_or_else(|| format!("raw record field {} at index {} is not an integer", field, index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_i64_accepts_whole_numbers_only() {
        let raw = [
            json!(1_700_000_000_000_i64),
            json!(1_700_000_000_000.0),
            json!(1_700_000_000_000.5),
            json!(1e300),
            json!("17"),
        ];

        assert_eq!(raw_i64(&raw, 0, "ts"), Ok(1_700_000_000_000));
        assert_eq!(raw_i64(&raw, 1, "ts"), Ok(1_700_000_000_000));
        assert!(raw_i64(&raw, 2, "ts").is_err());
        assert!(raw_i64(&raw, 3, "ts").is_err());
        assert!(raw_i64(&raw, 4, "ts").is_err());
        assert!(raw_i64(&raw, 5, "ts").is_err());
    }
}

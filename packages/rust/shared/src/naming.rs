//! Naming and timestamp helpers shared by the writers and the extractor.
//!
//! Everything that ends up in a file name goes through here so that replays
//! of the same input always produce the same keys.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

/// Log file timestamp prefix format (`20250102T000000Z`).
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Prefix used when an entity carries no parsable business date.
pub const UNKNOWN_TIMESTAMP: &str = "unknown";

/// Default maximum slug length in characters.
pub const SLUG_MAX_LEN: usize = 100;

/// Lowercase, drop punctuation, join whitespace runs with `_`, truncate.
pub fn slugify(text: &str, max_len: usize) -> String {
    static PUNCT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^\w\s]").expect("valid regex"));
    static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    let lower = text.to_lowercase();
    let stripped = PUNCT_RE.replace_all(&lower, "");
    let joined = SPACE_RE.replace_all(&stripped, "_");
    joined.trim_matches('_').chars().take(max_len).collect()
}

/// Directory name of a bill: the identifier with whitespace removed.
///
/// Path separators are replaced so an identifier can never escape its session.
pub fn bill_dir_name(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .collect()
}

/// Parse an ISO 8601 value keeping its wall-clock reading.
///
/// Accepts RFC 3339 (any offset), naive date-times with `T` or a space,
/// the compact log format and plain dates.
pub fn parse_wall_clock(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt);
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, LOG_TIMESTAMP_FORMAT) {
        return Some(dt);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parse an ISO 8601 value into UTC. Naive values are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value.trim()) {
        return Some(dt.with_timezone(&Utc));
    }
    parse_wall_clock(value).map(|naive| naive.and_utc())
}

/// Log file prefix for a business date, or [`UNKNOWN_TIMESTAMP`].
pub fn log_timestamp(date: Option<&str>) -> String {
    date.and_then(parse_wall_clock)
        .map(|dt| dt.format(LOG_TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| UNKNOWN_TIMESTAMP.to_string())
}

/// Compact UTC stamp used in error record file names.
pub fn compact_stamp(at: DateTime<Utc>) -> String {
    at.format(LOG_TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn slugify_strips_punctuation_and_joins_whitespace() {
        assert_eq!(
            slugify("Referred to Committee on Ways & Means.", SLUG_MAX_LEN),
            "referred_to_committee_on_ways_means"
        );
        assert_eq!(slugify("  Passed -- 3rd reading ", SLUG_MAX_LEN), "passed_3rd_reading");
        assert_eq!(slugify("!!!", SLUG_MAX_LEN), "");
    }

    #[test]
    fn slugify_truncates_on_char_boundary() {
        let slug = slugify("Über lange Beschreibung", 4);
        assert_eq!(slug, "über");
    }

    #[test]
    fn bill_dir_name_removes_whitespace() {
        assert_eq!(bill_dir_name("HB 1"), "HB1");
        assert_eq!(bill_dir_name(" H.R. 999 "), "H.R.999");
        assert_eq!(bill_dir_name("SF 12/A"), "SF12-A");
    }

    #[test]
    fn log_timestamp_formats() {
        assert_eq!(log_timestamp(Some("2025-01-02")), "20250102T000000Z");
        assert_eq!(log_timestamp(Some("2025-01-02T14:30:05")), "20250102T143005Z");
        assert_eq!(
            log_timestamp(Some("2025-01-02T14:30:05-05:00")),
            "20250102T143005Z"
        );
        assert_eq!(log_timestamp(Some("soon")), "unknown");
        assert_eq!(log_timestamp(None), "unknown");
    }

    #[test]
    fn parse_timestamp_normalises_to_utc() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 2, 19, 30, 5).unwrap();
        assert_eq!(parse_timestamp("2025-01-02T14:30:05-05:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-02 19:30:05"), Some(expected));
        assert_eq!(parse_timestamp("20250102T193005Z"), Some(expected));
        assert_eq!(parse_timestamp(""), None);
    }
}

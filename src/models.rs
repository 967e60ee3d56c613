use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;

/// Weather station as persisted in the `stations` table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    /// Provider payload the station was created from
    pub metadata: Option<Value>,
    /// Watermark: timestamp of the latest ingested measurement
    pub last_synced_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sensor {
    pub id: String,
    pub station_id: String,
    pub name: String,
    /// Free-form tag such as "temperature" or "rain"
    pub sensor_type: String,
    pub unit: Option<String>,
    pub position: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub quality: Option<String>,
    pub raw_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub station_count: u64,
    pub enabled_station_count: u64,
    pub sensor_count: u64,
    pub measurement_count: u64,
    pub storage_size_bytes: u64,
}

/// `instant - span`, clamped to the earliest representable instant instead of overflowing
pub fn saturating_sub(instant: DateTime<Utc>, span: Option<Duration>) -> DateTime<Utc> {
    span.and_then(|span| instant.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn days_before(instant: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    saturating_sub(instant, Duration::try_days(days))
}

/// RFC 3339 in UTC, e.g. `2024-03-01T10:15:00+00:00`. Lexical order matches chronological order.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

const OFFSET_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%z",
];

const NAIVE_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a provider timestamp. Strings without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_parse_naive_assumes_utc() {
        assert_eq!(
            parse_timestamp("2024-03-01 10:15:00"),
            Some(utc("2024-03-01T10:15:00Z"))
        );
        assert_eq!(
            parse_timestamp("2024-03-01T10:15:00"),
            Some(utc("2024-03-01T10:15:00Z"))
        );
        assert_eq!(parse_timestamp("2024-03-01"), Some(utc("2024-03-01T00:00:00Z")));
    }

    #[test]
    fn test_parse_with_offset_normalizes_to_utc() {
        assert_eq!(
            parse_timestamp("2024-03-01T12:15:00+02:00"),
            Some(utc("2024-03-01T10:15:00Z"))
        );
        assert_eq!(
            parse_timestamp("2024-03-01 12:15:00+02:00"),
            Some(utc("2024-03-01T10:15:00Z"))
        );
    }

    #[test]
    fn test_days_before_clamps_instead_of_overflowing() {
        let now = utc("2024-03-08T00:00:00Z");
        assert_eq!(days_before(now, 7), utc("2024-03-01T00:00:00Z"));
        assert_eq!(days_before(now, 1_000_000_000), DateTime::<Utc>::MIN_UTC);
        assert_eq!(days_before(now, i64::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_format_is_utc_rfc3339() {
        let ts = utc("2024-03-01T12:15:00+02:00");
        assert_eq!(format_timestamp(&ts), "2024-03-01T10:15:00+00:00");
    }
}

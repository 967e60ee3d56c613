//! Station and sensor registration plus the incremental sync loop.

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::client::StationApi;
use crate::config::StationConfig;
use crate::error::{CollectorError, DatabaseError};
use crate::models::{days_before, parse_timestamp, saturating_sub, Measurement, Sensor, Station};
use crate::store::MeasurementStore;

/// Overlap subtracted from the watermark so late-arriving points are picked up
pub const SYNC_OVERLAP_SECS: i64 = 3600;

pub const UNNAMED_STATION: &str = "Unnamed Station";

/// sensor id -> measurements newly stored for it
pub type SyncCounts = BTreeMap<String, usize>;

pub struct StationRegistry<A: StationApi> {
    api: A,
    store: MeasurementStore,
    backfill_days: i64,
}

/// Number, or a string holding a number
fn json_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// String, or a number rendered as one
fn json_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn station_name(configured: Option<&str>, detail: &Value) -> String {
    if let Some(name) = configured.filter(|n| !n.trim().is_empty()) {
        return name.to_string();
    }
    match detail.get("name") {
        Some(Value::String(name)) if !name.is_empty() => name.clone(),
        // Some API versions return {"original": ..., "custom": ...}
        Some(Value::Object(names)) => ["custom", "original"]
            .iter()
            .filter_map(|key| names.get(*key).and_then(json_string))
            .next()
            .unwrap_or_else(|| UNNAMED_STATION.to_string()),
        _ => UNNAMED_STATION.to_string(),
    }
}

/// Build the station row from configuration and the `station/{id}` payload.
pub fn station_from_detail(config: &StationConfig, detail: &Value) -> Station {
    let position = detail.get("position");
    let geo = position
        .and_then(|p| p.pointer("/geo/coordinates"))
        .and_then(Value::as_array);
    // GeoJSON order is [longitude, latitude]
    let longitude = geo
        .and_then(|c| c.first())
        .and_then(json_f64)
        .or_else(|| position.and_then(|p| p.get("longitude")).and_then(json_f64));
    let latitude = geo
        .and_then(|c| c.get(1))
        .and_then(json_f64)
        .or_else(|| position.and_then(|p| p.get("latitude")).and_then(json_f64));
    let elevation = position.and_then(|p| p.get("altitude")).and_then(json_f64);

    Station {
        id: config.id.clone(),
        name: station_name(config.name.as_deref(), detail),
        latitude,
        longitude,
        elevation,
        metadata: Some(detail.clone()),
        last_synced_at: None,
        enabled: config.enabled,
    }
}

/// Build a sensor row from one `station/{id}/sensors` entry. Entries without an id are rejected.
pub fn sensor_from_payload(station_id: &str, raw: &Value) -> Option<Sensor> {
    let id = raw.get("id").and_then(json_string)?;
    Some(Sensor {
        name: raw
            .get("name")
            .and_then(json_string)
            .unwrap_or_else(|| format!("Sensor {}", id)),
        sensor_type: raw
            .get("type")
            .and_then(json_string)
            .unwrap_or_else(|| "unknown".to_string()),
        unit: raw.get("unit").and_then(json_string),
        position: raw.get("position").and_then(json_string),
        metadata: Some(raw.clone()),
        station_id: station_id.to_string(),
        id,
    })
}

fn point_to_measurement(sensor_id: &str, point: &Value) -> Option<Measurement> {
    let raw_timestamp = point
        .get("date_utc")
        .or_else(|| point.get("date"))
        .and_then(Value::as_str);
    let value = point.get("value").and_then(json_f64);

    let (Some(raw_timestamp), Some(value)) = (raw_timestamp, value) else {
        debug!("Skipping data point without timestamp or value: {}", point);
        return None;
    };
    if !value.is_finite() {
        debug!("Skipping non-finite value at {}", raw_timestamp);
        return None;
    }
    let Some(timestamp) = parse_timestamp(raw_timestamp) else {
        warn!(
            "Skipping data point with unparseable timestamp '{}' for sensor {}",
            raw_timestamp, sensor_id
        );
        return None;
    };

    Some(Measurement {
        sensor_id: sensor_id.to_string(),
        timestamp,
        value,
        quality: point.get("quality").and_then(json_string),
        raw_data: Some(point.clone()),
    })
}

/// Measurements from a sensor data payload, in the order the API returned them.
pub fn measurements_from_payload(sensor_id: &str, payload: &Value) -> Vec<Measurement> {
    let points = match payload {
        Value::Object(map) => map.get("data").and_then(Value::as_array),
        Value::Array(items) => Some(items),
        _ => None,
    };
    let Some(points) = points else {
        debug!("No data array in payload for sensor {}", sensor_id);
        return Vec::new();
    };
    points
        .iter()
        .filter_map(|point| point_to_measurement(sensor_id, point))
        .collect()
}

impl<A: StationApi> StationRegistry<A> {
    pub fn new(api: A, store: MeasurementStore, backfill_days: i64) -> Self {
        Self {
            api,
            store,
            backfill_days,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn store(&self) -> &MeasurementStore {
        &self.store
    }

    /// Stations visible to the account
    pub fn discover_stations(&self) -> Result<Vec<Value>, CollectorError> {
        let stations = self.api.get_stations()?;
        info!("Discovered {} stations", stations.len());
        Ok(stations)
    }

    /// Register configured stations missing from the store and reconcile the
    /// enabled flag of the rest. A failure on one station is logged and does not stop the others.
    pub fn initialize_stations(&self, configured: &[StationConfig]) -> Result<(), CollectorError> {
        for config in configured {
            if let Err(e) = self.initialize_station(config) {
                error!("Failed to initialize station {}: {}", config.id, e);
            }
        }
        Ok(())
    }

    fn initialize_station(&self, config: &StationConfig) -> Result<(), CollectorError> {
        let Some(mut existing) = self.store.get_station(&config.id)? else {
            return self.register_station(config);
        };
        if existing.enabled != config.enabled {
            info!(
                "Station {}: enabled {} -> {}",
                config.id, existing.enabled, config.enabled
            );
            existing.enabled = config.enabled;
            self.store.upsert_station(&existing)?;
        }
        Ok(())
    }

    fn register_station(&self, config: &StationConfig) -> Result<(), CollectorError> {
        info!("Registering new station {}", config.id);
        let detail = self.api.get_station(&config.id)?;
        let station = station_from_detail(config, &detail);
        self.store.upsert_station(&station)?;

        let mut watermark = station.last_synced_at;
        let sensors = self.api.get_station_sensors(&config.id)?;
        info!("Station {}: found {} sensors", config.id, sensors.len());

        for raw in &sensors {
            let Some(sensor) = sensor_from_payload(&config.id, raw) else {
                warn!("Station {}: skipping sensor without id", config.id);
                continue;
            };
            if let Err(e) = self.register_sensor(&sensor, &mut watermark) {
                error!(
                    "Station {}: failed to register sensor {}: {}",
                    config.id, sensor.id, e
                );
            }
        }
        Ok(())
    }

    /// Store a newly discovered sensor and backfill it. The backfill runs even when the
    /// station is configured disabled, so history is in place once it is enabled.
    fn register_sensor(
        &self,
        sensor: &Sensor,
        watermark: &mut Option<DateTime<Utc>>,
    ) -> Result<(), CollectorError> {
        self.store.upsert_sensor(sensor)?;
        if self.backfill_days <= 0 {
            return Ok(());
        }

        let end = Utc::now();
        let start = days_before(end, self.backfill_days);
        match self.ingest_sensor(&sensor.station_id, &sensor.id, &start, &end, watermark) {
            Ok(count) => info!(
                "Backfilled {} measurements for sensor {} ({} days)",
                count, sensor.id, self.backfill_days
            ),
            Err(e) => error!("Backfill failed for sensor {}: {}", sensor.id, e),
        }
        Ok(())
    }

    /// Move the stored watermark to `candidate` unless that would move it backwards.
    fn advance_watermark(
        &self,
        station_id: &str,
        current: &mut Option<DateTime<Utc>>,
        candidate: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        if let Some(existing) = current {
            if candidate <= *existing {
                debug!(
                    "Station {}: watermark stays at {} (last point {})",
                    station_id, existing, candidate
                );
                return Ok(());
            }
        }
        self.store.update_station_watermark(station_id, &candidate)?;
        *current = Some(candidate);
        Ok(())
    }

    fn ingest_sensor(
        &self,
        station_id: &str,
        sensor_id: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        watermark: &mut Option<DateTime<Utc>>,
    ) -> Result<usize, CollectorError> {
        let payload = self.api.get_sensor_data(station_id, sensor_id, start, end)?;
        let batch = measurements_from_payload(sensor_id, &payload);
        let Some(last) = batch.last() else {
            debug!("Sensor {}: no data between {} and {}", sensor_id, start, end);
            return Ok(0);
        };

        let inserted = self.store.insert_measurements(&batch)?;
        self.advance_watermark(station_id, watermark, last.timestamp)?;
        debug!(
            "Sensor {}: {} points, {} new",
            sensor_id,
            batch.len(),
            inserted
        );
        Ok(inserted)
    }

    fn default_start(&self, station: &Station) -> DateTime<Utc> {
        match station.last_synced_at {
            Some(watermark) => {
                saturating_sub(watermark, Duration::try_seconds(SYNC_OVERLAP_SECS))
            }
            None => days_before(Utc::now(), self.backfill_days.max(0)),
        }
    }

    /// Fetch and store new data for every sensor of a station.
    ///
    /// Without explicit bounds the window is `[watermark - 1h, now]`, or the
    /// backfill window when the station has never synced. Disabled and unknown
    /// stations yield an empty map without touching the API.
    pub fn sync_station_data(
        &self,
        station_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<SyncCounts, CollectorError> {
        let Some(station) = self.store.get_station(station_id)? else {
            error!("Station {} not found in database", station_id);
            return Ok(SyncCounts::new());
        };
        if !station.enabled {
            info!("Station {} is disabled, skipping", station_id);
            return Ok(SyncCounts::new());
        }

        let end = end.unwrap_or_else(Utc::now);
        let start = start.unwrap_or_else(|| self.default_start(&station));
        if start > end {
            warn!(
                "Station {}: empty window {} > {}, nothing to fetch",
                station_id, start, end
            );
            return Ok(SyncCounts::new());
        }

        let sensors = self.store.list_sensors_for_station(station_id)?;
        if sensors.is_empty() {
            warn!("Station {} has no sensors", station_id);
            return Ok(SyncCounts::new());
        }

        info!(
            "Syncing station {} ({} sensors) from {} to {}",
            station_id,
            sensors.len(),
            start,
            end
        );

        let mut watermark = station.last_synced_at;
        let mut counts = SyncCounts::new();
        for sensor in &sensors {
            let count = match self.ingest_sensor(station_id, &sensor.id, &start, &end, &mut watermark) {
                Ok(count) => count,
                Err(e) => {
                    error!(
                        "Station {}: sync failed for sensor {}: {}",
                        station_id, sensor.id, e
                    );
                    0
                }
            };
            counts.insert(sensor.id.clone(), count);
        }

        info!(
            "Station {}: {} new measurements",
            station_id,
            counts.values().sum::<usize>()
        );
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(name: Option<&str>) -> StationConfig {
        StationConfig {
            id: "00208E6F".to_string(),
            name: name.map(str::to_string),
            enabled: true,
        }
    }

    #[test]
    fn test_station_name_precedence() {
        let detail = json!({"name": {"original": "00208E6F", "custom": "Orchard"}});
        assert_eq!(station_from_detail(&config(Some("Mine")), &detail).name, "Mine");
        assert_eq!(station_from_detail(&config(None), &detail).name, "Orchard");
        assert_eq!(
            station_from_detail(&config(None), &json!({"name": "Plain"})).name,
            "Plain"
        );
        assert_eq!(
            station_from_detail(&config(None), &json!({})).name,
            UNNAMED_STATION
        );
    }

    #[test]
    fn test_station_coordinates() {
        let geo = json!({"position": {"geo": {"coordinates": [16.37, 48.21]}, "altitude": 171}});
        let station = station_from_detail(&config(None), &geo);
        assert_eq!(station.longitude, Some(16.37));
        assert_eq!(station.latitude, Some(48.21));
        assert_eq!(station.elevation, Some(171.0));

        let flat = json!({"position": {"latitude": 48.0, "longitude": "16.0"}});
        let station = station_from_detail(&config(None), &flat);
        assert_eq!(station.latitude, Some(48.0));
        assert_eq!(station.longitude, Some(16.0));
        assert_eq!(station.elevation, None);
        assert_eq!(station.metadata, Some(flat));
    }

    #[test]
    fn test_sensor_defaults() {
        let sensor = sensor_from_payload("S1", &json!({"id": 506})).unwrap();
        assert_eq!(sensor.id, "506");
        assert_eq!(sensor.name, "Sensor 506");
        assert_eq!(sensor.sensor_type, "unknown");
        assert_eq!(sensor.unit, None);
        assert_eq!(sensor.station_id, "S1");

        assert!(sensor_from_payload("S1", &json!({"name": "HC Air temperature"})).is_none());
    }

    #[test]
    fn test_points_missing_fields_are_skipped() {
        let payload = json!({"data": [
            {"date_utc": "2024-03-01 10:00:00", "value": 1.5, "quality": "good"},
            {"value": 2.0},
            {"date": "2024-03-01 10:10:00"},
            {"date": "2024-03-01 10:15:00", "value": "3.25"},
            {"date_utc": "not a date", "value": 4.0},
            {"date_utc": "2024-03-01 10:20:00", "value": null}
        ]});

        let batch = measurements_from_payload("s1", &payload);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].value, 1.5);
        assert_eq!(batch[0].quality.as_deref(), Some("good"));
        assert_eq!(batch[1].value, 3.25);
        assert_eq!(batch[1].quality, None);
        assert_eq!(
            batch[1].timestamp,
            parse_timestamp("2024-03-01T10:15:00Z").unwrap()
        );
    }

    #[test]
    fn test_utc_field_preferred_over_local() {
        let payload = json!({"data": [
            {"date": "2024-03-01 12:00:00", "date_utc": "2024-03-01 10:00:00", "value": 7}
        ]});
        let batch = measurements_from_payload("s1", &payload);
        assert_eq!(
            batch[0].timestamp,
            parse_timestamp("2024-03-01T10:00:00Z").unwrap()
        );
    }

    #[test]
    fn test_payload_without_data() {
        assert!(measurements_from_payload("s1", &Value::Null).is_empty());
        assert!(measurements_from_payload("s1", &json!({"data": null})).is_empty());
    }
}

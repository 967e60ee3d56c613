//! SQLite persistence for stations, sensors and measurements.
//!
//! Every operation opens its own connection, runs in a single transaction
//! where it writes, and drops the connection on return.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::db::{init_schema, open_database_with_path};
use crate::error::DatabaseError;
use crate::models::{format_timestamp, parse_timestamp, Measurement, Sensor, Station, StoreStats};
use crate::queries::{measurements, sensors, stations};

#[derive(Debug, Clone)]
pub struct MeasurementStore {
    path: PathBuf,
}

fn parse_json(column: &'static str, raw: Option<String>) -> Result<Option<Value>, DatabaseError> {
    match raw {
        None => Ok(None),
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| DatabaseError::Corrupt {
                column,
                message: e.to_string(),
            }),
    }
}

fn parse_stored_timestamp(column: &'static str, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    parse_timestamp(raw).ok_or_else(|| DatabaseError::Corrupt {
        column,
        message: format!("unparseable timestamp '{}'", raw),
    })
}

struct StationRow {
    id: String,
    name: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    elevation: Option<f64>,
    metadata: Option<String>,
    last_updated: Option<String>,
    enabled: i64,
}

impl StationRow {
    fn read(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            elevation: row.get("elevation")?,
            metadata: row.get("metadata")?,
            last_updated: row.get("last_updated")?,
            enabled: row.get("enabled")?,
        })
    }

    fn into_station(self) -> Result<Station, DatabaseError> {
        let last_synced_at = match self.last_updated.as_deref() {
            Some(raw) => Some(parse_stored_timestamp("stations.last_updated", raw)?),
            None => None,
        };
        Ok(Station {
            id: self.id,
            name: self.name,
            latitude: self.latitude,
            longitude: self.longitude,
            elevation: self.elevation,
            metadata: parse_json("stations.metadata", self.metadata)?,
            last_synced_at,
            enabled: self.enabled != 0,
        })
    }
}

struct SensorRow {
    id: String,
    station_id: String,
    name: String,
    sensor_type: String,
    unit: Option<String>,
    position: Option<String>,
    metadata: Option<String>,
}

impl SensorRow {
    fn read(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            station_id: row.get("station_id")?,
            name: row.get("name")?,
            sensor_type: row.get("type")?,
            unit: row.get("unit")?,
            position: row.get("position")?,
            metadata: row.get("metadata")?,
        })
    }

    fn into_sensor(self) -> Result<Sensor, DatabaseError> {
        Ok(Sensor {
            id: self.id,
            station_id: self.station_id,
            name: self.name,
            sensor_type: self.sensor_type,
            unit: self.unit,
            position: self.position,
            metadata: parse_json("sensors.metadata", self.metadata)?,
        })
    }
}

struct MeasurementRow {
    sensor_id: String,
    timestamp: String,
    value: f64,
    quality: Option<String>,
    raw_data: Option<String>,
}

impl MeasurementRow {
    fn read(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            sensor_id: row.get("sensor_id")?,
            timestamp: row.get("timestamp")?,
            value: row.get("value")?,
            quality: row.get("quality")?,
            raw_data: row.get("raw_data")?,
        })
    }

    fn into_measurement(self) -> Result<Measurement, DatabaseError> {
        Ok(Measurement {
            timestamp: parse_stored_timestamp("measurements.timestamp", &self.timestamp)?,
            sensor_id: self.sensor_id,
            value: self.value,
            quality: self.quality,
            raw_data: parse_json("measurements.raw_data", self.raw_data)?,
        })
    }
}

fn query_count(conn: &Connection, sql: &str) -> Result<u64, DatabaseError> {
    let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

impl MeasurementStore {
    /// Open (creating if needed) the database at `path` and ensure the schema exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, DatabaseError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::Directory(parent.to_path_buf(), e))?;
            }
        }

        let store = Self { path };
        store.initialize()?;
        info!("Database ready at {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, DatabaseError> {
        open_database_with_path(&self.path)
    }

    pub fn initialize(&self) -> Result<(), DatabaseError> {
        let mut conn = self.connect()?;
        init_schema(&mut conn)
    }

    pub fn upsert_station(&self, station: &Station) -> Result<(), DatabaseError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(&stations::upsert(station), [])?;
        tx.commit()?;
        debug!("Upserted station {}", station.id);
        Ok(())
    }

    pub fn get_station(&self, station_id: &str) -> Result<Option<Station>, DatabaseError> {
        let conn = self.connect()?;
        let row = conn
            .query_row(&stations::select_by_id(station_id), [], StationRow::read)
            .optional()?;
        row.map(StationRow::into_station).transpose()
    }

    pub fn list_stations(&self, enabled_only: bool) -> Result<Vec<Station>, DatabaseError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&stations::select_all(enabled_only))?;
        let rows = stmt
            .query_map([], StationRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(StationRow::into_station).collect()
    }

    /// Set a station's `last_synced_at` watermark
    pub fn update_station_watermark(
        &self,
        station_id: &str,
        timestamp: &DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            &stations::update_last_updated(station_id, &format_timestamp(timestamp)),
            [],
        )?;
        tx.commit()?;
        if changed == 0 {
            warn!("Watermark update for unknown station {}", station_id);
        }
        Ok(())
    }

    pub fn upsert_sensor(&self, sensor: &Sensor) -> Result<(), DatabaseError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(&sensors::upsert(sensor), [])?;
        tx.commit()?;
        debug!("Upserted sensor {} for station {}", sensor.id, sensor.station_id);
        Ok(())
    }

    pub fn get_sensor(&self, sensor_id: &str) -> Result<Option<Sensor>, DatabaseError> {
        let conn = self.connect()?;
        let row = conn
            .query_row(&sensors::select_by_id(sensor_id), [], SensorRow::read)
            .optional()?;
        row.map(SensorRow::into_sensor).transpose()
    }

    pub fn list_sensors_for_station(&self, station_id: &str) -> Result<Vec<Sensor>, DatabaseError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sensors::select_by_station(station_id))?;
        let rows = stmt
            .query_map([], SensorRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(SensorRow::into_sensor).collect()
    }

    /// Insert a batch, skipping rows whose (sensor_id, timestamp, value) already exists.
    /// Returns the number of rows actually inserted.
    pub fn insert_measurements(&self, batch: &[Measurement]) -> Result<usize, DatabaseError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        for measurement in batch {
            inserted += tx.execute(&measurements::insert_or_ignore(measurement), [])?;
        }
        tx.commit()?;

        debug!(
            "Inserted {} of {} measurements ({} duplicates skipped)",
            inserted,
            batch.len(),
            batch.len() - inserted
        );
        Ok(inserted)
    }

    /// Measurements of one sensor in `[start, end]`, oldest first
    pub fn get_measurements(
        &self,
        sensor_id: &str,
        start: Option<&DateTime<Utc>>,
        end: Option<&DateTime<Utc>>,
        limit: Option<u64>,
    ) -> Result<Vec<Measurement>, DatabaseError> {
        let start = start.map(format_timestamp);
        let end = end.map(format_timestamp);
        let sql = measurements::select_range(sensor_id, start.as_deref(), end.as_deref(), limit);

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], MeasurementRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(MeasurementRow::into_measurement).collect()
    }

    pub fn get_latest_measurement(&self, sensor_id: &str) -> Result<Option<Measurement>, DatabaseError> {
        let conn = self.connect()?;
        let row = conn
            .query_row(&measurements::select_latest(sensor_id), [], MeasurementRow::read)
            .optional()?;
        row.map(MeasurementRow::into_measurement).transpose()
    }

    pub fn stats(&self) -> Result<StoreStats, DatabaseError> {
        let conn = self.connect()?;
        let station_count = query_count(&conn, &stations::count(false))?;
        let enabled_station_count = query_count(&conn, &stations::count(true))?;
        let sensor_count = query_count(&conn, &sensors::count())?;
        let measurement_count = query_count(&conn, &measurements::count())?;
        drop(conn);

        let mut wal_path = self.path.clone().into_os_string();
        wal_path.push("-wal");

        Ok(StoreStats {
            station_count,
            enabled_station_count,
            sensor_count,
            measurement_count,
            storage_size_bytes: file_len(&self.path) + file_len(Path::new(&wal_path)),
        })
    }

    /// Rebuild the database file (VACUUM) to reclaim space
    pub fn compact(&self) -> Result<(), DatabaseError> {
        let conn = self.connect()?;
        conn.execute_batch("VACUUM")?;
        info!("Database compacted");
        Ok(())
    }
}

use sea_query::{ColumnDef, ForeignKey, Index, SqliteQueryBuilder, Table};

use crate::schema::{Measurements, Sensors, Stations};

/// CREATE TABLE IF NOT EXISTS stations (
///     id TEXT PRIMARY KEY,
///     name TEXT NOT NULL,
///     latitude REAL,
///     longitude REAL,
///     elevation REAL,
///     metadata TEXT,
///     last_updated TEXT,
///     enabled INTEGER NOT NULL DEFAULT 1
/// )
pub fn create_stations_table() -> String {
    Table::create()
        .table(Stations::Table)
        .if_not_exists()
        .col(ColumnDef::new(Stations::Id).text().primary_key())
        .col(ColumnDef::new(Stations::Name).text().not_null())
        .col(ColumnDef::new(Stations::Latitude).double())
        .col(ColumnDef::new(Stations::Longitude).double())
        .col(ColumnDef::new(Stations::Elevation).double())
        .col(ColumnDef::new(Stations::Metadata).text())
        .col(ColumnDef::new(Stations::LastUpdated).text())
        .col(
            ColumnDef::new(Stations::Enabled)
                .integer()
                .not_null()
                .default(1),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS sensors (
///     id TEXT PRIMARY KEY,
///     station_id TEXT NOT NULL REFERENCES stations(id),
///     name TEXT NOT NULL,
///     type TEXT NOT NULL,
///     unit TEXT,
///     position TEXT,
///     metadata TEXT
/// )
pub fn create_sensors_table() -> String {
    Table::create()
        .table(Sensors::Table)
        .if_not_exists()
        .col(ColumnDef::new(Sensors::Id).text().primary_key())
        .col(ColumnDef::new(Sensors::StationId).text().not_null())
        .col(ColumnDef::new(Sensors::Name).text().not_null())
        .col(ColumnDef::new(Sensors::Type).text().not_null())
        .col(ColumnDef::new(Sensors::Unit).text())
        .col(ColumnDef::new(Sensors::Position).text())
        .col(ColumnDef::new(Sensors::Metadata).text())
        .foreign_key(
            ForeignKey::create()
                .from(Sensors::Table, Sensors::StationId)
                .to(Stations::Table, Stations::Id),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS measurements (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     sensor_id TEXT NOT NULL REFERENCES sensors(id),
///     timestamp TEXT NOT NULL,
///     value REAL NOT NULL,
///     quality TEXT,
///     raw_data TEXT
/// )
pub fn create_measurements_table() -> String {
    Table::create()
        .table(Measurements::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Measurements::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(ColumnDef::new(Measurements::SensorId).text().not_null())
        .col(ColumnDef::new(Measurements::Timestamp).text().not_null())
        .col(ColumnDef::new(Measurements::Value).double().not_null())
        .col(ColumnDef::new(Measurements::Quality).text())
        .col(ColumnDef::new(Measurements::RawData).text())
        .foreign_key(
            ForeignKey::create()
                .from(Measurements::Table, Measurements::SensorId)
                .to(Sensors::Table, Sensors::Id),
        )
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_measurements_sensor_time ON measurements(sensor_id, timestamp)
pub fn create_measurements_sensor_time_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_measurements_sensor_time")
        .table(Measurements::Table)
        .col(Measurements::SensorId)
        .col(Measurements::Timestamp)
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_measurements_time ON measurements(timestamp)
pub fn create_measurements_time_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_measurements_time")
        .table(Measurements::Table)
        .col(Measurements::Timestamp)
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_sensors_station ON sensors(station_id)
pub fn create_sensors_station_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_sensors_station")
        .table(Sensors::Table)
        .col(Sensors::StationId)
        .to_string(SqliteQueryBuilder)
}

/// CREATE UNIQUE INDEX IF NOT EXISTS idx_measurements_unique ON measurements(sensor_id, timestamp, value)
pub fn create_measurements_unique_index() -> String {
    Index::create()
        .if_not_exists()
        .unique()
        .name("idx_measurements_unique")
        .table(Measurements::Table)
        .col(Measurements::SensorId)
        .col(Measurements::Timestamp)
        .col(Measurements::Value)
        .to_string(SqliteQueryBuilder)
}

/// Every schema statement in creation order
pub fn all_statements() -> Vec<String> {
    vec![
        create_stations_table(),
        create_sensors_table(),
        create_measurements_table(),
        create_measurements_sensor_time_index(),
        create_measurements_time_index(),
        create_sensors_station_index(),
        create_measurements_unique_index(),
    ]
}

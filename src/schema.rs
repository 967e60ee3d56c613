use sea_query::Iden;

/// Stations table - one row per FieldClimate station
#[derive(Iden)]
pub enum Stations {
    Table,
    Id,
    Name,
    Latitude,
    Longitude,
    Elevation,
    Metadata,
    /// Sync watermark (RFC 3339, UTC)
    LastUpdated,
    Enabled,
}

/// Sensors table - sensors attached to a station
#[derive(Iden)]
pub enum Sensors {
    Table,
    Id,
    StationId,
    Name,
    Type,
    Unit,
    Position,
    Metadata,
}

/// Measurements table - time series values, unique per (sensor_id, timestamp, value)
#[derive(Iden)]
pub enum Measurements {
    Table,
    Id,
    SensorId,
    Timestamp,
    Value,
    Quality,
    RawData,
}

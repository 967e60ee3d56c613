use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};

use crate::models::Sensor;
use crate::schema::Sensors;

fn columns() -> [Sensors; 7] {
    [
        Sensors::Id,
        Sensors::StationId,
        Sensors::Name,
        Sensors::Type,
        Sensors::Unit,
        Sensors::Position,
        Sensors::Metadata,
    ]
}

/// INSERT INTO sensors (...) VALUES (...) ON CONFLICT (id) DO UPDATE SET ...
pub fn upsert(sensor: &Sensor) -> String {
    Query::insert()
        .into_table(Sensors::Table)
        .columns(columns())
        .values_panic([
            sensor.id.as_str().into(),
            sensor.station_id.as_str().into(),
            sensor.name.as_str().into(),
            sensor.sensor_type.as_str().into(),
            sensor.unit.clone().into(),
            sensor.position.clone().into(),
            sensor.metadata.as_ref().map(|m| m.to_string()).into(),
        ])
        .on_conflict(
            OnConflict::column(Sensors::Id)
                .update_columns([
                    Sensors::StationId,
                    Sensors::Name,
                    Sensors::Type,
                    Sensors::Unit,
                    Sensors::Position,
                    Sensors::Metadata,
                ])
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM sensors WHERE id = ?
pub fn select_by_id(id: &str) -> String {
    Query::select()
        .columns(columns())
        .from(Sensors::Table)
        .and_where(Expr::col(Sensors::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM sensors WHERE station_id = ? ORDER BY id
pub fn select_by_station(station_id: &str) -> String {
    Query::select()
        .columns(columns())
        .from(Sensors::Table)
        .and_where(Expr::col(Sensors::StationId).eq(station_id))
        .order_by(Sensors::Id, Order::Asc)
        .to_string(SqliteQueryBuilder)
}

/// SELECT COUNT(id) FROM sensors
pub fn count() -> String {
    Query::select()
        .expr(Expr::col(Sensors::Id).count())
        .from(Sensors::Table)
        .to_string(SqliteQueryBuilder)
}

use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};

use crate::models::{format_timestamp, Measurement};
use crate::schema::Measurements;

fn columns() -> [Measurements; 5] {
    [
        Measurements::SensorId,
        Measurements::Timestamp,
        Measurements::Value,
        Measurements::Quality,
        Measurements::RawData,
    ]
}

/// INSERT INTO measurements (...) VALUES (...) ON CONFLICT (sensor_id, timestamp, value) DO NOTHING
pub fn insert_or_ignore(measurement: &Measurement) -> String {
    Query::insert()
        .into_table(Measurements::Table)
        .columns(columns())
        .values_panic([
            measurement.sensor_id.as_str().into(),
            format_timestamp(&measurement.timestamp).into(),
            measurement.value.into(),
            measurement.quality.clone().into(),
            measurement.raw_data.as_ref().map(|r| r.to_string()).into(),
        ])
        .on_conflict(
            OnConflict::columns([
                Measurements::SensorId,
                Measurements::Timestamp,
                Measurements::Value,
            ])
            .do_nothing()
            .to_owned(),
        )
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM measurements WHERE sensor_id = ? [AND timestamp >= ?] [AND timestamp <= ?]
/// ORDER BY timestamp [LIMIT ?]
pub fn select_range(
    sensor_id: &str,
    start: Option<&str>,
    end: Option<&str>,
    limit: Option<u64>,
) -> String {
    let mut query = Query::select();
    query
        .columns(columns())
        .from(Measurements::Table)
        .and_where(Expr::col(Measurements::SensorId).eq(sensor_id));
    if let Some(start) = start {
        query.and_where(Expr::col(Measurements::Timestamp).gte(start));
    }
    if let Some(end) = end {
        query.and_where(Expr::col(Measurements::Timestamp).lte(end));
    }
    query.order_by(Measurements::Timestamp, Order::Asc);
    if let Some(limit) = limit {
        query.limit(limit);
    }
    query.to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM measurements WHERE sensor_id = ? ORDER BY timestamp DESC LIMIT 1
pub fn select_latest(sensor_id: &str) -> String {
    Query::select()
        .columns(columns())
        .from(Measurements::Table)
        .and_where(Expr::col(Measurements::SensorId).eq(sensor_id))
        .order_by(Measurements::Timestamp, Order::Desc)
        .limit(1)
        .to_string(SqliteQueryBuilder)
}

/// SELECT COUNT(id) FROM measurements
pub fn count() -> String {
    Query::select()
        .expr(Expr::col(Measurements::Id).count())
        .from(Measurements::Table)
        .to_string(SqliteQueryBuilder)
}

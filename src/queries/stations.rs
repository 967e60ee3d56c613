use sea_query::{Expr, OnConflict, Order, Query, SqliteQueryBuilder};

use crate::models::{format_timestamp, Station};
use crate::schema::Stations;

fn columns() -> [Stations; 8] {
    [
        Stations::Id,
        Stations::Name,
        Stations::Latitude,
        Stations::Longitude,
        Stations::Elevation,
        Stations::Metadata,
        Stations::LastUpdated,
        Stations::Enabled,
    ]
}

/// INSERT INTO stations (...) VALUES (...) ON CONFLICT (id) DO UPDATE SET ...
pub fn upsert(station: &Station) -> String {
    Query::insert()
        .into_table(Stations::Table)
        .columns(columns())
        .values_panic([
            station.id.as_str().into(),
            station.name.as_str().into(),
            station.latitude.into(),
            station.longitude.into(),
            station.elevation.into(),
            station.metadata.as_ref().map(|m| m.to_string()).into(),
            station.last_synced_at.as_ref().map(format_timestamp).into(),
            (station.enabled as i32).into(),
        ])
        .on_conflict(
            OnConflict::column(Stations::Id)
                .update_columns([
                    Stations::Name,
                    Stations::Latitude,
                    Stations::Longitude,
                    Stations::Elevation,
                    Stations::Metadata,
                    Stations::LastUpdated,
                    Stations::Enabled,
                ])
                .to_owned(),
        )
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM stations WHERE id = ?
pub fn select_by_id(id: &str) -> String {
    Query::select()
        .columns(columns())
        .from(Stations::Table)
        .and_where(Expr::col(Stations::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT ... FROM stations [WHERE enabled = 1] ORDER BY id
pub fn select_all(enabled_only: bool) -> String {
    let mut query = Query::select();
    query.columns(columns()).from(Stations::Table);
    if enabled_only {
        query.and_where(Expr::col(Stations::Enabled).eq(1));
    }
    query
        .order_by(Stations::Id, Order::Asc)
        .to_string(SqliteQueryBuilder)
}

/// UPDATE stations SET last_updated = ? WHERE id = ?
pub fn update_last_updated(id: &str, last_updated: &str) -> String {
    Query::update()
        .table(Stations::Table)
        .value(Stations::LastUpdated, last_updated)
        .and_where(Expr::col(Stations::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT COUNT(id) FROM stations [WHERE enabled = 1]
pub fn count(enabled_only: bool) -> String {
    let mut query = Query::select();
    query
        .expr(Expr::col(Stations::Id).count())
        .from(Stations::Table);
    if enabled_only {
        query.and_where(Expr::col(Stations::Enabled).eq(1));
    }
    query.to_string(SqliteQueryBuilder)
}

use rusqlite::Connection;
use std::path::Path;

use crate::error::DatabaseError;
use crate::queries::ddl;

/// Open a database connection with a full path
/// Enables WAL mode and foreign keys
pub fn open_database_with_path(db_path: &Path) -> Result<Connection, DatabaseError> {
    let conn = Connection::open(db_path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Create tables and indexes if missing. Safe to run against an initialized database.
pub fn init_schema(conn: &mut Connection) -> Result<(), DatabaseError> {
    let tx = conn.transaction()?;
    for sql in ddl::all_statements() {
        tx.execute(&sql, [])?;
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&mut conn).unwrap();
        init_schema(&mut conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('stations', 'sensors', 'measurements')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);

        let indexes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(indexes, 4);
    }
}

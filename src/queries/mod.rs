//! SQL builders for the SQLite store. Each function returns a ready-to-run statement.

pub mod ddl;
pub mod measurements;
pub mod sensors;
pub mod stations;

// Library interface for the collector binary and tests

pub mod auth;
pub mod client;
pub mod collector;
pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod queries;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod store;

pub use collector::{Collector, RunStats, StationSync};
pub use error::{ApiError, CollectorError, ConfigError, DatabaseError};
pub use store::MeasurementStore;

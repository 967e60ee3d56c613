//! Collection runs: register configured stations, then sync every enabled one.

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::time::Instant;

use crate::auth::build_signer;
use crate::client::{ClientSettings, FieldClimateClient, StationApi};
use crate::config::{AppConfig, StationConfig};
use crate::error::{CollectorError, DatabaseError};
use crate::models::StoreStats;
use crate::registry::{StationRegistry, SyncCounts};
use crate::store::MeasurementStore;

/// What the coordinator needs from the registry. Separate so runs can be driven by fakes.
pub trait StationSync {
    fn initialize_stations(&self, configured: &[StationConfig]) -> Result<(), CollectorError>;

    fn sync_station_data(
        &self,
        station_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<SyncCounts, CollectorError>;
}

impl<A: StationApi> StationSync for StationRegistry<A> {
    fn initialize_stations(&self, configured: &[StationConfig]) -> Result<(), CollectorError> {
        StationRegistry::initialize_stations(self, configured)
    }

    fn sync_station_data(
        &self,
        station_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<SyncCounts, CollectorError> {
        StationRegistry::sync_station_data(self, station_id, start, end)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    pub stations_processed: usize,
    pub stations_successful: usize,
    pub stations_failed: usize,
    pub sensors_processed: usize,
    pub measurements_added: usize,
    pub errors: Vec<String>,
}

impl RunStats {
    fn started(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            end_time: None,
            duration_seconds: 0.0,
            stations_processed: 0,
            stations_successful: 0,
            stations_failed: 0,
            sensors_processed: 0,
            measurements_added: 0,
            errors: Vec::new(),
        }
    }
}

pub struct Collector<S: StationSync> {
    syncer: S,
    store: MeasurementStore,
    stations: Vec<StationConfig>,
    optimize_after_collection: bool,
}

/// Collector wired to the live FieldClimate API
pub type LiveCollector = Collector<StationRegistry<FieldClimateClient>>;

impl LiveCollector {
    pub fn from_config(config: &AppConfig) -> Result<Self, CollectorError> {
        let signer = build_signer(config.api.auth_scheme, config.api_keys()?);
        let client = FieldClimateClient::new(ClientSettings::from_config(&config.api), signer)?;
        let store = MeasurementStore::open(&config.database.path)?;
        let registry = StationRegistry::new(client, store.clone(), config.collection.backfill_days);

        Ok(Collector::new(
            registry,
            store,
            config.stations.clone(),
            config.database.optimize_after_collection,
        ))
    }
}

impl<S: StationSync> Collector<S> {
    pub fn new(
        syncer: S,
        store: MeasurementStore,
        stations: Vec<StationConfig>,
        optimize_after_collection: bool,
    ) -> Self {
        Self {
            syncer,
            store,
            stations,
            optimize_after_collection,
        }
    }

    pub fn syncer(&self) -> &S {
        &self.syncer
    }

    /// One full collection pass. Station failures are recorded in the returned
    /// stats; only failures before the station loop starts are returned as errors.
    pub fn run(&self) -> Result<RunStats, CollectorError> {
        let started = Instant::now();
        let mut stats = RunStats::started(Utc::now());
        info!("Starting collection run");

        self.syncer.initialize_stations(&self.stations)?;
        let stations = self.store.list_stations(true)?;
        info!("Collecting data for {} enabled stations", stations.len());

        for station in &stations {
            stats.stations_processed += 1;
            match self.syncer.sync_station_data(&station.id, None, None) {
                Ok(counts) => {
                    stats.stations_successful += 1;
                    stats.sensors_processed += counts.len();
                    stats.measurements_added += counts.values().sum::<usize>();
                }
                Err(e) => {
                    error!("Station {} ({}) failed: {}", station.id, station.name, e);
                    stats.stations_failed += 1;
                    stats.errors.push(format!("Station {}: {}", station.name, e));
                }
            }
        }

        if self.optimize_after_collection {
            if let Err(e) = self.store.compact() {
                warn!("Database optimization failed: {}", e);
                stats.errors.push(format!("Optimization: {}", e));
            }
        }

        stats.end_time = Some(Utc::now());
        stats.duration_seconds = started.elapsed().as_secs_f64();
        info!(
            "Collection finished in {:.1}s: {}/{} stations ok, {} new measurements",
            stats.duration_seconds,
            stats.stations_successful,
            stats.stations_processed,
            stats.measurements_added
        );
        Ok(stats)
    }

    /// Register configured stations, then sync one station over an explicit window.
    pub fn collect_station_data(
        &self,
        station_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<SyncCounts, CollectorError> {
        self.syncer.initialize_stations(&self.stations)?;
        self.syncer.sync_station_data(station_id, start, end)
    }

    pub fn database_stats(&self) -> Result<StoreStats, DatabaseError> {
        self.store.stats()
    }
}

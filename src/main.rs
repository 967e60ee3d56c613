use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use fieldclimate_collector::collector::{LiveCollector, RunStats};
use fieldclimate_collector::config::{resolve_config_path, AppConfig};
use fieldclimate_collector::logging::init_logging;
use fieldclimate_collector::models::{days_before, format_timestamp};

#[derive(Parser, Debug)]
#[command(author, version, about = "Collect FieldClimate weather station data into SQLite")]
struct Args {
    /// Path to config file (TOML format). Defaults to $FIELDCLIMATE_CONFIG, then ./config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect data for all enabled stations (default)
    Collect,
    /// Collect data for a single station
    Station {
        station_id: String,

        /// First day to fetch (YYYY-MM-DD, UTC)
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Last day to fetch, inclusive (YYYY-MM-DD, UTC)
        #[arg(long)]
        end_date: Option<NaiveDate>,

        /// Fetch the last N days instead of a start date
        #[arg(long, conflicts_with = "start_date", value_parser = clap::value_parser!(i64).range(0..))]
        days: Option<i64>,
    },
    /// Show database statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stations visible to the API account
    Stations,
    /// List stored sensors of a station with their latest measurement
    Sensors { station_id: String },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config);
    let config = AppConfig::load(&config_path)?;
    init_logging(&config.logging, args.verbose)?;
    log::debug!("Loaded config from {}", config_path.display());

    let collector = LiveCollector::from_config(&config)?;

    let result = match args.command.unwrap_or(Command::Collect) {
        Command::Collect => collect(&collector),
        Command::Station {
            station_id,
            start_date,
            end_date,
            days,
        } => collect_station(&collector, &station_id, start_date, end_date, days),
        Command::Stats { json } => stats(&collector, json),
        Command::Stations => list_stations(&collector),
        Command::Sensors { station_id } => list_sensors(&collector, &station_id),
    };
    if let Err(e) = &result {
        log::error!("{}", e);
    }
    result
}

fn collect(collector: &LiveCollector) -> Result<(), Box<dyn std::error::Error>> {
    let stats = collector.run()?;
    print_run_stats(&stats);
    if stats.stations_failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn print_run_stats(stats: &RunStats) {
    println!("Collection completed in {:.1}s", stats.duration_seconds);
    println!(
        "Stations: {} processed, {} successful, {} failed",
        stats.stations_processed, stats.stations_successful, stats.stations_failed
    );
    println!("Sensors processed: {}", stats.sensors_processed);
    println!("Measurements added: {}", stats.measurements_added);
    if !stats.errors.is_empty() {
        println!("Errors:");
        for error in &stats.errors {
            println!("  - {}", error);
        }
    }
}

fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc())
}

fn end_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(23, 59, 59).map(|naive| naive.and_utc())
}

fn collect_station(
    collector: &LiveCollector,
    station_id: &str,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    days: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let end = end_date.and_then(end_of_day);
    let start = match days {
        Some(days) => Some(days_before(end.unwrap_or_else(Utc::now), days)),
        None => start_date.and_then(start_of_day),
    };

    let counts = collector.collect_station_data(station_id, start, end)?;
    if counts.is_empty() {
        println!("No sensors synced for station {}", station_id);
        return Ok(());
    }
    println!("Station {}:", station_id);
    for (sensor_id, count) in &counts {
        println!("  {}: {} new measurements", sensor_id, count);
    }
    println!("Total: {}", counts.values().sum::<usize>());
    Ok(())
}

fn stats(collector: &LiveCollector, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let stats = collector.database_stats()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!("Database: {}", collector.syncer().store().path().display());
    println!("Stations: {} ({} enabled)", stats.station_count, stats.enabled_station_count);
    println!("Sensors: {}", stats.sensor_count);
    println!("Measurements: {}", stats.measurement_count);
    println!(
        "Database size: {:.2} MB",
        stats.storage_size_bytes as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}

fn list_stations(collector: &LiveCollector) -> Result<(), Box<dyn std::error::Error>> {
    let stations = collector.syncer().discover_stations()?;
    for station in &stations {
        let id = station
            .pointer("/name/original")
            .or_else(|| station.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let name = station
            .pointer("/name/custom")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        println!("{}\t{}", id, name);
    }
    Ok(())
}

fn list_sensors(collector: &LiveCollector, station_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = collector.syncer().store();
    let Some(station) = store.get_station(station_id)? else {
        println!("Station {} is not in the database", station_id);
        return Ok(());
    };
    println!(
        "{} ({}) last synced: {}",
        station.name,
        station.id,
        station
            .last_synced_at
            .as_ref()
            .map(format_timestamp)
            .unwrap_or_else(|| "never".to_string())
    );
    for sensor in store.list_sensors_for_station(station_id)? {
        let latest = match store.get_latest_measurement(&sensor.id)? {
            Some(m) => format!(
                "{} {} @ {}",
                m.value,
                sensor.unit.as_deref().unwrap_or(""),
                format_timestamp(&m.timestamp)
            ),
            None => "no data".to_string(),
        };
        println!("  {}\t{}\t{}\t{}", sensor.id, sensor.name, sensor.sensor_type, latest);
    }
    Ok(())
}

//! `sitemon` command line.
//!
//! ```text
//! sitemon query   <collection> [--start T] [--end T] [--limit N] [--fields a,b]
//!                 [--ma] [--window N] [--interpolate] [--anomalies] [--threshold X]
//!                 [--stats] [--corr] [--state FILE]
//! sitemon lookup  <collection> <wdatetime>
//! sitemon compare <field> <collection>... [--start T] [--end T] [--limit N] [--ma] [--window N]
//! sitemon verify
//! ```
//!
//! The store connection comes from `DATABASE_URL` (or `.env`).

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use sitemon_service::analysis::{MovingAverageWindow, align_sites};
use sitemon_service::config::ServiceConfig;
use sitemon_service::dashboard::{StateStore, build_view};
use sitemon_service::logging::{self, Component};
use sitemon_service::model::{Field, Record};
use sitemon_service::query::{WeatherQuery, get_weather_by_date, get_weather_data};
use sitemon_service::sites::SiteRegistry;
use sitemon_service::store::PgRecordStore;
use sitemon_service::verify::{print_summary, run_full_verification};

/// Matches the per-site cap the comparison view has always used.
const COMPARE_LIMIT: i64 = 10_000;

/// Site monitoring queries and derived statistics
#[derive(Parser, Debug)]
#[command(name = "sitemon")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Service configuration (TOML)
    #[arg(long, global = true, env = "SITEMON_CONFIG")]
    config: Option<PathBuf>,

    /// Site registry overrides (TOML)
    #[arg(long, global = true)]
    sites: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct WindowArgs {
    /// Window start, "YYYY-MM-DD HH:mm:ss"
    #[arg(long)]
    start: Option<String>,

    /// Window end, "YYYY-MM-DD HH:mm:ss"
    #[arg(long)]
    end: Option<String>,

    /// Record cap; zero or negative means the default
    #[arg(long, allow_negative_numbers = true)]
    limit: Option<i64>,
}

#[derive(Args, Debug, Default)]
struct AverageArgs {
    /// Show the moving average
    #[arg(long)]
    ma: bool,

    /// Moving average window; implies --ma
    #[arg(long, value_name = "N")]
    window: Option<String>,
}

impl AverageArgs {
    fn enabled(&self) -> bool {
        self.ma || self.window.is_some()
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch one collection and print the dashboard view as JSON
    Query {
        collection: String,

        #[command(flatten)]
        window: WindowArgs,

        /// Fields to analyse, comma separated
        #[arg(long, value_delimiter = ',')]
        fields: Vec<Field>,

        #[command(flatten)]
        average: AverageArgs,

        /// Fill interior gaps before averaging
        #[arg(long)]
        interpolate: bool,

        /// Flag Z-score anomalies
        #[arg(long)]
        anomalies: bool,

        /// Anomaly Z-score threshold; implies --anomalies
        #[arg(long)]
        threshold: Option<f64>,

        /// Include per-field statistics
        #[arg(long)]
        stats: bool,

        /// Include the correlation matrix
        #[arg(long)]
        corr: bool,

        /// Dashboard state file, loaded before and saved after the query
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Print the record stamped exactly at a timestamp
    Lookup {
        collection: String,
        wdatetime: String,
    },
    /// Line one field up across several sites
    Compare {
        field: Field,

        #[arg(required = true)]
        collections: Vec<String>,

        #[command(flatten)]
        window: WindowArgs,

        #[command(flatten)]
        average: AverageArgs,
    },
    /// Check every registered site against the store
    Verify,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = ServiceConfig::load_with_env(cli.config.as_deref())?;
    logging::init_logger(
        config.logging.level,
        config.logging.file.as_deref(),
        config.logging.console_timestamps,
    )?;
    let sites = match &cli.sites {
        Some(path) => SiteRegistry::load(path)?,
        None => SiteRegistry::builtin(),
    };

    let url = config
        .database
        .url
        .clone()
        .ok_or("DATABASE_URL is not set")?;
    let mut store = PgRecordStore::connect(&url)?;
    if let Some(schema) = &config.database.schema {
        store = store.with_schema(schema);
    }
    tracing::debug!(component = %Component::System, command = ?cli.command, "connected to store");

    match cli.command {
        Command::Query {
            collection,
            window,
            fields,
            average,
            interpolate,
            anomalies,
            threshold,
            stats,
            corr,
            state,
        } => {
            let state_store = state.map(StateStore::new);
            let mut state = state_store
                .as_ref()
                .map(|s| s.load_or_default())
                .unwrap_or_default();

            state.select_collection(&collection);
            if !fields.is_empty() {
                state.selected_fields.clear();
                for field in fields {
                    state.toggle_field(field);
                }
            }
            if window.start.is_some() || window.end.is_some() {
                state.set_date_range(
                    window.start.as_deref().unwrap_or(""),
                    window.end.as_deref().unwrap_or(""),
                );
            }
            if average.enabled() {
                state.show_moving_average = true;
                let default_window = config.analysis.moving_average_window.to_string();
                state.set_moving_average_input(average.window.as_deref().unwrap_or(&default_window));
            }
            state.interpolate |= interpolate;
            if anomalies || threshold.is_some() {
                state.show_anomalies = true;
                state.anomaly_threshold = threshold.unwrap_or(config.analysis.anomaly_threshold);
            }
            state.show_statistics |= stats;
            state.show_correlation |= corr;

            let outcome = get_weather_data(&mut store, &sites, &config.fetch, &state.weather_query(window.limit));
            let view = build_view(&state, &outcome);
            println!("{}", serde_json::to_string_pretty(&view)?);

            if let Ok(response) = outcome {
                state.remember_result(response);
            }
            if let Some(state_store) = state_store {
                state_store.save(&state)?;
            }
        }
        Command::Lookup { collection, wdatetime } => {
            let record: Option<Record> =
                get_weather_by_date(&mut store, &sites, &config.fetch, &collection, &wdatetime)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Compare {
            field,
            collections,
            window,
            average,
        } => {
            let ma_window = if average.enabled() {
                match &average.window {
                    Some(raw) => MovingAverageWindow::parse(raw),
                    None => MovingAverageWindow::new(config.analysis.moving_average_window as i64),
                }
            } else {
                None
            };

            let mut fetched: Vec<(String, Vec<Record>)> = Vec::new();
            for collection in &collections {
                let query = WeatherQuery {
                    collection: collection.clone(),
                    limit: Some(window.limit.unwrap_or(COMPARE_LIMIT)),
                    start_date: window.start.clone(),
                    end_date: window.end.clone(),
                };
                let response = get_weather_data(&mut store, &sites, &config.fetch, &query)?;
                fetched.push((response.collection, response.records));
            }
            let inputs: Vec<(&str, &[Record])> = fetched
                .iter()
                .map(|(c, r)| (c.as_str(), r.as_slice()))
                .collect();
            let aligned = align_sites(field, &inputs, ma_window);
            println!("{}", serde_json::to_string_pretty(&aligned)?);
        }
        Command::Verify => {
            let report = run_full_verification(&mut store, &sites, &config.fetch);
            print_summary(&report);
        }
    }
    Ok(())
}

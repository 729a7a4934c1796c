//! popstats CLI
//!
//! ## Usage
//!
//! ```bash
//! # Create the database and seed reference data
//! popstats init --reference reference.toml
//!
//! # Apply a stream of notifications (file or stdin)
//! popstats replay notifications.jsonl
//! cat notifications.jsonl | popstats replay -
//!
//! # Inspect counters
//! popstats show --nonzero
//! popstats audit
//!
//! # Zero every counter
//! popstats reset --yes
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use popstats::db::reference::seed_reference;
use popstats::services::spawn_logging_listener;
use popstats::{Config, CounterLedger, Database, ReferenceData, Replayer, Services};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "popstats")]
#[command(about = "Population and disease counters driven by clinical record notifications")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "POPSTATS_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, env = "POPSTATS_DATABASE")]
    database: Option<PathBuf>,

    /// Maximum pooled database connections
    #[arg(long)]
    pool_size: Option<u32>,

    /// Busy timeout for locked database writes, in milliseconds
    #[arg(long)]
    busy_timeout_ms: Option<u64>,

    /// Subdivision key reserved for undefined localities
    #[arg(long)]
    undefined_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the schema and seed reference data
    Init {
        /// Reference data TOML (regions, subdivisions, diseases)
        #[arg(long)]
        reference: Option<PathBuf>,
    },
    /// Apply JSON-line notifications from a file, or `-` for stdin
    Replay { input: String },
    /// Print every counter as JSON
    Show {
        /// Only rows with a non-zero total
        #[arg(long)]
        nonzero: bool,
    },
    /// Check counters against their invariants
    Audit,
    /// Zero every counter
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => {
            let default_path = Config::default().config_path();
            if default_path.exists() {
                Config::load(&default_path)?
            } else {
                Config::default()
            }
        }
    };

    // Apply CLI overrides
    if let Some(path) = &args.database {
        config.database_path = path.clone();
    }
    if let Some(size) = args.pool_size {
        config.pool_size = size;
    }
    if let Some(ms) = args.busy_timeout_ms {
        config.busy_timeout_ms = ms;
    }
    if let Some(key) = &args.undefined_key {
        config.undefined_subdivision_key = key.clone();
    }
    Ok(config)
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
    Database::open(
        &config.database_path,
        config.pool_size,
        Duration::from_millis(config.busy_timeout_ms),
    )
    .with_context(|| format!("Failed to open database {}", config.database_path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("popstats=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!(
        database = %config.database_path.display(),
        pool_size = config.pool_size,
        "Starting popstats"
    );

    // Ensure data directory exists
    tokio::fs::create_dir_all(config.data_dir()).await?;

    match args.command {
        Command::Init { reference } => {
            let db = open_database(&config)?;

            let config_path = config.config_path();
            if args.config.is_none() && !config_path.exists() {
                config.save(&config_path)?;
                info!(path = %config_path.display(), "Created default config");
            }

            let Some(path) = reference.or_else(|| config.reference_data.clone()) else {
                warn!("No reference data given; schema created without regions or subdivisions");
                return Ok(());
            };
            let data = ReferenceData::load(&path)
                .with_context(|| format!("Failed to read reference data {}", path.display()))?
                .with_default_code_system(&config.code_system);
            let result = db.with_conn(|conn| seed_reference(conn, &data))?;
            print_json(&result)?;
        }

        Command::Replay { input } => {
            let db = open_database(&config)?;
            let services = Services::new(db, &config)?;
            let listener = spawn_logging_listener(services.events.clone());

            let replayer = Replayer::new(Arc::new(services.registry()), services.subjects.clone());
            let summary = if input == "-" {
                replayer.replay(BufReader::new(tokio::io::stdin())).await?
            } else {
                let file = tokio::fs::File::open(&input)
                    .await
                    .with_context(|| format!("Failed to open {}", input))?;
                replayer.replay(BufReader::new(file)).await?
            };

            let pending = services.stats.staging().pending();
            if pending > 0 {
                warn!(pending, "Updates left staged without an After call");
            }
            print_json(&serde_json::json!({
                "replay": summary,
                "outcomes": services.tally.snapshot(),
                "staged": pending,
            }))?;

            listener.abort();
        }

        Command::Show { nonzero } => {
            let ledger = CounterLedger::new(open_database(&config)?);
            let mut snapshot = ledger.snapshot()?;
            if nonzero {
                snapshot.population.retain(|row| row.total != 0);
                snapshot.disease_cases.retain(|row| row.total != 0);
            }
            print_json(&snapshot)?;
        }

        Command::Audit => {
            let ledger = CounterLedger::new(open_database(&config)?);
            let violations = ledger.audit()?;
            print_json(&violations)?;
            if !violations.is_empty() {
                bail!("{} counter rows violate invariants", violations.len());
            }
            info!("All counters consistent");
        }

        Command::Reset { yes } => {
            if !yes {
                bail!("Refusing to reset counters without --yes");
            }
            let ledger = CounterLedger::new(open_database(&config)?);
            let rows = ledger.reset()?;
            print_json(&serde_json::json!({ "rows": rows }))?;
        }
    }

    Ok(())
}

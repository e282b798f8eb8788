use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use fpi_pipeline::config::Config;
use fpi_pipeline::domain::PropertyType;
use fpi_pipeline::error::{PipelineError, Result};
use fpi_pipeline::logging;
use fpi_pipeline::observability;
use fpi_pipeline::pipeline::filter::SaleFilter;
use fpi_pipeline::pipeline::{self, ingest, sample, validate};
use fpi_pipeline::serving::server;
use fpi_pipeline::serving::service::QueryService;
use fpi_pipeline::storage::sqlite::SqliteStore;
use fpi_pipeline::storage::{Storage, TransactionQuery};

#[derive(Parser)]
#[command(name = "fpi_pipeline")]
#[command(about = "French property transactions (DVF) data pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the configuration file (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: ingest, validate, clean, filter and load
    Run {
        /// Raw extract files to process
        #[arg(long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Database file (defaults to the configured path)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Department subset (comma-separated, e.g. 75,92,2A)
        #[arg(long)]
        departments: Option<String>,
        /// Property type subset (comma-separated: house, apartment, land, other)
        #[arg(long)]
        types: Option<String>,
        /// Keep only transactions on or after this date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Keep only transactions on or before this date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Where to export rejected rows for inspection
        #[arg(long)]
        rejected_out: Option<PathBuf>,
    },
    /// Validate a raw extract and report violations without loading
    Validate {
        #[arg(long)]
        input: PathBuf,
        /// Where to export rejected rows for inspection
        #[arg(long)]
        rejected_out: Option<PathBuf>,
    },
    /// Sample a large raw extract down to a smaller file
    Sample {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Number of data lines to keep
        #[arg(long)]
        size: usize,
    },
    /// Count loaded transactions per department
    Count {
        /// Database file (defaults to the configured path)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Serve the query layer over HTTP
    Serve {
        /// Database file (defaults to the configured path)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Port to listen on (defaults to the configured port)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn parse_property_type(raw: &str) -> Result<PropertyType> {
    match raw.trim().to_lowercase().as_str() {
        "house" => Ok(PropertyType::House),
        "apartment" => Ok(PropertyType::Apartment),
        "land" => Ok(PropertyType::Land),
        "other" => Ok(PropertyType::Other),
        other => Err(PipelineError::Config(format!(
            "unknown property type '{other}' (expected house, apartment, land or other)"
        ))),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Builds the filter from config defaults with CLI overrides on top.
fn build_filter(
    config: &Config,
    departments: Option<String>,
    types: Option<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<SaleFilter> {
    let natures = if config.filter.sale_natures.is_empty() {
        None
    } else {
        Some(config.filter.sale_natures.clone())
    };

    let departments = match departments {
        Some(raw) => Some(split_list(&raw)),
        None if !config.filter.departments.is_empty() => Some(config.filter.departments.clone()),
        None => None,
    };

    let property_types = match types {
        Some(raw) => {
            let parsed: Result<Vec<PropertyType>> =
                split_list(&raw).iter().map(|t| parse_property_type(t)).collect();
            Some(parsed?)
        }
        None if !config.filter.property_types.is_empty() => {
            Some(config.filter.property_types.clone())
        }
        None => None,
    };

    Ok(SaleFilter {
        natures,
        property_types,
        date_from: from,
        date_to: to,
        departments,
        communes: None,
    })
}

fn db_path(config: &Config, db: Option<PathBuf>) -> PathBuf {
    db.unwrap_or_else(|| PathBuf::from(&config.database.path))
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run {
            input,
            db,
            departments,
            types,
            from,
            to,
            rejected_out,
        } => {
            println!("🔄 Running pipeline on {} file(s)...", input.len());

            let filter = build_filter(&config, departments, types, from, to)?;
            let storage = SqliteStore::open(db_path(&config, db))?;

            match pipeline::run_pipeline(
                &input,
                &config,
                &filter,
                &storage,
                rejected_out.as_deref(),
            )
            .await
            {
                Ok(result) => {
                    println!("\n📊 Pipeline results:");
                    println!("   Rows read:           {}", result.total_rows);
                    println!("   Validated:           {}", result.valid_rows);
                    println!("   Rejected:            {}", result.rejected_rows);
                    println!("   Duplicates removed:  {}", result.duplicates_removed);
                    println!("   Dropped (missing):   {}", result.dropped_missing);
                    println!("   Kept after filter:   {}", result.kept_after_filter);
                    println!(
                        "   Loaded:              {} transactions, {} parcels, {} locations",
                        result.loaded.transactions, result.loaded.parcels, result.loaded.locations
                    );
                }
                Err(e) => {
                    error!("Pipeline failed: {e}");
                    println!("❌ Pipeline failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Validate {
            input,
            rejected_out,
        } => {
            println!("🛡️  Validating {}...", input.display());

            let delimiter = config.pipeline.delimiter_byte()?;
            let batch = ingest::read_delimited(&input, delimiter)?;
            let validator = validate::RowValidator::new(
                config.pipeline.min_year,
                config.pipeline.max_year,
            );
            let report = validator.validate_batch(&batch);

            for failure in report.rejected.iter().take(20) {
                let fields: Vec<&str> = failure
                    .violations
                    .iter()
                    .map(|v| v.field.as_str())
                    .collect();
                println!("   Row {} invalid ({})", failure.row_index, fields.join(", "));
            }
            if report.rejected.len() > 20 {
                println!("   ... and {} more", report.rejected.len() - 20);
            }
            println!(
                "\n{}/{} rows successfully validated.",
                report.records.len(),
                report.total_rows
            );

            if let Some(path) = rejected_out {
                if !report.rejected.is_empty() {
                    validate::write_rejected_csv(&path, &report.rejected)?;
                    println!("Rejected rows saved to: {}", path.display());
                }
            }
        }
        Commands::Sample {
            input,
            output,
            size,
        } => {
            let sampled = sample::random_sample(&input, &output, size)?;
            println!("✅ Sampled {sampled} lines to {}", output.display());
        }
        Commands::Count { db } => {
            let storage = SqliteStore::open(db_path(&config, db))?;
            let counts = storage
                .count_by_department(&TransactionQuery::default())
                .await?;
            if counts.is_empty() {
                println!("No transactions loaded yet.");
            }
            for count in counts {
                println!(
                    "Département {}: {} transactions",
                    count.department_code, count.transactions
                );
            }
        }
        Commands::Serve { db, port } => {
            let port = port.unwrap_or(config.server.port);
            let storage: Arc<dyn Storage> = Arc::new(SqliteStore::open(db_path(&config, db))?);

            let metrics_handle = match observability::install_prometheus() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("metrics recorder unavailable: {e}");
                    None
                }
            };

            let service = Arc::new(QueryService::new(storage));
            service.initialize_model().await;
            info!(port, "starting serving layer");

            server::start_server(service, port, metrics_handle).await?;
        }
    }
    Ok(())
}

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use taxref_collector::app::connectivity_use_case::ConnectivityCheck;
use taxref_collector::app::enrich_use_case::{BatchReport, EnrichUseCase};
use taxref_collector::app::ports::HttpClientPort;
use taxref_collector::config::Config;
use taxref_collector::error::TaxrefError;
use taxref_collector::infra::{ConsoleProgressReporter, ReqwestHttp};
use taxref_collector::observability;
use taxref_collector::storage::SqliteRecordStore;
use taxref_collector::strategy::{IdentifierStrategy, LookupStrategy, NameSource, NameStrategy};

#[derive(Parser)]
#[command(name = "taxref_collector")]
#[command(about = "Fill TAXREF reference identifiers into an observation table")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (defaults to ./config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the batch report as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Suppress progress lines
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Directory for JSON log files (overrides config)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TableArgs {
    /// SQLite database holding the observation table
    #[arg(long)]
    db: PathBuf,

    #[arg(long, default_value = "observations")]
    table: String,

    /// Fail instead of adding missing cd_nom / taxref_name / taxref_url columns
    #[arg(long)]
    no_create_fields: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up TAXREF ids from GBIF taxon keys
    Gbif {
        #[command(flatten)]
        table: TableArgs,

        /// Column holding the GBIF taxon key
        #[arg(long, default_value = "gbif_id")]
        id_field: String,
    },
    /// Look up TAXREF ids from scientific names and ranks via ChecklistBank
    Names {
        #[command(flatten)]
        table: TableArgs,

        /// Column holding the taxonomic rank
        #[arg(long, default_value = "rank")]
        rank_field: String,

        /// Column holding the scientific name. When omitted the name is read
        /// from the column named after the record's rank.
        #[arg(long)]
        name_field: Option<String>,
    },
    /// Only run the connectivity probe
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let log_dir = cli.log_dir.clone().unwrap_or_else(|| config.logging.dir.clone());
    let _log_guard = observability::init_logging(&log_dir, cli.verbose);
    observability::metrics::init();

    let http: Arc<dyn HttpClientPort> = Arc::new(
        ReqwestHttp::new(config.request_timeout(), &config.http.user_agent).context("Failed to build HTTP client")?,
    );

    if let Err(e) = ConnectivityCheck::new(http.clone(), config.services.probe_url.clone())
        .check()
        .await
    {
        match &e {
            TaxrefError::Connectivity(_) => println!("❌ No internet connection. Check your network and try again."),
            TaxrefError::ServiceUnavailable { .. } => {
                println!("❌ The service is down, please try again later.")
            }
            _ => println!("❌ Connectivity check failed: {}", e),
        }
        return Err(e.into());
    }

    let (table, strategy): (TableArgs, Box<dyn LookupStrategy>) = match cli.command {
        Commands::Check => {
            println!("✅ Connectivity OK");
            return Ok(());
        }
        Commands::Gbif { table, id_field } => {
            let strategy =
                IdentifierStrategy::new(&config.services.gbif_base_url, id_field, config.lookup.reference_title.clone())?;
            (table, Box::new(strategy))
        }
        Commands::Names {
            table,
            rank_field,
            name_field,
        } => {
            let source = match name_field {
                Some(field) => NameSource::Field(field),
                None => NameSource::RankColumn,
            };
            let strategy = NameStrategy::new(
                &config.services.checklistbank_base_url,
                rank_field,
                source,
                config.lookup.dataset_key,
            )?;
            (table, Box::new(strategy))
        }
    };

    let store = SqliteRecordStore::open(&table.db, &table.table)
        .with_context(|| format!("Failed to open table '{}' in {}", table.table, table.db.display()))?;
    if !table.no_create_fields {
        let added = store.ensure_output_fields()?;
        if !added.is_empty() {
            info!("Added output columns: {:?}", added);
        }
    }

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current request");
            ctrl_c_token.cancel();
        }
    });

    if !cli.json {
        println!("🔄 Running {} lookup on {}...", strategy.name(), table.table);
    }
    let progress = Arc::new(ConsoleProgressReporter::new(cli.quiet || cli.json));
    let use_case = EnrichUseCase::new(http, Arc::new(store), progress)
        .with_timeout(config.request_timeout())
        .with_cancellation(cancel);

    match use_case.run(strategy.as_ref()).await {
        Ok(report) => {
            print_report(&report, cli.json)?;
            Ok(())
        }
        Err(e) => {
            error!("Enrichment failed: {}", e);
            println!("❌ Enrichment failed: {}", e);
            Err(e.into())
        }
    }
}

fn print_report(report: &BatchReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("\n📊 Results for {}:", report.strategy);
    println!("   Jobs: {}/{}", report.completed_jobs, report.total_jobs);
    println!("   Records updated: {}", report.updated_records);
    println!("   Not found: {}", report.not_found);
    println!("   Ambiguous: {}", report.ambiguous);
    println!("   Service unavailable: {}", report.service_unavailable);
    println!("   Failed: {}", report.failed);
    println!("   Skipped records: {}", report.skipped_records);
    if report.cancelled {
        println!("\n⚠️  Run cancelled before all jobs completed");
    }
    Ok(())
}

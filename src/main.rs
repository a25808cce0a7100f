use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};

use scan_harvester::logging::{init_logging, LogConfig};
use scan_harvester::sources::GitHubSource;
use scan_harvester::store::SqliteStore;
use scan_harvester::{HarvesterConfig, IngestionScheduler, QueryField, RecordStore, RepoRef};

#[derive(Parser, Debug)]
#[command(
    name = "scan-harvester",
    version,
    about = "Harvest vulnerability scan files into SQLite"
)]
struct Cli {
    /// SQLite database file (overrides HARVESTER_DATABASE_PATH)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest every scan file at the root of a GitHub repository
    Scan {
        /// Repository as owner/name
        repo: String,

        /// Maximum concurrent fetches (overrides HARVESTER_CONCURRENCY)
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Query stored vulnerabilities by one field
    Query {
        /// severity, status, package_name, scan_id, resource_type, resource_name or source_file
        #[arg(long, default_value = "severity")]
        field: String,

        #[arg(long)]
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env().context("Invalid logging configuration")?;
    init_logging(&log_config).context("Failed to initialize logging")?;

    let mut config = HarvesterConfig::from_env().context("Invalid harvester configuration")?;
    if let Some(path) = cli.database {
        config = config.with_database_path(path);
    }

    let path = &config.database_path;
    let store = SqliteStore::open(path)
        .with_context(|| format!("Failed to open database '{}'", path.display()))?;
    let store = Arc::new(store);

    match cli.command {
        Command::Scan { repo, concurrency } => {
            let repo: RepoRef = repo.parse()?;
            if let Some(concurrency) = concurrency {
                config = config.with_concurrency(concurrency);
            }
            config.validate()?;
            scan(&config, store, repo).await
        }
        Command::Query { field, value } => {
            let field: QueryField = field.parse().map_err(anyhow::Error::msg)?;
            let records = store.query_by_field(field, &value).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
    }
}

async fn scan(config: &HarvesterConfig, store: Arc<SqliteStore>, repo: RepoRef) -> Result<()> {
    let source = Arc::new(GitHubSource::new(config).context("Failed to build HTTP client")?);
    let scheduler = IngestionScheduler::new(config, source.clone(), source, store);

    let cancel = scheduler.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling scan");
            cancel.cancel();
        }
    });

    info!(repo = %repo, "Starting scan");
    let summary = scheduler
        .ingest(&repo)
        .await
        .with_context(|| format!("Failed to scan repository '{}'", repo))?;

    let response = json!({
        "message": "Scan completed successfully",
        "repo": repo.to_string(),
        "total_vulnerabilities": summary.total_persisted,
        "summary": summary,
    });
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

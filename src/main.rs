use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

use tabula::config::context::build_metastore;
use tabula::config::schema::load_config;
use tabula::frontend::http::run_server;

const DEFAULT_LOG_FILTER: &str = "tabula=info";

#[derive(Debug, Parser)]
#[clap(name = "tabula", version, about = "Multi-tenant tabular data store")]
struct Args {
    /// Path to the TOML config file
    #[clap(short, long, value_parser, default_value = "tabula.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[clap(long)]
    json_logs: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let result = if json {
        tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .finish(),
        )
    } else {
        tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .finish(),
        )
    };
    if let Err(e) = result {
        eprintln!("Error setting up logging: {e}");
    }

    // Route `log` records from sqlx through the subscriber
    if let Err(e) = LogTracer::init() {
        eprintln!("Error forwarding log records: {e}");
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down"),
        Err(e) => warn!("Error listening for Ctrl-C: {e}"),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.json_logs);

    info!("Starting Tabula {}", env!("CARGO_PKG_VERSION"));

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading config from {}: {e}", args.config.display());
            exit(1);
        }
    };

    let metastore = match build_metastore(&config).await {
        Ok(metastore) => Arc::new(metastore),
        Err(e) => {
            error!("Error setting up the catalog: {e}");
            exit(1);
        }
    };

    let http = match config.frontend.http {
        Some(http) => http,
        None => {
            warn!("No frontends configured, nothing to do");
            return;
        }
    };

    if let Err(e) = run_server(metastore, http, shutdown_signal()).await {
        error!("{e}");
        exit(1);
    }
}

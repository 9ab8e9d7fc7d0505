//! Tributary CLI tool

use clap::{Parser, Subcommand};
use std::net::SocketAddr;

mod commands;
mod config;
mod logging;
mod server;

use config::Config;
use logging::LogFormat;

#[derive(Parser)]
#[command(name = "tributary")]
#[command(author, version, about = "Multi-tenant incremental sync orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Log output format
    #[arg(long, value_enum, env = "TRIBUTARY_LOG_FORMAT", default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,

    /// Run one batch over every enabled data source
    Run {
        /// Print the batch summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run batches on an interval until interrupted
    Daemon {
        /// Serve /metrics and /health on this address
        #[arg(long, env = "TRIBUTARY_METRICS_ADDR")]
        metrics_addr: Option<SocketAddr>,
    },

    /// Show the run rows of a data source
    Status {
        /// Data source id
        #[arg(long)]
        data_source: String,
    },

    /// List registered scripts in execution order
    Scripts {
        /// Only show this provider
        #[arg(long)]
        provider: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_format, cli.verbose);

    match cli.command {
        Commands::Migrate => {
            let config = Config::load(cli.database_url)?;
            commands::migrate::execute(&config).await?;
        }
        Commands::Run { json } => {
            let config = Config::load(cli.database_url)?;
            let summary = commands::run::execute(&config, json).await?;
            if summary.has_failures() {
                std::process::exit(1);
            }
        }
        Commands::Daemon { metrics_addr } => {
            let config = Config::load(cli.database_url)?;
            commands::daemon::execute(&config, metrics_addr).await?;
        }
        Commands::Status { data_source } => {
            let config = Config::load(cli.database_url)?;
            commands::status::execute(&config, &data_source).await?;
        }
        Commands::Scripts { provider } => {
            commands::scripts::execute(provider.as_deref())?;
        }
    }

    Ok(())
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use postqueue_core::{Config, Result};

mod commands;

use commands::jobs::JobsCommands;

#[derive(Parser)]
#[command(name = "postqueue")]
#[command(about = "Durable, priority-aware scheduler for time-triggered social posting")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Set log level")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        #[arg(short = 'H', long, help = "Bind address")]
        host: Option<String>,

        #[arg(short = 'P', long, help = "Port number")]
        port: Option<u16>,
    },

    /// Job management
    Jobs {
        #[command(subcommand)]
        command: JobsCommands,
    },

    /// Show scheduler status
    Status,
}

fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(&path.display().to_string())?,
        None => Config::from_env()?,
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    init_tracing(&level);

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            commands::serve::run(config).await
        }
        Commands::Jobs { command } => commands::jobs::run(config, command).await,
        Commands::Status => commands::jobs::status(config).await,
    }
}

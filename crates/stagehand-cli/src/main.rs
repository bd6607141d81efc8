//! stagehand CLI tool.

use clap::{Parser, Subcommand};

mod commands;

use commands::ApiClient;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "stagehand build orchestration CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "STAGEHAND_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a build on the CI engine
    Invoke {
        /// Build ID
        id: i64,
        /// Email the owner when the build ends
        #[arg(long)]
        notify: bool,
        /// Re-run a build that already has a phase ledger
        #[arg(long)]
        rebuild: bool,
    },
    /// Stop a queued or running build
    Stop {
        /// Build ID
        id: i64,
    },
    /// Show a build's phase ledger
    Ledger {
        /// Build ID
        id: i64,
    },
    /// List builds executing a pipeline phase
    InProgress,
    /// List builds waiting in the CI engine's queue
    InQueue,
    /// Validate a system configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "stagehand.kdl")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Invoke {
            id,
            notify,
            rebuild,
        } => {
            let client = ApiClient::new(&cli.api_url)?;
            commands::builds::invoke(&client, id, notify, rebuild).await?;
        }
        Commands::Stop { id } => {
            let client = ApiClient::new(&cli.api_url)?;
            commands::builds::stop(&client, id).await?;
        }
        Commands::Ledger { id } => {
            let client = ApiClient::new(&cli.api_url)?;
            commands::builds::ledger(&client, id).await?;
        }
        Commands::InProgress => {
            let client = ApiClient::new(&cli.api_url)?;
            commands::builds::in_progress(&client).await?;
        }
        Commands::InQueue => {
            let client = ApiClient::new(&cli.api_url)?;
            commands::builds::in_queue(&client).await?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
    }

    Ok(())
}

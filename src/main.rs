use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "nudge")]
#[command(version, about = "Slack mention reminders with manager escalation")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = nudge::config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP service (and the local task worker)
    Serve {
        /// Port to listen on (overrides server.port and PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Create the SQLite database and exit
    InitDb {
        /// Database path (overrides store.db_path)
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View, validate or create the configuration file
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Manage installed workspaces
    Tenant {
        #[command(subcommand)]
        command: TenantCommands,
    },
    /// List watched mentions
    Mentions {
        /// Only this team
        #[arg(long)]
        team: Option<String>,
        #[arg(long, default_value = "50")]
        limit: u32,
    },
    /// List queued local scheduler tasks
    Tasks {
        /// Only tasks that exhausted their attempts
        #[arg(long)]
        dead: bool,
    },
    /// Delete watch records older than a duration
    Prune {
        /// Age cutoff, e.g. "7d" or "36h"
        #[arg(long)]
        older_than: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration (secrets masked)
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default nudge.toml
    Init,
}

#[derive(Subcommand, Clone)]
pub enum TenantCommands {
    /// List installed workspaces
    List,
    /// Show one workspace
    Show { team_id: String },
    /// Install a workspace with an existing bot token
    Register {
        team_id: String,
        /// Bot token (xoxb-…)
        #[arg(long, env = "SLACK_BOT_TOKEN")]
        token: String,
    },
    /// Set the escalation contact
    SetManager { team_id: String, user_id: String },
    /// Clear the escalation contact
    UnsetManager { team_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Process env wins over .env entries.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { port } => cmd::cmd_serve(&cli.config, *port).await?,
        Commands::InitDb { db_path } => {
            nudge::telemetry::init_cli();
            cmd::cmd_init_db(&cli.config, db_path.clone())?
        }
        Commands::Config { command } => cmd::cmd_config(&cli.config, command.clone())?,
        Commands::Tenant { command } => {
            nudge::telemetry::init_cli();
            cmd::cmd_tenant(&cli.config, command.clone()).await?
        }
        Commands::Mentions { team, limit } => {
            nudge::telemetry::init_cli();
            cmd::cmd_mentions(&cli.config, team.clone(), *limit).await?
        }
        Commands::Tasks { dead } => {
            nudge::telemetry::init_cli();
            cmd::cmd_tasks(&cli.config, *dead).await?
        }
        Commands::Prune { older_than } => {
            nudge::telemetry::init_cli();
            cmd::cmd_prune(&cli.config, older_than).await?
        }
    }

    Ok(())
}

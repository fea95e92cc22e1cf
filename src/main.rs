use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod cmd;

#[derive(Parser)]
#[command(name = "truthcast")]
#[command(version, about = "Resumable multi-phase text verification pipeline")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Print command results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Analysis service base URL. Overrides truthcast.toml and TRUTHCAST_API_BASE.
    #[arg(long, global = true)]
    pub api_base: Option<String>,

    /// SQLite database path. Overrides truthcast.toml and TRUTHCAST_HISTORY_DB_PATH.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline on a piece of text
    Run {
        /// Text to verify
        text: Option<String>,

        /// Read the text from a file instead
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Use this task id instead of generating one
        #[arg(long)]
        task_id: Option<String>,

        /// Analyse even when detect judges the text out of scope
        #[arg(long)]
        force: bool,
    },
    /// Show the latest (or given) persisted task
    Status {
        #[arg(long)]
        task_id: Option<String>,
    },
    /// Retry one phase of the persisted task, or its first failed phase
    Retry {
        #[arg(short, long)]
        phase: Option<String>,

        #[arg(long)]
        task_id: Option<String>,
    },
    /// Continue the persisted task from its first unfinished phase
    Resume {
        #[arg(long)]
        task_id: Option<String>,
    },
    /// Show a stored analysis history record
    History {
        record_id: String,
    },
    /// View, validate or initialise configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show file and effective configuration
    Show,
    /// Check configuration for problems
    Validate,
    /// Write a default truthcast.toml
    Init,
}

fn init_logging(verbose: bool, json: bool) {
    let default = if verbose {
        "truthcast=debug"
    } else {
        "truthcast=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr so `--json` output stays parseable.
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .without_time()
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            text,
            file,
            task_id,
            force,
        } => {
            let input = cmd::read_input(text.as_deref(), file.as_deref())?;
            cmd::cmd_run(&cli, &project_dir, &input, task_id.clone(), *force).await?;
        }
        Commands::Status { task_id } => {
            cmd::cmd_status(&cli, &project_dir, task_id.as_deref()).await?
        }
        Commands::Retry { phase, task_id } => {
            cmd::cmd_retry(&cli, &project_dir, phase.as_deref(), task_id.as_deref()).await?
        }
        Commands::Resume { task_id } => {
            cmd::cmd_resume(&cli, &project_dir, task_id.as_deref()).await?
        }
        Commands::History { record_id } => cmd::cmd_history(&cli, &project_dir, record_id).await?,
        Commands::Config { command } => cmd::cmd_config(&cli, &project_dir, command.clone())?,
    }

    Ok(())
}

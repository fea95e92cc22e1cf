//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled              |
//! |-----------|-------------------------------|
//! | `run`     | `Run`, `Retry`, `Resume`      |
//! | `status`  | `Status`, `History`           |
//! | `config`  | `Config`                      |

pub mod config;
pub mod run;
pub mod status;

pub use config::cmd_config;
pub use run::{cmd_resume, cmd_retry, cmd_run};
pub use status::{cmd_history, cmd_status};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use truthcast::config::{CliOverrides, SnapshotBackend, TruthcastConfig};
use truthcast::orchestrator::TaskOrchestrator;
use truthcast::remote::HttpStageClient;
use truthcast::store::{HistoryStore, HttpSnapshotStore, SnapshotStore, SqliteStore};

use super::Cli;

/// Everything a command needs, wired from configuration.
pub struct App {
    pub config: TruthcastConfig,
    pub history: Arc<dyn HistoryStore>,
    pub orchestrator: Arc<TaskOrchestrator>,
}

pub fn load_config(cli: &Cli, project_dir: &Path) -> Result<TruthcastConfig> {
    let overrides = CliOverrides {
        api_base: cli.api_base.clone(),
        db_path: cli.db_path.clone(),
    };
    TruthcastConfig::load(project_dir, &overrides)
}

pub fn open_app(cli: &Cli, project_dir: &Path) -> Result<App> {
    let config = load_config(cli, project_dir)?;
    let db_path = config.db_path();
    let sqlite = Arc::new(
        SqliteStore::new(&db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?,
    );
    let snapshots: Arc<dyn SnapshotStore> = match config.snapshot_backend() {
        SnapshotBackend::Sqlite => sqlite.clone(),
        SnapshotBackend::Http => Arc::new(HttpSnapshotStore::new(config.api_base(), config.timeout())?),
    };
    let stages = Arc::new(HttpStageClient::new(
        config.api_base(),
        config.timeout(),
        config.retry_times(),
    )?);
    tracing::debug!(
        api_base = config.api_base(),
        db_path = %db_path.display(),
        backend = %config.snapshot_backend(),
        "Opened pipeline"
    );

    let history: Arc<dyn HistoryStore> = sqlite;
    let orchestrator = Arc::new(TaskOrchestrator::new(
        stages,
        snapshots,
        history.clone(),
        config.pipeline_config(),
    ));
    Ok(App {
        config,
        history,
        orchestrator,
    })
}

/// Text from the positional argument or `--file`.
pub fn read_input(text: Option<&str>, file: Option<&Path>) -> Result<String> {
    match (text, file) {
        (Some(text), _) => Ok(text.to_string()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display())),
        (None, None) => bail!("Provide the text to verify or --file <PATH>"),
    }
}

/// Cancel the active task when Ctrl-C arrives.
pub fn cancel_on_ctrl_c(orchestrator: &Arc<TaskOrchestrator>) -> tokio::task::JoinHandle<()> {
    let orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling...");
            orchestrator.cancel().await;
        }
    })
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

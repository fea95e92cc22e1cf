//! Pipeline execution commands: `run`, `retry`, `resume`.

use anyhow::{Result, bail};
use std::path::Path;

use truthcast::orchestrator::{HydrateOptions, HydrateOutcome, RunOptions, TaskOrchestrator};
use truthcast_common::Phase;

use super::super::Cli;
use super::{cancel_on_ctrl_c, open_app, print_json};

pub async fn cmd_run(
    cli: &Cli,
    project_dir: &Path,
    input: &str,
    task_id: Option<String>,
    force: bool,
) -> Result<()> {
    let app = open_app(cli, project_dir)?;
    let ctrl_c = cancel_on_ctrl_c(&app.orchestrator);

    let summary = app
        .orchestrator
        .run(input, RunOptions { task_id, force })
        .await;
    ctrl_c.abort();
    let summary = summary?;

    if cli.json {
        print_json(&summary)?;
    } else {
        truthcast::ui::print_summary(&summary);
    }
    Ok(())
}

pub async fn cmd_retry(
    cli: &Cli,
    project_dir: &Path,
    phase: Option<&str>,
    task_id: Option<&str>,
) -> Result<()> {
    let phase = phase.map(str::parse::<Phase>).transpose()?;
    let app = open_app(cli, project_dir)?;
    adopt(&app.orchestrator, task_id).await?;
    let ctrl_c = cancel_on_ctrl_c(&app.orchestrator);

    let retried = match phase {
        Some(phase) => app.orchestrator.retry_phase(phase).await.map(|_| Some(phase)),
        None => app.orchestrator.retry_failed().await,
    };
    ctrl_c.abort();

    match retried? {
        Some(phase) => tracing::debug!(phase = %phase, "Retry finished"),
        None => {
            if !cli.json {
                println!("No failed phase to retry.");
            }
        }
    }
    let view = app.orchestrator.view().await;
    if cli.json {
        print_json(&view)?;
    } else {
        truthcast::ui::print_view(&view);
    }
    Ok(())
}

pub async fn cmd_resume(cli: &Cli, project_dir: &Path, task_id: Option<&str>) -> Result<()> {
    let app = open_app(cli, project_dir)?;
    adopt(&app.orchestrator, task_id).await?;
    let ctrl_c = cancel_on_ctrl_c(&app.orchestrator);

    let summary = app.orchestrator.resume().await;
    ctrl_c.abort();
    let summary = summary?;

    if cli.json {
        print_json(&summary)?;
    } else {
        truthcast::ui::print_summary(&summary);
    }
    Ok(())
}

/// Make the persisted task the active one, or explain why there is none.
async fn adopt(orchestrator: &TaskOrchestrator, task_id: Option<&str>) -> Result<()> {
    let options = HydrateOptions {
        force: true,
        silent: false,
    };
    match orchestrator.hydrate(task_id, options).await {
        HydrateOutcome::Adopted { .. } => Ok(()),
        HydrateOutcome::NothingToResume => match task_id {
            Some(id) => bail!("No persisted task with id {}", id),
            None => bail!("No persisted task to continue. Start one with 'truthcast run'."),
        },
        HydrateOutcome::Unavailable => bail!("Snapshot store is unavailable"),
        HydrateOutcome::SkippedActiveWork => bail!("Another task is active"),
    }
}

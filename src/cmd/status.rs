//! Read-only commands: `status`, `history`.

use anyhow::{Result, bail};
use console::style;
use std::path::Path;

use truthcast::orchestrator::{HydrateOptions, HydrateOutcome};

use super::super::Cli;
use super::{open_app, print_json};

pub async fn cmd_status(cli: &Cli, project_dir: &Path, task_id: Option<&str>) -> Result<()> {
    let app = open_app(cli, project_dir)?;
    let orchestrator = &app.orchestrator;

    if task_id.is_none() {
        let Some(latest) = orchestrator.probe_latest_restorable().await else {
            if cli.json {
                println!("null");
            } else {
                println!();
                println!("No persisted task. Start one with 'truthcast run <TEXT>'.");
                println!();
            }
            return Ok(());
        };
        tracing::debug!(task_id = %latest.task_id, "Found latest task");
    }

    let options = HydrateOptions {
        force: true,
        silent: true,
    };
    match orchestrator.hydrate(task_id, options).await {
        HydrateOutcome::Adopted { .. } => {}
        HydrateOutcome::NothingToResume => {
            bail!("No persisted task with id {}", task_id.unwrap_or("latest"))
        }
        HydrateOutcome::Unavailable => bail!("Snapshot store is unavailable"),
        HydrateOutcome::SkippedActiveWork => bail!("Another task is active"),
    }

    let view = orchestrator.view().await;
    if cli.json {
        print_json(&view)?;
    } else {
        truthcast::ui::print_view(&view);
    }
    Ok(())
}

pub async fn cmd_history(cli: &Cli, project_dir: &Path, record_id: &str) -> Result<()> {
    let app = open_app(cli, project_dir)?;
    let Some(record) = app.history.get(record_id).await? else {
        bail!("No history record {}", record_id);
    };

    if cli.json {
        return print_json(&record);
    }

    println!();
    println!("Record {}", style(&record.id).bold());
    println!("  created:  {}", record.created_at);
    println!("  input:    {}", truthcast::ui::preview(&record.input_text, 60));
    println!(
        "  risk:     {} (score {})",
        style(&record.risk_label).bold(),
        record.risk_score
    );
    println!("  scenario: {}", record.detected_scenario);
    if !record.evidence_domains.is_empty() {
        println!("  domains:  {}", record.evidence_domains.join(", "));
    }
    let attached = [
        ("report", record.report.is_some()),
        ("detect", record.detect.is_some()),
        ("simulation", record.simulation.is_some()),
        ("content", record.content.is_some()),
    ];
    let parts: Vec<&str> = attached
        .iter()
        .filter(|(_, present)| *present)
        .map(|(name, _)| *name)
        .collect();
    println!("  attached: {}", parts.join(", "));
    println!();
    Ok(())
}

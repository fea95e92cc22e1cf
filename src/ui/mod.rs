//! Human-readable rendering of task state.

pub mod icons;

use console::style;
use std::collections::BTreeMap;
use truthcast_common::{HaltReason, Phase, PhaseStatus, PhaseStatusMap};

use crate::orchestrator::{RestorableTask, RunSummary, TaskView};

/// Phase table lines, one per phase, with the error of each failed phase.
pub fn phase_lines(phases: &PhaseStatusMap, errors: &BTreeMap<Phase, String>) -> Vec<String> {
    phases
        .iter()
        .map(|(phase, status)| {
            let label = format!("{:<10}", phase.as_str());
            let status_text = match status {
                PhaseStatus::Done => style(status.as_str()).green(),
                PhaseStatus::Failed => style(status.as_str()).red(),
                PhaseStatus::Running => style(status.as_str()).cyan(),
                PhaseStatus::Canceled => style(status.as_str()).yellow(),
                PhaseStatus::Idle => style(status.as_str()).dim(),
            };
            let mut line = format!("  {}{} {}", icons::status_icon(status), label, status_text);
            if status == PhaseStatus::Failed
                && let Some(err) = errors.get(&phase)
            {
                line.push_str(&format!("  {}", style(err).dim()));
            }
            line
        })
        .collect()
}

fn print_halt(reason: &HaltReason) {
    println!("  {}{}", icons::HALT, style(reason.to_string()).yellow());
}

pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("Task {}", style(&summary.task_id).bold());
    for line in phase_lines(&summary.phases, &summary.errors) {
        println!("{}", line);
    }
    if let Some(reason) = &summary.halt_reason {
        print_halt(reason);
    }
    if let Some(record_id) = &summary.record_id {
        println!("  {}history record {}", icons::RECORD, record_id);
    }
    println!();
}

pub fn print_view(view: &TaskView) {
    println!();
    println!("Task {}", style(&view.task_id).bold());
    println!("  input:   {}", preview(&view.input_text, 60));
    println!("  updated: {}", view.updated_at);
    println!();
    for line in phase_lines(&view.phases, &view.errors) {
        println!("{}", line);
    }
    if let Some(reason) = &view.halt_reason {
        print_halt(reason);
    }
    if let Some(report) = &view.results.report {
        println!();
        println!(
            "  risk: {} ({}) score {}",
            style(&report.risk_label).bold(),
            report.risk_level,
            report.risk_score
        );
        println!("  {}", preview(&report.summary, 120));
    }
    if let Some(record_id) = &view.record_id {
        println!("  {}history record {}", icons::RECORD, record_id);
    }
    println!();
}

pub fn print_restorable(task: &RestorableTask) {
    println!();
    println!(
        "{}Latest task {} (updated {})",
        icons::CLOCK,
        style(&task.task_id).bold(),
        task.updated_at
    );
    println!("  input: {}", preview(&task.input_text, 60));
    for line in phase_lines(&task.phases, &BTreeMap::new()) {
        println!("{}", line);
    }
    if let Some(reason) = &task.halt_reason {
        print_halt(reason);
    }
    println!();
}

/// First `max` characters of `text` on one line.
pub fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_counts_chars() {
        assert_eq!(preview("短文本", 10), "短文本");
        assert_eq!(preview("一二三四五六", 3), "一二三…");
        assert_eq!(preview("a\n  b", 10), "a b");
    }

    #[test]
    fn test_phase_lines_include_failure_message() {
        console::set_colors_enabled(false);
        let phases = PhaseStatusMap::from_entries([
            (Phase::Detect, PhaseStatus::Done),
            (Phase::Claims, PhaseStatus::Failed),
        ]);
        let errors = BTreeMap::from([(Phase::Claims, "HTTP 502".to_string())]);
        let lines = phase_lines(&phases, &errors);
        assert_eq!(lines.len(), 6);
        assert!(lines[1].contains("claims"));
        assert!(lines[1].contains("HTTP 502"));
        assert!(!lines[0].contains("HTTP 502"));
    }
}

//! Integration tests for the truthcast CLI.
//!
//! These run the built binary against a temporary project directory and,
//! where a pipeline is involved, a local mock of the analysis service.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use axum::Router;
use axum::body::Body;
use axum::http::header;
use axum::response::Response;
use axum::routing::{get, post};
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use tempfile::TempDir;

const ENV_KEYS: &[&str] = &[
    "TRUTHCAST_API_BASE",
    "NEXT_PUBLIC_API_BASE",
    "TRUTHCAST_CLI_TIMEOUT",
    "TRUTHCAST_CLI_RETRY_TIMES",
    "TRUTHCAST_HISTORY_DB_PATH",
    "TRUTHCAST_DETECT_FAILURE_POLICY",
    "TRUTHCAST_SNAPSHOT_BACKEND",
    "RUST_LOG",
];

/// Helper to create a truthcast Command isolated from the caller's environment
fn truthcast(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("truthcast");
    cmd.current_dir(dir.path());
    for key in ENV_KEYS {
        cmd.env_remove(key);
    }
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_truthcast_help() {
        let dir = create_temp_project();
        truthcast(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("resume"));
    }

    #[test]
    fn test_truthcast_version() {
        let dir = create_temp_project();
        truthcast(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("truthcast"));
    }

    #[test]
    fn test_run_without_text_fails() {
        let dir = create_temp_project();
        truthcast(&dir)
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Provide the text to verify"));
    }

    #[test]
    fn test_run_with_blank_text_fails() {
        let dir = create_temp_project();
        truthcast(&dir)
            .args(["run", "   "])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Input text is empty"));
    }

    #[test]
    fn test_run_text_and_file_conflict() {
        let dir = create_temp_project();
        fs::write(dir.path().join("input.txt"), "文本").unwrap();
        truthcast(&dir)
            .args(["run", "文本", "--file", "input.txt"])
            .assert()
            .failure();
    }

    #[test]
    fn test_retry_rejects_unknown_phase() {
        let dir = create_temp_project();
        truthcast(&dir)
            .args(["retry", "--phase", "bogus"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid phase: bogus"));
    }
}

// =============================================================================
// Config Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        truthcast(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No truthcast.toml found"))
            .stdout(predicate::str::contains("http://127.0.0.1:8000"));
    }

    #[test]
    fn test_config_show_applies_cli_override() {
        let dir = create_temp_project();
        truthcast(&dir)
            .args(["--api-base", "http://analysis.internal:9000", "config"])
            .assert()
            .success()
            .stdout(predicate::str::contains("http://analysis.internal:9000"));
    }

    #[test]
    fn test_config_show_json() {
        let dir = create_temp_project();
        let output = truthcast(&dir)
            .args(["--json", "config", "show"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let value: Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(value["pipeline"]["detect_failure_policy"], "degrade");
    }

    #[test]
    fn test_config_init_writes_file_once() {
        let dir = create_temp_project();
        truthcast(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created truthcast.toml"));
        assert!(dir.path().join(".truthcast/truthcast.toml").exists());

        truthcast(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".truthcast")).unwrap();
        fs::write(
            dir.path().join(".truthcast/truthcast.toml"),
            "[api]\ntimeout_secs = 0\n\n[content]\nfaq_count = 20\n",
        )
        .unwrap();

        truthcast(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("api.timeout_secs is 0"))
            .stdout(predicate::str::contains("content.faq_count 20"));
    }

    #[test]
    fn test_config_validate_clean() {
        let dir = create_temp_project();
        truthcast(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        let dir = create_temp_project();
        truthcast(&dir)
            .env("TRUTHCAST_CLI_TIMEOUT", "soon")
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("TRUTHCAST_CLI_TIMEOUT"));
    }
}

// =============================================================================
// Status and History Tests
// =============================================================================

mod status {
    use super::*;

    #[test]
    fn test_status_with_empty_database() {
        let dir = create_temp_project();
        truthcast(&dir)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No persisted task"));
    }

    #[test]
    fn test_status_json_with_empty_database() {
        let dir = create_temp_project();
        truthcast(&dir)
            .args(["--json", "status"])
            .assert()
            .success()
            .stdout(predicate::str::diff("null\n"));
    }

    #[test]
    fn test_status_unknown_task_fails() {
        let dir = create_temp_project();
        truthcast(&dir)
            .args(["status", "--task-id", "task_missing"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("task_missing"));
    }

    #[test]
    fn test_resume_without_task_fails() {
        let dir = create_temp_project();
        truthcast(&dir).arg("resume").assert().failure();
    }

    #[test]
    fn test_history_unknown_record_fails() {
        let dir = create_temp_project();
        truthcast(&dir)
            .args(["history", "rec_missing"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No history record rec_missing"));
    }

    #[test]
    fn test_db_path_flag_creates_database() {
        let dir = create_temp_project();
        truthcast(&dir)
            .args(["--db-path", "store/pipeline.db", "status"])
            .assert()
            .success();
        assert!(dir.path().join("store/pipeline.db").exists());
    }
}

// =============================================================================
// End-to-end Pipeline Tests
// =============================================================================

fn claim() -> Value {
    json!({"claim_id": "c1", "claim_text": "某地发生爆炸", "source_sentence": "某地发生爆炸"})
}

fn evidence() -> Value {
    json!({
        "evidence_id": "e1", "claim_id": "c1", "title": "官方通报", "source": "gov",
        "url": "https://example.org/1", "published_at": "2026-02-01", "summary": "未发生爆炸",
        "stance": "refute", "source_weight": 0.9
    })
}

fn simulation_body() -> Body {
    let events = [
        json!({"stage": "emotion", "data": {"emotion_distribution": {"fear": 1.0}, "stance_distribution": {"doubt": 1.0}}}),
        json!({"stage": "narratives", "data": {"narratives": []}}),
        json!({"stage": "flashpoints", "data": {"flashpoints": ["转发量激增"]}}),
        json!({"stage": "suggestion", "data": {"suggestion": {"summary": "尽快辟谣"}}}),
    ];
    let body: String = events.iter().map(|e| format!("data: {}\n\n", e)).collect();
    Body::from(body)
}

fn analysis_service() -> Router {
    Router::new()
        .route(
            "/detect",
            post(|| async {
                axum::Json(json!({
                    "label": "suspicious", "confidence": 0.7, "score": 70,
                    "strategy": {"max_claims": 2, "is_news": true}
                }))
            }),
        )
        .route(
            "/detect/claims",
            post(|| async { axum::Json(json!({"claims": [claim()]})) }),
        )
        .route(
            "/detect/evidence",
            post(|| async { axum::Json(json!({"evidences": [evidence()]})) }),
        )
        .route(
            "/detect/evidence/align",
            post(|| async { axum::Json(json!({"evidences": [evidence()]})) }),
        )
        .route(
            "/detect/report",
            post(|| async {
                axum::Json(json!({
                    "risk_score": 82, "risk_level": "high", "risk_label": "高风险",
                    "detected_scenario": "public_safety", "evidence_domains": ["gov"],
                    "summary": "经核实为谣言"
                }))
            }),
        )
        .route(
            "/simulate/stream",
            post(|| async {
                Response::builder()
                    .header(header::CONTENT_TYPE, "text/event-stream")
                    .body(simulation_body())
                    .unwrap()
            }),
        )
        .route(
            "/content/generate",
            post(|| async {
                axum::Json(json!({"clarification": {"short": "s", "medium": "m", "long": "l"}}))
            }),
        )
        .route("/health", get(|| async { "ok" }))
}

/// Serve the mock on a background runtime that lives as long as the test.
fn spawn_service(app: Router) -> (tokio::runtime::Runtime, String) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let listener = runtime
        .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
        .unwrap();
    let addr = listener.local_addr().unwrap();
    runtime.spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (runtime, format!("http://{}", addr))
}

mod pipeline {
    use super::*;

    #[test]
    fn test_run_then_status_then_history() {
        let (_runtime, base) = spawn_service(analysis_service());
        let dir = create_temp_project();

        let output = truthcast(&dir)
            .args(["--json", "--api-base", &base, "run", "某地发生爆炸", "--task-id", "task_cli"])
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "{}",
            String::from_utf8_lossy(&output.stderr)
        );
        let summary: Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(summary["task_id"], "task_cli");
        for phase in ["detect", "claims", "evidence", "report", "simulation", "content"] {
            assert_eq!(summary["phases"][phase], "done", "{phase}");
        }
        let record_id = summary["record_id"].as_str().unwrap().to_string();

        let output = truthcast(&dir)
            .args(["--json", "--api-base", &base, "status"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let view: Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(view["task_id"], "task_cli");
        assert_eq!(view["phases"]["content"], "done");

        truthcast(&dir)
            .args(["--api-base", &base, "history", &record_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("高风险"))
            .stdout(predicate::str::contains("public_safety"));
    }

    #[test]
    fn test_run_reads_file_input() {
        let (_runtime, base) = spawn_service(analysis_service());
        let dir = create_temp_project();
        fs::write(dir.path().join("post.txt"), "某地发生爆炸").unwrap();

        truthcast(&dir)
            .args(["--api-base", &base, "run", "--file", "post.txt"])
            .assert()
            .success();

        truthcast(&dir)
            .args(["--api-base", &base, "status"])
            .assert()
            .success()
            .stdout(predicate::str::contains("某地发生爆炸"));
    }

    #[test]
    fn test_unreachable_service_marks_detect_failed() {
        let dir = create_temp_project();
        let output = truthcast(&dir)
            .env("TRUTHCAST_CLI_RETRY_TIMES", "0")
            .args(["--json", "--api-base", "http://127.0.0.1:9", "run", "某地发生爆炸"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let summary: Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(summary["phases"]["detect"], "failed");
        assert!(summary["errors"]["detect"].is_string());
    }
}

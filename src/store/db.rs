use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use truthcast_common::{
    ContentDraft, DetectResult, LatestTask, Phase, PhaseSnapshot, PhaseStatus, PhaseStatusMap,
    ReportResult, SimulationResult, SnapshotUpsert, TaskMeta, now_utc,
};

use super::{HistoryRecord, HistoryStore, SnapshotStore};
use crate::errors::StoreError;

/// Async-safe SQLite store for snapshots and analysis history.
///
/// Wraps `Database` behind `Arc<Mutex>` and runs every access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<std::sync::Mutex<Database>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))
                .map_err(StoreError::Database)?;
        }
        let db = Database::open(path).map_err(StoreError::Database)?;
        Ok(Self::from_database(db))
    }

    /// In-memory database (for tests).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let db = Database::open_in_memory().map_err(StoreError::Database)?;
        Ok(Self::from_database(db))
    }

    fn from_database(db: Database) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Database) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard).map_err(StoreError::Database)
        })
        .await
        .map_err(|e| StoreError::Other(anyhow::anyhow!("DB task panicked: {}", e)))?
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn upsert(&self, upsert: SnapshotUpsert) -> Result<String, StoreError> {
        self.call(move |db| db.upsert_snapshot(&upsert)).await
    }

    async fn load_latest(&self, task_id: Option<&str>) -> Result<Option<LatestTask>, StoreError> {
        let task_id = task_id.map(str::to_string);
        self.call(move |db| db.load_latest(task_id.as_deref())).await
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn save_report(
        &self,
        input_text: &str,
        report: &ReportResult,
        detect: Option<&DetectResult>,
    ) -> Result<String, StoreError> {
        let input_text = input_text.to_string();
        let report = report.clone();
        let detect = detect.cloned();
        self.call(move |db| db.insert_history(&input_text, &report, detect.as_ref()))
            .await
    }

    async fn update_report(
        &self,
        record_id: &str,
        report: &ReportResult,
        detect: Option<&DetectResult>,
    ) -> Result<(), StoreError> {
        let record_id = record_id.to_string();
        let report = report.clone();
        let detect = detect.cloned();
        self.call(move |db| db.update_history_report(&record_id, &report, detect.as_ref()))
            .await
    }

    async fn update_simulation(
        &self,
        record_id: &str,
        simulation: &SimulationResult,
    ) -> Result<(), StoreError> {
        let record_id = record_id.to_string();
        let json = encode(simulation).map_err(StoreError::Database)?;
        self.call(move |db| db.update_history_column(&record_id, "simulation_json", &json))
            .await
    }

    async fn update_content(&self, record_id: &str, content: &ContentDraft) -> Result<(), StoreError> {
        let record_id = record_id.to_string();
        let json = encode(content).map_err(StoreError::Database)?;
        self.call(move |db| db.update_history_column(&record_id, "content_json", &json))
            .await
    }

    async fn get(&self, record_id: &str) -> Result<Option<HistoryRecord>, StoreError> {
        let record_id = record_id.to_string();
        self.call(move |db| db.get_history(&record_id)).await
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to encode JSON column")
}

fn decode_column<T: serde::de::DeserializeOwned>(raw: Option<String>, column: &str) -> Option<T> {
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(column, error = %e, "Ignoring undecodable JSON column");
            None
        }
    }
}

/// `task_id, input_text, phases_json, meta_json, updated_at`
type TaskRow = (String, String, String, Option<String>, String);

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS pipeline_tasks (
                task_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                input_text TEXT NOT NULL,
                phases_json TEXT NOT NULL,
                meta_json TEXT
            );

            CREATE TABLE IF NOT EXISTS pipeline_phase_snapshots (
                task_id TEXT NOT NULL,
                phase TEXT NOT NULL,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                duration_ms INTEGER,
                error_message TEXT,
                payload_json TEXT,
                PRIMARY KEY (task_id, phase)
            );

            CREATE TABLE IF NOT EXISTS analysis_history (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                input_text TEXT NOT NULL,
                risk_label TEXT NOT NULL,
                risk_score INTEGER NOT NULL,
                detected_scenario TEXT NOT NULL,
                evidence_domains TEXT NOT NULL,
                report_json TEXT NOT NULL,
                detect_json TEXT,
                simulation_json TEXT,
                content_json TEXT,
                feedback_status TEXT,
                feedback_note TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_pipeline_tasks_updated ON pipeline_tasks(updated_at);
            ",
        )?;

        // Databases written before drafts were stored lack the content column.
        let has_content: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('analysis_history') WHERE name = 'content_json'",
            [],
            |row| row.get(0),
        )?;
        if !has_content {
            self.conn
                .execute("ALTER TABLE analysis_history ADD COLUMN content_json TEXT", [])
                .context("Failed to add content_json column")?;
        }
        Ok(())
    }

    // ── Pipeline snapshots ────────────────────────────────────────────

    /// Last-writer-wins upsert of the task row and one phase row.
    pub fn upsert_snapshot(&self, upsert: &SnapshotUpsert) -> Result<String> {
        let now = now_utc();
        let phases_json = encode(&upsert.phases)?;
        let meta_json = upsert.meta.as_ref().map(encode).transpose()?;
        let payload_json = upsert.payload.as_ref().map(encode).transpose()?;
        let duration_ms = upsert.duration_ms.map(|d| d as i64);

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin snapshot transaction")?;
        tx.execute(
            "INSERT INTO pipeline_tasks (task_id, created_at, updated_at, input_text, phases_json, meta_json)
             VALUES (?1, ?2, ?2, ?3, ?4, ?5)
             ON CONFLICT(task_id) DO UPDATE SET
                updated_at = excluded.updated_at,
                input_text = excluded.input_text,
                phases_json = excluded.phases_json,
                meta_json = COALESCE(excluded.meta_json, pipeline_tasks.meta_json)",
            params![upsert.task_id, now, upsert.input_text, phases_json, meta_json],
        )
        .context("Failed to upsert pipeline task")?;
        tx.execute(
            "INSERT INTO pipeline_phase_snapshots (task_id, phase, status, updated_at, duration_ms, error_message, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(task_id, phase) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at,
                duration_ms = excluded.duration_ms,
                error_message = excluded.error_message,
                payload_json = excluded.payload_json",
            params![
                upsert.task_id,
                upsert.phase.as_str(),
                upsert.status.as_str(),
                now,
                duration_ms,
                upsert.error_message,
                payload_json
            ],
        )
        .context("Failed to upsert phase snapshot")?;
        tx.commit().context("Failed to commit snapshot")?;
        Ok(now)
    }

    /// Load one task with all of its snapshots.
    ///
    /// Without a task id, picks the most recently updated task; rows updated
    /// within the same second fall back to insertion order.
    pub fn load_latest(&self, task_id: Option<&str>) -> Result<Option<LatestTask>> {
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<TaskRow> {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        };
        let row = match task_id {
            Some(id) => self
                .conn
                .query_row(
                    "SELECT task_id, input_text, phases_json, meta_json, updated_at
                     FROM pipeline_tasks WHERE task_id = ?1",
                    params![id],
                    map_row,
                )
                .optional(),
            None => self
                .conn
                .query_row(
                    "SELECT task_id, input_text, phases_json, meta_json, updated_at
                     FROM pipeline_tasks ORDER BY updated_at DESC, rowid DESC LIMIT 1",
                    [],
                    map_row,
                )
                .optional(),
        }
        .context("Failed to query pipeline task")?;

        let Some((task_id, input_text, phases_json, meta_json, updated_at)) = row else {
            return Ok(None);
        };
        let phases: PhaseStatusMap =
            serde_json::from_str(&phases_json).context("Failed to decode phases_json")?;
        let meta: TaskMeta = decode_column(meta_json, "meta_json").unwrap_or_default();
        let snapshots = self.get_snapshots(&task_id)?;

        Ok(Some(LatestTask {
            task_id,
            input_text,
            phases,
            meta,
            updated_at,
            snapshots,
        }))
    }

    /// Snapshots of one task in fixed phase order. Rows naming an unknown
    /// phase or status are skipped.
    pub fn get_snapshots(&self, task_id: &str) -> Result<Vec<PhaseSnapshot>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT phase, status, updated_at, duration_ms, error_message, payload_json
                 FROM pipeline_phase_snapshots WHERE task_id = ?1",
            )
            .context("Failed to prepare get_snapshots")?;
        let rows = stmt
            .query_map(params![task_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .context("Failed to query phase snapshots")?;

        let mut snapshots = Vec::new();
        for row in rows {
            let (phase, status, updated_at, duration_ms, error_message, payload_json) =
                row.context("Failed to read phase snapshot row")?;
            let (Ok(phase), Ok(status)) = (phase.parse::<Phase>(), status.parse::<PhaseStatus>())
            else {
                tracing::warn!(
                    task_id,
                    phase = %phase,
                    status = %status,
                    "Skipping unrecognised snapshot row"
                );
                continue;
            };
            snapshots.push(PhaseSnapshot {
                phase,
                status,
                updated_at,
                duration_ms: duration_ms.map(|d| d.max(0) as u64),
                error_message,
                payload: decode_column(payload_json, "payload_json"),
            });
        }
        snapshots.sort_by_key(|s| s.phase);
        Ok(snapshots)
    }

    // ── Analysis history ──────────────────────────────────────────────

    pub fn insert_history(
        &self,
        input_text: &str,
        report: &ReportResult,
        detect: Option<&DetectResult>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let detect_json = detect.map(encode).transpose()?;
        self.conn
            .execute(
                "INSERT INTO analysis_history (
                    id, created_at, input_text, risk_label, risk_score,
                    detected_scenario, evidence_domains, report_json, detect_json
                 )
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    now_utc(),
                    input_text,
                    report.risk_label,
                    report.risk_score,
                    report.detected_scenario,
                    encode(&report.evidence_domains)?,
                    encode(report)?,
                    detect_json
                ],
            )
            .context("Failed to insert history record")?;
        Ok(id)
    }

    pub fn update_history_report(
        &self,
        record_id: &str,
        report: &ReportResult,
        detect: Option<&DetectResult>,
    ) -> Result<()> {
        let detect_json = detect.map(encode).transpose()?;
        let changed = self
            .conn
            .execute(
                "UPDATE analysis_history SET
                    risk_label = ?2,
                    risk_score = ?3,
                    detected_scenario = ?4,
                    evidence_domains = ?5,
                    report_json = ?6,
                    detect_json = COALESCE(?7, detect_json)
                 WHERE id = ?1",
                params![
                    record_id,
                    report.risk_label,
                    report.risk_score,
                    report.detected_scenario,
                    encode(&report.evidence_domains)?,
                    encode(report)?,
                    detect_json
                ],
            )
            .context("Failed to update history report")?;
        anyhow::ensure!(changed == 1, "History record {} not found", record_id);
        Ok(())
    }

    /// Write one JSON payload column of an existing record.
    pub fn update_history_column(&self, record_id: &str, column: &str, json: &str) -> Result<()> {
        let sql = match column {
            "simulation_json" => "UPDATE analysis_history SET simulation_json = ?2 WHERE id = ?1",
            "content_json" => "UPDATE analysis_history SET content_json = ?2 WHERE id = ?1",
            other => anyhow::bail!("Unknown history column '{}'", other),
        };
        let changed = self
            .conn
            .execute(sql, params![record_id, json])
            .with_context(|| format!("Failed to update {}", column))?;
        anyhow::ensure!(changed == 1, "History record {} not found", record_id);
        Ok(())
    }

    pub fn get_history(&self, record_id: &str) -> Result<Option<HistoryRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, created_at, input_text, risk_label, risk_score, detected_scenario,
                        evidence_domains, report_json, detect_json, simulation_json, content_json,
                        feedback_status, feedback_note
                 FROM analysis_history WHERE id = ?1",
                params![record_id],
                |row| {
                    Ok((
                        (
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, i64>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, String>(6)?,
                        ),
                        (
                            row.get::<_, Option<String>>(7)?,
                            row.get::<_, Option<String>>(8)?,
                            row.get::<_, Option<String>>(9)?,
                            row.get::<_, Option<String>>(10)?,
                            row.get::<_, Option<String>>(11)?,
                            row.get::<_, Option<String>>(12)?,
                        ),
                    ))
                },
            )
            .optional()
            .context("Failed to query history record")?;

        let Some((head, payloads)) = row else {
            return Ok(None);
        };
        let (id, created_at, input_text, risk_label, risk_score, detected_scenario, domains) = head;
        let (report, detect, simulation, content, feedback_status, feedback_note) = payloads;
        Ok(Some(HistoryRecord {
            id,
            created_at,
            input_text,
            risk_label,
            risk_score,
            detected_scenario,
            evidence_domains: decode_column(Some(domains), "evidence_domains").unwrap_or_default(),
            report: decode_column(report, "report_json"),
            detect: decode_column(detect, "detect_json"),
            simulation: decode_column(simulation, "simulation_json"),
            content: decode_column(content, "content_json"),
            feedback_status,
            feedback_note,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use truthcast_common::PhaseStatusMap;

    fn upsert(task_id: &str, phase: Phase, status: PhaseStatus) -> SnapshotUpsert {
        SnapshotUpsert {
            task_id: task_id.to_string(),
            input_text: "测试：阶段持久化".to_string(),
            phases: PhaseStatusMap::from_entries([(phase, status)]),
            phase,
            status,
            duration_ms: None,
            error_message: None,
            payload: Some(serde_json::json!({"detectData": {"label": "可信", "score": 10}})),
            meta: Some(TaskMeta {
                record_id: Some("r_test".into()),
                ..TaskMeta::default()
            }),
        }
    }

    fn sample_report() -> ReportResult {
        ReportResult {
            risk_score: 72,
            risk_level: "high".into(),
            risk_label: "高风险".into(),
            detected_scenario: "governance".into(),
            evidence_domains: vec!["governance".into()],
            summary: "存在较高风险".into(),
            suspicious_points: vec![],
            claim_reports: vec![],
        }
    }

    #[test]
    fn test_migrations_create_tables() -> Result<()> {
        let db = Database::open_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('pipeline_tasks', 'pipeline_phase_snapshots', 'analysis_history')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 3);
        // Idempotent
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_upsert_same_phase_keeps_one_row() -> Result<()> {
        let db = Database::open_in_memory()?;
        db.upsert_snapshot(&upsert("t1", Phase::Detect, PhaseStatus::Running))?;
        let mut done = upsert("t1", Phase::Detect, PhaseStatus::Done);
        done.duration_ms = Some(123);
        db.upsert_snapshot(&done)?;

        let latest = db.load_latest(None)?.expect("task stored");
        assert_eq!(latest.task_id, "t1");
        assert_eq!(latest.phases.get(Phase::Detect), PhaseStatus::Done);
        assert_eq!(latest.snapshots.len(), 1);
        assert_eq!(latest.snapshots[0].status, PhaseStatus::Done);
        assert_eq!(latest.snapshots[0].duration_ms, Some(123));
        assert_eq!(latest.meta.record_id.as_deref(), Some("r_test"));
        Ok(())
    }

    #[test]
    fn test_meta_kept_when_upsert_omits_it() -> Result<()> {
        let db = Database::open_in_memory()?;
        db.upsert_snapshot(&upsert("t1", Phase::Detect, PhaseStatus::Done))?;
        let mut next = upsert("t1", Phase::Claims, PhaseStatus::Running);
        next.meta = None;
        db.upsert_snapshot(&next)?;

        let latest = db.load_latest(Some("t1"))?.expect("task stored");
        assert_eq!(latest.meta.record_id.as_deref(), Some("r_test"));
        assert_eq!(latest.snapshots.len(), 2);
        assert_eq!(latest.snapshots[0].phase, Phase::Detect);
        assert_eq!(latest.snapshots[1].phase, Phase::Claims);
        Ok(())
    }

    #[test]
    fn test_load_latest_picks_last_written_task() -> Result<()> {
        let db = Database::open_in_memory()?;
        db.upsert_snapshot(&upsert("old", Phase::Detect, PhaseStatus::Done))?;
        db.upsert_snapshot(&upsert("new", Phase::Detect, PhaseStatus::Running))?;
        assert_eq!(db.load_latest(None)?.expect("task").task_id, "new");
        assert_eq!(db.load_latest(Some("old"))?.expect("task").task_id, "old");
        assert!(db.load_latest(Some("missing"))?.is_none());
        Ok(())
    }

    #[test]
    fn test_load_latest_follows_most_recent_touch() -> Result<()> {
        let db = Database::open_in_memory()?;
        db.upsert_snapshot(&upsert("old", Phase::Detect, PhaseStatus::Running))?;
        db.upsert_snapshot(&upsert("new", Phase::Detect, PhaseStatus::Running))?;
        std::thread::sleep(std::time::Duration::from_millis(5));
        // Written again within the same second as "new".
        db.upsert_snapshot(&upsert("old", Phase::Detect, PhaseStatus::Done))?;

        let latest = db.load_latest(None)?.expect("task");
        assert_eq!(latest.task_id, "old");
        assert_eq!(latest.phases.get(Phase::Detect), PhaseStatus::Done);
        Ok(())
    }

    #[test]
    fn test_unknown_snapshot_rows_are_skipped() -> Result<()> {
        let db = Database::open_in_memory()?;
        db.upsert_snapshot(&upsert("t1", Phase::Detect, PhaseStatus::Done))?;
        db.conn.execute(
            "INSERT INTO pipeline_phase_snapshots (task_id, phase, status, updated_at)
             VALUES ('t1', 'summary', 'done', '2026-01-01T00:00:00Z')",
            [],
        )?;
        let latest = db.load_latest(Some("t1"))?.expect("task");
        assert_eq!(latest.snapshots.len(), 1);
        Ok(())
    }

    #[test]
    fn test_history_roundtrip() -> Result<()> {
        let db = Database::open_in_memory()?;
        let report = sample_report();
        let id = db.insert_history("某地发生重大事件", &report, None)?;
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        let simulation = SimulationResult {
            flashpoints: Some(vec!["官方回应时间".into()]),
            ..Default::default()
        };
        db.update_history_column(&id, "simulation_json", &encode(&simulation)?)?;

        let record = db.get_history(&id)?.expect("record");
        assert_eq!(record.risk_score, 72);
        assert_eq!(record.evidence_domains, vec!["governance".to_string()]);
        assert_eq!(record.report, Some(report));
        assert_eq!(record.simulation, Some(simulation));
        assert!(record.content.is_none());
        Ok(())
    }

    #[test]
    fn test_history_update_missing_record_fails() -> Result<()> {
        let db = Database::open_in_memory()?;
        assert!(db.update_history_column("nope", "content_json", "{}").is_err());
        assert!(db.update_history_column("nope", "report_json", "{}").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_store_handle_runs_on_blocking_pool() {
        let store = SqliteStore::new_in_memory().unwrap();
        let updated_at = store
            .upsert(upsert("t1", Phase::Detect, PhaseStatus::Done))
            .await
            .unwrap();
        let latest = store.load_latest(None).await.unwrap().unwrap();
        assert_eq!(latest.snapshots[0].updated_at, updated_at);
    }

    #[tokio::test]
    async fn test_file_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/history/history.db");
        let store = SqliteStore::new(&path).unwrap();
        let id = store
            .save_report("输入", &sample_report(), None)
            .await
            .unwrap();
        assert!(path.exists());
        assert!(store.get(&id).await.unwrap().is_some());
    }
}

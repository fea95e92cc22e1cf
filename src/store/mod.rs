//! Snapshot and history persistence.
//!
//! | Type                | Backs                                     |
//! |---------------------|-------------------------------------------|
//! | `SqliteStore`       | `SnapshotStore` + `HistoryStore` (local)  |
//! | `HttpSnapshotStore` | `SnapshotStore` over the pipeline routes  |
//! | `SnapshotWriter`    | ordered fire-and-forget upserts           |

pub mod db;
pub mod http;
pub mod writer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use truthcast_common::{
    ContentDraft, DetectResult, LatestTask, ReportResult, SimulationResult, SnapshotUpsert,
};

use crate::errors::StoreError;

pub use db::SqliteStore;
pub use http::HttpSnapshotStore;
pub use writer::SnapshotWriter;

/// Durable keyed storage of per-phase snapshots.
///
/// Implementations keep only the latest snapshot per `(task_id, phase)` and
/// must apply upserts in the order they are called.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Write one phase snapshot and the task's status map. Returns the stored
    /// `updated_at` timestamp.
    async fn upsert(&self, upsert: SnapshotUpsert) -> Result<String, StoreError>;

    /// Load the given task, or the most recently updated one when `task_id`
    /// is `None`.
    async fn load_latest(&self, task_id: Option<&str>) -> Result<Option<LatestTask>, StoreError>;
}

/// One row of the analysis history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub created_at: String,
    pub input_text: String,
    pub risk_label: String,
    pub risk_score: i64,
    pub detected_scenario: String,
    pub evidence_domains: Vec<String>,
    pub report: Option<ReportResult>,
    pub detect: Option<DetectResult>,
    pub simulation: Option<SimulationResult>,
    pub content: Option<ContentDraft>,
    pub feedback_status: Option<String>,
    pub feedback_note: Option<String>,
}

/// Durable analysis records that outlive a single task.
///
/// `save_report` issues the record id; every other write is keyed by it.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save_report(
        &self,
        input_text: &str,
        report: &ReportResult,
        detect: Option<&DetectResult>,
    ) -> Result<String, StoreError>;

    async fn update_report(
        &self,
        record_id: &str,
        report: &ReportResult,
        detect: Option<&DetectResult>,
    ) -> Result<(), StoreError>;

    async fn update_simulation(
        &self,
        record_id: &str,
        simulation: &SimulationResult,
    ) -> Result<(), StoreError>;

    async fn update_content(&self, record_id: &str, content: &ContentDraft) -> Result<(), StoreError>;

    async fn get(&self, record_id: &str) -> Result<Option<HistoryRecord>, StoreError>;
}

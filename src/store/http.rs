use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use truthcast_common::{LatestTask, SnapshotUpsert};

use super::SnapshotStore;
use crate::errors::StoreError;

const SAVE_PHASE_ROUTE: &str = "/pipeline/save-phase";
const LOAD_LATEST_ROUTE: &str = "/pipeline/load-latest";

/// Response of the save-phase route (subset of fields we care about).
#[derive(Debug, Deserialize)]
struct SavePhaseResponse {
    updated_at: String,
}

/// Snapshot store backed by the analysis service's pipeline routes.
///
/// The service only exposes the globally latest task, so a request for a
/// specific task id that is not the latest reads as absent.
#[derive(Debug, Clone)]
pub struct HttpSnapshotStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    async fn check(resp: reqwest::Response, route: &str) -> Result<reqwest::Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Http(format!(
            "{} returned HTTP {}: {}",
            route,
            status.as_u16(),
            body
        )))
    }
}

#[async_trait]
impl SnapshotStore for HttpSnapshotStore {
    async fn upsert(&self, upsert: SnapshotUpsert) -> Result<String, StoreError> {
        let resp = self
            .client
            .post(self.url(SAVE_PHASE_ROUTE))
            .json(&upsert)
            .send()
            .await
            .map_err(|e| StoreError::Http(format!("{}: {}", SAVE_PHASE_ROUTE, e)))?;
        let resp = Self::check(resp, SAVE_PHASE_ROUTE).await?;
        let saved: SavePhaseResponse = resp
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("{}: {}", SAVE_PHASE_ROUTE, e)))?;
        Ok(saved.updated_at)
    }

    async fn load_latest(&self, task_id: Option<&str>) -> Result<Option<LatestTask>, StoreError> {
        let resp = self
            .client
            .get(self.url(LOAD_LATEST_ROUTE))
            .send()
            .await
            .map_err(|e| StoreError::Http(format!("{}: {}", LOAD_LATEST_ROUTE, e)))?;
        let resp = Self::check(resp, LOAD_LATEST_ROUTE).await?;
        let latest: LatestTask = resp
            .json()
            .await
            .map_err(|e| StoreError::Decode(format!("{}: {}", LOAD_LATEST_ROUTE, e)))?;

        // An empty task id is the service's way of saying "nothing stored".
        if latest.task_id.is_empty() {
            return Ok(None);
        }
        if let Some(wanted) = task_id
            && wanted != latest.task_id
        {
            tracing::debug!(
                wanted,
                latest = %latest.task_id,
                "Requested task is not the latest one on the snapshot service"
            );
            return Ok(None);
        }
        Ok(Some(latest))
    }
}

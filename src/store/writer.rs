use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use truthcast_common::SnapshotUpsert;

use super::SnapshotStore;

enum WriteOp {
    Upsert(SnapshotUpsert),
    Flush(oneshot::Sender<()>),
}

/// Serialises snapshot writes onto one background task.
///
/// Upserts are applied strictly in submission order, one at a time. Callers
/// never wait on a write; failures are logged and the in-memory task stays
/// authoritative. Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct SnapshotWriter {
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl SnapshotWriter {
    pub fn spawn(store: Arc<dyn SnapshotStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteOp>();
        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                match op {
                    WriteOp::Upsert(upsert) => {
                        let task_id = upsert.task_id.clone();
                        let phase = upsert.phase;
                        let status = upsert.status;
                        if let Err(e) = store.upsert(upsert).await {
                            tracing::warn!(
                                task_id = %task_id,
                                phase = %phase,
                                status = %status,
                                error = %e,
                                "Failed to persist phase snapshot"
                            );
                        }
                    }
                    WriteOp::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        Self { tx }
    }

    /// Queue an upsert behind every earlier submission.
    pub fn submit(&self, upsert: SnapshotUpsert) {
        if self.tx.send(WriteOp::Upsert(upsert)).is_err() {
            tracing::warn!("Snapshot writer has stopped; dropping snapshot");
        }
    }

    /// Wait until every upsert submitted before this call has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteOp::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use truthcast_common::{LatestTask, Phase, PhaseStatus, PhaseStatusMap};

    /// Records upserts after a delay that shrinks with each call, so any
    /// concurrent application would reorder them.
    #[derive(Default)]
    struct SlowStore {
        seen: Mutex<Vec<PhaseStatus>>,
        calls: Mutex<u64>,
        fail_first: bool,
    }

    #[async_trait]
    impl SnapshotStore for SlowStore {
        async fn upsert(&self, upsert: SnapshotUpsert) -> Result<String, StoreError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            tokio::time::sleep(Duration::from_millis(30u64.saturating_sub(call * 10))).await;
            if self.fail_first && call == 1 {
                return Err(StoreError::Http("unavailable".into()));
            }
            self.seen.lock().unwrap().push(upsert.status);
            Ok(String::new())
        }

        async fn load_latest(&self, _task_id: Option<&str>) -> Result<Option<LatestTask>, StoreError> {
            Ok(None)
        }
    }

    fn upsert(status: PhaseStatus) -> SnapshotUpsert {
        SnapshotUpsert {
            task_id: "t1".into(),
            input_text: "测试文本".into(),
            phases: PhaseStatusMap::from_entries([(Phase::Detect, status)]),
            phase: Phase::Detect,
            status,
            duration_ms: None,
            error_message: None,
            payload: None,
            meta: None,
        }
    }

    #[tokio::test]
    async fn test_writes_apply_in_submission_order() {
        let store = Arc::new(SlowStore::default());
        let writer = SnapshotWriter::spawn(store.clone());
        writer.submit(upsert(PhaseStatus::Idle));
        writer.submit(upsert(PhaseStatus::Running));
        writer.submit(upsert(PhaseStatus::Done));
        writer.flush().await;
        assert_eq!(
            *store.seen.lock().unwrap(),
            vec![PhaseStatus::Idle, PhaseStatus::Running, PhaseStatus::Done]
        );
    }

    #[tokio::test]
    async fn test_failed_write_does_not_block_later_writes() {
        let store = Arc::new(SlowStore {
            fail_first: true,
            ..Default::default()
        });
        let writer = SnapshotWriter::spawn(store.clone());
        writer.submit(upsert(PhaseStatus::Running));
        writer.submit(upsert(PhaseStatus::Failed));
        writer.flush().await;
        assert_eq!(*store.seen.lock().unwrap(), vec![PhaseStatus::Failed]);
    }
}

//! Remote stage operations invoked by the orchestrator.

pub mod http;

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use truthcast_common::{
    AlignRequest, ClaimItem, ClaimsRequest, ContentDraft, ContentRequest, DetectRequest,
    DetectResult, EvidenceItem, EvidenceRequest, ReportRequest, ReportResult, SimulateRequest,
    SimulationEvent,
};

use crate::errors::StageError;

pub use http::HttpStageClient;

/// The analysis stages the pipeline drives.
///
/// Implementations should observe `cancel` between their own awaited steps;
/// the orchestrator additionally races every call against it.
#[async_trait]
pub trait RemoteStages: Send + Sync {
    async fn detect(
        &self,
        request: DetectRequest,
        cancel: &CancellationToken,
    ) -> Result<DetectResult, StageError>;

    async fn extract_claims(
        &self,
        request: ClaimsRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<ClaimItem>, StageError>;

    async fn retrieve_evidence(
        &self,
        request: EvidenceRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<EvidenceItem>, StageError>;

    async fn align_evidence(
        &self,
        request: AlignRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<EvidenceItem>, StageError>;

    async fn synthesize_report(
        &self,
        request: ReportRequest,
        cancel: &CancellationToken,
    ) -> Result<ReportResult, StageError>;

    /// Stream simulation fragments into `events`. Returns once the stream
    /// closes; whether every stage arrived is for the caller to judge.
    async fn simulate_opinion(
        &self,
        request: SimulateRequest,
        events: mpsc::Sender<SimulationEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), StageError>;

    async fn generate_content(
        &self,
        request: ContentRequest,
        cancel: &CancellationToken,
    ) -> Result<ContentDraft, StageError>;
}

/// Race `fut` against `cancel`; a triggered token wins ties.
pub async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, StageError>
where
    F: Future<Output = Result<T, StageError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StageError::Cancelled),
        res = fut => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancellable_aborts_pending_call() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let res: Result<(), StageError> = cancellable(&cancel, async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(StageError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellable_passes_result_through() {
        let cancel = CancellationToken::new();
        let res = cancellable(&cancel, async { Ok::<_, StageError>(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }
}

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use truthcast_common::{
    AlignRequest, ClaimItem, ClaimsRequest, ContentDraft, ContentRequest, DetectRequest,
    DetectResult, EvidenceItem, EvidenceRequest, ReportRequest, ReportResult, SimulateRequest,
    SimulationEvent,
};

use super::{RemoteStages, cancellable};
use crate::errors::StageError;
use crate::stream::SseDecoder;

const DETECT_ROUTE: &str = "/detect";
const CLAIMS_ROUTE: &str = "/detect/claims";
const EVIDENCE_ROUTE: &str = "/detect/evidence";
const ALIGN_ROUTE: &str = "/detect/evidence/align";
const REPORT_ROUTE: &str = "/detect/report";
const SIMULATE_STREAM_ROUTE: &str = "/simulate/stream";
const CONTENT_ROUTE: &str = "/content/generate";

#[derive(Debug, serde::Deserialize)]
struct ClaimsResponse {
    claims: Vec<ClaimItem>,
}

#[derive(Debug, serde::Deserialize)]
struct EvidenceResponse {
    evidences: Vec<EvidenceItem>,
}

/// `RemoteStages` over the analysis service's HTTP API.
///
/// Unary calls share one client with a total request timeout. `retry_times`
/// is the total number of attempts on connect or timeout errors, so `1` (or
/// `0`) means a single call. The simulation stream
/// uses a second client with only a connect timeout so slow stages are never
/// cut off mid-stream.
#[derive(Debug, Clone)]
pub struct HttpStageClient {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
    retry_times: u32,
}

impl HttpStageClient {
    pub fn new(base_url: &str, timeout: Duration, retry_times: u32) -> Result<Self, StageError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        let stream_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build streaming HTTP client: {}", e))?;
        Ok(Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry_times,
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    async fn post_json<Req, Resp>(
        &self,
        route: &str,
        body: &Req,
        cancel: &CancellationToken,
    ) -> Result<Resp, StageError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let attempts = self.retry_times.max(1);
        let mut attempt = 1;
        loop {
            match cancellable(cancel, self.post_once(route, body)).await {
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(route, attempt, attempts, error = %e, "Retrying stage call");
                    let backoff = Duration::from_millis(200 * u64::from(attempt));
                    attempt += 1;
                    cancellable(cancel, async {
                        tokio::time::sleep(backoff).await;
                        Ok(())
                    })
                    .await?;
                }
                other => return other,
            }
        }
    }

    async fn post_once<Req, Resp>(&self, route: &str, body: &Req) -> Result<Resp, StageError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let resp = self
            .client
            .post(self.url(route))
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(route, e))?;
        let resp = check_status(route, resp).await?;
        resp.json::<Resp>().await.map_err(|e| StageError::Decode {
            route: route.to_string(),
            message: e.to_string(),
        })
    }
}

fn transport_error(route: &str, err: reqwest::Error) -> StageError {
    if err.is_timeout() {
        StageError::Timeout {
            route: route.to_string(),
        }
    } else {
        StageError::Network {
            route: route.to_string(),
            message: err.to_string(),
        }
    }
}

async fn check_status(route: &str, resp: reqwest::Response) -> Result<reqwest::Response, StageError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StageError::Status {
        route: route.to_string(),
        status: status.as_u16(),
        body,
    })
}

/// Decode one SSE frame; frames that are not stage events are skipped.
fn parse_frame(frame: &str) -> Option<SimulationEvent> {
    match serde_json::from_str::<SimulationEvent>(frame) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping unrecognised simulation frame");
            None
        }
    }
}

#[async_trait]
impl RemoteStages for HttpStageClient {
    async fn detect(
        &self,
        request: DetectRequest,
        cancel: &CancellationToken,
    ) -> Result<DetectResult, StageError> {
        self.post_json(DETECT_ROUTE, &request, cancel).await
    }

    async fn extract_claims(
        &self,
        request: ClaimsRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<ClaimItem>, StageError> {
        let resp: ClaimsResponse = self.post_json(CLAIMS_ROUTE, &request, cancel).await?;
        Ok(resp.claims)
    }

    async fn retrieve_evidence(
        &self,
        request: EvidenceRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<EvidenceItem>, StageError> {
        let resp: EvidenceResponse = self.post_json(EVIDENCE_ROUTE, &request, cancel).await?;
        Ok(resp.evidences)
    }

    async fn align_evidence(
        &self,
        request: AlignRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<EvidenceItem>, StageError> {
        let resp: EvidenceResponse = self.post_json(ALIGN_ROUTE, &request, cancel).await?;
        Ok(resp.evidences)
    }

    async fn synthesize_report(
        &self,
        request: ReportRequest,
        cancel: &CancellationToken,
    ) -> Result<ReportResult, StageError> {
        self.post_json(REPORT_ROUTE, &request, cancel).await
    }

    async fn simulate_opinion(
        &self,
        request: SimulateRequest,
        events: mpsc::Sender<SimulationEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let route = SIMULATE_STREAM_ROUTE;
        let resp = cancellable(cancel, async {
            self.stream_client
                .post(self.url(route))
                .header("Accept", "text/event-stream")
                .json(&request)
                .send()
                .await
                .map_err(|e| transport_error(route, e))
        })
        .await?;
        let resp = check_status(route, resp).await?;

        let mut body = Box::pin(resp.bytes_stream());
        let mut decoder = SseDecoder::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StageError::Cancelled),
                chunk = body.next() => chunk,
            };
            let frames = match chunk {
                Some(Ok(bytes)) => decoder.push(&bytes),
                Some(Err(e)) => return Err(transport_error(route, e)),
                None => {
                    if let Some(event) = decoder.finish().as_deref().and_then(parse_frame) {
                        events.send(event).await.map_err(|_| StageError::Cancelled)?;
                    }
                    return Ok(());
                }
            };
            for frame in frames {
                if let Some(event) = parse_frame(&frame) {
                    // A dropped receiver means the caller stopped listening.
                    events.send(event).await.map_err(|_| StageError::Cancelled)?;
                }
            }
        }
    }

    async fn generate_content(
        &self,
        request: ContentRequest,
        cancel: &CancellationToken,
    ) -> Result<ContentDraft, StageError> {
        self.post_json(CONTENT_ROUTE, &request, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_skips_unknown_stage() {
        assert!(parse_frame(r#"{"stage":"done","data":{}}"#).is_none());
        assert!(parse_frame("not json").is_none());
        let event = parse_frame(r#"{"stage":"suggestion","data":{"suggestion":{"summary":"s"}}}"#)
            .unwrap();
        assert_eq!(event.stage, truthcast_common::SimulationStage::Suggestion);
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client =
            HttpStageClient::new("http://127.0.0.1:8000/", Duration::from_secs(1), 0).unwrap();
        assert_eq!(client.url(DETECT_ROUTE), "http://127.0.0.1:8000/detect");
    }
}

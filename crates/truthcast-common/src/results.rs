//! Stage payloads and stage request bodies.
//!
//! Field names follow the JSON used by the analysis backend so the same types
//! serve as wire format, snapshot payload, and in-memory result.

use serde::{Deserialize, Serialize};

use crate::simulation::SimulationResult;
use crate::strategy::StrategyConfig;

/// Output of the `detect` phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectResult {
    pub label: String,
    pub confidence: f64,
    pub score: i64,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimItem {
    pub claim_id: String,
    pub claim_text: String,
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    pub source_sentence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub evidence_id: String,
    pub claim_id: String,
    pub title: String,
    pub source: String,
    pub url: String,
    pub published_at: String,
    pub summary: String,
    /// support / refute / insufficient
    pub stance: String,
    pub source_weight: f64,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default)]
    pub retrieved_at: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub is_authoritative: Option<bool>,
    #[serde(default)]
    pub raw_snippet: Option<String>,
    #[serde(default)]
    pub alignment_rationale: Option<String>,
    #[serde(default)]
    pub alignment_confidence: Option<f64>,
    #[serde(default)]
    pub source_urls: Option<Vec<String>>,
}

fn default_source_type() -> String {
    "local_kb".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimReportItem {
    pub claim: ClaimItem,
    pub evidences: Vec<EvidenceItem>,
    pub final_stance: String,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Output of the `report` phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportResult {
    pub risk_score: i64,
    pub risk_level: String,
    pub risk_label: String,
    pub detected_scenario: String,
    #[serde(default)]
    pub evidence_domains: Vec<String>,
    pub summary: String,
    #[serde(default)]
    pub suspicious_points: Vec<String>,
    #[serde(default)]
    pub claim_reports: Vec<ClaimReportItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationContent {
    pub short: String,
    pub medium: String,
    pub long: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqItem {
    pub question: String,
    pub answer: String,
    #[serde(default = "default_faq_category")]
    pub category: String,
}

fn default_faq_category() -> String {
    "general".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformScript {
    pub platform: String,
    pub content: String,
    #[serde(default)]
    pub tips: Vec<String>,
    #[serde(default)]
    pub hashtags: Option<Vec<String>>,
    #[serde(default)]
    pub estimated_read_time: Option<String>,
}

/// Output of the `content` phase.
///
/// Every part is optional because drafts can be written module by module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<ClarificationContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faq: Option<Vec<FaqItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_scripts: Option<Vec<PlatformScript>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub based_on: Option<serde_json::Value>,
}

// Stage request bodies

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectRequest {
    pub text: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimsRequest {
    pub text: String,
    pub strategy: Option<StrategyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRequest {
    pub text: Option<String>,
    pub claims: Vec<ClaimItem>,
    pub strategy: Option<StrategyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignRequest {
    pub claims: Vec<ClaimItem>,
    pub evidences: Vec<EvidenceItem>,
    pub strategy: Option<StrategyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub text: String,
    pub claims: Vec<ClaimItem>,
    pub evidences: Vec<EvidenceItem>,
    pub detect_data: Option<DetectResult>,
    pub strategy: Option<StrategyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateRequest {
    pub text: String,
    pub claims: Vec<ClaimItem>,
    pub evidences: Vec<EvidenceItem>,
    pub report: Option<ReportResult>,
    pub time_window_hours: u32,
    pub platform: String,
    #[serde(default)]
    pub comments: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRequest {
    pub text: String,
    pub report: ReportResult,
    pub simulation: Option<SimulationResult>,
    pub style: String,
    pub platforms: Vec<String>,
    pub include_faq: bool,
    pub faq_count: u32,
}

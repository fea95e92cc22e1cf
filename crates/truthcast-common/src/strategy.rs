use serde::{Deserialize, Serialize};

/// Derived tuning parameters produced by the `detect` phase.
///
/// Threaded unmodified into every downstream stage request so extraction and
/// retrieval depth follow the apparent complexity and risk of the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Claim-count ceiling for extraction
    #[serde(default = "default_max_claims")]
    pub max_claims: u32,
    /// simple / medium / complex
    #[serde(default = "default_level")]
    pub complexity_level: String,
    #[serde(default)]
    pub complexity_reason: String,
    /// Evidence-depth target per claim
    #[serde(default = "default_evidence_per_claim")]
    pub evidence_per_claim: u32,
    /// critical / high / medium / low
    #[serde(default = "default_level")]
    pub risk_level: String,
    #[serde(default)]
    pub risk_reason: String,
    #[serde(default = "default_summary_target_min")]
    pub summary_target_min: u32,
    #[serde(default = "default_summary_target_max")]
    pub summary_target_max: u32,
    #[serde(default = "default_true")]
    pub enable_summarization: bool,
    /// Scope gate: false means the input is not suitable for deep analysis
    #[serde(default = "default_true")]
    pub is_news: bool,
    #[serde(default = "default_news_confidence")]
    pub news_confidence: f64,
    /// news / opinion / chat / ad / other
    #[serde(default = "default_text_type")]
    pub detected_text_type: String,
    #[serde(default)]
    pub news_reason: String,
}

fn default_max_claims() -> u32 {
    5
}

fn default_level() -> String {
    "medium".to_string()
}

fn default_evidence_per_claim() -> u32 {
    5
}

fn default_summary_target_min() -> u32 {
    1
}

fn default_summary_target_max() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_news_confidence() -> f64 {
    0.5
}

fn default_text_type() -> String {
    "news".to_string()
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            max_claims: default_max_claims(),
            complexity_level: default_level(),
            complexity_reason: String::new(),
            evidence_per_claim: default_evidence_per_claim(),
            risk_level: default_level(),
            risk_reason: String::new(),
            summary_target_min: default_summary_target_min(),
            summary_target_max: default_summary_target_max(),
            enable_summarization: true,
            is_news: true,
            news_confidence: default_news_confidence(),
            detected_text_type: default_text_type(),
            news_reason: String::new(),
        }
    }
}

impl StrategyConfig {
    /// Whether the input is within scope for the downstream chain.
    pub fn in_scope(&self) -> bool {
        self.is_news
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_strategy_uses_defaults() {
        let strategy: StrategyConfig =
            serde_json::from_str(r#"{"max_claims": 8, "risk_level": "high"}"#).unwrap();
        assert_eq!(strategy.max_claims, 8);
        assert_eq!(strategy.risk_level, "high");
        assert_eq!(strategy.complexity_level, "medium");
        assert_eq!(strategy.evidence_per_claim, 5);
        assert!(strategy.in_scope());
    }

    #[test]
    fn test_out_of_scope_strategy() {
        let strategy: StrategyConfig = serde_json::from_str(
            r#"{"is_news": false, "detected_text_type": "chat", "news_confidence": 0.9}"#,
        )
        .unwrap();
        assert!(!strategy.in_scope());
        assert_eq!(strategy.detected_text_type, "chat");
    }
}

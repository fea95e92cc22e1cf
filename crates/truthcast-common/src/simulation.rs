//! Opinion-simulation payloads and the staged events that build them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tag of one partial fragment emitted by the streaming simulation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStage {
    /// Emotion and stance distributions
    Emotion,
    /// Narrative branches
    Narratives,
    /// Flashpoints and timeline
    Flashpoints,
    /// Suggested actions
    Suggestion,
}

impl SimulationStage {
    pub const ALL: [SimulationStage; 4] = [
        SimulationStage::Emotion,
        SimulationStage::Narratives,
        SimulationStage::Flashpoints,
        SimulationStage::Suggestion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emotion => "emotion",
            Self::Narratives => "narratives",
            Self::Flashpoints => "flashpoints",
            Self::Suggestion => "suggestion",
        }
    }
}

impl fmt::Display for SimulationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `{stage, data}` event from the simulation stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationEvent {
    pub stage: SimulationStage,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeItem {
    pub title: String,
    pub stance: String,
    pub probability: f64,
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    pub sample_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    pub hour: i64,
    pub event: String,
    pub expected_reach: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    /// urgent / high / medium
    pub priority: String,
    /// official / media / platform / user
    pub category: String,
    pub action: String,
    pub timeline: String,
    #[serde(default)]
    pub responsible: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionData {
    pub summary: String,
    #[serde(default)]
    pub actions: Vec<ActionItem>,
}

/// Fields carried by an `emotion` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionFragment {
    pub emotion_distribution: BTreeMap<String, f64>,
    pub stance_distribution: BTreeMap<String, f64>,
    #[serde(default)]
    pub emotion_drivers: Option<Vec<String>>,
    #[serde(default)]
    pub stance_drivers: Option<Vec<String>>,
}

/// Fields carried by a `narratives` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativesFragment {
    pub narratives: Vec<NarrativeItem>,
}

/// Fields carried by a `flashpoints` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashpointsFragment {
    pub flashpoints: Vec<String>,
    #[serde(default)]
    pub timeline: Option<Vec<TimelineItem>>,
}

/// Fields carried by a `suggestion` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionFragment {
    pub suggestion: SuggestionData,
}

/// Union of every simulation fragment received so far.
///
/// A field that is `None` has not been received; it is never defaulted to an
/// empty value that could be read as "confirmed empty".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion_distribution: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stance_distribution: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion_drivers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stance_drivers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narratives: Option<Vec<NarrativeItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flashpoints: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline: Option<Vec<TimelineItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<SuggestionData>,
}

impl SimulationResult {
    /// Whether the fragment for `stage` has been merged.
    pub fn has_stage(&self, stage: SimulationStage) -> bool {
        match stage {
            SimulationStage::Emotion => self.emotion_distribution.is_some(),
            SimulationStage::Narratives => self.narratives.is_some(),
            SimulationStage::Flashpoints => self.flashpoints.is_some(),
            SimulationStage::Suggestion => self.suggestion.is_some(),
        }
    }

    pub fn missing_stages(&self) -> Vec<SimulationStage> {
        SimulationStage::ALL
            .into_iter()
            .filter(|s| !self.has_stage(*s))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_stages().is_empty()
    }
}

use truthcast_common::{
    EmotionFragment, FlashpointsFragment, NarrativesFragment, SimulationEvent, SimulationResult,
    SimulationStage, SuggestionFragment,
};

use crate::errors::StageError;

/// Folds simulation stream events into one cumulative `SimulationResult`.
///
/// Each stage owns a fixed set of result fields. An event replaces exactly
/// the fields of its own stage, so a redelivered stage overwrites its earlier
/// copy and never touches what other stages wrote.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    result: SimulationResult,
    accepted: usize,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one event. An event whose data does not match its stage's
    /// fragment shape is rejected and leaves the accumulator untouched.
    pub fn merge(&mut self, event: &SimulationEvent) -> Result<&SimulationResult, StageError> {
        let data = event.data.clone();
        let decode_err = |e: serde_json::Error| StageError::Decode {
            route: format!("simulation stage '{}'", event.stage),
            message: e.to_string(),
        };
        match event.stage {
            SimulationStage::Emotion => {
                let fragment: EmotionFragment = serde_json::from_value(data).map_err(decode_err)?;
                self.result.emotion_distribution = Some(fragment.emotion_distribution);
                self.result.stance_distribution = Some(fragment.stance_distribution);
                self.result.emotion_drivers = fragment.emotion_drivers;
                self.result.stance_drivers = fragment.stance_drivers;
            }
            SimulationStage::Narratives => {
                let fragment: NarrativesFragment =
                    serde_json::from_value(data).map_err(decode_err)?;
                self.result.narratives = Some(fragment.narratives);
            }
            SimulationStage::Flashpoints => {
                let fragment: FlashpointsFragment =
                    serde_json::from_value(data).map_err(decode_err)?;
                self.result.flashpoints = Some(fragment.flashpoints);
                self.result.timeline = fragment.timeline;
            }
            SimulationStage::Suggestion => {
                let fragment: SuggestionFragment =
                    serde_json::from_value(data).map_err(decode_err)?;
                self.result.suggestion = Some(fragment.suggestion);
            }
        }
        self.accepted += 1;
        tracing::debug!(stage = %event.stage, accepted = self.accepted, "Merged simulation fragment");
        Ok(&self.result)
    }

    pub fn result(&self) -> &SimulationResult {
        &self.result
    }

    /// Whether no event has been accepted yet.
    pub fn is_empty(&self) -> bool {
        self.accepted == 0
    }

    pub fn into_result(self) -> SimulationResult {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(stage: SimulationStage, data: serde_json::Value) -> SimulationEvent {
        SimulationEvent { stage, data }
    }

    fn emotion(anger: f64, drivers: Option<Vec<&str>>) -> SimulationEvent {
        let mut data = json!({
            "emotion_distribution": {"anger": anger, "fear": 1.0 - anger},
            "stance_distribution": {"support": 0.3, "oppose": 0.7},
        });
        if let Some(drivers) = drivers {
            data["emotion_drivers"] = json!(drivers);
        }
        event(SimulationStage::Emotion, data)
    }

    fn narratives() -> SimulationEvent {
        event(
            SimulationStage::Narratives,
            json!({"narratives": [{
                "title": "质疑官方",
                "stance": "oppose",
                "probability": 0.6,
                "trigger_keywords": ["隐瞒"],
                "sample_message": "为什么现在才通报？"
            }]}),
        )
    }

    #[test]
    fn test_duplicate_stage_replaces_only_its_fields() {
        let mut agg = StreamAggregator::new();
        agg.merge(&emotion(0.8, Some(vec!["伤亡传闻"]))).unwrap();
        agg.merge(&narratives()).unwrap();
        agg.merge(&emotion(0.4, None)).unwrap();

        let result = agg.result();
        assert_eq!(result.emotion_distribution.as_ref().unwrap()["anger"], 0.4);
        // The last emotion event carried no drivers, so none survive.
        assert!(result.emotion_drivers.is_none());
        assert_eq!(result.narratives.as_ref().unwrap().len(), 1);
        assert!(result.flashpoints.is_none());
    }

    #[test]
    fn test_malformed_event_leaves_accumulator_untouched() {
        let mut agg = StreamAggregator::new();
        agg.merge(&narratives()).unwrap();
        let before = agg.result().clone();

        let bad = event(SimulationStage::Flashpoints, json!({"timeline": "soon"}));
        let err = agg.merge(&bad).unwrap_err();
        assert!(matches!(err, StageError::Decode { .. }));
        assert_eq!(agg.result(), &before);
    }

    #[test]
    fn test_all_stages_complete_result() {
        let mut agg = StreamAggregator::new();
        assert!(agg.is_empty());
        agg.merge(&emotion(0.5, None)).unwrap();
        agg.merge(&narratives()).unwrap();
        agg.merge(&event(
            SimulationStage::Flashpoints,
            json!({"flashpoints": ["通报发布"], "timeline": [{"hour": 2, "event": "扩散", "expected_reach": "10万+"}]}),
        ))
        .unwrap();
        assert!(!agg.result().is_complete());
        agg.merge(&event(
            SimulationStage::Suggestion,
            json!({"suggestion": {"summary": "尽快回应", "actions": [{
                "priority": "urgent", "category": "official",
                "action": "发布权威通报", "timeline": "2小时内"
            }]}}),
        ))
        .unwrap();
        let result = agg.into_result();
        assert!(result.is_complete());
        assert_eq!(result.timeline.unwrap()[0].hour, 2);
    }
}

//! Match scorer: turns the relationship map into a 0 to 100 match analysis.
//!
//! Remote scoring first; on any recoverable failure the score is computed
//! from the relationship map itself (confidence-weighted match ratio).

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::agents::prompts::{SCORE_PROMPT_TEMPLATE, SCORE_SYSTEM};
use crate::agents::relationships::RelationshipMap;
use crate::agents::{system_prompt, to_pretty, Agent};
use crate::errors::PipelineError;
use crate::pipeline::merge::merge_lists;
use crate::pipeline::models::{
    CapabilityDescriptor, PhaseResult, PhaseTag, PipelineState, META_RELATIONSHIPS,
    META_TARGET_REQUIREMENTS,
};
use crate::pipeline::remote::RemoteCall;

const REMOTE_CONFIDENCE: f64 = 0.9;
const FALLBACK_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchAnalysis {
    #[serde(deserialize_with = "deserialize_percentage")]
    pub match_percentage: u8,
    pub strength_summary: String,
    pub areas_for_improvement: Vec<String>,
    #[serde(default)]
    pub key_matched_skills: Vec<String>,
    #[serde(default)]
    pub overall_feedback: String,
    #[serde(default)]
    pub fallback_used: bool,
}

/// Rounds and clamps into 0 to 100; NaN counts as 0.
pub fn clamp_percentage(raw: f64) -> u8 {
    if raw.is_nan() {
        0
    } else {
        raw.round().clamp(0.0, 100.0) as u8
    }
}

fn deserialize_percentage<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    f64::deserialize(deserializer).map(clamp_percentage)
}

/// Deterministic scoring: Σ match confidence ÷ (matches + gaps) × 100.
/// When the map has neither, every target requirement counts as a gap.
pub fn score_from_map(map: &RelationshipMap, requirements: &[String]) -> MatchAnalysis {
    let matched = map.matched_skills.len();
    let mut gaps: Vec<String> = map
        .identified_gaps_in_resume
        .iter()
        .map(|g| g.jd_requirement.clone())
        .collect();
    if matched == 0 && gaps.is_empty() {
        gaps = merge_lists([requirements]);
    }

    let total = matched + gaps.len();
    if total == 0 {
        return MatchAnalysis {
            match_percentage: 0,
            strength_summary: "No requirements found to score against.".to_string(),
            areas_for_improvement: Vec::new(),
            key_matched_skills: Vec::new(),
            overall_feedback: "No requirements found in the target, so fit cannot be scored.".to_string(),
            fallback_used: true,
        };
    }

    let weighted: f64 = map
        .matched_skills
        .iter()
        .map(|m| m.confidence.clamp(0.0, 1.0))
        .sum();
    let match_percentage = clamp_percentage(weighted / total as f64 * 100.0);

    let skills: Vec<String> = map.matched_skills.iter().map(|m| m.resume_skill.clone()).collect();
    let key_matched_skills = merge_lists([skills.as_slice()]);

    let overall_feedback = if gaps.is_empty() {
        "Strong fit: all identified requirements are covered.".to_string()
    } else {
        let top: Vec<&str> = gaps.iter().take(3).map(String::as_str).collect();
        format!("Address the biggest gaps first: {}.", top.join(", "))
    };

    MatchAnalysis {
        match_percentage,
        strength_summary: format!("{matched} of {total} requirements matched."),
        areas_for_improvement: gaps,
        key_matched_skills,
        overall_feedback,
        fallback_used: true,
    }
}

pub struct ScoringAgent {
    remote: RemoteCall,
}

impl ScoringAgent {
    pub fn new(remote: RemoteCall) -> Self {
        Self { remote }
    }

    async fn score_remote(
        &self,
        map: &RelationshipMap,
        requirements: &[String],
    ) -> Result<(MatchAnalysis, f64), PipelineError> {
        let prompt = SCORE_PROMPT_TEMPLATE
            .replace("{relationships}", &to_pretty(map))
            .replace("{requirements}", &to_pretty(&requirements));
        let normalized = self
            .remote
            .ask_json(&system_prompt(SCORE_SYSTEM), &prompt)
            .await?;
        let mut analysis: MatchAnalysis = serde_json::from_value(normalized.payload("match analysis")?.clone())
            .map_err(|e| PipelineError::Validation(format!("match analysis: {e}")))?;
        analysis.fallback_used = false;
        Ok((analysis, normalized.confidence(REMOTE_CONFIDENCE)))
    }

    async fn score(&self, state: &PipelineState) -> Result<(Value, f64), PipelineError> {
        let map: RelationshipMap = state.meta_typed(META_RELATIONSHIPS)?;
        let requirements: Vec<String> = state
            .meta_typed(META_TARGET_REQUIREMENTS)
            .unwrap_or_default();

        let (analysis, confidence) = match self.score_remote(&map, &requirements).await {
            Ok(scored) => scored,
            Err(e) if e.is_recoverable() => {
                warn!("Match scoring falling back to relationship-map ratio: {e}");
                (score_from_map(&map, &requirements), FALLBACK_CONFIDENCE)
            }
            Err(e) => return Err(e),
        };

        let data = serde_json::to_value(&analysis)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        Ok((data, confidence))
    }
}

#[async_trait]
impl Agent for ScoringAgent {
    fn phase(&self) -> PhaseTag {
        PhaseTag::ScoreMatch
    }

    async fn process(&self, state: &PipelineState) -> PhaseResult {
        PhaseResult::from_outcome(PhaseTag::ScoreMatch, self.score(state).await)
    }

    fn describe(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "match_scorer".to_string(),
            phase: PhaseTag::ScoreMatch,
            description: "Scores candidate/target fit from 0 to 100".to_string(),
            inputs: vec![
                META_RELATIONSHIPS.to_string(),
                META_TARGET_REQUIREMENTS.to_string(),
            ],
            outputs: vec![
                "match_percentage".to_string(),
                "strength_summary".to_string(),
                "areas_for_improvement".to_string(),
            ],
            strategy: format!("{} (fallback: deterministic)", self.remote.strategy()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::relationships::{Gap, SkillMatch};
    use crate::llm_client::fake::{FakeBackend, Reply};
    use crate::pipeline::invoker::CallBudget;
    use serde_json::{json, Map};
    use std::sync::Arc;

    fn map() -> RelationshipMap {
        RelationshipMap {
            matched_skills: vec![
                SkillMatch {
                    resume_skill: "Rust".into(),
                    jd_requirement: "Rust".into(),
                    confidence: 1.0,
                    reasoning: String::new(),
                },
                SkillMatch {
                    resume_skill: "AWS".into(),
                    jd_requirement: "Cloud".into(),
                    confidence: 0.5,
                    reasoning: String::new(),
                },
            ],
            identified_gaps_in_resume: vec![Gap {
                jd_requirement: "Kafka".into(),
                gap_type: "skill_gap".into(),
            }],
            ..Default::default()
        }
    }

    fn state() -> PipelineState {
        let mut meta = Map::new();
        meta.insert(META_RELATIONSHIPS.to_string(), serde_json::to_value(map()).unwrap());
        meta.insert(META_TARGET_REQUIREMENTS.to_string(), json!(["Rust", "Kafka"]));
        PipelineState::new("u", "d", "", "txt").scoped_view("", meta)
    }

    fn agent(reply: Reply) -> ScoringAgent {
        let fake = Arc::new(FakeBackend::named("fake").fallback(reply));
        ScoringAgent::new(RemoteCall::new(Some(fake), CallBudget::from_secs(1, 2, 0), "score"))
    }

    #[test]
    fn test_percentage_is_clamped_and_rounded() {
        assert_eq!(clamp_percentage(72.6), 73);
        assert_eq!(clamp_percentage(140.0), 100);
        assert_eq!(clamp_percentage(-3.0), 0);
        assert_eq!(clamp_percentage(f64::NAN), 0);

        let parsed: MatchAnalysis = serde_json::from_value(json!({
            "match_percentage": 101.2,
            "strength_summary": "s",
            "areas_for_improvement": []
        }))
        .unwrap();
        assert_eq!(parsed.match_percentage, 100);
    }

    #[test]
    fn test_deterministic_score_weights_by_confidence() {
        let analysis = score_from_map(&map(), &[]);
        // (1.0 + 0.5) / 3 matches+gaps
        assert_eq!(analysis.match_percentage, 50);
        assert_eq!(analysis.areas_for_improvement, vec!["Kafka"]);
        assert_eq!(analysis.key_matched_skills, vec!["Rust", "AWS"]);
        assert!(analysis.overall_feedback.contains("Kafka"));
    }

    #[test]
    fn test_empty_map_counts_requirements_as_gaps() {
        let analysis = score_from_map(&RelationshipMap::default(), &["Go".to_string()]);
        assert_eq!(analysis.match_percentage, 0);
        assert_eq!(analysis.areas_for_improvement, vec!["Go"]);
    }

    #[tokio::test]
    async fn test_remote_score_is_used() {
        let reply = r#"{"match_percentage": 81, "strength_summary": "good", "areas_for_improvement": ["Kafka"]}"#;
        let result = agent(Reply::text(reply)).process(&state()).await;
        assert!(result.success);
        assert_eq!(result.data["match_percentage"], 81);
        assert_eq!(result.data["fallback_used"], false);
    }

    #[tokio::test]
    async fn test_rejected_remote_falls_back() {
        let result = agent(Reply::Reject).process(&state()).await;
        assert!(result.success);
        assert_eq!(result.data["match_percentage"], 50);
        assert_eq!(result.data["fallback_used"], true);
        assert_eq!(result.confidence, FALLBACK_CONFIDENCE);
    }
}

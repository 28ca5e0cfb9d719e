//! Relationship mapper: links the candidate's merged entities to the target's.
//!
//! Remote mapping first. When the backend is slow, down, or keeps returning
//! unusable JSON, the deterministic label matcher builds the map instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::agents::entities::EntitySet;
use crate::agents::prompts::{RELATIONSHIPS_PROMPT_TEMPLATE, RELATIONSHIPS_SYSTEM};
use crate::agents::{system_prompt, to_pretty, Agent};
use crate::errors::PipelineError;
use crate::pipeline::fallback::{FallbackMatcher, MatchOutcome};
use crate::pipeline::merge::merge_lists;
use crate::pipeline::models::{
    CapabilityDescriptor, PhaseResult, PhaseTag, PipelineState, META_PROFILE_ENTITIES,
    META_TARGET_ENTITIES,
};
use crate::pipeline::remote::RemoteCall;

const MAPPING_CONFIDENCE: f64 = 0.85;
/// Fallback confidence when nothing matched at all.
const EMPTY_FALLBACK_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillMatch {
    pub resume_skill: String,
    pub jd_requirement: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceMatch {
    pub resume_experience_summary: String,
    pub jd_responsibility: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub jd_requirement: String,
    #[serde(rename = "type")]
    pub gap_type: String,
}

/// All four list keys are required on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipMap {
    pub matched_skills: Vec<SkillMatch>,
    pub matched_experience_to_responsibilities: Vec<ExperienceMatch>,
    pub identified_gaps_in_resume: Vec<Gap>,
    pub strong_points_in_resume: Vec<String>,
    #[serde(default)]
    pub fallback_used: bool,
}

impl RelationshipMap {
    /// Builds a map from deterministic label matches. Unmatched targets are
    /// skill gaps; matched candidate labels are the strong points.
    pub fn from_matches(outcome: &MatchOutcome) -> Self {
        let matched_skills = outcome
            .matches
            .iter()
            .map(|m| SkillMatch {
                resume_skill: m.source.clone(),
                jd_requirement: m.target.clone(),
                confidence: m.confidence,
                reasoning: m.reasoning.clone(),
            })
            .collect();

        let identified_gaps_in_resume = outcome
            .unmatched
            .iter()
            .map(|label| Gap {
                jd_requirement: label.clone(),
                gap_type: "skill_gap".to_string(),
            })
            .collect();

        let sources: Vec<String> = outcome.matches.iter().map(|m| m.source.clone()).collect();

        RelationshipMap {
            matched_skills,
            matched_experience_to_responsibilities: Vec::new(),
            identified_gaps_in_resume,
            strong_points_in_resume: merge_lists([sources.as_slice()]),
            fallback_used: true,
        }
    }
}

pub struct RelationshipAgent {
    remote: RemoteCall,
    matcher: FallbackMatcher,
}

impl RelationshipAgent {
    pub fn new(remote: RemoteCall) -> Self {
        Self {
            remote,
            matcher: FallbackMatcher::default(),
        }
    }

    async fn map_remote(
        &self,
        profile: &EntitySet,
        target: &EntitySet,
    ) -> Result<(RelationshipMap, f64), PipelineError> {
        let prompt = RELATIONSHIPS_PROMPT_TEMPLATE
            .replace("{profile_entities}", &to_pretty(profile))
            .replace("{target_entities}", &to_pretty(target));
        let normalized = self
            .remote
            .ask_json(&system_prompt(RELATIONSHIPS_SYSTEM), &prompt)
            .await?;

        let mut map: RelationshipMap = serde_json::from_value(normalized.payload("relationship map")?.clone())
            .map_err(|e| PipelineError::Validation(format!("relationship map: {e}")))?;
        map.fallback_used = false;
        for m in &mut map.matched_skills {
            m.confidence = m.confidence.clamp(0.0, 1.0);
        }
        Ok((map, normalized.confidence(MAPPING_CONFIDENCE)))
    }

    fn map_fallback(&self, profile: &EntitySet, target: &EntitySet) -> (RelationshipMap, f64) {
        let outcome = self
            .matcher
            .match_labels(&profile.capability_labels(), &target.demand_labels());
        let confidence = outcome
            .mean_confidence()
            .unwrap_or(EMPTY_FALLBACK_CONFIDENCE);
        info!(
            "Fallback relationship map: {} matched, {} gaps",
            outcome.matches.len(),
            outcome.unmatched.len()
        );
        (RelationshipMap::from_matches(&outcome), confidence)
    }

    async fn map(&self, state: &PipelineState) -> Result<(Value, f64), PipelineError> {
        let profile: EntitySet = state.meta_typed(META_PROFILE_ENTITIES)?;
        let target: EntitySet = state.meta_typed(META_TARGET_ENTITIES)?;

        let (map, confidence) = match self.map_remote(&profile, &target).await {
            Ok(mapped) => mapped,
            Err(e) if e.is_recoverable() => {
                warn!("Relationship mapping falling back to label matching: {e}");
                self.map_fallback(&profile, &target)
            }
            Err(e) => return Err(e),
        };

        let data = serde_json::to_value(&map).map_err(|e| PipelineError::Validation(e.to_string()))?;
        Ok((data, confidence))
    }
}

#[async_trait]
impl Agent for RelationshipAgent {
    fn phase(&self) -> PhaseTag {
        PhaseTag::MapRelationships
    }

    async fn process(&self, state: &PipelineState) -> PhaseResult {
        PhaseResult::from_outcome(PhaseTag::MapRelationships, self.map(state).await)
    }

    fn describe(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "relationship_mapper".to_string(),
            phase: PhaseTag::MapRelationships,
            description: "Maps candidate skills and experience onto target requirements".to_string(),
            inputs: vec![
                META_PROFILE_ENTITIES.to_string(),
                META_TARGET_ENTITIES.to_string(),
            ],
            outputs: vec![
                "matched_skills".to_string(),
                "matched_experience_to_responsibilities".to_string(),
                "identified_gaps_in_resume".to_string(),
                "strong_points_in_resume".to_string(),
            ],
            strategy: format!("{} (fallback: deterministic)", self.remote.strategy()),
        }
    }
}

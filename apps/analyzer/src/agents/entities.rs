//! Entity extractor: pulls typed entities out of one section of one document.
//!
//! The orchestrator runs one instance per (document, section) and merges the
//! successful sets with [`EntitySet::merge`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::prompts::{ENTITIES_PROMPT_TEMPLATE, ENTITIES_SYSTEM};
use crate::agents::{system_prompt, Agent};
use crate::errors::PipelineError;
use crate::pipeline::merge::merge_pair;
use crate::pipeline::models::{
    CapabilityDescriptor, PhaseResult, PhaseTag, PipelineState, META_COMPANY_NAME, META_JOB_TITLE,
    META_SECTION,
};
use crate::pipeline::remote::RemoteCall;

const EXTRACTION_CONFIDENCE: f64 = 0.9;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitySet {
    pub companies: Vec<String>,
    pub dates: Vec<String>,
    pub skills: Vec<String>,
    pub job_titles: Vec<String>,
    pub technologies: Vec<String>,
    pub education_degrees: Vec<String>,
    pub universities: Vec<String>,
    pub achievements: Vec<String>,
    pub requirements: Vec<String>,
}

impl EntitySet {
    /// Field-wise union with case-insensitive dedup.
    pub fn merge(&self, other: &EntitySet) -> EntitySet {
        EntitySet {
            companies: merge_pair(&self.companies, &other.companies),
            dates: merge_pair(&self.dates, &other.dates),
            skills: merge_pair(&self.skills, &other.skills),
            job_titles: merge_pair(&self.job_titles, &other.job_titles),
            technologies: merge_pair(&self.technologies, &other.technologies),
            education_degrees: merge_pair(&self.education_degrees, &other.education_degrees),
            universities: merge_pair(&self.universities, &other.universities),
            achievements: merge_pair(&self.achievements, &other.achievements),
            requirements: merge_pair(&self.requirements, &other.requirements),
        }
    }

    pub fn merge_all<'a>(sets: impl IntoIterator<Item = &'a EntitySet>) -> EntitySet {
        sets.into_iter()
            .fold(EntitySet::default(), |acc, set| acc.merge(set))
    }

    /// Labels describing what a candidate brings.
    pub fn capability_labels(&self) -> Vec<String> {
        merge_pair(&self.skills, &self.technologies)
    }

    /// Labels a target asks for: explicit requirements first.
    pub fn demand_labels(&self) -> Vec<String> {
        crate::pipeline::merge::merge_lists([
            self.requirements.as_slice(),
            self.skills.as_slice(),
            self.technologies.as_slice(),
        ])
    }
}

pub struct EntityAgent {
    remote: RemoteCall,
}

impl EntityAgent {
    pub fn new(remote: RemoteCall) -> Self {
        Self { remote }
    }

    async fn extract(&self, state: &PipelineState) -> Result<(Value, f64), PipelineError> {
        if state.content.trim().is_empty() {
            return Ok((serde_json::to_value(EntitySet::default()).unwrap_or_default(), 1.0));
        }

        let prompt = ENTITIES_PROMPT_TEMPLATE
            .replace("{section}", state.meta_str(META_SECTION).unwrap_or("document"))
            .replace("{context}", &target_context(state))
            .replace("{content}", &state.content);
        let normalized = self
            .remote
            .ask_json(&system_prompt(ENTITIES_SYSTEM), &prompt)
            .await?;

        let value = normalized.payload("entities")?;
        if !value.is_object() {
            return Err(PipelineError::Validation("entities must be a JSON object".to_string()));
        }
        let entities: EntitySet = serde_json::from_value(value.clone())
            .map_err(|e| PipelineError::Validation(format!("entities: {e}")))?;
        // Round-trip through merge to trim and dedup whatever the model sent.
        let entities = EntitySet::default().merge(&entities);

        let data = serde_json::to_value(&entities)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        Ok((data, normalized.confidence(EXTRACTION_CONFIDENCE)))
    }
}

fn target_context(state: &PipelineState) -> String {
    let mut lines = String::new();
    if let Some(title) = state.meta_str(META_JOB_TITLE) {
        lines.push_str(&format!("Job title: {title}\n"));
    }
    if let Some(company) = state.meta_str(META_COMPANY_NAME) {
        lines.push_str(&format!("Company: {company}\n"));
    }
    lines
}

#[async_trait]
impl Agent for EntityAgent {
    fn phase(&self) -> PhaseTag {
        PhaseTag::ExtractEntities
    }

    async fn process(&self, state: &PipelineState) -> PhaseResult {
        PhaseResult::from_outcome(PhaseTag::ExtractEntities, self.extract(state).await)
    }

    fn describe(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "entity_extractor".to_string(),
            phase: PhaseTag::ExtractEntities,
            description: "Extracts companies, skills, technologies, requirements and more per section"
                .to_string(),
            inputs: vec!["section text".to_string(), "job title / company (optional)".to_string()],
            outputs: vec!["entity set".to_string()],
            strategy: self.remote.strategy(),
        }
    }
}

//! Orchestrator: runs the fixed phase sequence for one profile/target pair.
//!
//! classify → split_sections → extract_entities (one task per section) →
//! map_relationships → score_match → optimize
//!
//! Each phase gets a lean scoped view holding only what it needs. Fan-out
//! sub-tasks degrade individually; only classification and primary entity
//! extraction can abort the request.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::classifier::Classification;
use crate::agents::entities::EntitySet;
use crate::agents::sections::FULL_CONTENT_KEY;
use crate::agents::{run_with_timing, AgentRegistry};
use crate::errors::PipelineError;
use crate::pipeline::models::{
    CapabilityDescriptor, PhaseResult, PhaseTag, PipelineState, META_COMPANY_NAME, META_DOCUMENT,
    META_JOB_TITLE, META_MATCH_ANALYSIS, META_PROFILE_ENTITIES, META_PROFILE_SECTIONS,
    META_RELATIONSHIPS, META_SECTION, META_SKIP_OPTIMIZE, META_TARGET_CONTENT,
    META_TARGET_ENTITIES, META_TARGET_REQUIREMENTS, META_TARGET_SECTIONS,
};

const PROFILE: &str = "profile";
const TARGET: &str = "target";

fn default_content_type() -> String {
    "txt".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisRequest {
    pub owner_id: String,
    pub document_id: String,
    pub profile_text: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    pub target_text: String,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default = "default_true")]
    pub include_suggestions: bool,
}

impl AnalysisRequest {
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (field, value) in [
            ("owner_id", &self.owner_id),
            ("document_id", &self.document_id),
            ("profile_text", &self.profile_text),
            ("target_text", &self.target_text),
        ] {
            if value.trim().is_empty() {
                return Err(PipelineError::Validation(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub analysis_id: Uuid,
    pub owner_id: String,
    pub document_id: String,
    pub created_at: DateTime<Utc>,
    pub results: BTreeMap<PhaseTag, PhaseResult>,
}

pub struct Orchestrator {
    agents: AgentRegistry,
}

impl Orchestrator {
    pub fn new(agents: AgentRegistry) -> Self {
        Self { agents }
    }

    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.agents.descriptors()
    }

    /// Runs every phase. A fatal phase failure returns one error and no
    /// partial results.
    pub async fn run(&self, request: AnalysisRequest) -> Result<AnalysisReport, PipelineError> {
        request.validate()?;
        let started = Instant::now();

        let mut state = PipelineState::new(
            request.owner_id.clone(),
            request.document_id.clone(),
            request.profile_text.clone(),
            request.content_type.clone(),
        );
        state
            .metadata
            .insert(META_TARGET_CONTENT.to_string(), json!(request.target_text));
        if let Some(title) = &request.job_title {
            state.metadata.insert(META_JOB_TITLE.to_string(), json!(title));
        }
        if let Some(company) = &request.company_name {
            state.metadata.insert(META_COMPANY_NAME.to_string(), json!(company));
        }
        state
            .metadata
            .insert(META_SKIP_OPTIMIZE.to_string(), json!(!request.include_suggestions));

        info!(
            "Starting analysis for owner={} document={}",
            state.owner_id, state.document_id
        );

        self.classify(&mut state).await?;
        self.split_sections(&mut state).await?;
        self.extract_entities(&mut state).await?;
        self.map_relationships(&mut state).await?;
        self.score_match(&mut state).await?;
        self.optimize(&mut state).await?;

        let succeeded = state.results().values().filter(|r| r.success).count();
        info!(
            "Analysis for document={} finished in {}ms ({succeeded}/{} phases succeeded)",
            state.document_id,
            started.elapsed().as_millis(),
            state.results().len()
        );

        Ok(AnalysisReport {
            analysis_id: Uuid::new_v4(),
            owner_id: state.owner_id.clone(),
            document_id: state.document_id.clone(),
            created_at: Utc::now(),
            results: state.into_results(),
        })
    }

    /// Scoped views carrying the raw profile and target documents.
    fn document_views(&self, state: &PipelineState) -> [(&'static str, PipelineState); 2] {
        let target_text = state.meta_str(META_TARGET_CONTENT).unwrap_or_default().to_string();
        [
            (PROFILE, state.scoped_view(state.content.clone(), document_meta(PROFILE))),
            (TARGET, state.scoped_view(target_text, document_meta(TARGET))),
        ]
    }

    /// Runs one agent over several views concurrently.
    async fn fan_out(
        &self,
        phase: PhaseTag,
        views: impl IntoIterator<Item = (String, PipelineState)>,
    ) -> Result<Vec<(String, PhaseResult)>, PipelineError> {
        let agent = self.agents.get(phase)?;
        let views: Vec<(String, PipelineState)> = views.into_iter().collect();
        let results = join_all(views.iter().map(|(_, view)| run_with_timing(agent.as_ref(), view))).await;
        Ok(views
            .into_iter()
            .map(|(label, _)| label)
            .zip(results)
            .collect())
    }

    async fn run_single(&self, phase: PhaseTag, view: &PipelineState) -> Result<PhaseResult, PipelineError> {
        let agent = self.agents.get(phase)?;
        let result = run_with_timing(agent.as_ref(), view).await;
        log_phase(&result);
        Ok(result)
    }

    async fn classify(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        let start = Instant::now();
        let views = self.document_views(state).map(|(label, view)| (label.to_string(), view));
        let results = self.fan_out(PhaseTag::Classify, views).await?;

        let mut data = Map::new();
        for (label, result) in &results {
            if !result.success {
                return Err(PipelineError::fatal(
                    PhaseTag::Classify,
                    format!(
                        "{label} document: {}",
                        result.error.as_deref().unwrap_or("classification failed")
                    ),
                ));
            }
            data.insert(label.clone(), result.data.clone());
        }

        if let Some(profile) = data.get(PROFILE) {
            let classification: Option<Classification> = serde_json::from_value(profile.clone()).ok();
            if !classification.is_some_and(|c| c.is_resume()) {
                warn!("Profile document was not classified as a resume; continuing");
            }
        }

        let result = PhaseResult::combined(
            PhaseTag::Classify,
            Value::Object(data),
            weakest_confidence(&results),
            &part_errors(&results),
        )
        .with_elapsed_ms(start.elapsed().as_millis() as u64);
        log_phase(&result);
        state.record(result)
    }

    async fn split_sections(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        let start = Instant::now();
        let views = self.document_views(state);
        let raw: BTreeMap<&str, String> = views
            .iter()
            .map(|(label, view)| (*label, view.content.clone()))
            .collect();
        let results = self
            .fan_out(
                PhaseTag::SplitSections,
                views.map(|(label, view)| (label.to_string(), view)),
            )
            .await?;

        let mut data = Map::new();
        for (label, result) in &results {
            let sections = match &result.data {
                Value::Object(map) if result.success && !map.is_empty() => result.data.clone(),
                _ => {
                    warn!("{label} sections unavailable, using the whole document");
                    json!({ FULL_CONTENT_KEY: raw.get(label.as_str()).cloned().unwrap_or_default() })
                }
            };
            data.insert(label.clone(), sections);
        }

        state.metadata.insert(
            META_PROFILE_SECTIONS.to_string(),
            data.get(PROFILE).cloned().unwrap_or_else(|| json!({})),
        );
        state.metadata.insert(
            META_TARGET_SECTIONS.to_string(),
            data.get(TARGET).cloned().unwrap_or_else(|| json!({})),
        );

        // Per-document fallbacks above keep this phase successful.
        let result = PhaseResult::success(
            PhaseTag::SplitSections,
            Value::Object(data),
            weakest_confidence(&results),
        )
        .with_elapsed_ms(start.elapsed().as_millis() as u64);
        log_phase(&result);
        state.record(result)
    }

    async fn extract_entities(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        let start = Instant::now();
        let mut views = Vec::new();
        for (label, key) in [(PROFILE, META_PROFILE_SECTIONS), (TARGET, META_TARGET_SECTIONS)] {
            let sections: Map<String, Value> = state.meta_typed(key)?;
            for (title, body) in sections {
                let Some(body) = body.as_str().map(str::to_string) else {
                    continue;
                };
                let mut meta = document_meta(label);
                meta.insert(META_SECTION.to_string(), json!(title));
                if label == TARGET {
                    for forwarded in [META_JOB_TITLE, META_COMPANY_NAME] {
                        if let Some(value) = state.metadata.get(forwarded) {
                            meta.insert(forwarded.to_string(), value.clone());
                        }
                    }
                }
                views.push((label.to_string(), state.scoped_view(body, meta)));
            }
        }

        let task_count = views.len();
        let results = self.fan_out(PhaseTag::ExtractEntities, views).await?;

        let mut extracted: BTreeMap<&str, Vec<EntitySet>> = BTreeMap::new();
        let mut confidences = Vec::new();
        let mut failed = 0usize;
        for (label, result) in &results {
            let parsed = result
                .success
                .then(|| serde_json::from_value::<EntitySet>(result.data.clone()).ok())
                .flatten();
            match parsed {
                Some(set) => {
                    let doc = if label == PROFILE { PROFILE } else { TARGET };
                    extracted.entry(doc).or_default().push(set);
                    confidences.push(result.confidence);
                }
                None => {
                    failed += 1;
                    warn!(
                        "Entity extraction failed for a {label} section: {}",
                        result.error.as_deref().unwrap_or("unusable payload")
                    );
                }
            }
        }

        let mut merged = Map::new();
        for doc in [PROFILE, TARGET] {
            let sets = extracted.get(doc).ok_or_else(|| {
                PipelineError::fatal(
                    PhaseTag::ExtractEntities,
                    format!("no section of the {doc} document could be extracted"),
                )
            })?;
            let set = EntitySet::merge_all(sets.iter());
            merged.insert(
                doc.to_string(),
                serde_json::to_value(&set).map_err(|e| PipelineError::fatal(PhaseTag::ExtractEntities, e.to_string()))?,
            );
        }

        state
            .metadata
            .insert(META_PROFILE_ENTITIES.to_string(), merged[PROFILE].clone());
        state
            .metadata
            .insert(META_TARGET_ENTITIES.to_string(), merged[TARGET].clone());

        info!(
            "Entity extraction: {}/{task_count} section tasks succeeded",
            task_count - failed
        );

        let confidence = confidences.iter().sum::<f64>() / confidences.len().max(1) as f64;
        let mut data = merged;
        data.insert("failed_sections".to_string(), json!(failed));
        let result = PhaseResult::success(PhaseTag::ExtractEntities, Value::Object(data), confidence)
            .with_elapsed_ms(start.elapsed().as_millis() as u64);
        log_phase(&result);
        state.record(result)
    }

    async fn map_relationships(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        let view = lean_view(state, &[META_PROFILE_ENTITIES, META_TARGET_ENTITIES]);
        let result = self.run_single(PhaseTag::MapRelationships, &view).await?;
        state.record(result)
    }

    async fn score_match(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        let mut view = lean_view(state, &[]);
        if let Ok(relationships) = state.require(PhaseTag::MapRelationships) {
            view.metadata
                .insert(META_RELATIONSHIPS.to_string(), relationships.data.clone());
        }
        let target: EntitySet = state.meta_typed(META_TARGET_ENTITIES).unwrap_or_default();
        let requirements = if target.requirements.is_empty() {
            target.demand_labels()
        } else {
            target.requirements
        };
        view.metadata
            .insert(META_TARGET_REQUIREMENTS.to_string(), json!(requirements));

        let result = self.run_single(PhaseTag::ScoreMatch, &view).await?;
        state.record(result)
    }

    async fn optimize(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        let mut view = lean_view(state, &[META_PROFILE_SECTIONS, META_SKIP_OPTIMIZE]);
        for (phase, key) in [
            (PhaseTag::MapRelationships, META_RELATIONSHIPS),
            (PhaseTag::ScoreMatch, META_MATCH_ANALYSIS),
        ] {
            if let Ok(upstream) = state.require(phase) {
                view.metadata.insert(key.to_string(), upstream.data.clone());
            }
        }

        let result = self.run_single(PhaseTag::Optimize, &view).await?;
        state.record(result)
    }
}

fn document_meta(label: &str) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert(META_DOCUMENT.to_string(), json!(label));
    meta
}

/// Scoped view with no content and only the listed metadata entries.
fn lean_view(state: &PipelineState, keys: &[&str]) -> PipelineState {
    let meta = keys
        .iter()
        .filter_map(|key| state.metadata.get(*key).map(|v| (key.to_string(), v.clone())))
        .collect();
    state.scoped_view(String::new(), meta)
}

/// Sub-task errors prefixed with the document they came from.
fn part_errors(parts: &[(String, PhaseResult)]) -> Vec<String> {
    parts
        .iter()
        .filter_map(|(label, r)| r.error.as_ref().map(|e| format!("{label}: {e}")))
        .collect()
}

fn weakest_confidence(parts: &[(String, PhaseResult)]) -> f64 {
    parts
        .iter()
        .map(|(_, r)| r.confidence)
        .fold(1.0_f64, f64::min)
}

fn log_phase(result: &PhaseResult) {
    if result.is_skipped() {
        info!("Phase {} skipped", result.phase);
    } else if result.success {
        info!(
            "Phase {} succeeded in {}ms (confidence {:.2})",
            result.phase, result.elapsed_ms, result.confidence
        );
    } else {
        warn!(
            "Phase {} failed in {}ms: {}",
            result.phase,
            result.elapsed_ms,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
}

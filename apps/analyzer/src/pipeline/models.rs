//! Shared pipeline data: phase tags, phase results, the per-request pipeline
//! state, and capability descriptors.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::PipelineError;

/// Metadata keys for cross-phase artifacts stored on the pipeline state.
pub const META_TARGET_CONTENT: &str = "target_content";
pub const META_JOB_TITLE: &str = "job_title";
pub const META_COMPANY_NAME: &str = "company_name";
pub const META_SKIP_OPTIMIZE: &str = "skip_optimize";
pub const META_PROFILE_SECTIONS: &str = "profile_sections";
pub const META_TARGET_SECTIONS: &str = "target_sections";
pub const META_PROFILE_ENTITIES: &str = "profile_entities";
pub const META_TARGET_ENTITIES: &str = "target_entities";
pub const META_RELATIONSHIPS: &str = "relationships";
pub const META_TARGET_REQUIREMENTS: &str = "target_requirements";
pub const META_MATCH_ANALYSIS: &str = "match_analysis";
/// Set on scoped views: which document ("profile" | "target") the view carries.
pub const META_DOCUMENT: &str = "document";
/// Set on section views: the section title.
pub const META_SECTION: &str = "section";

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseTag {
    Classify,
    SplitSections,
    ExtractEntities,
    MapRelationships,
    ScoreMatch,
    Optimize,
}

impl PhaseTag {
    pub const ALL: [PhaseTag; 6] = [
        PhaseTag::Classify,
        PhaseTag::SplitSections,
        PhaseTag::ExtractEntities,
        PhaseTag::MapRelationships,
        PhaseTag::ScoreMatch,
        PhaseTag::Optimize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseTag::Classify => "classify",
            PhaseTag::SplitSections => "split_sections",
            PhaseTag::ExtractEntities => "extract_entities",
            PhaseTag::MapRelationships => "map_relationships",
            PhaseTag::ScoreMatch => "score_match",
            PhaseTag::Optimize => "optimize",
        }
    }
}

impl fmt::Display for PhaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        PhaseTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == key)
            .ok_or_else(|| format!("unknown phase '{s}'"))
    }
}

/// Outcome of one agent execution. Always well-formed, even on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: PhaseTag,
    pub success: bool,
    pub data: Value,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

impl PhaseResult {
    pub fn success(phase: PhaseTag, data: Value, confidence: f64) -> Self {
        Self {
            phase,
            success: true,
            data,
            confidence: clamp_confidence(confidence),
            elapsed_ms: 0,
            error: None,
        }
    }

    pub fn failure(phase: PhaseTag, error: impl Into<String>) -> Self {
        Self {
            phase,
            success: false,
            data: Value::Object(Map::new()),
            confidence: 0.0,
            elapsed_ms: 0,
            error: Some(error.into()),
        }
    }

    /// Result assembled from several sub-results. Any sub-error makes it a
    /// failure, but the data gathered so far is kept.
    pub fn combined(phase: PhaseTag, data: Value, confidence: f64, errors: &[String]) -> Self {
        Self {
            phase,
            success: errors.is_empty(),
            data,
            confidence: clamp_confidence(confidence),
            elapsed_ms: 0,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }

    pub fn skipped(phase: PhaseTag, reason: &str) -> Self {
        Self::success(
            phase,
            serde_json::json!({ "skipped": true, "reason": reason }),
            1.0,
        )
    }

    /// Builds a result from an agent's internal outcome.
    pub fn from_outcome(phase: PhaseTag, outcome: Result<(Value, f64), PipelineError>) -> Self {
        match outcome {
            Ok((data, confidence)) => Self::success(phase, data, confidence),
            Err(e) => Self::failure(phase, e.to_string()),
        }
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.data
            .get("skipped")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Static, side-effect-free description of an agent. Diagnostics only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub phase: PhaseTag,
    pub description: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Backend model name, or "deterministic".
    pub strategy: String,
}

/// Per-request record accumulating every phase's output.
///
/// The result map holds at most one entry per phase. Only the orchestrator
/// mutates it, and only between phases.
#[derive(Debug, Clone)]
pub struct PipelineState {
    pub owner_id: String,
    pub document_id: String,
    pub content: String,
    pub content_type: String,
    pub metadata: Map<String, Value>,
    results: BTreeMap<PhaseTag, PhaseResult>,
}

impl PipelineState {
    pub fn new(
        owner_id: impl Into<String>,
        document_id: impl Into<String>,
        content: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            document_id: document_id.into(),
            content: content.into(),
            content_type: content_type.into(),
            metadata: Map::new(),
            results: BTreeMap::new(),
        }
    }

    /// Lean child state for a fan-out task: same identity, different content,
    /// only the given metadata and no upstream results.
    pub fn scoped_view(&self, content: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            owner_id: self.owner_id.clone(),
            document_id: self.document_id.clone(),
            content: content.into(),
            content_type: self.content_type.clone(),
            metadata,
            results: BTreeMap::new(),
        }
    }

    /// Stores a phase result. A second result for the same phase is rejected.
    pub fn record(&mut self, result: PhaseResult) -> Result<(), PipelineError> {
        if self.results.contains_key(&result.phase) {
            return Err(PipelineError::fatal(
                result.phase,
                "phase result already recorded for this request",
            ));
        }
        self.results.insert(result.phase, result);
        Ok(())
    }

    /// Returns the successful result of an upstream phase, or a validation error
    /// when the dependency is missing or failed.
    pub fn require(&self, phase: PhaseTag) -> Result<&PhaseResult, PipelineError> {
        match self.results.get(&phase) {
            Some(r) if r.success => Ok(r),
            Some(r) => Err(PipelineError::Validation(format!(
                "upstream phase {phase} failed: {}",
                r.error.as_deref().unwrap_or("unknown error")
            ))),
            None => Err(PipelineError::Validation(format!(
                "upstream phase {phase} has not run"
            ))),
        }
    }

    pub fn results(&self) -> &BTreeMap<PhaseTag, PhaseResult> {
        &self.results
    }

    pub fn into_results(self) -> BTreeMap<PhaseTag, PhaseResult> {
        self.results
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Deserializes a metadata entry. Missing or ill-typed entries are
    /// validation errors: a phase never runs without its lean context.
    pub fn meta_typed<T: DeserializeOwned>(&self, key: &str) -> Result<T, PipelineError> {
        let value = self
            .metadata
            .get(key)
            .ok_or_else(|| PipelineError::Validation(format!("missing context '{key}'")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| PipelineError::Validation(format!("invalid context '{key}': {e}")))
    }

    pub fn meta_flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

//! Agent Contract: one agent per phase behind a flat trait, plus the timing
//! wrapper that is the only place unexpected failures are caught.

pub mod classifier;
pub mod entities;
pub mod optimizer;
pub mod prompts;
pub mod relationships;
pub mod scoring;
pub mod sections;

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error};

use crate::config::Config;
use crate::errors::PipelineError;
use crate::llm_client::prompts::JSON_ONLY_INSTRUCTION;
use crate::llm_client::BackendRegistry;
use crate::pipeline::models::{CapabilityDescriptor, PhaseResult, PhaseTag, PipelineState};
use crate::pipeline::remote::RemoteCall;

use self::classifier::ClassifierAgent;
use self::entities::EntityAgent;
use self::optimizer::OptimizerAgent;
use self::relationships::RelationshipAgent;
use self::scoring::ScoringAgent;
use self::sections::SectionAgent;

#[async_trait]
pub trait Agent: Send + Sync {
    fn phase(&self) -> PhaseTag;

    /// Runs the phase. Expected failures come back as a failed `PhaseResult`,
    /// never as a panic.
    async fn process(&self, state: &PipelineState) -> PhaseResult;

    fn describe(&self) -> CapabilityDescriptor;

    fn should_run(&self, _state: &PipelineState) -> bool {
        true
    }

    fn skip_reason(&self) -> &'static str {
        "not applicable to this request"
    }
}

/// Runs `agent` with skip handling, panic isolation and elapsed-time stamping.
pub async fn run_with_timing(agent: &dyn Agent, state: &PipelineState) -> PhaseResult {
    let phase = agent.phase();
    let start = Instant::now();

    let runs = std::panic::catch_unwind(AssertUnwindSafe(|| agent.should_run(state)));
    let result = match runs {
        Ok(false) => {
            debug!("{phase}: skipped ({})", agent.skip_reason());
            PhaseResult::skipped(phase, agent.skip_reason())
        }
        Ok(true) => match AssertUnwindSafe(agent.process(state)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("{phase}: agent panicked: {message}");
                PhaseResult::failure(phase, format!("agent panicked: {message}"))
            }
        },
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!("{phase}: should_run panicked: {message}");
            PhaseResult::failure(phase, format!("agent panicked: {message}"))
        }
    };

    result.with_elapsed_ms(start.elapsed().as_millis() as u64)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Flat phase → agent map.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<PhaseTag, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn register(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.phase(), agent);
        self
    }

    /// A scheduled phase without an agent aborts the request.
    pub fn get(&self, phase: PhaseTag) -> Result<Arc<dyn Agent>, PipelineError> {
        self.agents
            .get(&phase)
            .cloned()
            .ok_or_else(|| PipelineError::fatal(phase, "no agent registered for phase"))
    }

    /// Descriptors in phase order.
    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        PhaseTag::ALL
            .iter()
            .filter_map(|phase| self.agents.get(phase))
            .map(|agent| agent.describe())
            .collect()
    }

    /// The production agent set, one `RemoteCall` per phase.
    pub fn standard(config: &Config, backends: &BackendRegistry) -> Self {
        let remote = |phase: PhaseTag| {
            RemoteCall::new(backends.for_phase(phase), config.budget(phase), phase.as_str())
        };

        Self::default()
            .register(Arc::new(ClassifierAgent::new(remote(PhaseTag::Classify))))
            .register(Arc::new(SectionAgent::new(
                remote(PhaseTag::SplitSections),
                config.section_chunk_chars,
            )))
            .register(Arc::new(EntityAgent::new(remote(PhaseTag::ExtractEntities))))
            .register(Arc::new(RelationshipAgent::new(remote(PhaseTag::MapRelationships))))
            .register(Arc::new(ScoringAgent::new(remote(PhaseTag::ScoreMatch))))
            .register(Arc::new(OptimizerAgent::new(remote(PhaseTag::Optimize))))
    }
}

/// Agent system prompt with the shared JSON-only rules appended.
pub(crate) fn system_prompt(base: &str) -> String {
    format!("{base} {JSON_ONLY_INSTRUCTION}")
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub(crate) fn to_pretty(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

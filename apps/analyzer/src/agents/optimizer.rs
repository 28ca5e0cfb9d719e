//! Optimizer: concrete edit suggestions for the profile. No fallback: a
//! failed call is recorded and the analysis still completes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agents::prompts::{OPTIMIZE_PROMPT_TEMPLATE, OPTIMIZE_SYSTEM};
use crate::agents::{system_prompt, to_pretty, truncate_chars, Agent};
use crate::errors::PipelineError;
use crate::pipeline::models::{
    CapabilityDescriptor, PhaseResult, PhaseTag, PipelineState, META_MATCH_ANALYSIS,
    META_PROFILE_SECTIONS, META_RELATIONSHIPS, META_SKIP_OPTIMIZE,
};
use crate::pipeline::remote::RemoteCall;

const SUGGESTION_CONFIDENCE: f64 = 0.8;
/// Profile sections are context only; keep the prompt bounded.
const MAX_SECTION_CHARS: usize = 6000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub kind: String,
    pub target_section: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text_snippet: Option<String>,
    pub suggested_text: String,
    pub reasoning: String,
    pub priority: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestions {
    pub suggestions: Vec<Suggestion>,
    #[serde(default)]
    pub overall_feedback: String,
}

pub struct OptimizerAgent {
    remote: RemoteCall,
}

impl OptimizerAgent {
    pub fn new(remote: RemoteCall) -> Self {
        Self { remote }
    }

    async fn optimize(&self, state: &PipelineState) -> Result<(Value, f64), PipelineError> {
        let relationships: Value = state.meta_typed(META_RELATIONSHIPS)?;
        let analysis: Value = state.meta_typed(META_MATCH_ANALYSIS)?;
        let sections: Map<String, Value> = state
            .meta_typed(META_PROFILE_SECTIONS)
            .unwrap_or_default();

        let sections_text = to_pretty(&sections);
        let prompt = OPTIMIZE_PROMPT_TEMPLATE
            .replace("{relationships}", &to_pretty(&relationships))
            .replace("{match}", &to_pretty(&analysis))
            .replace("{sections}", truncate_chars(&sections_text, MAX_SECTION_CHARS));

        let normalized = self
            .remote
            .ask_json(&system_prompt(OPTIMIZE_SYSTEM), &prompt)
            .await?;
        let suggestions: Suggestions = serde_json::from_value(normalized.payload("suggestions")?.clone())
            .map_err(|e| PipelineError::Validation(format!("suggestions: {e}")))?;

        let data = serde_json::to_value(&suggestions)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        Ok((data, normalized.confidence(SUGGESTION_CONFIDENCE)))
    }
}

#[async_trait]
impl Agent for OptimizerAgent {
    fn phase(&self) -> PhaseTag {
        PhaseTag::Optimize
    }

    async fn process(&self, state: &PipelineState) -> PhaseResult {
        PhaseResult::from_outcome(PhaseTag::Optimize, self.optimize(state).await)
    }

    fn describe(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "optimizer".to_string(),
            phase: PhaseTag::Optimize,
            description: "Suggests targeted edits to the profile".to_string(),
            inputs: vec![
                META_RELATIONSHIPS.to_string(),
                META_MATCH_ANALYSIS.to_string(),
                META_PROFILE_SECTIONS.to_string(),
            ],
            outputs: vec!["suggestions".to_string(), "overall_feedback".to_string()],
            strategy: self.remote.strategy(),
        }
    }

    fn should_run(&self, state: &PipelineState) -> bool {
        !state.meta_flag(META_SKIP_OPTIMIZE)
    }

    fn skip_reason(&self) -> &'static str {
        "suggestions not requested"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::run_with_timing;
    use crate::llm_client::fake::{FakeBackend, Reply};
    use crate::pipeline::invoker::CallBudget;
    use serde_json::json;
    use std::sync::Arc;

    fn agent(reply: Reply) -> OptimizerAgent {
        let fake = Arc::new(FakeBackend::named("fake").fallback(reply));
        OptimizerAgent::new(RemoteCall::new(Some(fake), CallBudget::from_secs(1, 2, 0), "optimize"))
    }

    fn state(skip: bool) -> PipelineState {
        let mut meta = Map::new();
        meta.insert(META_RELATIONSHIPS.to_string(), json!({"matched_skills": []}));
        meta.insert(META_MATCH_ANALYSIS.to_string(), json!({"match_percentage": 40}));
        meta.insert(META_SKIP_OPTIMIZE.to_string(), json!(skip));
        PipelineState::new("u", "d", "", "txt").scoped_view("", meta)
    }

    #[tokio::test]
    async fn test_suggestions_parse() {
        let reply = r#"{"suggestions": [{"type": "quantify", "target_section": "EXPERIENCE",
            "suggested_text": "Cut latency 40%", "reasoning": "Numbers", "priority": "high"}],
            "overall_feedback": "ok"}"#;
        let result = run_with_timing(&agent(Reply::text(reply)), &state(false)).await;
        assert!(result.success);
        assert_eq!(result.data["suggestions"][0]["type"], "quantify");
        assert!(result.data["suggestions"][0].get("original_text_snippet").is_none());
    }

    #[tokio::test]
    async fn test_skip_flag_skips_without_remote_call() {
        let fake = Arc::new(FakeBackend::named("fake").fallback(Reply::text("{}")));
        let agent = OptimizerAgent::new(RemoteCall::new(
            Some(fake.clone()),
            CallBudget::from_secs(1, 2, 0),
            "optimize",
        ));
        let result = run_with_timing(&agent, &state(true)).await;
        assert!(result.is_skipped());
        assert_eq!(fake.calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_has_no_fallback() {
        let result = run_with_timing(&agent(Reply::Reject), &state(false)).await;
        assert!(!result.success);
        assert_eq!(result.data, json!({}));
    }
}

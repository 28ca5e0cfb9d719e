//! Classifier: assigns one document category to a scoped document view.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agents::prompts::{CLASSIFY_PROMPT_TEMPLATE, CLASSIFY_SYSTEM};
use crate::agents::{system_prompt, truncate_chars, Agent};
use crate::errors::PipelineError;
use crate::pipeline::models::{CapabilityDescriptor, PhaseResult, PhaseTag, PipelineState, META_DOCUMENT};
use crate::pipeline::remote::RemoteCall;

pub const CATEGORIES: [&str; 10] = [
    "Resume",
    "Job Description",
    "Cover Letter",
    "Email",
    "Project Documentation",
    "Meeting Notes",
    "Financial Report",
    "Legal Contract",
    "Research Paper",
    "General Document",
];

pub const FALLBACK_CATEGORY: &str = "General Document";

/// Only the head of a document is needed to classify it.
const MAX_CLASSIFY_CHARS: usize = 4000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub primary_classification: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

impl Classification {
    /// Snaps the category onto the closed list (case-insensitive); anything
    /// else becomes the general category.
    pub fn canonicalize(mut self) -> Self {
        let wanted = self.primary_classification.trim().to_lowercase();
        self.primary_classification = CATEGORIES
            .iter()
            .find(|c| c.to_lowercase() == wanted)
            .unwrap_or(&FALLBACK_CATEGORY)
            .to_string();
        self
    }

    pub fn is_resume(&self) -> bool {
        self.primary_classification == "Resume"
    }
}

pub struct ClassifierAgent {
    remote: RemoteCall,
}

impl ClassifierAgent {
    pub fn new(remote: RemoteCall) -> Self {
        Self { remote }
    }

    async fn classify(&self, state: &PipelineState) -> Result<(serde_json::Value, f64), PipelineError> {
        if state.content.trim().is_empty() {
            return Err(PipelineError::Validation("document is empty".to_string()));
        }

        let prompt = CLASSIFY_PROMPT_TEMPLATE
            .replace("{categories}", &CATEGORIES.join(", "))
            .replace("{content}", truncate_chars(&state.content, MAX_CLASSIFY_CHARS));
        let normalized = self
            .remote
            .ask_json(&system_prompt(CLASSIFY_SYSTEM), &prompt)
            .await?;

        let classification: Classification = serde_json::from_value(normalized.payload("classification")?.clone())
            .map_err(|e| PipelineError::Validation(format!("classification: {e}")))?;
        let classification = classification.canonicalize();

        info!(
            "Classified {} document as '{}'",
            state.meta_str(META_DOCUMENT).unwrap_or("unnamed"),
            classification.primary_classification
        );

        let confidence = normalized.confidence(classification.confidence.clamp(0.0, 1.0));
        let data = serde_json::to_value(&classification)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        Ok((data, confidence))
    }
}

#[async_trait]
impl Agent for ClassifierAgent {
    fn phase(&self) -> PhaseTag {
        PhaseTag::Classify
    }

    async fn process(&self, state: &PipelineState) -> PhaseResult {
        PhaseResult::from_outcome(PhaseTag::Classify, self.classify(state).await)
    }

    fn describe(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "classifier".to_string(),
            phase: PhaseTag::Classify,
            description: "Assigns each document one category from a closed list".to_string(),
            inputs: vec!["document content".to_string()],
            outputs: vec![
                "primary_classification".to_string(),
                "confidence".to_string(),
                "reasoning".to_string(),
            ],
            strategy: self.remote.strategy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::fake::{FakeBackend, Reply};
    use crate::pipeline::invoker::CallBudget;
    use std::sync::Arc;

    fn agent(reply: Reply) -> ClassifierAgent {
        let fake = Arc::new(FakeBackend::named("fake").fallback(reply));
        ClassifierAgent::new(RemoteCall::new(Some(fake), CallBudget::from_secs(1, 2, 0), "classify"))
    }

    #[test]
    fn test_unknown_category_maps_to_general() {
        let c = Classification {
            primary_classification: "Poem".into(),
            confidence: 0.4,
            reasoning: String::new(),
        }
        .canonicalize();
        assert_eq!(c.primary_classification, FALLBACK_CATEGORY);

        let c = Classification {
            primary_classification: "job description".into(),
            confidence: 0.9,
            reasoning: String::new(),
        }
        .canonicalize();
        assert_eq!(c.primary_classification, "Job Description");
    }

    #[tokio::test]
    async fn test_classifies_resume() {
        let agent = agent(Reply::text(
            r#"{"primary_classification": "Resume", "confidence": 0.93, "reasoning": "Has experience"}"#,
        ));
        let state = PipelineState::new("u", "d", "Jane Doe\nExperience\n...", "txt");
        let result = agent.process(&state).await;
        assert!(result.success);
        assert_eq!(result.data["primary_classification"], "Resume");
        assert!((result.confidence - 0.93).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_backend_rejection_is_failed_result() {
        let state = PipelineState::new("u", "d", "some text", "txt");
        let result = agent(Reply::Reject).process(&state).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_empty_document_fails_without_remote_call() {
        let state = PipelineState::new("u", "d", "   ", "txt");
        let result = agent(Reply::text("{}")).process(&state).await;
        assert!(!result.success);
    }
}

//! `RemoteCall` binds a phase's backend to its budget, so agents ask for text
//! or JSON without touching timeouts, retries or repair.

use std::sync::Arc;

use crate::errors::PipelineError;
use crate::llm_client::prompts::{correction_prompt, CORRECTION_SYSTEM};
use crate::llm_client::ReasoningBackend;
use crate::pipeline::invoker::{invoke_budgeted, CallBudget};
use crate::pipeline::normalizer::{normalize, Normalized};

#[derive(Clone)]
pub struct RemoteCall {
    backend: Option<Arc<dyn ReasoningBackend>>,
    budget: CallBudget,
    label: String,
}

impl RemoteCall {
    pub fn new(
        backend: Option<Arc<dyn ReasoningBackend>>,
        budget: CallBudget,
        label: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            budget,
            label: label.into(),
        }
    }

    /// Model name for capability descriptors, or "deterministic".
    pub fn strategy(&self) -> String {
        self.backend
            .as_ref()
            .map(|b| format!("{}:{}", b.name(), b.model()))
            .unwrap_or_else(|| "deterministic".to_string())
    }

    /// One budgeted call; returns the raw text.
    pub async fn ask(&self, system: &str, prompt: &str) -> Result<String, PipelineError> {
        let backend = self.backend.clone().ok_or_else(|| {
            PipelineError::Unavailable(format!("{}: no reasoning backend configured", self.label))
        })?;
        let system = system.to_string();
        let prompt = prompt.to_string();

        invoke_budgeted(&self.label, &self.budget, move || {
            let backend = backend.clone();
            let system = system.clone();
            let prompt = prompt.clone();
            async move { backend.invoke(&system, &prompt).await }
        })
        .await
    }

    /// Budgeted call followed by normalization, with one budgeted correction
    /// round when the reply does not parse.
    pub async fn ask_json(&self, system: &str, prompt: &str) -> Result<Normalized, PipelineError> {
        let raw = self.ask(system, prompt).await?;
        normalize(&raw, |broken| async move {
            self.ask(CORRECTION_SYSTEM, &correction_prompt(&broken)).await
        })
        .await
    }
}

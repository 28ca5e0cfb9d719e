/// LLM Client: the single point of entry for all reasoning-backend calls.
///
/// ARCHITECTURAL RULE: agents never talk HTTP themselves. They hold an
/// `Arc<dyn ReasoningBackend>` picked per phase by `BackendRegistry`, and every
/// call goes through the budgeted invoker (`pipeline::invoker`).
///
/// Backends make exactly one attempt per call; timeouts, retries and backoff
/// are owned by the invoker.
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::pipeline::models::PhaseTag;

pub mod anthropic;
pub mod openai;
pub mod prompts;

#[cfg(test)]
pub mod fake;

/// HTTP timeout applied by the clients themselves. Generous on purpose: the
/// invoker's hard timeout is the budget that matters.
pub(crate) const HTTP_TIMEOUT_SECS: u64 = 180;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("LLM returned empty content")]
    EmptyContent,

    #[error("LLM call aborted: {0}")]
    Aborted(String),
}

impl LlmError {
    /// Transport failures, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(_) => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::EmptyContent => true,
            LlmError::Aborted(_) => false,
        }
    }
}

/// Anything that can turn a prompt into raw text.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Short backend identifier, e.g. "anthropic".
    fn name(&self) -> &str;

    /// Model used for every call.
    fn model(&self) -> &str;

    async fn invoke(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Anthropic,
    OpenAi,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Anthropic => f.write_str("anthropic"),
            BackendKind::OpenAi => f.write_str("openai"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(BackendKind::Anthropic),
            "openai" | "gpt" => Ok(BackendKind::OpenAi),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

/// Static assignment of backends to phases.
///
/// A phase without an explicit assignment uses the default backend. When no
/// backend is configured at all, `for_phase` returns `None` and the agents run
/// on their deterministic paths only.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    default: Option<Arc<dyn ReasoningBackend>>,
    per_phase: HashMap<PhaseTag, Arc<dyn ReasoningBackend>>,
}

impl BackendRegistry {
    pub fn new(default: Option<Arc<dyn ReasoningBackend>>) -> Self {
        Self {
            default,
            per_phase: HashMap::new(),
        }
    }

    pub fn assign(mut self, phase: PhaseTag, backend: Arc<dyn ReasoningBackend>) -> Self {
        self.per_phase.insert(phase, backend);
        self
    }

    pub fn for_phase(&self, phase: PhaseTag) -> Option<Arc<dyn ReasoningBackend>> {
        self.per_phase
            .get(&phase)
            .cloned()
            .or_else(|| self.default.clone())
    }

    /// Builds the registry from configuration. Backends whose API key is
    /// missing are skipped with a warning.
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let mut available: HashMap<BackendKind, Arc<dyn ReasoningBackend>> = HashMap::new();

        if let Some(key) = &config.anthropic_api_key {
            available.insert(
                BackendKind::Anthropic,
                Arc::new(anthropic::AnthropicClient::new(key.clone())?),
            );
        }
        if let Some(key) = &config.openai_api_key {
            available.insert(
                BackendKind::OpenAi,
                Arc::new(openai::OpenAiClient::new(key.clone())?),
            );
        }

        let default = available
            .get(&config.default_backend)
            .or_else(|| available.values().next())
            .cloned();

        match &default {
            Some(backend) => info!(
                "Default reasoning backend: {} (model: {})",
                backend.name(),
                backend.model()
            ),
            None => warn!(
                "No default reasoning backend configured; phases without their own backend cannot call out, and analyses fail at classification unless it has one"
            ),
        }

        let mut registry = BackendRegistry::new(default);
        for (phase, kind) in &config.phase_backends {
            match available.get(kind) {
                Some(backend) => {
                    info!("Phase {phase} assigned to backend {kind}");
                    registry = registry.assign(*phase, backend.clone());
                }
                None => warn!("Phase {phase} wants backend {kind} but it has no API key; using default"),
            }
        }

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::fake::{FakeBackend, Reply};

    #[test]
    fn test_retryable_classification() {
        let rate_limited = LlmError::Api {
            status: 429,
            message: "slow down".into(),
        };
        let overloaded = LlmError::Api {
            status: 529,
            message: "overloaded".into(),
        };
        let bad_request = LlmError::Api {
            status: 400,
            message: "bad".into(),
        };
        assert!(rate_limited.is_retryable());
        assert!(overloaded.is_retryable());
        assert!(!bad_request.is_retryable());
        assert!(!LlmError::Aborted("panic".into()).is_retryable());
    }

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("OpenAI".parse::<BackendKind>().unwrap(), BackendKind::OpenAi);
        assert_eq!("claude".parse::<BackendKind>().unwrap(), BackendKind::Anthropic);
        assert!("gemini".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_registry_prefers_phase_assignment() {
        let default: Arc<dyn ReasoningBackend> =
            Arc::new(FakeBackend::named("default").fallback(Reply::text("{}")));
        let scorer: Arc<dyn ReasoningBackend> =
            Arc::new(FakeBackend::named("scorer").fallback(Reply::text("{}")));
        let registry = BackendRegistry::new(Some(default)).assign(PhaseTag::ScoreMatch, scorer);

        assert_eq!(registry.for_phase(PhaseTag::ScoreMatch).unwrap().name(), "scorer");
        assert_eq!(registry.for_phase(PhaseTag::Classify).unwrap().name(), "default");
    }

    #[test]
    fn test_empty_registry_has_no_backend() {
        assert!(BackendRegistry::default().for_phase(PhaseTag::Classify).is_none());
    }
}

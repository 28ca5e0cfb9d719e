//! Scripted in-memory backend for tests.
//!
//! Rules are checked in insertion order; the first rule whose system and user
//! fragments both occur in the request decides the reply.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{LlmError, ReasoningBackend};

#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    /// Responds after a delay (tokio time, so paused clocks apply).
    Delayed(Duration, String),
    /// Non-retryable API rejection.
    Reject,
    /// Retryable server error.
    ServerError,
    /// Never resolves.
    Hang,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }
}

struct Rule {
    system: String,
    user: String,
    reply: Reply,
}

pub struct FakeBackend {
    name: String,
    rules: Vec<Rule>,
    fallback: Reply,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rules: Vec::new(),
            fallback: Reply::Reject,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn rule(mut self, system: &str, user: &str, reply: Reply) -> Self {
        self.rules.push(Rule {
            system: system.to_string(),
            user: user.to_string(),
            reply,
        });
        self
    }

    pub fn fallback(mut self, reply: Reply) -> Self {
        self.fallback = reply;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// User prompts received so far, in arrival order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn pick(&self, system: &str, prompt: &str) -> Reply {
        self.rules
            .iter()
            .find(|r| system.contains(&r.system) && prompt.contains(&r.user))
            .map(|r| r.reply.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ReasoningBackend for FakeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "fake-model"
    }

    async fn invoke(&self, system: &str, prompt: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        match self.pick(system, prompt) {
            Reply::Text(text) => Ok(text),
            Reply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Reply::Reject => Err(LlmError::Api {
                status: 400,
                message: "rejected by fake backend".to_string(),
            }),
            Reply::ServerError => Err(LlmError::Api {
                status: 503,
                message: "fake backend unavailable".to_string(),
            }),
            Reply::Hang => {
                std::future::pending::<()>().await;
                Err(LlmError::EmptyContent)
            }
        }
    }
}

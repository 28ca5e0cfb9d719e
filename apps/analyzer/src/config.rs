use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::llm_client::BackendKind;
use crate::pipeline::invoker::{CallBudget, MAX_RETRIES};
use crate::pipeline::models::PhaseTag;

pub const DEFAULT_SECTION_CHUNK_CHARS: usize = 9000;

/// Application configuration loaded from environment variables.
/// Every reasoning backend is optional at startup. Classification has no
/// deterministic fallback, so analyses fail with 502 until the classify phase
/// has a backend; relationships and scoring fall back on their own.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub default_backend: BackendKind,
    pub phase_backends: HashMap<PhaseTag, BackendKind>,
    pub budgets: HashMap<PhaseTag, CallBudget>,
    pub section_chunk_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            rust_log: "info".to_string(),
            anthropic_api_key: None,
            openai_api_key: None,
            default_backend: BackendKind::Anthropic,
            phase_backends: HashMap::new(),
            budgets: HashMap::new(),
            section_chunk_chars: DEFAULT_SECTION_CHUNK_CHARS,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let mut budgets = HashMap::new();
        for phase in PhaseTag::ALL {
            let key = budget_env_key(phase);
            if let Some(raw) = optional_env(&key) {
                let budget = parse_budget(&raw).with_context(|| format!("{key} is invalid"))?;
                budgets.insert(phase, budget);
            }
        }

        Ok(Config {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            openai_api_key: optional_env("OPENAI_API_KEY"),
            default_backend: match optional_env("DEFAULT_BACKEND") {
                Some(raw) => raw
                    .parse::<BackendKind>()
                    .map_err(anyhow::Error::msg)
                    .context("DEFAULT_BACKEND must be 'anthropic' or 'openai'")?,
                None => BackendKind::Anthropic,
            },
            phase_backends: match optional_env("PHASE_BACKENDS") {
                Some(raw) => parse_phase_backends(&raw).context("PHASE_BACKENDS is invalid")?,
                None => HashMap::new(),
            },
            budgets,
            section_chunk_chars: match optional_env("SECTION_CHUNK_CHARS") {
                Some(raw) => raw
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .context("SECTION_CHUNK_CHARS must be a positive integer")?,
                None => DEFAULT_SECTION_CHUNK_CHARS,
            },
        })
    }

    /// Configured budget for `phase`, or its built-in default.
    pub fn budget(&self, phase: PhaseTag) -> CallBudget {
        self.budgets
            .get(&phase)
            .copied()
            .unwrap_or_else(|| default_budget(phase))
    }

    /// Sum of every phase's worst case. Fan-out phases run their calls
    /// concurrently, so each phase contributes one call's bound.
    pub fn worst_case_total(&self) -> Duration {
        PhaseTag::ALL
            .iter()
            .map(|phase| self.budget(*phase).worst_case())
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }
}

/// Built-in per-phase budgets (soft secs, hard secs, retries).
pub fn default_budget(phase: PhaseTag) -> CallBudget {
    match phase {
        PhaseTag::Classify => CallBudget::from_secs(8, 20, 1),
        PhaseTag::SplitSections => CallBudget::from_secs(10, 30, 1),
        PhaseTag::ExtractEntities => CallBudget::from_secs(15, 45, 1),
        PhaseTag::MapRelationships => CallBudget::from_secs(20, 60, 0),
        PhaseTag::ScoreMatch => CallBudget::from_secs(15, 45, 1),
        PhaseTag::Optimize => CallBudget::from_secs(30, 90, 1),
    }
}

fn budget_env_key(phase: PhaseTag) -> String {
    format!("LLM_BUDGET_{}", phase.as_str().to_uppercase())
}

/// Parses `soft_secs,hard_secs,retries`.
pub fn parse_budget(raw: &str) -> Result<CallBudget> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    let [soft, hard, retries] = parts.as_slice() else {
        bail!("expected 'soft_secs,hard_secs,retries', got '{raw}'");
    };

    let soft: u64 = soft.parse().context("soft_secs must be an integer")?;
    let hard: u64 = hard.parse().context("hard_secs must be an integer")?;
    let retries: u32 = retries.parse().context("retries must be an integer")?;
    if hard == 0 {
        bail!("hard_secs must be greater than zero");
    }
    if retries > MAX_RETRIES {
        bail!("retries must be at most {MAX_RETRIES}, got {retries}");
    }

    Ok(CallBudget::from_secs(soft, hard, retries))
}

/// Parses `phase=backend,phase=backend`.
pub fn parse_phase_backends(raw: &str) -> Result<HashMap<PhaseTag, BackendKind>> {
    let mut assignments = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (phase, backend) = pair
            .split_once('=')
            .with_context(|| format!("expected 'phase=backend', got '{pair}'"))?;
        let phase: PhaseTag = phase.parse().map_err(anyhow::Error::msg)?;
        let backend: BackendKind = backend.parse().map_err(anyhow::Error::msg)?;
        assignments.insert(phase, backend);
    }
    Ok(assignments)
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

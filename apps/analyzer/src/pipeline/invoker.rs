//! Budgeted Invoker: gives any remote call a two-tier timeout, cooperative
//! cancellation and bounded retry.
//!
//! Per attempt:
//! 1. spawn the call as its own task
//! 2. wait up to `soft`; completion returns immediately
//! 3. past `soft`, keep waiting (no cancel) until `hard`
//! 4. past `hard`, cancel the task, swallow the cancellation, back off, retry
//!
//! Worst case: `hard × (retries + 1) + Σ backoff`.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::PipelineError;
use crate::llm_client::LlmError;

/// Upper bound on retries per call; larger requests are clamped.
pub const MAX_RETRIES: u32 = 10;

/// Timeout and retry policy for one phase's remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallBudget {
    pub soft: Duration,
    pub hard: Duration,
    pub retries: u32,
    /// Base delay; attempt n waits `backoff × 2^(n-1)`.
    pub backoff: Duration,
}

impl CallBudget {
    /// `soft` is clamped to `hard`, `retries` to [`MAX_RETRIES`].
    pub fn new(soft: Duration, hard: Duration, retries: u32, backoff: Duration) -> Self {
        Self {
            soft: soft.min(hard),
            hard,
            retries: retries.min(MAX_RETRIES),
            backoff,
        }
    }

    pub fn from_secs(soft: u64, hard: u64, retries: u32) -> Self {
        Self::new(
            Duration::from_secs(soft),
            Duration::from_secs(hard),
            retries,
            Duration::from_millis(500),
        )
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << exponent)
    }

    pub fn total_backoff(&self) -> Duration {
        (1..=self.retries)
            .map(|attempt| self.backoff_for(attempt))
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }

    /// Upper bound on how long one budgeted call can take.
    pub fn worst_case(&self) -> Duration {
        self.hard
            .saturating_mul(self.retries.saturating_add(1))
            .saturating_add(self.total_backoff())
    }
}

enum Attempt<T> {
    Completed(Result<T, LlmError>),
    TimedOut,
}

/// Runs `call` under `budget`. `call` is invoked once per attempt and must
/// produce an owned future, since each attempt runs on its own task.
pub async fn invoke_budgeted<F, Fut, T>(
    label: &str,
    budget: &CallBudget,
    mut call: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>> + Send + 'static,
    T: Send + 'static,
{
    let attempts = budget.retries.saturating_add(1);
    let mut last_error = String::new();

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = budget.backoff_for(attempt);
            warn!(
                "{label}: attempt {attempt}/{attempts} failed ({last_error}), retrying after {}ms",
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }

        match run_attempt(label, budget, call()).await {
            Attempt::Completed(Ok(value)) => return Ok(value),
            Attempt::Completed(Err(e)) if e.is_retryable() => {
                last_error = e.to_string();
            }
            Attempt::Completed(Err(e)) => {
                return Err(PipelineError::Unavailable(format!("{label}: {e}")));
            }
            Attempt::TimedOut => {
                last_error = format!("no response within {}ms", budget.hard.as_millis());
            }
        }
    }

    Err(PipelineError::Transient(format!(
        "{label} failed after {attempts} attempt(s): {last_error}"
    )))
}

async fn run_attempt<Fut, T>(label: &str, budget: &CallBudget, fut: Fut) -> Attempt<T>
where
    Fut: Future<Output = Result<T, LlmError>> + Send + 'static,
    T: Send + 'static,
{
    let token = CancellationToken::new();
    let cancelled = token.clone();
    let mut handle = tokio::spawn(async move {
        tokio::select! {
            _ = cancelled.cancelled() => None,
            result = fut => Some(result),
        }
    });

    if let Ok(joined) = tokio::time::timeout(budget.soft, &mut handle).await {
        return settle(joined);
    }

    debug!(
        "{label}: soft timeout of {}ms elapsed, waiting up to {}ms",
        budget.soft.as_millis(),
        budget.hard.as_millis()
    );

    let remaining = budget.hard.saturating_sub(budget.soft);
    match tokio::time::timeout(remaining, &mut handle).await {
        Ok(joined) => settle(joined),
        Err(_) => {
            token.cancel();
            // The task observes the token and exits; its outcome is discarded.
            let _ = handle.await;
            warn!("{label}: hard timeout of {}ms elapsed, call cancelled", budget.hard.as_millis());
            Attempt::TimedOut
        }
    }
}

fn settle<T>(joined: Result<Option<Result<T, LlmError>>, JoinError>) -> Attempt<T> {
    match joined {
        Ok(Some(result)) => Attempt::Completed(result),
        Ok(None) => Attempt::TimedOut,
        Err(e) => Attempt::Completed(Err(LlmError::Aborted(e.to_string()))),
    }
}

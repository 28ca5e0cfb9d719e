use std::sync::Arc;

use crate::pipeline::orchestrator::Orchestrator;
use crate::pipeline::sink::ResultSink;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Where finished analyses go. Default: `LogSink`.
    pub sink: Arc<dyn ResultSink>,
}

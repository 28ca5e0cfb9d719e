mod agents;
mod config;
mod errors;
mod llm_client;
mod pipeline;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::agents::AgentRegistry;
use crate::config::Config;
use crate::llm_client::BackendRegistry;
use crate::pipeline::orchestrator::Orchestrator;
use crate::pipeline::sink::LogSink;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on malformed env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting analyzer v{}", env!("CARGO_PKG_VERSION"));

    // Reasoning backends (each optional)
    let backends = BackendRegistry::from_config(&config)?;

    // Agents and the phase scheduler
    let agents = AgentRegistry::standard(&config, &backends);
    for descriptor in agents.descriptors() {
        info!(
            "Agent {} for phase {} (strategy: {})",
            descriptor.name, descriptor.phase, descriptor.strategy
        );
    }
    // No end-to-end deadline is enforced; this is the bound per request.
    info!(
        "Worst-case analysis latency from phase budgets: {}s",
        config.worst_case_total().as_secs()
    );

    let state = AppState {
        orchestrator: Arc::new(Orchestrator::new(agents)),
        sink: Arc::new(LogSink),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS once the frontend origin is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

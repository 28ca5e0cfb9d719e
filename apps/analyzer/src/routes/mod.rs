pub mod analysis;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/agents", get(analysis::handle_list_agents))
        .route("/api/v1/analyses", post(analysis::handle_create_analysis))
        .with_state(state)
}

use axum::{extract::State, Json};
use tracing::warn;

use crate::errors::AppError;
use crate::pipeline::models::CapabilityDescriptor;
use crate::pipeline::orchestrator::{AnalysisReport, AnalysisRequest};
use crate::state::AppState;

/// GET /api/v1/agents
pub async fn handle_list_agents(State(state): State<AppState>) -> Json<Vec<CapabilityDescriptor>> {
    Json(state.orchestrator.descriptors())
}

/// POST /api/v1/analyses
pub async fn handle_create_analysis(
    State(state): State<AppState>,
    Json(req): Json<AnalysisRequest>,
) -> Result<Json<AnalysisReport>, AppError> {
    let report = state.orchestrator.run(req).await?;

    if let Err(e) = state.sink.store(&report).await {
        warn!("Failed to store analysis {}: {e:#}", report.analysis_id);
    }

    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::agents::AgentRegistry;
    use crate::config::Config;
    use crate::llm_client::fake::{FakeBackend, Reply};
    use crate::llm_client::BackendRegistry;
    use crate::pipeline::orchestrator::Orchestrator;
    use crate::pipeline::sink::{LogSink, ResultSink};
    use crate::routes::build_router;
    use crate::state::AppState;

    struct FailingSink;

    #[async_trait::async_trait]
    impl ResultSink for FailingSink {
        async fn store(&self, _report: &crate::pipeline::orchestrator::AnalysisReport) -> anyhow::Result<()> {
            anyhow::bail!("storage offline")
        }
    }

    fn app(fake: FakeBackend, sink: Arc<dyn ResultSink>) -> axum::Router {
        let config = Config::default();
        let backends = BackendRegistry::new(Some(Arc::new(fake)));
        build_router(AppState {
            orchestrator: Arc::new(Orchestrator::new(AgentRegistry::standard(&config, &backends))),
            sink,
        })
    }

    fn post_analysis(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/analyses")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Classification fails, entity extraction never runs; every other phase
    /// degrades on its own, so responses come back fast and deterministic.
    fn classify_rejecting_backend() -> FakeBackend {
        FakeBackend::named("fake").fallback(Reply::Reject)
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(classify_rejecting_backend(), Arc::new(LogSink))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_agents_lists_every_phase_in_order() {
        let response = app(classify_rejecting_backend(), Arc::new(LogSink))
            .oneshot(Request::builder().uri("/api/v1/agents").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let phases: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["phase"].as_str().unwrap())
            .collect();
        assert_eq!(
            phases,
            vec![
                "classify",
                "split_sections",
                "extract_entities",
                "map_relationships",
                "score_match",
                "optimize"
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_profile_is_bad_request() {
        let response = app(classify_rejecting_backend(), Arc::new(LogSink))
            .oneshot(post_analysis(json!({
                "owner_id": "o",
                "document_id": "d",
                "profile_text": "",
                "target_text": "Needs Rust"
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_fatal_phase_is_bad_gateway() {
        let response = app(classify_rejecting_backend(), Arc::new(LogSink))
            .oneshot(post_analysis(json!({
                "owner_id": "o",
                "document_id": "d",
                "profile_text": "Jane Doe, Rust engineer",
                "target_text": "Needs Rust"
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "PHASE_FAILED");
        assert!(body["error"]["message"].as_str().unwrap().contains("classify"));
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_fail_request() {
        let fake = FakeBackend::named("fake")
            .rule(
                "classification",
                "",
                Reply::text(r#"{"primary_classification": "Resume", "confidence": 0.9}"#),
            )
            .rule("layout", "", Reply::text(r#"{"SKILLS": "Rust"}"#))
            .rule("extraction", "", Reply::text(r#"{"skills": ["Rust"]}"#))
            .fallback(Reply::Reject);

        let response = app(fake, Arc::new(FailingSink))
            .oneshot(post_analysis(json!({
                "owner_id": "o",
                "document_id": "d",
                "profile_text": "Jane Doe, Rust engineer",
                "target_text": "Needs Rust",
                "include_suggestions": false
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["owner_id"], "o");
        assert_eq!(body["document_id"], "d");
        assert_eq!(body["results"]["map_relationships"]["data"]["fallback_used"], true);
        assert_eq!(body["results"]["score_match"]["data"]["match_percentage"], 85);
        assert_eq!(body["results"]["optimize"]["data"]["skipped"], true);
    }
}

//! # HTTP API
//!
//! Axum routes over the core workflows. Handlers stay thin: they decode
//! requests, call into `conductor_core` and map `WorkflowError` onto HTTP
//! status codes.

pub mod observability;
pub mod orchestrator;
pub mod planning;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use conductor_core::observability::LogBuffer;
use conductor_core::state::PlanStore;
use conductor_core::swarm::{OrchestratorService, PlanningPipeline};
use conductor_core::WorkflowError;

/// Application state shared by every handler
pub struct AppState {
    pub store: Arc<dyn PlanStore>,
    pub pipeline: PlanningPipeline,
    pub orchestrator: OrchestratorService,
    pub logs: Arc<LogBuffer>,
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest(
            "/api",
            planning::planning_routes().merge(observability::observability_routes()),
        )
        .nest("/api/orchestrator/sessions", orchestrator::orchestrator_routes())
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn healthz() -> Json<Health> {
    Json(Health { status: "ok" })
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

/// `WorkflowError` rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub WorkflowError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            WorkflowError::InvalidState(_) => StatusCode::CONFLICT,
            WorkflowError::SessionNotFound(_) | WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
            WorkflowError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            WorkflowError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(error: WorkflowError) -> Self {
        ApiError(error)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError(WorkflowError::Store(error))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self.0 {
            WorkflowError::SessionNotFound(run_id) => format!("Run {} was not found.", run_id),
            WorkflowError::Store(e) => {
                tracing::error!(event = "api.error", error = %e, "Unhandled store error");
                "Unexpected server error.".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { detail })).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Offline state over in-memory stores
#[cfg(test)]
pub(crate) fn test_state() -> SharedState {
    use conductor_core::state::InMemoryPlanStore;
    use conductor_core::swarm::OrchestratorAgents;

    Arc::new(AppState {
        store: Arc::new(InMemoryPlanStore::new()),
        pipeline: PlanningPipeline::offline(),
        orchestrator: OrchestratorService::in_memory(OrchestratorAgents::offline()),
        logs: Arc::new(LogBuffer::new(64)),
    })
}

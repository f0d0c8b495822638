//! # Orchestrator API
//!
//! Session endpoints for the approval-gated blueprint workflow.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use conductor_core::state::{IngestionRequest, OrchestratorResult};
use conductor_core::swarm::{
    ApprovalResponse, MilestonesEnvelope, PromptsEnvelope, SessionStatus, SummaryEnvelope,
};
use conductor_core::WorkflowError;

use super::{ApiError, ApiResult, SharedState};

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    #[serde(default = "default_approved")]
    pub approved: bool,
}

fn default_approved() -> bool {
    true
}

pub fn orchestrator_routes() -> Router<SharedState> {
    Router::new()
        .route("/", post(create_session).get(list_sessions))
        .route("/:run_id", get(describe_session).delete(discard_session))
        .route("/:run_id/summary", get(summary))
        .route("/:run_id/summary/regenerate", post(regenerate_summary))
        .route("/:run_id/summary/approval", post(approve_summary))
        .route("/:run_id/milestones", post(generate_milestones).get(milestones))
        .route("/:run_id/milestones/approval", post(approve_milestones))
        .route("/:run_id/prompts", post(generate_prompts).get(prompts))
        .route("/:run_id/finalize", post(finalize))
        .route("/:run_id/result", get(result))
}

async fn create_session(
    State(state): State<SharedState>,
    Json(req): Json<IngestionRequest>,
) -> Result<(StatusCode, Json<SummaryEnvelope>), ApiError> {
    let envelope = state
        .orchestrator
        .create_session(&req.content, req.source)
        .await?;
    Ok((StatusCode::CREATED, Json(envelope)))
}

async fn list_sessions(State(state): State<SharedState>) -> ApiResult<Vec<SessionStatus>> {
    Ok(Json(state.orchestrator.list_sessions().await?))
}

async fn describe_session(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> ApiResult<SessionStatus> {
    Ok(Json(state.orchestrator.describe_session(&run_id).await?))
}

async fn discard_session(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.orchestrator.discard_session(&run_id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(WorkflowError::SessionNotFound(run_id).into())
    }
}

async fn summary(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> ApiResult<SummaryEnvelope> {
    Ok(Json(state.orchestrator.summary(&run_id).await?))
}

async fn regenerate_summary(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> ApiResult<SummaryEnvelope> {
    Ok(Json(state.orchestrator.regenerate_summary(&run_id).await?))
}

async fn approve_summary(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
    Json(req): Json<ApprovalRequest>,
) -> ApiResult<ApprovalResponse> {
    Ok(Json(
        state
            .orchestrator
            .approve_summary(&run_id, req.approved)
            .await?,
    ))
}

async fn generate_milestones(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> ApiResult<MilestonesEnvelope> {
    Ok(Json(state.orchestrator.generate_milestones(&run_id).await?))
}

async fn milestones(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> ApiResult<MilestonesEnvelope> {
    Ok(Json(state.orchestrator.milestones(&run_id).await?))
}

async fn approve_milestones(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
    Json(req): Json<ApprovalRequest>,
) -> ApiResult<ApprovalResponse> {
    Ok(Json(
        state
            .orchestrator
            .approve_milestones(&run_id, req.approved)
            .await?,
    ))
}

async fn generate_prompts(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> ApiResult<PromptsEnvelope> {
    Ok(Json(state.orchestrator.generate_prompts(&run_id).await?))
}

async fn prompts(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> ApiResult<PromptsEnvelope> {
    Ok(Json(state.orchestrator.prompts(&run_id).await?))
}

async fn finalize(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> ApiResult<OrchestratorResult> {
    Ok(Json(state.orchestrator.finalize(&run_id).await?))
}

async fn result(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> ApiResult<OrchestratorResult> {
    Ok(Json(state.orchestrator.result(&run_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_state;

    const BLUEPRINT: &str = "Customer portal with an API service.\nRisk: tight deadline.\nPostgres database for orders.";

    async fn create(state: &SharedState) -> String {
        let (status, Json(envelope)) = create_session(
            State(state.clone()),
            Json(IngestionRequest {
                content: BLUEPRINT.to_string(),
                source: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        envelope.run_id
    }

    #[tokio::test]
    async fn test_milestones_before_approval_conflict() {
        let state = test_state();
        let run_id = create(&state).await;
        let err = generate_milestones(State(state), Path(run_id))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_full_session_flow() {
        let state = test_state();
        let run_id = create(&state).await;

        approve_summary(
            State(state.clone()),
            Path(run_id.clone()),
            Json(ApprovalRequest { approved: true }),
        )
        .await
        .unwrap();
        let Json(milestones) = generate_milestones(State(state.clone()), Path(run_id.clone()))
            .await
            .unwrap();
        assert_eq!(milestones.plan.milestones.len(), 5);
        approve_milestones(
            State(state.clone()),
            Path(run_id.clone()),
            Json(ApprovalRequest { approved: true }),
        )
        .await
        .unwrap();
        generate_prompts(State(state.clone()), Path(run_id.clone()))
            .await
            .unwrap();

        let err = result(State(state.clone()), Path(run_id.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let Json(result) = finalize(State(state.clone()), Path(run_id.clone()))
            .await
            .unwrap();
        assert_eq!(result.run_id, run_id);
        assert_eq!(result.prompts.prompts.len(), 5);
        let Json(read_back) = super::result(State(state.clone()), Path(run_id.clone()))
            .await
            .unwrap();
        assert_eq!(read_back, result);

        let status = discard_session(State(state.clone()), Path(run_id.clone()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let err = discard_session(State(state), Path(run_id)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_approval_defaults_to_true() {
        let req: ApprovalRequest = serde_json::from_str("{}").unwrap();
        assert!(req.approved);
    }
}

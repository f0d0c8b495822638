//! # Planning API
//!
//! Ingestion, the streamed planning run, step edits and export.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use conductor_core::state::{
    export_run, ingest_into, update_steps, ExportRequest, ExportResponse, IngestionRequest,
    IngestionResponse, PlanRequest, PromptStep,
};
use conductor_core::swarm::PipelineEvent;
use conductor_core::WorkflowError;

use super::{ApiError, ApiResult, SharedState};

#[derive(Debug, Serialize, Deserialize)]
pub struct StepsPayload {
    pub steps: Vec<PromptStep>,
}

#[derive(Debug, Serialize)]
pub struct StepsResponse {
    pub run_id: String,
    pub steps: Vec<PromptStep>,
}

pub fn planning_routes() -> Router<SharedState> {
    Router::new()
        .route("/ingest", post(ingest))
        .route("/plan", post(plan))
        .route("/runs/:run_id/steps", get(get_steps).put(put_steps))
        .route("/export", post(export))
}

async fn ingest(
    State(state): State<SharedState>,
    Json(req): Json<IngestionRequest>,
) -> ApiResult<IngestionResponse> {
    tracing::info!(
        event = "api.ingest.start",
        source = req.source.as_deref().unwrap_or("inline"),
        chars = req.content.len(),
        "Ingest request received"
    );
    let response = ingest_into(state.store.as_ref(), &req.content, req.source.as_deref())?;
    tracing::info!(
        event = "api.ingest.complete",
        run_id = %response.run_id,
        chunks = response.stats.chunk_count,
        "Ingest request complete"
    );
    Ok(Json(response))
}

/// Run the pipeline for an ingested run and stream its progress.
///
/// Each `PipelineEvent` becomes one SSE message named after its kind; the
/// stream ends after `final_plan` or `failed`.
async fn plan(
    State(state): State<SharedState>,
    Json(req): Json<PlanRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if !state.store.run_exists(&req.run_id)? {
        return Err(WorkflowError::unknown_run(&req.run_id).into());
    }
    tracing::info!(
        event = "api.plan.start",
        run_id = %req.run_id,
        style = req.style.as_str(),
        "Plan request received"
    );

    let (tx, rx) = mpsc::channel::<PipelineEvent>(32);
    let pipeline = state.pipeline.clone();
    let store = state.store.clone();
    tokio::spawn(async move {
        match pipeline.run(&req, store.as_ref(), Some(&tx)).await {
            Ok(response) => tracing::info!(
                event = "api.plan.complete",
                run_id = %req.run_id,
                steps = response.steps.len(),
                "Plan request complete"
            ),
            Err(e) => tracing::error!(
                event = "api.plan.failed",
                run_id = %req.run_id,
                error = %e,
                "Plan request failed"
            ),
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        let json = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().event(event.kind.as_str()).data(json))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn get_steps(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
) -> ApiResult<StepsResponse> {
    if !state.store.run_exists(&run_id)? {
        return Err(WorkflowError::unknown_run(&run_id).into());
    }
    let steps = state.store.steps(&run_id)?;
    Ok(Json(StepsResponse { run_id, steps }))
}

async fn put_steps(
    State(state): State<SharedState>,
    Path(run_id): Path<String>,
    Json(payload): Json<StepsPayload>,
) -> ApiResult<StepsResponse> {
    if !state.store.run_exists(&run_id)? {
        return Err(WorkflowError::unknown_run(&run_id).into());
    }
    let steps = update_steps(state.store.as_ref(), &run_id, payload.steps)
        .map_err(|e| WorkflowError::invalid_input(e.to_string()))?;
    tracing::info!(
        event = "planning.steps.updated",
        run_id = %run_id,
        steps = steps.len(),
        "Steps updated"
    );
    Ok(Json(StepsResponse { run_id, steps }))
}

async fn export(
    State(state): State<SharedState>,
    Json(req): Json<ExportRequest>,
) -> ApiResult<ExportResponse> {
    tracing::info!(
        event = "api.export.start",
        run_id = %req.run_id,
        format = req.format.extension(),
        "Export request received"
    );
    let response = export_run(state.store.as_ref(), &req.run_id, req.format)?;
    tracing::info!(
        event = "api.export.complete",
        run_id = %req.run_id,
        filename = %response.metadata.filename,
        "Export request complete"
    );
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_state;
    use axum::http::StatusCode;
    use conductor_core::state::ExportFormat;

    fn ingest_request(content: &str) -> IngestionRequest {
        IngestionRequest {
            content: content.to_string(),
            source: Some("notes.md".to_string()),
        }
    }

    #[tokio::test]
    async fn test_ingest_then_plan_and_export() {
        let state = test_state();
        let Json(ingested) = ingest(
            State(state.clone()),
            Json(ingest_request("Build an API service.\nStore data in a database.")),
        )
        .await
        .unwrap();
        assert!(ingested.stats.chunk_count >= 1);

        let request = PlanRequest::new(ingested.run_id.clone());
        state
            .pipeline
            .run(&request, state.store.as_ref(), None)
            .await
            .unwrap();

        let Json(steps) = get_steps(State(state.clone()), Path(ingested.run_id.clone()))
            .await
            .unwrap();
        assert_eq!(steps.steps.len(), 5);

        let Json(exported) = export(
            State(state.clone()),
            Json(ExportRequest {
                run_id: ingested.run_id.clone(),
                format: ExportFormat::Markdown,
            }),
        )
        .await
        .unwrap();
        assert!(exported.metadata.filename.ends_with(".md"));
    }

    #[tokio::test]
    async fn test_blank_document_is_bad_request() {
        let err = ingest(State(test_state()), Json(ingest_request("   \n\u{200b}")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let state = test_state();
        let err = get_steps(State(state.clone()), Path("missing".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = export(
            State(state),
            Json(ExportRequest {
                run_id: "missing".to_string(),
                format: ExportFormat::Yaml,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_put_steps_rejects_unknown_ids() {
        let state = test_state();
        let Json(ingested) = ingest(
            State(state.clone()),
            Json(ingest_request("Ship a frontend for the billing service.")),
        )
        .await
        .unwrap();
        state
            .pipeline
            .run(&PlanRequest::new(ingested.run_id.clone()), state.store.as_ref(), None)
            .await
            .unwrap();

        let mut steps = state.store.steps(&ingested.run_id).unwrap();
        steps[0].id = "not-a-step".to_string();
        let err = put_steps(
            State(state),
            Path(ingested.run_id),
            Json(StepsPayload { steps }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}

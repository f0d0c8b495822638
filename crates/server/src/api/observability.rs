//! # Observability API
//!
//! Module health snapshot and raw log paging over the captured records.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use conductor_core::observability::{
    build_observability_snapshot, LogPage, ObservabilitySnapshot, SnapshotOptions,
};

use super::SharedState;

const DEFAULT_LOG_PAGE: usize = 200;
const MAX_LOG_PAGE: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotQuery {
    /// Number of most recent records to correlate
    pub limit: Option<usize>,
    pub max_calls: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub cursor: u64,
    pub limit: Option<usize>,
    pub log_type: Option<String>,
}

pub fn observability_routes() -> Router<SharedState> {
    Router::new()
        .route("/observability", get(snapshot))
        .route("/logs", get(logs))
}

async fn snapshot(
    State(state): State<SharedState>,
    Query(query): Query<SnapshotQuery>,
) -> Json<ObservabilitySnapshot> {
    let limit = query.limit.unwrap_or_else(|| state.logs.capacity());
    let records = state.logs.recent(limit, None);
    let defaults = SnapshotOptions::default();
    let options = SnapshotOptions {
        max_calls: query.max_calls.unwrap_or(defaults.max_calls),
        session_started_at: Some(state.logs.session_started_at()),
        ..defaults
    };
    Json(build_observability_snapshot(&records, &options))
}

async fn logs(State(state): State<SharedState>, Query(query): Query<LogsQuery>) -> Json<LogPage> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_PAGE).clamp(1, MAX_LOG_PAGE);
    let log_type = query.log_type.as_deref().filter(|t| !t.trim().is_empty());
    Json(state.logs.records_after(query.cursor, limit, log_type))
}

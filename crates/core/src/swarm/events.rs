//! # Pipeline Events
//!
//! Progress events emitted while the planning pipeline runs. The server
//! forwards them to clients as server-sent events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of pipeline event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEventKind {
    CoordinatorStarted,
    CoordinatorCompleted,
    PlannerStarted,
    PlannerCompleted,
    DecomposerCompleted,
    ReviewerCompleted,
    /// Carries the full `PlanResponse`
    FinalPlan,
    /// Pipeline aborted before producing a plan
    Failed,
}

impl PipelineEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineEventKind::CoordinatorStarted => "coordinator_started",
            PipelineEventKind::CoordinatorCompleted => "coordinator_completed",
            PipelineEventKind::PlannerStarted => "planner_started",
            PipelineEventKind::PlannerCompleted => "planner_completed",
            PipelineEventKind::DecomposerCompleted => "decomposer_completed",
            PipelineEventKind::ReviewerCompleted => "reviewer_completed",
            PipelineEventKind::FinalPlan => "final_plan",
            PipelineEventKind::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: PipelineEventKind,
    pub run_id: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl PipelineEvent {
    pub fn new(kind: PipelineEventKind, run_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            run_id: run_id.to_string(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

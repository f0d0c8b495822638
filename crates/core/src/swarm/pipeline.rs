//! # Planning Pipeline
//!
//! Runs Coordinator → Planner → Decomposer → Reviewer for an ingested run,
//! persisting each artifact and reporting progress on an optional channel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::PipelineConfig;
use crate::error::WorkflowError;
use crate::models::ChatCompletion;
use crate::skills::coordinator_skill::{CoordinatorInput, CoordinatorSkill};
use crate::skills::decomposer_skill::{DecomposerInput, DecomposerSkill};
use crate::skills::planner_skill::{PlannerInput, PlannerSkill};
use crate::skills::reviewer_skill::ReviewerSkill;
use crate::state::plan::{PlanRequest, PlanResponse};
use crate::state::store::PlanStore;

use super::events::{PipelineEvent, PipelineEventKind};

/// Stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Coordinating,
    Planning,
    Decomposing,
    Reviewing,
    Complete,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Coordinating => "coordinating",
            PipelineStage::Planning => "planning",
            PipelineStage::Decomposing => "decomposing",
            PipelineStage::Reviewing => "reviewing",
            PipelineStage::Complete => "complete",
            PipelineStage::Failed => "failed",
        }
    }

    /// Next stage; terminal stages stay put
    pub fn advance(self) -> Self {
        match self {
            PipelineStage::Coordinating => PipelineStage::Planning,
            PipelineStage::Planning => PipelineStage::Decomposing,
            PipelineStage::Decomposing => PipelineStage::Reviewing,
            PipelineStage::Reviewing => PipelineStage::Complete,
            PipelineStage::Complete => PipelineStage::Complete,
            PipelineStage::Failed => PipelineStage::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Complete | PipelineStage::Failed)
    }
}

/// The four planning stages bundled together
#[derive(Debug, Clone)]
pub struct PlanningPipeline {
    coordinator: CoordinatorSkill,
    planner: PlannerSkill,
    decomposer: DecomposerSkill,
    reviewer: ReviewerSkill,
}

impl PlanningPipeline {
    pub fn new(
        coordinator: CoordinatorSkill,
        planner: PlannerSkill,
        decomposer: DecomposerSkill,
        reviewer: ReviewerSkill,
    ) -> Self {
        Self {
            coordinator,
            planner,
            decomposer,
            reviewer,
        }
    }

    /// Heuristic-only pipeline
    pub fn offline() -> Self {
        Self::new(
            CoordinatorSkill::new(None),
            PlannerSkill::new(None),
            DecomposerSkill::new(None),
            ReviewerSkill::new(),
        )
    }

    pub fn from_config(config: &PipelineConfig, client: Option<Arc<dyn ChatCompletion>>) -> Self {
        Self::new(
            CoordinatorSkill::from_config(config, client.clone()),
            PlannerSkill::from_config(config, client.clone()),
            DecomposerSkill::from_config(config, client),
            ReviewerSkill::new(),
        )
    }

    /// Run every stage for `request.run_id`.
    ///
    /// Stage failures never surface here; only an unknown run, a run with no
    /// ingested text, or a store error end the run early.
    pub async fn run(
        &self,
        request: &PlanRequest,
        store: &dyn PlanStore,
        events: Option<&mpsc::Sender<PipelineEvent>>,
    ) -> Result<PlanResponse, WorkflowError> {
        let result = self.run_stages(request, store, events).await;
        if let Err(e) = &result {
            tracing::error!(
                event = "planning.failed",
                run_id = %request.run_id,
                error = %e,
                "Planning pipeline aborted"
            );
            emit(
                events,
                PipelineEvent::new(PipelineEventKind::Failed, &request.run_id)
                    .with_data(serde_json::json!({ "error": e.to_string() })),
            )
            .await;
        }
        result
    }

    async fn run_stages(
        &self,
        request: &PlanRequest,
        store: &dyn PlanStore,
        events: Option<&mpsc::Sender<PipelineEvent>>,
    ) -> Result<PlanResponse, WorkflowError> {
        let run_id = request.run_id.as_str();
        if !store.run_exists(run_id)? {
            return Err(WorkflowError::unknown_run(run_id));
        }
        let chunks = store.chunks(run_id)?;
        if chunks.is_empty() {
            return Err(WorkflowError::invalid_state(
                "No ingested content found for run.",
            ));
        }
        store.attach_plan_context(run_id, &request.target_stack, request.style)?;

        tracing::info!(
            event = "planning.start",
            run_id = %run_id,
            style = request.style.as_str(),
            chunks = chunks.len(),
            "Planning pipeline started"
        );
        let mut stage = PipelineStage::Coordinating;

        // Coordinator
        tracing::info!(event = "planning.coordinator.start", run_id = %run_id, "Coordinator started");
        emit(events, PipelineEvent::new(PipelineEventKind::CoordinatorStarted, run_id)).await;
        let objectives = self
            .coordinator
            .run(&CoordinatorInput {
                run_id,
                chunks: &chunks,
                target_stack: &request.target_stack,
                style: request.style,
            })
            .await;
        store.upsert_objectives(run_id, &objectives)?;
        tracing::info!(
            event = "planning.coordinator.complete",
            run_id = %run_id,
            objectives = objectives.len(),
            "Coordinator finished"
        );
        emit(
            events,
            PipelineEvent::new(PipelineEventKind::CoordinatorCompleted, run_id)
                .with_data(serde_json::to_value(&objectives).unwrap_or_default()),
        )
        .await;
        stage = stage.advance();

        // Planner
        tracing::info!(event = "planning.planner.start", run_id = %run_id, stage = stage.as_str(), "Planner started");
        emit(events, PipelineEvent::new(PipelineEventKind::PlannerStarted, run_id)).await;
        let plan = self
            .planner
            .run(&PlannerInput {
                run_id,
                chunks: &chunks,
                target_stack: &request.target_stack,
                style: request.style,
                objectives: &objectives,
            })
            .await;
        store.upsert_plan(run_id, &plan)?;
        tracing::info!(
            event = "planning.planner.complete",
            run_id = %run_id,
            goals = plan.goals.len(),
            milestones = plan.milestones.len(),
            "Planner finished"
        );
        emit(
            events,
            PipelineEvent::new(PipelineEventKind::PlannerCompleted, run_id)
                .with_data(serde_json::to_value(&plan).unwrap_or_default()),
        )
        .await;
        stage = stage.advance();

        // Decomposer
        tracing::info!(event = "planning.decomposer.start", run_id = %run_id, stage = stage.as_str(), "Decomposer started");
        let steps = self
            .decomposer
            .run(&DecomposerInput {
                run_id,
                plan: &plan,
                target_stack: &request.target_stack,
                objectives: &objectives,
            })
            .await;
        tracing::info!(
            event = "planning.decomposer.complete",
            run_id = %run_id,
            steps = steps.len(),
            "Decomposer finished"
        );
        emit(
            events,
            PipelineEvent::new(PipelineEventKind::DecomposerCompleted, run_id)
                .with_data(serde_json::json!({ "step_count": steps.len() })),
        )
        .await;
        stage = stage.advance();

        // Reviewer
        tracing::info!(event = "planning.reviewer.start", run_id = %run_id, stage = stage.as_str(), "Reviewer started");
        let review = self.reviewer.run(run_id, &plan, steps);
        store.upsert_steps(run_id, &review.steps)?;
        store.upsert_report(run_id, &review.report)?;
        tracing::info!(
            event = "planning.reviewer.complete",
            run_id = %run_id,
            overall_score = review.report.overall_score,
            "Reviewer finished"
        );
        emit(
            events,
            PipelineEvent::new(PipelineEventKind::ReviewerCompleted, run_id)
                .with_data(serde_json::to_value(&review.report).unwrap_or_default()),
        )
        .await;
        stage = stage.advance();
        debug_assert!(stage.is_terminal());

        let response = PlanResponse {
            plan,
            steps: review.steps,
            report: review.report,
            objectives,
        };
        emit(
            events,
            PipelineEvent::new(PipelineEventKind::FinalPlan, run_id)
                .with_data(serde_json::to_value(&response).unwrap_or_default()),
        )
        .await;
        tracing::info!(
            event = "planning.finalize",
            run_id = %run_id,
            step_count = response.steps.len(),
            "Planning pipeline complete"
        );
        Ok(response)
    }
}

async fn emit(events: Option<&mpsc::Sender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(tx) = events {
        // A dropped receiver just means nobody is listening.
        let _ = tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ingest::ingest_into;
    use crate::state::store::InMemoryPlanStore;

    const RESEARCH: &str = "Goal: launch a shared ledger for small teams.\n\
        Assumption: users have modern browsers.\n\
        Out of scope: native mobile apps.\n\
        Risk: audit requirements may delay launch.\n\
        Milestone: ship the ledger API.\n";

    #[test]
    fn test_stage_advance() {
        let mut stage = PipelineStage::Coordinating;
        for expected in [
            PipelineStage::Planning,
            PipelineStage::Decomposing,
            PipelineStage::Reviewing,
            PipelineStage::Complete,
            PipelineStage::Complete,
        ] {
            stage = stage.advance();
            assert_eq!(stage, expected);
        }
        assert_eq!(PipelineStage::Failed.advance(), PipelineStage::Failed);
    }

    #[tokio::test]
    async fn test_offline_run_persists_everything() {
        let store = InMemoryPlanStore::new();
        let ingested = ingest_into(&store, RESEARCH, Some("brief.md")).unwrap();
        let (tx, mut rx) = mpsc::channel(32);

        let response = PlanningPipeline::offline()
            .run(&PlanRequest::new(&ingested.run_id), &store, Some(&tx))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(response.objectives.len(), 5);
        assert_eq!(response.steps.len(), response.plan.milestones.len());
        assert!(response.steps.iter().all(|s| s.rubric_score.is_some()));
        assert_eq!(store.steps(&ingested.run_id).unwrap(), response.steps);
        assert!(store.report(&ingested.run_id).unwrap().is_some());
        assert_eq!(store.objectives(&ingested.run_id).unwrap().len(), 5);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.kind);
        }
        assert_eq!(
            kinds,
            vec![
                PipelineEventKind::CoordinatorStarted,
                PipelineEventKind::CoordinatorCompleted,
                PipelineEventKind::PlannerStarted,
                PipelineEventKind::PlannerCompleted,
                PipelineEventKind::DecomposerCompleted,
                PipelineEventKind::ReviewerCompleted,
                PipelineEventKind::FinalPlan,
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let store = InMemoryPlanStore::new();
        let result = PlanningPipeline::offline()
            .run(&PlanRequest::new("missing"), &store, None)
            .await;
        match result {
            Err(err @ WorkflowError::NotFound(_)) => {
                assert_eq!(err.to_string(), "Planning run missing was not found.");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_without_chunks_is_invalid_state() {
        let store = InMemoryPlanStore::new();
        store
            .register_run("run-1", None, &Default::default())
            .unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let result = PlanningPipeline::offline()
            .run(&PlanRequest::new("run-1"), &store, Some(&tx))
            .await;
        assert!(matches!(result, Err(WorkflowError::InvalidState(_))));
        assert_eq!(rx.recv().await.unwrap().kind, PipelineEventKind::Failed);
    }
}

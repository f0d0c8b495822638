//! # Coding Orchestrator
//!
//! Approval-gated workflow that turns a blueprint into a summary, five
//! milestones with a coverage audit, and one prompt per milestone.
//!
//! ```text
//! Ingested → Summarized → SummaryApproved → MilestonesGenerated
//!          → MilestonesApproved → PromptsGenerated → Finalized
//! ```

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::WorkflowError;
use crate::models::ChatCompletion;
use crate::skills::graph_audit_skill::{AuditInput, GraphAuditSkill};
use crate::skills::milestones_skill::MilestonesSkill;
use crate::skills::prompt_generator_skill::{PromptGeneratorSkill, PromptInput};
use crate::state::blueprint::{
    BlueprintSummary, GraphCoverageSnapshot, MilestonePlan, OrchestratorResult, PromptBundle,
};
use crate::state::graph::GraphStore;

/// Where a session is in the approval workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStage {
    Ingested,
    Summarized,
    SummaryApproved,
    MilestonesGenerated,
    MilestonesApproved,
    PromptsGenerated,
    Finalized,
}

impl OrchestrationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestrationStage::Ingested => "ingested",
            OrchestrationStage::Summarized => "summarized",
            OrchestrationStage::SummaryApproved => "summary_approved",
            OrchestrationStage::MilestonesGenerated => "milestones_generated",
            OrchestrationStage::MilestonesApproved => "milestones_approved",
            OrchestrationStage::PromptsGenerated => "prompts_generated",
            OrchestrationStage::Finalized => "finalized",
        }
    }
}

/// The three orchestration stages
#[derive(Debug, Clone)]
pub struct OrchestratorAgents {
    pub milestones: MilestonesSkill,
    pub graph_audit: GraphAuditSkill,
    pub prompts: PromptGeneratorSkill,
}

impl OrchestratorAgents {
    /// Heuristic-only agents
    pub fn offline() -> Self {
        Self {
            milestones: MilestonesSkill::new(None, None),
            graph_audit: GraphAuditSkill::new(None),
            prompts: PromptGeneratorSkill::new(None),
        }
    }

    pub fn from_config(config: &PipelineConfig, client: Option<Arc<dyn ChatCompletion>>) -> Self {
        Self {
            milestones: MilestonesSkill::from_config(config, client.clone()),
            graph_audit: GraphAuditSkill::from_config(config, client.clone()),
            prompts: PromptGeneratorSkill::from_config(config, client),
        }
    }
}

pub struct CodingOrchestrator {
    run_id: String,
    agents: OrchestratorAgents,
    graph: GraphStore,
    blueprint: Option<String>,
    summary: Option<BlueprintSummary>,
    summary_approved: bool,
    milestones: Option<MilestonePlan>,
    milestones_approved: bool,
    snapshot: Option<GraphCoverageSnapshot>,
    prompts: Option<PromptBundle>,
    result: Option<OrchestratorResult>,
}

impl CodingOrchestrator {
    pub fn new(run_id: Option<String>, agents: OrchestratorAgents) -> Self {
        let run_id = run_id.unwrap_or_else(|| format!("orch-{}", Uuid::new_v4()));
        Self {
            graph: GraphStore::new(run_id.clone()),
            run_id,
            agents,
            blueprint: None,
            summary: None,
            summary_approved: false,
            milestones: None,
            milestones_approved: false,
            snapshot: None,
            prompts: None,
            result: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Store `blueprint` and synthesize a fresh summary.
    ///
    /// Everything downstream of the summary is discarded, including the
    /// coverage graph, which is reseeded from the new components.
    pub async fn ingest_blueprint(&mut self, blueprint: &str) -> Result<&BlueprintSummary, WorkflowError> {
        if blueprint.trim().is_empty() {
            return Err(WorkflowError::invalid_input("Blueprint text cannot be empty."));
        }
        self.blueprint = Some(blueprint.to_string());
        tracing::info!(event = "orchestrator.ingest.complete", run_id = %self.run_id, "Blueprint ingested");
        self.summarize().await
    }

    /// Re-run summarization over the stored blueprint.
    pub async fn regenerate_summary(&mut self) -> Result<&BlueprintSummary, WorkflowError> {
        if self.blueprint.is_none() {
            return Err(WorkflowError::invalid_state(
                "No blueprint available to regenerate summary.",
            ));
        }
        self.summarize().await
    }

    async fn summarize(&mut self) -> Result<&BlueprintSummary, WorkflowError> {
        let blueprint = self.blueprint.as_deref().unwrap_or_default();
        tracing::info!(event = "orchestrator.summary.start", run_id = %self.run_id, "Summary synthesis starting");
        let summary = self
            .agents
            .milestones
            .summarize_blueprint(&self.run_id, blueprint)
            .await;

        self.summary_approved = false;
        self.milestones = None;
        self.milestones_approved = false;
        self.snapshot = None;
        self.prompts = None;
        self.result = None;
        self.graph = GraphStore::new(self.run_id.clone());
        self.graph.load_components(&summary.components);

        tracing::info!(
            event = "orchestrator.summary.prepared",
            run_id = %self.run_id,
            highlight_count = summary.highlights.len(),
            component_count = summary.components.len(),
            "Summary ready for review"
        );
        Ok(&*self.summary.insert(summary))
    }

    pub fn approve_summary(&mut self, approved: bool) -> Result<(), WorkflowError> {
        if self.summary.is_none() {
            return Err(WorkflowError::invalid_state(
                "No summary available to approve. Ingest a blueprint first.",
            ));
        }
        self.summary_approved = approved;
        tracing::info!(
            event = "orchestrator.summary.approval",
            run_id = %self.run_id,
            approved,
            "Summary approval updated"
        );
        Ok(())
    }

    /// Generate milestones, link them into the graph and audit coverage.
    pub async fn generate_milestones(
        &mut self,
    ) -> Result<(MilestonePlan, GraphCoverageSnapshot), WorkflowError> {
        let Some(summary) = self.summary.as_ref() else {
            return Err(WorkflowError::invalid_state(
                "Summary not generated. Ingest a blueprint first.",
            ));
        };
        if !self.summary_approved {
            return Err(WorkflowError::invalid_state(
                "Summary must be approved before generating milestones.",
            ));
        }

        tracing::info!(event = "orchestrator.milestones.start", run_id = %self.run_id, "Milestone synthesis starting");
        let plan = self
            .agents
            .milestones
            .generate_milestones(&self.run_id, summary)
            .await;
        self.graph.assign_milestones(&plan.milestones);
        let snapshot = self
            .agents
            .graph_audit
            .audit(&AuditInput {
                run_id: &self.run_id,
                summary,
                milestones: &plan.milestones,
                graph: &self.graph,
            })
            .await;

        // New milestones invalidate anything built on the old ones.
        self.milestones_approved = false;
        self.prompts = None;
        self.result = None;
        self.milestones = Some(plan.clone());
        self.snapshot = Some(snapshot.clone());

        tracing::info!(
            event = "orchestrator.milestones.prepared",
            run_id = %self.run_id,
            milestone_count = plan.milestones.len(),
            "Milestones ready for approval"
        );
        Ok((plan, snapshot))
    }

    pub fn approve_milestones(&mut self, approved: bool) -> Result<(), WorkflowError> {
        if self.milestones.is_none() {
            return Err(WorkflowError::invalid_state("Milestones not generated yet."));
        }
        self.milestones_approved = approved;
        tracing::info!(
            event = "orchestrator.milestones.approval",
            run_id = %self.run_id,
            approved,
            "Milestones approval updated"
        );
        Ok(())
    }

    pub async fn generate_prompts(&mut self) -> Result<&PromptBundle, WorkflowError> {
        let Some(summary) = self.summary.as_ref() else {
            return Err(WorkflowError::invalid_state(
                "Summary not generated. Ingest a blueprint first.",
            ));
        };
        let Some(plan) = self.milestones.as_ref() else {
            return Err(WorkflowError::invalid_state(
                "Milestones not generated. Generate milestones first.",
            ));
        };
        if !self.milestones_approved {
            return Err(WorkflowError::invalid_state(
                "Milestones must be approved before prompt generation.",
            ));
        }

        tracing::info!(event = "orchestrator.prompts.start", run_id = %self.run_id, "Prompt planning starting");
        let snapshot = self.current_snapshot();
        let bundle = self
            .agents
            .prompts
            .generate(&PromptInput {
                run_id: &self.run_id,
                summary,
                milestones: &plan.milestones,
                snapshot: &snapshot,
            })
            .await;
        tracing::info!(
            event = "orchestrator.prompts.generated",
            run_id = %self.run_id,
            prompt_count = bundle.prompts.len(),
            "Prompts generated for orchestration"
        );
        self.result = None;
        Ok(&*self.prompts.insert(bundle))
    }

    /// Aggregate result. Repeat calls return the same result until an
    /// upstream artifact is regenerated.
    pub fn finalize(&mut self) -> Result<OrchestratorResult, WorkflowError> {
        if let Some(result) = &self.result {
            return Ok(result.clone());
        }
        let (Some(summary), Some(milestones), Some(prompts)) =
            (&self.summary, &self.milestones, &self.prompts)
        else {
            return Err(WorkflowError::invalid_state(
                "Workflow incomplete. Ensure prompts are generated before finalizing.",
            ));
        };
        let result = OrchestratorResult {
            run_id: self.run_id.clone(),
            summary: summary.clone(),
            milestones: milestones.clone(),
            prompts: prompts.clone(),
            graph_report: self.current_snapshot(),
            generated_at: Utc::now(),
        };
        tracing::info!(event = "orchestrator.workflow.finalized", run_id = %self.run_id, "Orchestration finalized");
        Ok(self.result.insert(result).clone())
    }

    pub fn stage(&self) -> OrchestrationStage {
        if self.result.is_some() {
            OrchestrationStage::Finalized
        } else if self.prompts.is_some() {
            OrchestrationStage::PromptsGenerated
        } else if self.milestones.is_some() && self.milestones_approved {
            OrchestrationStage::MilestonesApproved
        } else if self.milestones.is_some() {
            OrchestrationStage::MilestonesGenerated
        } else if self.summary.is_some() && self.summary_approved {
            OrchestrationStage::SummaryApproved
        } else if self.summary.is_some() {
            OrchestrationStage::Summarized
        } else {
            OrchestrationStage::Ingested
        }
    }

    pub fn summary(&self) -> Option<&BlueprintSummary> {
        self.summary.as_ref()
    }

    pub fn milestone_plan(&self) -> Option<&MilestonePlan> {
        self.milestones.as_ref()
    }

    pub fn prompts(&self) -> Option<&PromptBundle> {
        self.prompts.as_ref()
    }

    /// Result cached by the last `finalize`, if any
    pub fn result(&self) -> Option<&OrchestratorResult> {
        self.result.as_ref()
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    /// Audited snapshot when available, otherwise the live graph state
    pub fn current_snapshot(&self) -> GraphCoverageSnapshot {
        self.snapshot
            .clone()
            .unwrap_or_else(|| self.graph.snapshot(None))
    }

    pub fn summary_ready(&self) -> bool {
        self.summary.is_some()
    }

    pub fn summary_approved(&self) -> bool {
        self.summary_approved
    }

    pub fn milestones_ready(&self) -> bool {
        self.milestones.is_some()
    }

    pub fn milestones_approved(&self) -> bool {
        self.milestones_approved
    }

    pub fn prompts_ready(&self) -> bool {
        self.prompts.is_some()
    }
}

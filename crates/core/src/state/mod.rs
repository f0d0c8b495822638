pub mod blueprint;
pub mod db;
pub mod export;
pub mod graph;
pub mod ingest;
pub mod plan;
pub mod store;

pub use db::SqlitePlanStore;

pub use blueprint::{
    BlueprintSummary, GraphCoverageSnapshot, GraphNode, Milestone, MilestonePlan, MilestonePrompt,
    OrchestratorResult, PromptBundle,
};
pub use export::{export_run, ExportFormat, ExportMetadata, ExportRequest, ExportResponse};
pub use graph::GraphStore;
pub use ingest::{ingest_into, ingest_text, IngestedDocument};
pub use plan::{
    AgentReport, DocumentStats, IngestionRequest, IngestionResponse, MilestoneObjective,
    PlanRequest, PlanResponse, PlanStyle, PromptPlan, PromptStep, RunRecord, StepFeedback,
    TargetStack,
};
pub use store::{update_steps, InMemoryPlanStore, PlanStore};

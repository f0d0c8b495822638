//! # Workflows
//!
//! The two workflows built on the stage agents.
//!
//! ## Planning pipeline
//!
//! ```text
//! Ingested run → Coordinator → Planner → Decomposer → Reviewer → stored plan
//! ```
//!
//! ## Coding orchestrator
//!
//! ```text
//! Blueprint → Summary ─approve→ Milestones + coverage ─approve→ Prompts → Result
//! ```

pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod service;
pub mod session;

pub use events::{PipelineEvent, PipelineEventKind};
pub use orchestrator::{CodingOrchestrator, OrchestrationStage, OrchestratorAgents};
pub use pipeline::{PipelineStage, PlanningPipeline};
pub use service::{
    ApprovalResponse, MilestonesEnvelope, OrchestratorService, PromptsEnvelope, SessionStatus,
    SummaryEnvelope,
};
pub use session::{InMemorySessionStore, OrchestratorSession, SessionHandle, SessionStore};

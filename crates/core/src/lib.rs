//! # Conductor Core
//!
//! The "Brain" of Conductor: model-backed planning stages with heuristic
//! fallbacks, the approval-gated blueprint orchestrator, persistence and
//! log correlation.
//!
//! ## Architecture
//!
//! - `skills/` - Stage agents (Coordinator, Planner, Decomposer, Reviewer,
//!   Milestones, Graph Audit, Prompt Generator) and their shared utilities
//! - `models` - LLM provider configuration and the chat-completion client
//! - `state/` - Domain types, ingestion, plan stores, coverage graph, export
//! - `swarm/` - Planning pipeline, coding orchestrator and session service
//! - `observability/` - Log capture and the module correlator
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conductor_core::state::{ingest_into, InMemoryPlanStore, PlanRequest};
//! use conductor_core::swarm::PlanningPipeline;
//!
//! let store = InMemoryPlanStore::new();
//! let ingested = ingest_into(&store, &text, Some("brief.md"))?;
//! let response = PlanningPipeline::offline()
//!     .run(&PlanRequest::new(ingested.run_id), &store, None)
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod skills;
pub mod state;
pub mod swarm;

pub use config::PipelineConfig;
pub use error::{GenerationError, WorkflowError};

//! # Blueprint Orchestration Artifacts
//!
//! Types produced by the approval-gated orchestration workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured summary of a blueprint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlueprintSummary {
    pub run_id: String,
    pub summary: String,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    /// Major components, seeded into the coverage graph
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// One delivery milestone
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Milestone {
    /// 1-based
    pub milestone_id: u32,
    pub details: String,
    #[serde(default)]
    pub context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MilestonePlan {
    pub run_id: String,
    /// Exactly five, ids unique, sorted ascending
    pub milestones: Vec<Milestone>,
    /// Model text before parsing, when a model was used
    #[serde(default)]
    pub raw_response: Option<String>,
}

/// Prompt specification for a downstream coding agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MilestonePrompt {
    pub milestone_id: u32,
    pub title: String,
    pub system_prompt: String,
    pub user_prompt: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub expected_artifacts: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptBundle {
    pub run_id: String,
    pub prompts: Vec<MilestonePrompt>,
}

/// A component tracked in the coverage graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphNode {
    /// Slug of the component name
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Sorted ascending, no duplicates
    #[serde(default)]
    pub milestone_ids: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphCoverageSnapshot {
    pub run_id: String,
    /// Sorted component names
    pub covered_nodes: Vec<String>,
    /// Sorted component names, disjoint from `covered_nodes`
    pub uncovered_nodes: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Final aggregated output of a finalized orchestration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorResult {
    pub run_id: String,
    pub summary: BlueprintSummary,
    pub milestones: MilestonePlan,
    pub prompts: PromptBundle,
    pub graph_report: GraphCoverageSnapshot,
    pub generated_at: DateTime<Utc>,
}

//! # Planning Artifacts
//!
//! Types produced by the planning pipeline: coordinator objectives, the
//! structured plan, decomposed prompt steps and the reviewer report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Desired implementation stack for downstream planning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetStack {
    #[serde(default = "TargetStack::default_backend")]
    pub backend: String,
    #[serde(default = "TargetStack::default_frontend")]
    pub frontend: String,
    #[serde(default = "TargetStack::default_db")]
    pub db: String,
}

impl TargetStack {
    fn default_backend() -> String {
        "FastAPI".to_string()
    }

    fn default_frontend() -> String {
        "Next.js".to_string()
    }

    fn default_db() -> String {
        "Postgres".to_string()
    }

    /// One-line description used in prompts and plan context
    pub fn describe(&self) -> String {
        format!(
            "backend {}, frontend {}, database {}",
            self.backend, self.frontend, self.db
        )
    }
}

impl Default for TargetStack {
    fn default() -> Self {
        Self {
            backend: Self::default_backend(),
            frontend: Self::default_frontend(),
            db: Self::default_db(),
        }
    }
}

/// Planning style
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStyle {
    #[default]
    Strict,
    Creative,
}

impl PlanStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStyle::Strict => "strict",
            PlanStyle::Creative => "creative",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "strict" => Some(PlanStyle::Strict),
            "creative" => Some(PlanStyle::Creative),
            _ => None,
        }
    }
}

/// Summary statistics for an ingested document
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentStats {
    pub word_count: usize,
    pub char_count: usize,
    pub chunk_count: usize,
}

/// A registered ingestion run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub source: Option<String>,
    pub stats: DocumentStats,
    #[serde(default)]
    pub target_stack: Option<TargetStack>,
    #[serde(default)]
    pub style: Option<PlanStyle>,
}

/// Plain-text document submitted for ingestion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestionRequest {
    #[serde(alias = "text", alias = "blueprint")]
    pub content: String,
    /// Original filename, kept for traceability
    #[serde(default, alias = "filename")]
    pub source: Option<String>,
}

/// Returned after ingesting a document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestionResponse {
    pub run_id: String,
    pub stats: DocumentStats,
}

/// Payload for triggering the planning pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanRequest {
    pub run_id: String,
    #[serde(default)]
    pub target_stack: TargetStack,
    #[serde(default)]
    pub style: PlanStyle,
}

impl PlanRequest {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            target_stack: TargetStack::default(),
            style: PlanStyle::default(),
        }
    }
}

/// Ordered milestone objective produced by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MilestoneObjective {
    /// Matches `^[a-z0-9-]+$`, unique within a run
    pub id: String,
    /// Dense 0-based execution order
    pub order: usize,
    pub title: String,
    pub objective: String,
    /// At least one entry
    pub success_criteria: Vec<String>,
    /// Ids of earlier objectives
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// High-level strategy extracted from the research brief
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptPlan {
    pub context: String,
    pub goals: Vec<String>,
    pub assumptions: Vec<String>,
    pub non_goals: Vec<String>,
    pub risks: Vec<String>,
    /// Sequenced milestone titles
    pub milestones: Vec<String>,
}

/// Execution-ready instructions for one milestone
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptStep {
    /// `step-NNN`
    pub id: String,
    pub title: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub expected_artifacts: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub token_budget: u32,
    #[serde(default)]
    pub cited_artifacts: Vec<String>,
    /// Filled in by the reviewer, within [0, 1]
    #[serde(default)]
    pub rubric_score: Option<f64>,
    #[serde(default)]
    pub suggested_edits: Option<String>,
}

impl PromptStep {
    /// Shape checks every stored step must pass.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty()
            || !self
                .id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(format!("invalid step id: {:?}", self.id));
        }
        for (name, list) in [
            ("expected_artifacts", &self.expected_artifacts),
            ("acceptance_criteria", &self.acceptance_criteria),
            ("inputs", &self.inputs),
            ("outputs", &self.outputs),
        ] {
            if list.is_empty() {
                return Err(format!("{} on {} must not be empty", name, self.id));
            }
        }
        if self.token_budget == 0 {
            return Err(format!("token_budget on {} must be positive", self.id));
        }
        if let Some(score) = self.rubric_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(format!("rubric_score on {} out of range", self.id));
            }
        }
        Ok(())
    }
}

/// Reviewer feedback for one step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepFeedback {
    pub step_id: String,
    pub rubric_score: f64,
    pub notes: String,
}

/// Reviewer summary of plan quality
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub overall_score: f64,
    pub strengths: Vec<String>,
    pub concerns: Vec<String>,
    pub step_feedback: Vec<StepFeedback>,
}

/// Everything the planning pipeline produced for a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanResponse {
    pub plan: PromptPlan,
    pub steps: Vec<PromptStep>,
    pub report: AgentReport,
    #[serde(default)]
    pub objectives: Vec<MilestoneObjective>,
}

//! # Decomposer Skill
//!
//! Expands each plan milestone into an execution-ready [`PromptStep`].
//!
//! Steps are produced in milestone order; every model call sees one-line
//! summaries of the steps before it. A deterministic step is built first for
//! each milestone and stands in whenever the model output is unusable, and
//! also fills any field the model leaves empty.

use std::sync::Arc;

use serde_json::json;

use crate::config::{PipelineConfig, RetryTuning, Stage};
use crate::error::GenerationError;
use crate::models::ChatCompletion;
use crate::state::plan::{MilestoneObjective, PromptPlan, PromptStep, TargetStack};

use super::escalation::{EscalationAttempt, EscalationPlan};
use super::json_extract::{extract_object, list_field, text_field, uint_field};
use super::llm_helpers::StageLlm;
use super::prompts;
use super::sanitize::sanitize_id;
use super::text::{budget_text, dedupe_preserving_order};

pub const DECOMPOSER_CONTEXT_CHARS: usize = 14_000;
pub const FALLBACK_TOKEN_BUDGET: u32 = 900;

const DEFAULT_TOOLS: [&str; 3] = ["editor", "terminal", "git"];
const DEFAULT_INPUTS: [&str; 2] = ["ingested_research", "project_plan"];

/// Input for the decomposer stage
#[derive(Debug, Clone, Copy)]
pub struct DecomposerInput<'a> {
    pub run_id: &'a str,
    pub plan: &'a PromptPlan,
    pub target_stack: &'a TargetStack,
    pub objectives: &'a [MilestoneObjective],
}

#[derive(Debug, Clone)]
pub struct DecomposerSkill {
    llm: Option<StageLlm>,
    context_limit: usize,
    retry: RetryTuning,
}

/// Per-milestone values shared by the prompt builder and the step builders.
struct MilestoneContext<'a> {
    index: usize,
    total: usize,
    step_id: String,
    title: &'a str,
    objective: Option<&'a MilestoneObjective>,
}

impl DecomposerSkill {
    pub fn new(llm: Option<StageLlm>) -> Self {
        Self {
            llm,
            context_limit: DECOMPOSER_CONTEXT_CHARS,
            retry: RetryTuning::default(),
        }
    }

    pub fn from_config(config: &PipelineConfig, client: Option<Arc<dyn ChatCompletion>>) -> Self {
        let llm = client.map(|client| {
            StageLlm::new(client, config.model_config(Stage::Decomposer), "DecomposerAgent")
        });
        Self {
            llm,
            context_limit: DECOMPOSER_CONTEXT_CHARS,
            retry: config.retry.clone(),
        }
    }

    /// Produce one step per plan milestone, in order.
    pub async fn run(&self, input: &DecomposerInput<'_>) -> Vec<PromptStep> {
        let total = input.plan.milestones.len();
        tracing::info!(
            event = "agent.decomposer.start",
            run_id = %input.run_id,
            milestone_count = total,
            "Decomposing milestones into prompt steps"
        );

        let mut steps: Vec<PromptStep> = Vec::with_capacity(total);
        let mut summaries: Vec<String> = Vec::with_capacity(total);

        for (index, title) in input.plan.milestones.iter().enumerate() {
            let milestone = MilestoneContext {
                index,
                total,
                step_id: format!("step-{:03}", index + 1),
                title,
                objective: find_objective(index, title, input.objectives),
            };
            let fallback = fallback_step(input, &milestone);

            let step = match &self.llm {
                Some(llm) => {
                    let outcome = self
                        .generate_step(llm, input, &milestone, &summaries, &fallback)
                        .await;
                    match outcome {
                        Ok(step) => {
                            tracing::info!(
                                event = "agent.decomposer.step_complete",
                                run_id = %input.run_id,
                                step_id = %milestone.step_id,
                                source = "model",
                                "Accepted model step"
                            );
                            step
                        }
                        Err(e) => {
                            tracing::warn!(
                                event = "agent.decomposer.fallback",
                                run_id = %input.run_id,
                                step_id = %milestone.step_id,
                                error_kind = e.kind(),
                                error = %e,
                                "Decomposer output unusable; using heuristic step"
                            );
                            fallback
                        }
                    }
                }
                None => {
                    tracing::debug!(
                        event = "agent.decomposer.step_complete",
                        run_id = %input.run_id,
                        step_id = %milestone.step_id,
                        source = "heuristic",
                        "Using heuristic step"
                    );
                    fallback
                }
            };

            summaries.push(summarize_step(&step));
            steps.push(step);
        }

        tracing::info!(
            event = "agent.decomposer.complete",
            run_id = %input.run_id,
            step_count = steps.len(),
            "Decomposition complete"
        );
        steps
    }

    async fn generate_step(
        &self,
        llm: &StageLlm,
        input: &DecomposerInput<'_>,
        milestone: &MilestoneContext<'_>,
        summaries: &[String],
        fallback: &PromptStep,
    ) -> Result<PromptStep, GenerationError> {
        let plan = EscalationPlan::with_retry(self.context_limit, llm.config.max_tokens, &self.retry);
        let accepted = llm
            .generate(input.run_id, &plan, prompts::DECOMPOSER, |attempt| {
                build_model_prompt(input, milestone, summaries, attempt)
            })
            .await?;
        if accepted.attempt > 0 {
            tracing::info!(
                event = "agent.decomposer.retry_success",
                run_id = %input.run_id,
                step_id = %milestone.step_id,
                attempt = accepted.attempt + 1,
                "Step accepted after escalation"
            );
        }
        merge_model_step(&accepted.content, fallback)
    }
}

fn build_model_prompt(
    input: &DecomposerInput<'_>,
    milestone: &MilestoneContext<'_>,
    summaries: &[String],
    attempt: &EscalationAttempt,
) -> String {
    let window = match attempt.summary_limit {
        Some(limit) => &summaries[summaries.len().saturating_sub(limit)..],
        None => summaries,
    };
    let objective_text = milestone
        .objective
        .map(|objective| objective.objective.as_str())
        .unwrap_or(milestone.title);
    let criteria = milestone
        .objective
        .map(|objective| objective.success_criteria.clone())
        .unwrap_or_default();
    let dependencies = milestone
        .objective
        .map(|objective| objective.dependencies.clone())
        .unwrap_or_default();
    let snapshot = json!({
        "plan_context": input.plan.context,
        "goals": input.plan.goals,
        "assumptions": input.plan.assumptions,
        "risks": input.plan.risks,
        "target_stack": input.target_stack,
    });

    format!(
        "Milestone {} of {}: {}\n\
         Milestone objective: {}\n\
         Success criteria: {}\n\
         Dependencies: {}\n\
         Prior milestone status: {}\n\
         Project snapshot:\n{}\n\
         Relevant context (truncated):\n\"\"\"\n{}\n\"\"\"\n\
         Return the JSON structure described in the system instructions. \
         Reference prior milestones when useful and respect the target stack.",
        milestone.index + 1,
        milestone.total,
        milestone.title,
        objective_text,
        json!(criteria),
        json!(dependencies),
        json!(window),
        serde_json::to_string_pretty(&snapshot).unwrap_or_default(),
        compress_context(input.plan, attempt.context_limit),
    )
}

/// Plan context, goals, assumptions and risks under a character ceiling.
fn compress_context(plan: &PromptPlan, limit: usize) -> String {
    let mut sections = Vec::new();
    if !plan.context.is_empty() {
        sections.push(plan.context.clone());
    }
    for (label, items) in [
        ("Goals", &plan.goals),
        ("Assumptions", &plan.assumptions),
        ("Risks", &plan.risks),
    ] {
        if !items.is_empty() {
            let head: Vec<&str> = items.iter().take(5).map(String::as_str).collect();
            sections.push(format!("{}: {}", label, head.join("; ")));
        }
    }
    budget_text(&sections, "\n\n", limit)
}

/// Overlay a model step on the deterministic one.
///
/// Cited artifacts always come from the deterministic step.
pub fn merge_model_step(raw: &str, fallback: &PromptStep) -> Result<PromptStep, GenerationError> {
    let data = extract_object(raw)?;
    let list_or = |keys: &[&str], fallback: &[String]| {
        let items = list_field(&data, keys);
        if items.is_empty() {
            fallback.to_vec()
        } else {
            items
        }
    };

    Ok(PromptStep {
        id: fallback.id.clone(),
        title: fallback.title.clone(),
        system_prompt: text_field(&data, &["system_prompt"]).unwrap_or_else(|| fallback.system_prompt.clone()),
        user_prompt: data
            .get("user_prompt")
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| fallback.user_prompt.clone()),
        expected_artifacts: list_or(&["expected_artifacts"], &fallback.expected_artifacts),
        tools: list_or(&["tools"], &fallback.tools),
        acceptance_criteria: list_or(&["acceptance_criteria"], &fallback.acceptance_criteria),
        inputs: list_or(&["inputs"], &fallback.inputs),
        outputs: list_or(&["outputs"], &fallback.outputs),
        token_budget: uint_field(&data, &["token_budget"])
            .filter(|budget| *budget > 0)
            .and_then(|budget| u32::try_from(budget).ok())
            .unwrap_or(fallback.token_budget),
        cited_artifacts: fallback.cited_artifacts.clone(),
        rubric_score: None,
        suggested_edits: None,
    })
}

fn find_objective<'a>(
    index: usize,
    title: &str,
    objectives: &'a [MilestoneObjective],
) -> Option<&'a MilestoneObjective> {
    objectives
        .iter()
        .find(|objective| objective.order == index)
        .or_else(|| {
            let lowered = title.to_lowercase();
            objectives
                .iter()
                .find(|objective| objective.title.to_lowercase() == lowered)
        })
}

/// `step-001: Title -> artifact, artifact`
pub fn summarize_step(step: &PromptStep) -> String {
    format!(
        "{}: {} -> {}",
        step.id,
        step.title,
        step.expected_artifacts.join(", ")
    )
}

fn fallback_step(input: &DecomposerInput<'_>, milestone: &MilestoneContext<'_>) -> PromptStep {
    let expected_artifacts = infer_artifacts(milestone);
    let outputs = expected_artifacts
        .iter()
        .enumerate()
        .map(|(position, artifact)| {
            let slug = sanitize_id(artifact, None);
            if slug.is_empty() {
                format!("deliverable-{:02}", position + 1)
            } else {
                slug
            }
        })
        .collect();

    let mut inputs: Vec<String> = DEFAULT_INPUTS.iter().map(|s| s.to_string()).collect();
    if milestone.index > 0 {
        inputs.push(format!("step-{:03}:deliverables", milestone.index));
    }

    let mut cited_artifacts = vec!["research-brief".to_string()];
    if milestone.index > 0 {
        cited_artifacts.push(format!("step-{:03}:deliverable", milestone.index));
    }

    PromptStep {
        id: milestone.step_id.clone(),
        title: milestone.title.to_string(),
        system_prompt: fallback_system_prompt(input.target_stack, milestone.objective),
        user_prompt: fallback_user_prompt(input.plan, milestone),
        expected_artifacts,
        tools: DEFAULT_TOOLS.iter().map(|s| s.to_string()).collect(),
        acceptance_criteria: acceptance_criteria(milestone),
        inputs,
        outputs,
        token_budget: FALLBACK_TOKEN_BUDGET,
        cited_artifacts,
        rubric_score: None,
        suggested_edits: None,
    }
}

fn fallback_system_prompt(stack: &TargetStack, objective: Option<&MilestoneObjective>) -> String {
    let focus = objective
        .map(|objective| objective.objective.as_str())
        .unwrap_or("Execute the milestone objective precisely.");
    format!(
        "You are a focused senior engineer. Work step by step, keep responses concise, \
         and align decisions with {}, {}, {}. Keep source control tidy and state assumptions \
         explicitly. Focus on: {}",
        stack.backend, stack.frontend, stack.db, focus
    )
}

fn fallback_user_prompt(plan: &PromptPlan, milestone: &MilestoneContext<'_>) -> String {
    let objective_text = milestone
        .objective
        .map(|objective| objective.objective.as_str())
        .unwrap_or(milestone.title);
    let goals = if plan.goals.is_empty() {
        "Align with primary goals".to_string()
    } else {
        plan.goals.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
    };
    let risks = if plan.risks.is_empty() {
        "Mitigate documented risks".to_string()
    } else {
        plan.risks.iter().take(2).cloned().collect::<Vec<_>>().join(", ")
    };

    let mut lines = vec![
        format!("Milestone objective: {}", objective_text),
        format!("Key goals: {}", goals),
        format!("Known risks: {}", risks),
    ];
    if let Some(objective) = milestone.objective {
        if !objective.success_criteria.is_empty() {
            lines.push(format!(
                "Success criteria: {}",
                objective.success_criteria.join(", ")
            ));
        }
        if !objective.dependencies.is_empty() {
            lines.push(format!(
                "Dependencies: {} must be satisfied first.",
                objective.dependencies.join(", ")
            ));
        }
    }
    if milestone.index > 0 {
        let completed: Vec<&str> = plan
            .milestones
            .iter()
            .take(milestone.index)
            .map(String::as_str)
            .collect();
        lines.push(format!(
            "Completed milestones so far: {}. Reference their deliverables as inputs.",
            completed.join("; ")
        ));
    }
    lines.push("Document blockers immediately and capture new assumptions explicitly.".to_string());
    lines.join("\n")
}

fn infer_artifacts(milestone: &MilestoneContext<'_>) -> Vec<String> {
    if let Some(objective) = milestone.objective {
        if !objective.success_criteria.is_empty() {
            return objective
                .success_criteria
                .iter()
                .map(|criterion| format!("Create artifact covering: {}", criterion))
                .collect();
        }
    }

    let lowered = milestone.title.to_lowercase();
    let artifacts: &[&str] = if contains_any(&lowered, &["research", "requirement"]) {
        &["Create clarified requirements doc"]
    } else if contains_any(&lowered, &["architecture", "design"]) {
        &["Create architecture overview", "Create API design outline"]
    } else if contains_any(&lowered, &["implement", "build", "develop"]) {
        &["Create implementation prompts", "Create test strategy"]
    } else if contains_any(&lowered, &["review", "deliver", "launch"]) {
        &["Create delivery checklist", "Create final summary"]
    } else {
        const POSITIONAL: [&str; 4] = [
            "Create discovery notes",
            "Create architecture outline",
            "Create development playbook",
            "Create validation report",
        ];
        return vec![POSITIONAL[milestone.index.min(POSITIONAL.len() - 1)].to_string()];
    };
    artifacts.iter().map(|s| s.to_string()).collect()
}

fn contains_any(haystack: &str, words: &[&str]) -> bool {
    words.iter().any(|word| haystack.contains(word))
}

fn acceptance_criteria(milestone: &MilestoneContext<'_>) -> Vec<String> {
    let mut criteria = vec![
        format!("Directly addresses milestone: {}", milestone.title),
        "States required inputs and produced artifacts".to_string(),
        "Uses stable, reusable artifact names".to_string(),
        "Fits within assigned token budget".to_string(),
    ];
    if let Some(objective) = milestone.objective {
        criteria.extend(objective.success_criteria.iter().cloned());
    }
    dedupe_preserving_order(criteria)
}

//! # Reviewer Skill
//!
//! Applies a fixed rubric to every prompt step and summarizes plan quality.
//! No model is involved; identical steps always score identically.

use chrono::Utc;

use crate::state::plan::{AgentReport, PromptPlan, PromptStep, StepFeedback};

/// Score lost per rubric violation
pub const DEDUCTION: f64 = 0.15;
/// Steps scoring below this are listed as concerns
pub const CONCERN_THRESHOLD: f64 = 0.7;
pub const MAX_TOKEN_BUDGET: u32 = 1200;
pub const MAX_SYSTEM_PROMPT_WORDS: usize = 250;

const MEASURABLE_MARKERS: [&str; 2] = ["criteria", "define"];

/// Output of the reviewer stage
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    /// Input steps with `rubric_score` and `suggested_edits` filled in
    pub steps: Vec<PromptStep>,
    pub report: AgentReport,
}

#[derive(Debug, Clone, Default)]
pub struct ReviewerSkill;

impl ReviewerSkill {
    pub fn new() -> Self {
        Self
    }

    pub fn run(&self, run_id: &str, plan: &PromptPlan, steps: Vec<PromptStep>) -> ReviewOutcome {
        tracing::info!(
            event = "agent.reviewer.start",
            run_id = %run_id,
            step_count = steps.len(),
            "Reviewing prompt steps"
        );

        let mut feedback = Vec::with_capacity(steps.len());
        let reviewed: Vec<PromptStep> = steps
            .into_iter()
            .map(|mut step| {
                let (score, deductions) = evaluate_step(&step);
                step.rubric_score = Some(score);
                step.suggested_edits = if deductions.is_empty() {
                    None
                } else {
                    Some(deductions.join("; "))
                };
                feedback.push(StepFeedback {
                    step_id: step.id.clone(),
                    rubric_score: score,
                    notes: step
                        .suggested_edits
                        .clone()
                        .unwrap_or_else(|| "Meets rubric expectations.".to_string()),
                });
                step
            })
            .collect();

        let total: f64 = reviewed.iter().filter_map(|step| step.rubric_score).sum();
        let overall_score = round2(total / reviewed.len().max(1) as f64);

        let report = AgentReport {
            run_id: run_id.to_string(),
            generated_at: Utc::now(),
            overall_score,
            strengths: summarize_strengths(plan, &reviewed),
            concerns: summarize_concerns(&reviewed),
            step_feedback: feedback,
        };

        tracing::info!(
            event = "agent.reviewer.complete",
            run_id = %run_id,
            overall_score,
            concern_count = report.concerns.len(),
            "Review complete"
        );

        ReviewOutcome {
            steps: reviewed,
            report,
        }
    }
}

/// Score a step and list the rubric violations found.
///
/// Score is `max(0, 1 - 0.15 * violations)` rounded to two decimals.
pub fn evaluate_step(step: &PromptStep) -> (f64, Vec<String>) {
    let mut deductions = Vec::new();
    if step.inputs.is_empty() {
        deductions.push("Declare explicit inputs for the agent.".to_string());
    }
    if step.outputs.is_empty() {
        deductions.push("List explicit outputs/artifacts.".to_string());
    }
    if step.cited_artifacts.is_empty() {
        deductions.push("Reference at least one prior artifact.".to_string());
    }
    if step.token_budget > MAX_TOKEN_BUDGET {
        deductions.push(format!(
            "Reduce token budget below {} to control cost.",
            MAX_TOKEN_BUDGET
        ));
    }
    let measurable = step.acceptance_criteria.iter().any(|criterion| {
        let lowered = criterion.to_lowercase();
        MEASURABLE_MARKERS.iter().any(|marker| lowered.contains(marker))
    });
    if !measurable {
        deductions.push("Tighten acceptance criteria with measurable statements.".to_string());
    }
    if step.system_prompt.split_whitespace().count() > MAX_SYSTEM_PROMPT_WORDS {
        deductions.push("Condense the system prompt to stay focused.".to_string());
    }

    let score = round2((1.0 - DEDUCTION * deductions.len() as f64).max(0.0));
    tracing::debug!(
        event = "review.step",
        step_id = %step.id,
        score,
        deduction_count = deductions.len(),
        "Evaluated step"
    );
    (score, deductions)
}

fn summarize_strengths(plan: &PromptPlan, steps: &[PromptStep]) -> Vec<String> {
    let mut strengths = vec![
        format!(
            "Plan provides {} clear goals and {} milestones",
            plan.goals.len(),
            plan.milestones.len()
        ),
        "Steps declare acceptance criteria for determinism".to_string(),
    ];
    if steps.iter().any(|step| !step.cited_artifacts.is_empty()) {
        strengths.push("Steps cite prior artifacts to ensure continuity".to_string());
    }
    strengths
}

fn summarize_concerns(steps: &[PromptStep]) -> Vec<String> {
    let mut concerns: Vec<String> = steps
        .iter()
        .filter(|step| {
            step.rubric_score
                .map(|score| score < CONCERN_THRESHOLD)
                .unwrap_or(false)
        })
        .map(|step| {
            format!(
                "{} needs clarification: {}",
                step.id,
                step.suggested_edits.as_deref().unwrap_or_default()
            )
        })
        .collect();
    if concerns.is_empty() {
        concerns.push("No blocking issues detected; proceed to execution.".to_string());
    }
    concerns
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good_step(id: &str) -> PromptStep {
        PromptStep {
            id: id.to_string(),
            title: "Build".to_string(),
            system_prompt: "You are a focused engineer.".to_string(),
            user_prompt: "Build it.".to_string(),
            expected_artifacts: vec!["Service skeleton".to_string()],
            tools: vec!["editor".to_string()],
            acceptance_criteria: vec!["Success criteria are met by tests".to_string()],
            inputs: vec!["project_plan".to_string()],
            outputs: vec!["service-skeleton".to_string()],
            token_budget: 900,
            cited_artifacts: vec!["research-brief".to_string()],
            rubric_score: None,
            suggested_edits: None,
        }
    }

    #[test]
    fn test_clean_step_scores_one() {
        let (score, deductions) = evaluate_step(&good_step("step-001"));
        assert_eq!(score, 1.0);
        assert!(deductions.is_empty());
    }

    #[test]
    fn test_six_violations_floor_at_zero() {
        let mut step = good_step("step-001");
        step.inputs.clear();
        step.outputs.clear();
        step.cited_artifacts.clear();
        step.token_budget = 5000;
        step.acceptance_criteria = vec!["Works".to_string()];
        step.system_prompt = vec!["word"; 300].join(" ");

        let (score, deductions) = evaluate_step(&step);
        assert_eq!(deductions.len(), 6);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_two_violations_score() {
        let mut step = good_step("step-001");
        step.token_budget = 1201;
        step.acceptance_criteria = vec!["Works".to_string()];
        let (score, deductions) = evaluate_step(&step);
        assert_eq!(score, 0.7);
        assert_eq!(
            deductions,
            vec![
                "Reduce token budget below 1200 to control cost.",
                "Tighten acceptance criteria with measurable statements."
            ]
        );
    }

    #[test]
    fn test_report_aggregates_scores() {
        let plan = PromptPlan {
            goals: vec!["a".to_string(), "b".to_string()],
            milestones: vec!["m1".to_string(), "m2".to_string()],
            ..PromptPlan::default()
        };
        let mut weak = good_step("step-002");
        weak.inputs.clear();
        weak.outputs.clear();
        weak.cited_artifacts.clear();

        let outcome = ReviewerSkill::new().run("run-1", &plan, vec![good_step("step-001"), weak]);

        assert_eq!(outcome.steps[0].rubric_score, Some(1.0));
        assert_eq!(outcome.steps[1].rubric_score, Some(0.55));
        assert_eq!(outcome.report.overall_score, 0.78);
        assert_eq!(outcome.report.step_feedback[0].notes, "Meets rubric expectations.");
        assert_eq!(
            outcome.report.strengths[0],
            "Plan provides 2 clear goals and 2 milestones"
        );
        assert_eq!(outcome.report.strengths.len(), 3);
        assert_eq!(outcome.report.concerns.len(), 1);
        assert!(outcome.report.concerns[0].starts_with("step-002 needs clarification: Declare explicit inputs"));
    }

    #[test]
    fn test_no_concerns_message() {
        let plan = PromptPlan::default();
        let outcome = ReviewerSkill::new().run("run-1", &plan, vec![good_step("step-001")]);
        assert_eq!(
            outcome.report.concerns,
            vec!["No blocking issues detected; proceed to execution."]
        );
        assert!(outcome.steps[0].suggested_edits.is_none());
    }

    #[test]
    fn test_review_is_deterministic() {
        let plan = PromptPlan::default();
        let first = ReviewerSkill::new().run("run-1", &plan, vec![good_step("step-001")]);
        let second = ReviewerSkill::new().run("run-1", &plan, vec![good_step("step-001")]);
        assert_eq!(first.steps, second.steps);
        assert_eq!(first.report.overall_score, second.report.overall_score);
    }
}

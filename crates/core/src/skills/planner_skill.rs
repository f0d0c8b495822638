//! # Planner Skill
//!
//! Builds the structured [`PromptPlan`] (context, goals, assumptions,
//! non-goals, risks, milestones) from research chunks and coordinator
//! objectives.
//!
//! A line-pattern heuristic always runs first. When a model is available its
//! answer replaces the heuristic field by field, and any empty field keeps
//! the heuristic value.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::config::{PipelineConfig, RetryTuning, Stage};
use crate::error::GenerationError;
use crate::models::ChatCompletion;
use crate::state::plan::{MilestoneObjective, PlanStyle, PromptPlan, TargetStack};

use super::escalation::{EscalationAttempt, EscalationPlan};
use super::json_extract::{extract_object, list_field, text_field};
use super::llm_helpers::StageLlm;
use super::prompts;
use super::text::{budget_text, clean_text, dedupe_preserving_order, split_sentences};

pub const PLANNER_CONTEXT_CHARS: usize = 18_000;

/// Plan sections recognized by the line heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSection {
    Goals,
    Assumptions,
    NonGoals,
    Risks,
    Milestones,
}

impl PlanSection {
    fn patterns(&self) -> &'static [&'static str] {
        match self {
            PlanSection::Goals => &[r"^goals?:", r"^objectives?:"],
            PlanSection::Assumptions => &["assumption", "precondition"],
            PlanSection::NonGoals => &["out of scope", "non-goal", "exclude"],
            PlanSection::Risks => &["risk", "concern", "challenge"],
            PlanSection::Milestones => &["milestone", "phase", "stage"],
        }
    }

    fn matcher(&self) -> &'static Regex {
        static GOALS: Lazy<Regex> = Lazy::new(|| section_regex(PlanSection::Goals));
        static ASSUMPTIONS: Lazy<Regex> = Lazy::new(|| section_regex(PlanSection::Assumptions));
        static NON_GOALS: Lazy<Regex> = Lazy::new(|| section_regex(PlanSection::NonGoals));
        static RISKS: Lazy<Regex> = Lazy::new(|| section_regex(PlanSection::Risks));
        static MILESTONES: Lazy<Regex> = Lazy::new(|| section_regex(PlanSection::Milestones));
        match self {
            PlanSection::Goals => &*GOALS,
            PlanSection::Assumptions => &*ASSUMPTIONS,
            PlanSection::NonGoals => &*NON_GOALS,
            PlanSection::Risks => &*RISKS,
            PlanSection::Milestones => &*MILESTONES,
        }
    }

    fn default_items(&self, style: PlanStyle) -> Vec<String> {
        let items: Vec<&str> = match self {
            PlanSection::Goals => vec!["Deliver a working prototype aligned with the research brief."],
            PlanSection::Assumptions => vec!["Stakeholders provide timely reviews."],
            PlanSection::NonGoals => vec!["Do not re-architect unrelated systems."],
            PlanSection::Risks => vec!["Timeline pressure may limit exploration."],
            PlanSection::Milestones => {
                let last = match style {
                    PlanStyle::Strict => "Milestone 5: Final review, polish, and delivery",
                    PlanStyle::Creative => "Milestone 5: Showcase results and gather feedback",
                };
                vec![
                    "Milestone 1: Confirm requirements and domain assumptions",
                    "Milestone 2: Draft architecture and integration approach",
                    "Milestone 3: Implement features iteratively with validation",
                    "Milestone 4: Validate outcomes against risks and acceptance criteria",
                    last,
                ]
            }
        };
        items.into_iter().map(str::to_string).collect()
    }
}

fn section_regex(section: PlanSection) -> Regex {
    Regex::new(&format!("(?i){}", section.patterns().join("|"))).expect("valid section pattern")
}

static LABEL_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^:]*:").expect("valid regex"));

const BULLET_CHARS: &[char] = &[' ', '-', '*', '\u{2022}', '\t'];

/// Input for the planner stage
#[derive(Debug, Clone, Copy)]
pub struct PlannerInput<'a> {
    pub run_id: &'a str,
    pub chunks: &'a [String],
    pub target_stack: &'a TargetStack,
    pub style: PlanStyle,
    pub objectives: &'a [MilestoneObjective],
}

#[derive(Debug, Clone)]
pub struct PlannerSkill {
    llm: Option<StageLlm>,
    context_limit: usize,
    retry: RetryTuning,
}

impl PlannerSkill {
    pub fn new(llm: Option<StageLlm>) -> Self {
        Self {
            llm,
            context_limit: PLANNER_CONTEXT_CHARS,
            retry: RetryTuning::default(),
        }
    }

    pub fn from_config(config: &PipelineConfig, client: Option<Arc<dyn ChatCompletion>>) -> Self {
        let llm = client
            .map(|client| StageLlm::new(client, config.model_config(Stage::Planner), "PlannerAgent"));
        Self {
            llm,
            context_limit: PLANNER_CONTEXT_CHARS,
            retry: config.retry.clone(),
        }
    }

    pub async fn run(&self, input: &PlannerInput<'_>) -> PromptPlan {
        tracing::info!(
            event = "agent.planner.start",
            run_id = %input.run_id,
            objective_count = input.objectives.len(),
            "Generating project plan"
        );
        let heuristic = heuristic_plan(input);

        let Some(llm) = &self.llm else {
            tracing::info!(
                event = "agent.planner.complete",
                run_id = %input.run_id,
                goal_count = heuristic.goals.len(),
                milestone_count = heuristic.milestones.len(),
                source = "heuristic",
                "Planner returned heuristic plan"
            );
            return heuristic;
        };

        let plan = EscalationPlan::with_retry(self.context_limit, llm.config.max_tokens, &self.retry);
        let result = llm
            .generate(input.run_id, &plan, prompts::PLANNER, |attempt| {
                build_user_prompt(input, attempt)
            })
            .await
            .and_then(|accepted| merge_model_plan(&accepted.content, &heuristic));

        match result {
            Ok(plan) => {
                tracing::info!(
                    event = "agent.planner.complete",
                    run_id = %input.run_id,
                    goal_count = plan.goals.len(),
                    milestone_count = plan.milestones.len(),
                    source = "model",
                    "Planner accepted model plan"
                );
                plan
            }
            Err(e) => {
                tracing::warn!(
                    event = "agent.planner.fallback",
                    run_id = %input.run_id,
                    error_kind = e.kind(),
                    error = %e,
                    "Planner output unusable; using heuristic plan"
                );
                heuristic
            }
        }
    }
}

fn build_user_prompt(input: &PlannerInput<'_>, attempt: &EscalationAttempt) -> String {
    let objectives: Vec<_> = ordered_objectives(input.objectives)
        .iter()
        .map(|objective| {
            json!({
                "id": objective.id,
                "order": objective.order,
                "title": objective.title,
                "objective": objective.objective,
                "success_criteria": objective.success_criteria,
                "dependencies": objective.dependencies,
            })
        })
        .collect();
    let objectives_json = serde_json::to_string_pretty(&objectives).unwrap_or_else(|_| "[]".to_string());
    let context = budget_text(input.chunks, "\n\n", attempt.context_limit);

    format!(
        "Run ID: {}\n\
         Target stack: backend={}, frontend={}, database={}\n\
         Planning style: {}\n\
         Ordered coordinator objectives:\n{}\n\
         Research excerpts (normalized, truncated):\n\"\"\"\n{}\n\"\"\"\n\
         Return JSON with fields context, goals, assumptions, non_goals, risks.",
        input.run_id,
        input.target_stack.backend,
        input.target_stack.frontend,
        input.target_stack.db,
        input.style.as_str(),
        objectives_json,
        context,
    )
}

fn ordered_objectives(objectives: &[MilestoneObjective]) -> Vec<&MilestoneObjective> {
    let mut ordered: Vec<&MilestoneObjective> = objectives.iter().collect();
    ordered.sort_by_key(|objective| objective.order);
    ordered
}

/// Overlay model output on the heuristic plan.
///
/// Milestones always come from the heuristic plan, which already prefers the
/// coordinator's objective titles.
pub fn merge_model_plan(raw: &str, fallback: &PromptPlan) -> Result<PromptPlan, GenerationError> {
    let data = extract_object(raw)?;
    let or_fallback = |items: Vec<String>, fallback: &[String]| {
        if items.is_empty() {
            fallback.to_vec()
        } else {
            items
        }
    };

    Ok(PromptPlan {
        context: text_field(&data, &["context"]).unwrap_or_else(|| fallback.context.clone()),
        goals: or_fallback(list_field(&data, &["goals"]), &fallback.goals),
        assumptions: or_fallback(list_field(&data, &["assumptions"]), &fallback.assumptions),
        non_goals: or_fallback(list_field(&data, &["non_goals", "nonGoals"]), &fallback.non_goals),
        risks: or_fallback(list_field(&data, &["risks"]), &fallback.risks),
        milestones: fallback.milestones.clone(),
    })
}

/// Deterministic plan built from line patterns in the research text.
pub fn heuristic_plan(input: &PlannerInput<'_>) -> PromptPlan {
    let text = input.chunks.join(" \n");

    let milestones: Vec<String> = if input.objectives.is_empty() {
        extract_items(&text, PlanSection::Milestones, input.style)
    } else {
        ordered_objectives(input.objectives)
            .into_iter()
            .map(|objective| objective.title.clone())
            .collect()
    };

    PromptPlan {
        context: build_context(&text, input.target_stack),
        goals: extract_items(&text, PlanSection::Goals, input.style),
        assumptions: extract_items(&text, PlanSection::Assumptions, input.style),
        non_goals: extract_items(&text, PlanSection::NonGoals, input.style),
        risks: extract_items(&text, PlanSection::Risks, input.style),
        milestones,
    }
}

/// Lines matching a section, with any `Label:` prefix removed.
///
/// Falls back to up to three matching phrases, then the first three lines,
/// then the section defaults.
pub fn extract_items(text: &str, section: PlanSection, style: PlanStyle) -> Vec<String> {
    let matcher = section.matcher();
    let mut matches = Vec::new();
    for line in text.lines() {
        let normalized = line.trim();
        if normalized.is_empty() || !matcher.is_match(normalized) {
            continue;
        }
        let cleaned = LABEL_PREFIX
            .replace(normalized, "")
            .trim_matches(BULLET_CHARS)
            .to_string();
        if !cleaned.is_empty() {
            matches.push(clean_text(&cleaned));
        }
    }

    let mut items = dedupe_preserving_order(matches);
    if items.is_empty() {
        items = top_phrases(text, matcher, 3);
    }
    if items.is_empty() {
        items = section.default_items(style);
    }
    items
}

fn top_phrases(text: &str, matcher: &Regex, limit: usize) -> Vec<String> {
    let tokens: Vec<String> = dedupe_preserving_order(
        text.lines()
            .map(|line| line.trim().trim_matches(BULLET_CHARS).to_string())
            .filter(|line| !line.is_empty()),
    );
    let phrases: Vec<String> = tokens
        .iter()
        .filter(|token| matcher.is_match(token))
        .take(limit)
        .cloned()
        .collect();
    if phrases.is_empty() {
        tokens.into_iter().take(limit).collect()
    } else {
        phrases
    }
}

fn build_context(text: &str, stack: &TargetStack) -> String {
    let sentences: Vec<String> = split_sentences(text)
        .into_iter()
        .map(|sentence| clean_text(&sentence))
        .filter(|sentence| sentence.chars().count() > 20)
        .take(2)
        .collect();
    let lead = if sentences.is_empty() {
        "This project builds an application based on the supplied research document.".to_string()
    } else {
        sentences.join(" ")
    };
    format!("{} Target stack: {}.", lead, stack.describe())
}

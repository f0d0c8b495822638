//! # Coordinator Skill
//!
//! Turns ingested research chunks into 4-7 ordered milestone objectives.
//!
//! The heuristic sequence is computed first and returned whenever the model
//! is unavailable or its output cannot be used, so the stage always yields a
//! valid, dependency-consistent list.

use std::sync::Arc;

use serde_json::Value;

use crate::config::{PipelineConfig, RetryTuning, Stage};
use crate::error::GenerationError;
use crate::models::ChatCompletion;
use crate::state::plan::{MilestoneObjective, PlanStyle, TargetStack};

use super::dependencies::{resolve, DraftEntity};
use super::escalation::{EscalationAttempt, EscalationPlan};
use super::json_extract::{extract_list, list_field, text_field, uint_field};
use super::llm_helpers::StageLlm;
use super::prompts;
use super::sanitize::sanitize_id;
use super::text::budget_text;

pub const COORDINATOR_CONTEXT_CHARS: usize = 18_000;
pub const MIN_OBJECTIVES: usize = 4;
pub const MAX_OBJECTIVES: usize = 7;

/// Input for the coordinator stage
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorInput<'a> {
    pub run_id: &'a str,
    pub chunks: &'a [String],
    pub target_stack: &'a TargetStack,
    pub style: PlanStyle,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSkill {
    llm: Option<StageLlm>,
    context_limit: usize,
    retry: RetryTuning,
}

impl CoordinatorSkill {
    pub fn new(llm: Option<StageLlm>) -> Self {
        Self {
            llm,
            context_limit: COORDINATOR_CONTEXT_CHARS,
            retry: RetryTuning::default(),
        }
    }

    pub fn from_config(config: &PipelineConfig, client: Option<Arc<dyn ChatCompletion>>) -> Self {
        let llm = client.map(|client| {
            StageLlm::new(client, config.model_config(Stage::Coordinator), "CoordinatorAgent")
        });
        Self {
            llm,
            context_limit: COORDINATOR_CONTEXT_CHARS,
            retry: config.retry.clone(),
        }
    }

    /// Produce ordered milestone objectives.
    pub async fn run(&self, input: &CoordinatorInput<'_>) -> Vec<MilestoneObjective> {
        tracing::info!(
            event = "agent.coordinator.start",
            run_id = %input.run_id,
            chunks = input.chunks.len(),
            "Synthesizing milestone objectives"
        );
        let fallback = fallback_objectives(input.target_stack);

        let Some(llm) = &self.llm else {
            tracing::info!(
                event = "agent.coordinator.complete",
                run_id = %input.run_id,
                objectives = fallback.len(),
                source = "heuristic",
                "Coordinator produced heuristic objectives"
            );
            return fallback;
        };

        let plan = EscalationPlan::with_retry(self.context_limit, llm.config.max_tokens, &self.retry);
        let result = llm
            .generate(input.run_id, &plan, prompts::COORDINATOR, |attempt| {
                build_user_prompt(input, attempt)
            })
            .await
            .and_then(|accepted| parse_objectives(&accepted.content));

        match result {
            Ok(objectives) => {
                tracing::info!(
                    event = "agent.coordinator.complete",
                    run_id = %input.run_id,
                    objectives = objectives.len(),
                    source = "model",
                    "Coordinator produced model objectives"
                );
                objectives
            }
            Err(e) => {
                tracing::warn!(
                    event = "agent.coordinator.fallback",
                    run_id = %input.run_id,
                    error_kind = e.kind(),
                    error = %e,
                    "Coordinator output unusable; using heuristic objectives"
                );
                fallback
            }
        }
    }
}

fn build_user_prompt(input: &CoordinatorInput<'_>, attempt: &EscalationAttempt) -> String {
    let context = budget_text(input.chunks, "\n\n", attempt.context_limit);
    format!(
        "Run ID: {run_id}\n\
         Target stack: backend={backend}, frontend={frontend}, database={db}\n\
         Planning style: {style}\n\
         Research excerpts (normalized, truncated to {limit} characters):\n\
         \"\"\"\n{context}\n\"\"\"\n\
         Requirements:\n\
         - Return {min}-{max} milestones covering the whole project lifecycle.\n\
         - Give each milestone observable success_criteria.\n\
         - List prerequisite milestone ids in dependencies (use [] if none).\n",
        run_id = input.run_id,
        backend = input.target_stack.backend,
        frontend = input.target_stack.frontend,
        db = input.target_stack.db,
        style = input.style.as_str(),
        limit = attempt.context_limit,
        context = context,
        min = MIN_OBJECTIVES,
        max = MAX_OBJECTIVES,
    )
}

struct ObjectiveDraft {
    title: String,
    objective: String,
    success_criteria: Vec<String>,
}

/// Parse model output into resolved, ordered objectives.
///
/// Entries beyond the seventh are ignored; fewer than four usable entries is a
/// schema violation.
pub fn parse_objectives(raw: &str) -> Result<Vec<MilestoneObjective>, GenerationError> {
    let entries = extract_list(raw, &["milestones", "objectives"])?;

    let drafts: Vec<DraftEntity<ObjectiveDraft>> = entries
        .iter()
        .filter_map(Value::as_object)
        .take(MAX_OBJECTIVES)
        .enumerate()
        .map(|(index, entry)| {
            let raw_id = text_field(entry, &["id"]).unwrap_or_else(|| format!("m{:02}", index + 1));
            let title = text_field(entry, &["title", "name"])
                .unwrap_or_else(|| format!("Milestone {}", index + 1));
            let objective = text_field(entry, &["objective", "summary"]).unwrap_or_else(|| title.clone());
            let mut success_criteria =
                list_field(entry, &["success_criteria", "successCriteria", "criteria"]);
            if success_criteria.is_empty() {
                success_criteria.push(format!("Objective for {} is achieved.", title));
            }
            DraftEntity {
                id: sanitize_id(&raw_id, Some(index)),
                raw_id,
                declared_order: uint_field(entry, &["order"])
                    .map(|order| order as usize)
                    .unwrap_or(index),
                raw_dependencies: list_field(entry, &["dependencies", "depends_on", "prerequisites"]),
                payload: ObjectiveDraft {
                    title,
                    objective,
                    success_criteria,
                },
            }
        })
        .collect();

    if drafts.len() < MIN_OBJECTIVES {
        return Err(GenerationError::SchemaViolation(format!(
            "expected {}-{} milestones, got {}",
            MIN_OBJECTIVES,
            MAX_OBJECTIVES,
            drafts.len()
        )));
    }

    Ok(resolve(drafts)
        .into_iter()
        .map(|entity| MilestoneObjective {
            id: entity.id,
            order: entity.order,
            title: entity.payload.title,
            objective: entity.payload.objective,
            success_criteria: entity.payload.success_criteria,
            dependencies: entity.dependencies,
        })
        .collect())
}

/// Fixed five-objective sequence parameterized by the target stack.
///
/// Each objective depends on every earlier one.
pub fn fallback_objectives(stack: &TargetStack) -> Vec<MilestoneObjective> {
    let sequence: Vec<(&str, String, [&str; 2])> = vec![
        (
            "Milestone 1: Establish project baseline",
            "Clarify the problem framing, user goals, success metrics and risks found in the research corpus."
                .to_string(),
            [
                "Stakeholders confirm the documented scope, personas and constraints.",
                "Key risks and assumptions are recorded with owners.",
            ],
        ),
        (
            "Milestone 2: Draft architecture and integration strategy",
            format!(
                "Define the architecture across backend {}, frontend {} and database {}, including service boundaries and integration contracts.",
                stack.backend, stack.frontend, stack.db
            ),
            [
                "The architecture diagram and integration plan are reviewed and accepted.",
                "Data flows, API surfaces and security considerations are documented.",
            ],
        ),
        (
            "Milestone 3: Build backend foundation",
            format!(
                "Stand up the {} services, the {} persistence models and the core domain workflows.",
                stack.backend, stack.db
            ),
            [
                "Service skeletons build with health checks and observability hooks.",
                "Primary domain endpoints and data models pass baseline automated tests.",
            ],
        ),
        (
            "Milestone 4: Build frontend experience",
            format!(
                "Implement the {} user experience wired to the backend APIs for the critical user journeys.",
                stack.frontend
            ),
            [
                "Priority user journeys render end-to-end against live backend contracts.",
                "Accessibility and responsiveness checks meet the agreed quality bar.",
            ],
        ),
        (
            "Milestone 5: Integrate, validate, and launch",
            "Complete integration, regression coverage, operational readiness and launch planning.".to_string(),
            [
                "A regression suite covers critical paths with automated verification.",
                "Deployment, monitoring and rollback playbooks are signed off.",
            ],
        ),
    ];

    let ids: Vec<String> = (1..=sequence.len()).map(|n| format!("m{:02}", n)).collect();
    sequence
        .into_iter()
        .enumerate()
        .map(|(index, (title, objective, criteria))| MilestoneObjective {
            id: ids[index].clone(),
            order: index,
            title: title.to_string(),
            objective,
            success_criteria: criteria.iter().map(|c| c.to_string()).collect(),
            dependencies: ids[..index].to_vec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Completion;
    use crate::skills::llm_helpers::testing::{stage_llm, ScriptedCompletion};

    fn chunks() -> Vec<String> {
        vec!["Goal: build a ledger.\nRisk: audits.".to_string()]
    }

    #[tokio::test]
    async fn test_without_model_returns_fallback_sequence() {
        let skill = CoordinatorSkill::new(None);
        let stack = TargetStack::default();
        let chunks = chunks();
        let input = CoordinatorInput {
            run_id: "run-1",
            chunks: &chunks,
            target_stack: &stack,
            style: PlanStyle::Strict,
        };

        let objectives = skill.run(&input).await;
        let ids: Vec<_> = objectives.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["m01", "m02", "m03", "m04", "m05"]);
        for (index, objective) in objectives.iter().enumerate() {
            assert_eq!(objective.order, index);
            let expected: Vec<String> = (1..=index).map(|n| format!("m{:02}", n)).collect();
            assert_eq!(objective.dependencies, expected);
            assert!(!objective.success_criteria.is_empty());
        }
        assert!(objectives[1].objective.contains("FastAPI"));
    }

    #[tokio::test]
    async fn test_model_objectives_are_sanitized_and_resolved() {
        let raw = r#"```json
        {"milestones": [
            {"id": "M_01", "title": "Discovery", "objective": "Find scope", "success_criteria": ["Scope signed"]},
            {"id": "Build API", "name": "API", "criteria": "Endpoints live", "depends_on": ["m_01", "ghost"]},
            {"id": "m03", "title": "UI", "dependencies": ["Build API", "m03"]},
            {"id": "m04", "title": "Launch", "order": 3, "prerequisites": ["M_01", "m03"]}
        ]}
        ```"#;
        let client = Arc::new(ScriptedCompletion::texts(&[raw]));
        let skill = CoordinatorSkill::new(Some(stage_llm(client.clone(), "CoordinatorAgent")));
        let stack = TargetStack::default();
        let chunks = chunks();
        let input = CoordinatorInput {
            run_id: "run-2",
            chunks: &chunks,
            target_stack: &stack,
            style: PlanStyle::Creative,
        };

        let objectives = skill.run(&input).await;
        assert_eq!(client.call_count(), 1);
        let ids: Vec<_> = objectives.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["m-01", "build-api", "m03", "m04"]);
        assert_eq!(objectives[1].title, "API");
        assert_eq!(objectives[1].success_criteria, vec!["Endpoints live"]);
        assert_eq!(objectives[1].dependencies, vec!["m-01"]);
        assert_eq!(objectives[2].dependencies, vec!["build-api"]);
        assert_eq!(objectives[2].success_criteria, vec!["Objective for UI is achieved."]);
        assert_eq!(objectives[3].dependencies, vec!["m-01", "m03"]);

        let prompt = client.requests()[0].user_prompt().unwrap().to_string();
        assert!(prompt.contains("Run ID: run-2"));
        assert!(prompt.contains("Planning style: creative"));
    }

    #[tokio::test]
    async fn test_too_few_milestones_falls_back() {
        let client = Arc::new(ScriptedCompletion::texts(&[
            r#"{"milestones": [{"id": "only", "title": "One"}]}"#,
        ]));
        let skill = CoordinatorSkill::new(Some(stage_llm(client, "CoordinatorAgent")));
        let stack = TargetStack::default();
        let chunks = chunks();
        let input = CoordinatorInput {
            run_id: "run-3",
            chunks: &chunks,
            target_stack: &stack,
            style: PlanStyle::Strict,
        };
        let objectives = skill.run(&input).await;
        assert_eq!(objectives, fallback_objectives(&stack));
    }

    #[tokio::test]
    async fn test_exhausted_escalation_falls_back() {
        let client = Arc::new(ScriptedCompletion::new(vec![
            Ok(Completion::truncated("")),
            Ok(Completion::truncated("")),
        ]));
        let skill = CoordinatorSkill::new(Some(stage_llm(client.clone(), "CoordinatorAgent")));
        let stack = TargetStack::default();
        let chunks = chunks();
        let input = CoordinatorInput {
            run_id: "run-4",
            chunks: &chunks,
            target_stack: &stack,
            style: PlanStyle::Strict,
        };
        let objectives = skill.run(&input).await;
        assert_eq!(client.call_count(), 2);
        assert_eq!(objectives.len(), 5);
    }

    #[test]
    fn test_parse_caps_at_seven() {
        let entries: Vec<String> = (0..9)
            .map(|i| format!(r#"{{"id": "m{:02}", "title": "T{}"}}"#, i + 1, i))
            .collect();
        let raw = format!("[{}]", entries.join(","));
        let objectives = parse_objectives(&raw).unwrap();
        assert_eq!(objectives.len(), 7);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_objectives("definitely not json"),
            Err(GenerationError::MalformedOutput(_))
        ));
    }
}

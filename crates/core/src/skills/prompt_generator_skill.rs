//! # Prompt Generator Skill
//!
//! Writes one execution prompt per approved milestone, in milestone id order.
//! Each prompt sees the titles already produced and the coverage snapshot so
//! later prompts can pick up components nobody has claimed yet.

use std::sync::Arc;

use crate::config::{PipelineConfig, RetryTuning, Stage};
use crate::error::GenerationError;
use crate::models::ChatCompletion;
use crate::state::blueprint::{
    BlueprintSummary, GraphCoverageSnapshot, Milestone, MilestonePrompt, PromptBundle,
};

use super::escalation::{EscalationAttempt, EscalationPlan};
use super::json_extract::{extract_object, list_field, text_field};
use super::llm_helpers::StageLlm;
use super::prompts;
use super::text::truncate_chars;

pub const PROMPT_CONTEXT_CHARS: usize = 18_000;

const HEURISTIC_SYSTEM_PROMPT: &str = "You are an autonomous senior engineer executing milestone goals with discipline. \
Follow the user instructions precisely, produce code when necessary, and keep audit-ready notes.";

const HEURISTIC_CRITERIA: [&str; 3] = [
    "Implements milestone functionality as described.",
    "Adds thorough automated tests covering primary flows.",
    "Documents decisions and follow-ups for subsequent milestones.",
];

const HEURISTIC_ARTIFACTS: [&str; 3] = ["Source code diff", "Test report", "Decision log"];

/// Input for prompt generation
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub run_id: &'a str,
    pub summary: &'a BlueprintSummary,
    pub milestones: &'a [Milestone],
    pub snapshot: &'a GraphCoverageSnapshot,
}

#[derive(Debug, Clone)]
pub struct PromptGeneratorSkill {
    llm: Option<StageLlm>,
    retry: RetryTuning,
}

impl PromptGeneratorSkill {
    pub fn new(llm: Option<StageLlm>) -> Self {
        Self {
            llm,
            retry: RetryTuning::default(),
        }
    }

    pub fn from_config(config: &PipelineConfig, client: Option<Arc<dyn ChatCompletion>>) -> Self {
        Self {
            llm: client.map(|client| {
                StageLlm::new(client, config.model_config(Stage::Prompts), "PromptGeneratorAgent")
            }),
            retry: config.retry.clone(),
        }
    }

    pub async fn generate(&self, input: &PromptInput<'_>) -> PromptBundle {
        let mut ordered: Vec<&Milestone> = input.milestones.iter().collect();
        ordered.sort_by_key(|m| m.milestone_id);

        let mut prompts: Vec<MilestonePrompt> = Vec::with_capacity(ordered.len());
        for milestone in ordered {
            let previous: Vec<String> = prompts.iter().map(|p| p.title.clone()).collect();
            let prompt = self.generate_one(input, milestone, &previous).await;
            prompts.push(prompt);
        }

        tracing::info!(
            event = "orchestrator.prompts.bundle_ready",
            run_id = %input.run_id,
            count = prompts.len(),
            "Milestone prompts generated"
        );
        PromptBundle {
            run_id: input.run_id.to_string(),
            prompts,
        }
    }

    async fn generate_one(
        &self,
        input: &PromptInput<'_>,
        milestone: &Milestone,
        previous: &[String],
    ) -> MilestonePrompt {
        let fallback = heuristic_prompt(milestone, input.summary);

        let Some(llm) = &self.llm else {
            tracing::info!(
                event = "orchestrator.agentplanner.heuristic_prompt",
                run_id = %input.run_id,
                milestone_id = milestone.milestone_id,
                previous = previous.len(),
                "Heuristic prompt emitted"
            );
            return fallback;
        };

        let plan = EscalationPlan::with_retry(PROMPT_CONTEXT_CHARS, llm.config.max_tokens, &self.retry);
        let outcome = llm
            .generate(input.run_id, &plan, prompts::PROMPT_GENERATOR, |attempt| {
                prompt_payload(input, milestone, previous, attempt)
            })
            .await
            .and_then(|accepted| parse_prompt(milestone, &accepted.content, &fallback));

        match outcome {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::warn!(
                    event = "orchestrator.agentplanner.prompt_error",
                    run_id = %input.run_id,
                    milestone_id = milestone.milestone_id,
                    error_kind = e.kind(),
                    error = %e,
                    "Prompt generation failed; using heuristic prompt"
                );
                fallback
            }
        }
    }
}

fn bullet_list(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        return format!("- {}", empty);
    }
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn prompt_payload(
    input: &PromptInput<'_>,
    milestone: &Milestone,
    previous: &[String],
    attempt: &EscalationAttempt,
) -> String {
    let context = if milestone.context.is_empty() {
        "(context not provided)"
    } else {
        milestone.context.as_str()
    };
    let body = format!(
        "Application summary:\n{summary}\n\n\
         Milestone {id} details:\n{details}\n\n\
         Milestone context:\n{context}\n\n\
         Prior milestones delivered:\n{previous}\n\n\
         Graph coverage reference:\nCovered nodes:\n{covered}\nRemaining nodes of concern:\n{uncovered}",
        summary = input.summary.summary,
        id = milestone.milestone_id,
        details = milestone.details,
        context = context,
        previous = bullet_list(previous, "None yet"),
        covered = bullet_list(&input.snapshot.covered_nodes, "Pending coverage"),
        uncovered = bullet_list(&input.snapshot.uncovered_nodes, "All nodes covered so far"),
    );
    format!(
        "{}\n\nGenerate a JSON object with the required fields.",
        truncate_chars(&body, attempt.context_limit)
    )
}

/// Map a model prompt object, keeping fallback values for missing fields.
fn parse_prompt(
    milestone: &Milestone,
    raw: &str,
    fallback: &MilestonePrompt,
) -> Result<MilestonePrompt, GenerationError> {
    let map = extract_object(raw)?;
    let system_prompt = text_field(&map, &["system_prompt", "systemPrompt"]);
    let user_prompt = text_field(&map, &["user_prompt", "userPrompt"]);
    if system_prompt.is_none() && user_prompt.is_none() {
        return Err(GenerationError::SchemaViolation(
            "prompt object has neither system_prompt nor user_prompt".to_string(),
        ));
    }
    let or_fallback = |items: Vec<String>, fallback: &[String]| {
        if items.is_empty() {
            fallback.to_vec()
        } else {
            items
        }
    };
    Ok(MilestonePrompt {
        milestone_id: milestone.milestone_id,
        title: text_field(&map, &["title"]).unwrap_or_else(|| fallback.title.clone()),
        system_prompt: system_prompt.unwrap_or_else(|| fallback.system_prompt.clone()),
        user_prompt: user_prompt.unwrap_or_else(|| fallback.user_prompt.clone()),
        acceptance_criteria: or_fallback(
            list_field(&map, &["acceptance_criteria", "acceptanceCriteria"]),
            &fallback.acceptance_criteria,
        ),
        expected_artifacts: or_fallback(
            list_field(&map, &["expected_artifacts", "expectedArtifacts"]),
            &fallback.expected_artifacts,
        ),
        references: list_field(&map, &["references"]),
    })
}

pub fn heuristic_prompt(milestone: &Milestone, summary: &BlueprintSummary) -> MilestonePrompt {
    let first_sentence = milestone.details.split('.').next().unwrap_or_default().trim();
    let title = if first_sentence.is_empty() {
        format!("Milestone {}", milestone.milestone_id)
    } else {
        first_sentence.to_string()
    };
    let context = if milestone.context.is_empty() {
        &summary.summary
    } else {
        &milestone.context
    };
    MilestonePrompt {
        milestone_id: milestone.milestone_id,
        title,
        system_prompt: HEURISTIC_SYSTEM_PROMPT.to_string(),
        user_prompt: format!(
            "Goal: {}\n\nContext: {}\n\nDeliver end-to-end functionality for this milestone, \
             validate against acceptance criteria, and note any assumptions for the next milestone.",
            milestone.details, context
        ),
        acceptance_criteria: HEURISTIC_CRITERIA.iter().map(|c| c.to_string()).collect(),
        expected_artifacts: HEURISTIC_ARTIFACTS.iter().map(|a| a.to_string()).collect(),
        references: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::llm_helpers::testing::{stage_llm, ScriptedCompletion};
    use serde_json::Map;

    fn summary() -> BlueprintSummary {
        BlueprintSummary {
            run_id: "orch-1".to_string(),
            summary: "Ledger for teams".to_string(),
            highlights: Vec::new(),
            risks: Vec::new(),
            components: Vec::new(),
            metadata: Map::new(),
        }
    }

    fn milestones() -> Vec<Milestone> {
        vec![
            Milestone {
                milestone_id: 2,
                details: "Design target architecture. Include API gateways.".to_string(),
                context: String::new(),
            },
            Milestone {
                milestone_id: 1,
                details: "Collect detailed requirements".to_string(),
                context: "Intro section".to_string(),
            },
        ]
    }

    fn snapshot() -> GraphCoverageSnapshot {
        GraphCoverageSnapshot {
            run_id: "orch-1".to_string(),
            covered_nodes: Vec::new(),
            uncovered_nodes: vec!["Auth".to_string()],
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_heuristic_bundle_in_id_order() {
        let summary = summary();
        let milestones = milestones();
        let snapshot = snapshot();
        let input = PromptInput {
            run_id: "orch-1",
            summary: &summary,
            milestones: &milestones,
            snapshot: &snapshot,
        };
        let bundle = PromptGeneratorSkill::new(None).generate(&input).await;

        assert_eq!(bundle.prompts.len(), 2);
        assert_eq!(bundle.prompts[0].milestone_id, 1);
        assert_eq!(bundle.prompts[0].title, "Collect detailed requirements");
        assert!(bundle.prompts[0].user_prompt.contains("Context: Intro section"));
        assert_eq!(bundle.prompts[1].title, "Design target architecture");
        assert!(bundle.prompts[1].user_prompt.contains("Context: Ledger for teams"));
        assert_eq!(bundle.prompts[1].acceptance_criteria.len(), 3);
        assert_eq!(
            bundle.prompts[1].expected_artifacts,
            vec!["Source code diff", "Test report", "Decision log"]
        );
    }

    #[tokio::test]
    async fn test_model_prompts_see_previous_titles() {
        let client = Arc::new(ScriptedCompletion::texts(&[
            r#"{"title": "Requirements sprint", "system_prompt": "Be rigorous.", "user_prompt": "Gather needs.", "references": "blueprint §1"}"#,
            "not json",
        ]));
        let skill = PromptGeneratorSkill::new(Some(stage_llm(client.clone(), "PromptGeneratorAgent")));
        let summary = summary();
        let milestones = milestones();
        let snapshot = snapshot();
        let input = PromptInput {
            run_id: "orch-1",
            summary: &summary,
            milestones: &milestones,
            snapshot: &snapshot,
        };

        let bundle = skill.generate(&input).await;
        assert_eq!(bundle.prompts[0].title, "Requirements sprint");
        assert_eq!(bundle.prompts[0].references, vec!["blueprint §1"]);
        assert_eq!(bundle.prompts[0].acceptance_criteria.len(), 3);
        // Second milestone fell back after malformed output.
        assert_eq!(bundle.prompts[1].title, "Design target architecture");

        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        let first = requests[0].user_prompt().unwrap();
        assert!(first.contains("Prior milestones delivered:\n- None yet"));
        assert!(first.contains("Remaining nodes of concern:\n- Auth"));
        let second = requests[1].user_prompt().unwrap();
        assert!(second.contains("Prior milestones delivered:\n- Requirements sprint"));
        assert!(second.contains("(context not provided)"));
    }
}

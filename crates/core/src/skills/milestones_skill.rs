//! # Milestones Skill
//!
//! Orchestrator stage that distills a blueprint into a [`BlueprintSummary`]
//! and, once the summary is approved, into exactly five delivery milestones.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::{PipelineConfig, RetryTuning, Stage};
use crate::error::GenerationError;
use crate::models::ChatCompletion;
use crate::state::blueprint::{BlueprintSummary, Milestone, MilestonePlan};

use super::escalation::{EscalationAttempt, EscalationPlan};
use super::json_extract::{extract_list, extract_object, list_field, text_field, uint_field};
use super::llm_helpers::StageLlm;
use super::prompts;
use super::text::truncate_chars;

pub const SUMMARY_CONTEXT_CHARS: usize = 18_000;
pub const MILESTONE_COUNT: usize = 5;

const SUMMARY_LINES: usize = 5;
const SUMMARY_MAX_CHARS: usize = 800;
const SUMMARY_FALLBACK_CHARS: usize = 400;
const COMPONENT_KEYWORDS: [&str; 4] = ["api", "service", "database", "frontend"];

const HEURISTIC_TITLES: [&str; MILESTONE_COUNT] = [
    "Collect detailed requirements",
    "Design target architecture",
    "Implement core services",
    "Integrate experience and data",
    "Validate and prepare launch",
];

#[derive(Debug, Clone)]
pub struct MilestonesSkill {
    summary_llm: Option<StageLlm>,
    milestone_llm: Option<StageLlm>,
    retry: RetryTuning,
}

impl MilestonesSkill {
    pub fn new(summary_llm: Option<StageLlm>, milestone_llm: Option<StageLlm>) -> Self {
        Self {
            summary_llm,
            milestone_llm,
            retry: RetryTuning::default(),
        }
    }

    pub fn from_config(config: &PipelineConfig, client: Option<Arc<dyn ChatCompletion>>) -> Self {
        let build = |stage: Stage| {
            client
                .clone()
                .map(|client| StageLlm::new(client, config.model_config(stage), "MilestonesAgent"))
        };
        Self {
            summary_llm: build(Stage::Summary),
            milestone_llm: build(Stage::Milestones),
            retry: config.retry.clone(),
        }
    }

    /// Summarize blueprint text. Falls back to line heuristics on any model failure.
    pub async fn summarize_blueprint(&self, run_id: &str, blueprint: &str) -> BlueprintSummary {
        let fallback = heuristic_summary(run_id, blueprint);

        let Some(llm) = &self.summary_llm else {
            tracing::info!(
                event = "orchestrator.milestones.heuristic_summary",
                run_id = %run_id,
                components = fallback.components.len(),
                "Heuristic summary generated"
            );
            return fallback;
        };

        let plan = EscalationPlan::with_retry(SUMMARY_CONTEXT_CHARS, llm.config.max_tokens, &self.retry);
        let outcome = llm
            .generate(run_id, &plan, prompts::BLUEPRINT_SUMMARY, |attempt| {
                format!(
                    "Blueprint:\n{}",
                    truncate_chars(blueprint.trim(), attempt.context_limit)
                )
            })
            .await
            .and_then(|accepted| parse_summary(run_id, &accepted.content, &fallback));

        match outcome {
            Ok(summary) => {
                tracing::info!(
                    event = "orchestrator.milestones.summary_ready",
                    run_id = %run_id,
                    highlights = summary.highlights.len(),
                    components = summary.components.len(),
                    "Model summary generated"
                );
                summary
            }
            Err(e) => {
                tracing::warn!(
                    event = "orchestrator.milestones.summary_error",
                    run_id = %run_id,
                    error_kind = e.kind(),
                    error = %e,
                    "Summary generation failed; using heuristics"
                );
                fallback
            }
        }
    }

    /// Produce exactly five milestones for an approved summary.
    pub async fn generate_milestones(&self, run_id: &str, summary: &BlueprintSummary) -> MilestonePlan {
        let fallback = heuristic_milestones(run_id, summary);

        let Some(llm) = &self.milestone_llm else {
            tracing::info!(
                event = "orchestrator.milestones.heuristic_milestones",
                run_id = %run_id,
                "Heuristic milestones generated"
            );
            return fallback;
        };

        let plan = EscalationPlan::with_retry(SUMMARY_CONTEXT_CHARS, llm.config.max_tokens, &self.retry);
        let outcome = llm
            .generate(run_id, &plan, prompts::MILESTONES, |attempt| {
                milestone_prompt(summary, attempt)
            })
            .await
            .and_then(|accepted| {
                let milestones = parse_milestones(&accepted.content)?;
                Ok(MilestonePlan {
                    run_id: run_id.to_string(),
                    milestones,
                    raw_response: Some(accepted.content),
                })
            });

        match outcome {
            Ok(plan) => {
                tracing::info!(
                    event = "orchestrator.milestones.model_milestones",
                    run_id = %run_id,
                    count = plan.milestones.len(),
                    "Model milestones generated"
                );
                plan
            }
            Err(e) => {
                tracing::warn!(
                    event = "orchestrator.milestones.milestone_error",
                    run_id = %run_id,
                    error_kind = e.kind(),
                    error = %e,
                    "Milestone generation failed; using heuristics"
                );
                fallback
            }
        }
    }
}

fn format_section(label: &str, items: &[String]) -> String {
    if items.is_empty() {
        return format!("{}:\n- (none identified)", label);
    }
    let lines: Vec<String> = items.iter().map(|item| format!("- {}", item)).collect();
    format!("{}:\n{}", label, lines.join("\n"))
}

fn milestone_prompt(summary: &BlueprintSummary, attempt: &EscalationAttempt) -> String {
    let body = format!(
        "Approved application summary:\n{}\n\n{}\n\n{}\n\n{}",
        summary.summary,
        format_section("Highlights", &summary.highlights),
        format_section("Known risks", &summary.risks),
        format_section("Components to cover", &summary.components),
    );
    format!(
        "{}\n\nReturn exactly {} milestones in the specified JSON schema.",
        truncate_chars(&body, attempt.context_limit),
        MILESTONE_COUNT
    )
}

// ============================================================================
// Parsing
// ============================================================================

fn parse_summary(
    run_id: &str,
    raw: &str,
    fallback: &BlueprintSummary,
) -> Result<BlueprintSummary, GenerationError> {
    let map = extract_object(raw)?;
    let summary = text_field(&map, &["summary", "Summary"]).ok_or_else(|| {
        GenerationError::SchemaViolation("summary field missing".to_string())
    })?;
    let metadata = match map.get("metadata") {
        Some(Value::Object(metadata)) => metadata.clone(),
        _ => Map::new(),
    };
    let or_fallback = |items: Vec<String>, fallback: &[String]| {
        if items.is_empty() {
            fallback.to_vec()
        } else {
            items
        }
    };
    Ok(BlueprintSummary {
        run_id: run_id.to_string(),
        summary,
        highlights: or_fallback(list_field(&map, &["highlights"]), &fallback.highlights),
        risks: list_field(&map, &["risks"]),
        components: or_fallback(list_field(&map, &["components"]), &fallback.components),
        metadata,
    })
}

/// Parse model milestones and normalize them to exactly five.
pub fn parse_milestones(raw: &str) -> Result<Vec<Milestone>, GenerationError> {
    let entries = extract_list(raw, &["milestones", "Milestones"])?;
    let milestones: Vec<Milestone> = entries
        .iter()
        .filter_map(Value::as_object)
        .enumerate()
        .map(|(index, entry)| Milestone {
            milestone_id: uint_field(entry, &["milestoneID", "milestone_id", "milestoneId", "id"])
                .filter(|id| *id > 0)
                .and_then(|id| u32::try_from(id).ok())
                .unwrap_or(index as u32 + 1),
            details: text_field(entry, &["MilestoneDetails", "details", "milestone_details"])
                .unwrap_or_default(),
            context: text_field(entry, &["Context", "context"]).unwrap_or_default(),
        })
        .collect();

    if milestones.iter().all(|m| m.details.is_empty()) {
        return Err(GenerationError::SchemaViolation(
            "no milestone carried details".to_string(),
        ));
    }
    Ok(ensure_five(milestones))
}

/// Drop empty entries and duplicate ids, pad with unused ids, sort and cap at five.
pub fn ensure_five(milestones: Vec<Milestone>) -> Vec<Milestone> {
    let mut used = BTreeSet::new();
    let mut kept: Vec<Milestone> = milestones
        .into_iter()
        .filter(|m| !m.details.trim().is_empty())
        .filter(|m| used.insert(m.milestone_id))
        .collect();

    let mut next_id = 1u32;
    while kept.len() < MILESTONE_COUNT {
        while used.contains(&next_id) {
            next_id += 1;
        }
        kept.push(Milestone {
            milestone_id: next_id,
            details: format!("Milestone {}: Expand coverage", next_id),
            context: String::new(),
        });
        used.insert(next_id);
    }

    kept.sort_by_key(|m| m.milestone_id);
    kept.truncate(MILESTONE_COUNT);
    kept
}

// ============================================================================
// Heuristics
// ============================================================================

pub fn heuristic_summary(run_id: &str, blueprint: &str) -> BlueprintSummary {
    let trimmed = truncate_chars(blueprint.trim(), SUMMARY_CONTEXT_CHARS);
    let lines: Vec<&str> = trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let joined = lines
        .iter()
        .take(SUMMARY_LINES)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    let mut summary: String = joined.chars().take(SUMMARY_MAX_CHARS).collect();
    if summary.is_empty() {
        summary = trimmed.chars().take(SUMMARY_FALLBACK_CHARS).collect();
    }

    let risks = lines
        .iter()
        .filter(|line| line.to_lowercase().contains("risk"))
        .take(3)
        .map(|line| line.to_string())
        .collect();
    let components = lines
        .iter()
        .filter(|line| {
            let lowered = line.to_lowercase();
            COMPONENT_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
        })
        .take(5)
        .map(|line| line.to_string())
        .collect();

    let mut metadata = Map::new();
    metadata.insert("mode".to_string(), Value::String("heuristic".to_string()));

    BlueprintSummary {
        run_id: run_id.to_string(),
        summary,
        highlights: lines.iter().take(3).map(|line| line.to_string()).collect(),
        risks,
        components,
        metadata,
    }
}

pub fn heuristic_milestones(run_id: &str, summary: &BlueprintSummary) -> MilestonePlan {
    let milestones = HEURISTIC_TITLES
        .iter()
        .enumerate()
        .map(|(index, title)| {
            // Window [i-1, i+1) over the 1-based position.
            let start = index.min(summary.highlights.len());
            let end = (index + 2).min(summary.highlights.len());
            let window = &summary.highlights[start..end];
            Milestone {
                milestone_id: index as u32 + 1,
                details: title.to_string(),
                context: if window.is_empty() {
                    summary.summary.clone()
                } else {
                    window.join(" ")
                },
            }
        })
        .collect();
    MilestonePlan {
        run_id: run_id.to_string(),
        milestones,
        raw_response: None,
    }
}

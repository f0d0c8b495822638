//! # Graph Audit Skill
//!
//! Confirms component coverage after milestone generation. The substring
//! evidence already held by the [`GraphStore`] is the floor: a model audit can
//! only add names to either side, never remove them.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::{PipelineConfig, RetryTuning, Stage};
use crate::error::GenerationError;
use crate::models::ChatCompletion;
use crate::state::blueprint::{BlueprintSummary, GraphCoverageSnapshot, Milestone};
use crate::state::graph::GraphStore;

use super::escalation::{EscalationAttempt, EscalationPlan};
use super::json_extract::{extract_object, list_field, text_field};
use super::llm_helpers::StageLlm;
use super::prompts;
use super::text::truncate_chars;

pub const AUDIT_CONTEXT_CHARS: usize = 18_000;

/// Input for one audit
#[derive(Debug, Clone, Copy)]
pub struct AuditInput<'a> {
    pub run_id: &'a str,
    pub summary: &'a BlueprintSummary,
    pub milestones: &'a [Milestone],
    pub graph: &'a GraphStore,
}

#[derive(Debug, Clone)]
pub struct GraphAuditSkill {
    llm: Option<StageLlm>,
    retry: RetryTuning,
}

impl GraphAuditSkill {
    pub fn new(llm: Option<StageLlm>) -> Self {
        Self {
            llm,
            retry: RetryTuning::default(),
        }
    }

    pub fn from_config(config: &PipelineConfig, client: Option<Arc<dyn ChatCompletion>>) -> Self {
        Self {
            llm: client.map(|client| {
                StageLlm::new(client, config.model_config(Stage::Prompts), "GraphAuditAgent")
            }),
            retry: config.retry.clone(),
        }
    }

    pub async fn audit(&self, input: &AuditInput<'_>) -> GraphCoverageSnapshot {
        let baseline = input.graph.snapshot(None);

        let Some(llm) = &self.llm else {
            tracing::info!(
                event = "orchestrator.graphaudit.heuristic",
                run_id = %input.run_id,
                covered = baseline.covered_nodes.len(),
                uncovered = baseline.uncovered_nodes.len(),
                "Heuristic coverage audit"
            );
            return heuristic_snapshot(baseline);
        };

        let plan = EscalationPlan::with_retry(AUDIT_CONTEXT_CHARS, llm.config.max_tokens, &self.retry);
        let outcome = llm
            .generate(input.run_id, &plan, prompts::GRAPH_AUDIT, |attempt| {
                audit_prompt(input, attempt)
            })
            .await
            .and_then(|accepted| merge_audit(&baseline, &accepted.content));

        match outcome {
            Ok(snapshot) => {
                tracing::info!(
                    event = "orchestrator.graphaudit.complete",
                    run_id = %input.run_id,
                    covered = snapshot.covered_nodes.len(),
                    uncovered = snapshot.uncovered_nodes.len(),
                    "Coverage audit merged"
                );
                snapshot
            }
            Err(e) => {
                tracing::warn!(
                    event = "orchestrator.graphaudit.audit_error",
                    run_id = %input.run_id,
                    error_kind = e.kind(),
                    error = %e,
                    "Coverage audit failed; returning heuristic snapshot"
                );
                heuristic_snapshot(baseline)
            }
        }
    }
}

fn audit_prompt(input: &AuditInput<'_>, attempt: &EscalationAttempt) -> String {
    let mut milestones: Vec<&Milestone> = input.milestones.iter().collect();
    milestones.sort_by_key(|m| m.milestone_id);
    let milestone_lines: Vec<String> = milestones
        .iter()
        .map(|m| format!("Milestone {}: {} | Context: {}", m.milestone_id, m.details, m.context))
        .collect();

    let mut nodes: Vec<_> = input.graph.nodes().collect();
    nodes.sort_by_key(|node| node.name.to_lowercase());
    let node_lines: Vec<String> = nodes
        .iter()
        .map(|node| {
            let ids: Vec<String> = node.milestone_ids.iter().map(u32::to_string).collect();
            let linked = if ids.is_empty() {
                "none".to_string()
            } else {
                ids.join(", ")
            };
            format!("- {} :: milestones {}", node.name, linked)
        })
        .collect();

    let body = format!(
        "Application summary:\n{}\n\nMilestones:\n{}\n\nGraph nodes and linked milestones:\n{}",
        input.summary.summary,
        if milestone_lines.is_empty() {
            "None".to_string()
        } else {
            milestone_lines.join("\n")
        },
        if node_lines.is_empty() {
            "- None registered".to_string()
        } else {
            node_lines.join("\n")
        },
    );
    format!(
        "{}\n\nConfirm coverage for each node.",
        truncate_chars(&body, attempt.context_limit)
    )
}

/// Union the model's lists into the baseline.
///
/// Each side is the baseline set plus whatever the model reports for that
/// side, so a baseline name is never dropped. Missing keys count as empty
/// lists; a reply with none of them returns the baseline unchanged.
pub fn merge_audit(
    baseline: &GraphCoverageSnapshot,
    raw: &str,
) -> Result<GraphCoverageSnapshot, GenerationError> {
    let map = extract_object(raw)?;

    let covered: BTreeSet<String> = baseline
        .covered_nodes
        .iter()
        .cloned()
        .chain(list_field(&map, &["covered_nodes"]))
        .collect();
    let uncovered: BTreeSet<String> = baseline
        .uncovered_nodes
        .iter()
        .cloned()
        .chain(list_field(&map, &["uncovered_nodes"]))
        .collect();

    Ok(GraphCoverageSnapshot {
        run_id: baseline.run_id.clone(),
        covered_nodes: covered.into_iter().collect(),
        uncovered_nodes: uncovered.into_iter().collect(),
        notes: text_field(&map, &["notes"]).or_else(|| baseline.notes.clone()),
    })
}

/// Baseline snapshot annotated with a heuristic note.
pub fn heuristic_snapshot(snapshot: GraphCoverageSnapshot) -> GraphCoverageSnapshot {
    let notes = match &snapshot.notes {
        Some(notes) => notes.clone(),
        None if !snapshot.uncovered_nodes.is_empty() => format!(
            "Heuristic audit: components remain uncovered. Prioritize mapping milestones to: {}",
            snapshot.uncovered_nodes.join(", ")
        ),
        None => "Heuristic audit: coverage inferred from milestone text.".to_string(),
    };
    GraphCoverageSnapshot {
        notes: Some(notes),
        ..snapshot
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
            summary: "Ledger".to_string(),
            highlights: Vec::new(),
            risks: Vec::new(),
            components: vec!["Billing Service".to_string(), "Auth".to_string()],
            metadata: Map::new(),
        }
    }

    fn graph_with_auth_covered() -> (GraphStore, Vec<Milestone>) {
        let mut graph = GraphStore::new("orch-1");
        graph.load_components(["Billing Service", "Auth"]);
        let milestones = vec![Milestone {
            milestone_id: 1,
            details: "Build auth".to_string(),
            context: String::new(),
        }];
        graph.assign_milestones(&milestones);
        (graph, milestones)
    }

    #[tokio::test]
    async fn test_heuristic_notes_list_uncovered() {
        let (graph, milestones) = graph_with_auth_covered();
        let summary = summary();
        let input = AuditInput {
            run_id: "orch-1",
            summary: &summary,
            milestones: &milestones,
            graph: &graph,
        };
        let snapshot = GraphAuditSkill::new(None).audit(&input).await;
        assert_eq!(snapshot.covered_nodes, vec!["Auth"]);
        assert_eq!(
            snapshot.notes.as_deref(),
            Some("Heuristic audit: components remain uncovered. Prioritize mapping milestones to: Billing Service")
        );
    }

    #[test]
    fn test_heuristic_notes_when_fully_covered() {
        let snapshot = heuristic_snapshot(GraphCoverageSnapshot {
            run_id: "orch-1".to_string(),
            covered_nodes: vec!["Auth".to_string()],
            uncovered_nodes: Vec::new(),
            notes: None,
        });
        assert_eq!(
            snapshot.notes.as_deref(),
            Some("Heuristic audit: coverage inferred from milestone text.")
        );
    }

    #[tokio::test]
    async fn test_model_can_only_extend_baseline() {
        let (graph, milestones) = graph_with_auth_covered();
        let summary = summary();
        let client = Arc::new(ScriptedCompletion::texts(&[
            r#"{"covered_nodes": ["Reporting"], "uncovered_nodes": ["Auth", "Search"], "notes": "Search missing"}"#,
        ]));
        let skill = GraphAuditSkill::new(Some(stage_llm(client.clone(), "GraphAuditAgent")));
        let input = AuditInput {
            run_id: "orch-1",
            summary: &summary,
            milestones: &milestones,
            graph: &graph,
        };

        let snapshot = skill.audit(&input).await;
        assert_eq!(snapshot.covered_nodes, vec!["Auth", "Reporting"]);
        assert_eq!(snapshot.uncovered_nodes, vec!["Auth", "Billing Service", "Search"]);
        assert_eq!(snapshot.notes.as_deref(), Some("Search missing"));

        let prompt = client.requests()[0].user_prompt().unwrap().to_string();
        assert!(prompt.contains("- Auth :: milestones 1"));
        assert!(prompt.contains("- Billing Service :: milestones none"));
    }

    #[tokio::test]
    async fn test_unusable_audit_falls_back() {
        let (graph, milestones) = graph_with_auth_covered();
        let summary = summary();
        let client = Arc::new(ScriptedCompletion::texts(&["coverage looks fine to me"]));
        let skill = GraphAuditSkill::new(Some(stage_llm(client, "GraphAuditAgent")));
        let input = AuditInput {
            run_id: "orch-1",
            summary: &summary,
            milestones: &milestones,
            graph: &graph,
        };
        let snapshot = skill.audit(&input).await;
        assert_eq!(snapshot.uncovered_nodes, vec!["Billing Service"]);
        assert!(snapshot.notes.unwrap().starts_with("Heuristic audit"));
    }

    fn baseline() -> GraphCoverageSnapshot {
        GraphCoverageSnapshot {
            run_id: "orch-1".to_string(),
            covered_nodes: vec!["Auth".to_string()],
            uncovered_nodes: vec!["Billing Service".to_string()],
            notes: None,
        }
    }

    #[test]
    fn test_model_covered_keeps_baseline_uncovered() {
        let merged = merge_audit(&baseline(), r#"{"covered_nodes": ["Billing Service"]}"#).unwrap();
        assert_eq!(merged.covered_nodes, vec!["Auth", "Billing Service"]);
        assert_eq!(merged.uncovered_nodes, vec!["Billing Service"]);
    }

    #[test]
    fn test_reply_without_coverage_keys_returns_baseline() {
        assert_eq!(merge_audit(&baseline(), "{}").unwrap(), baseline());
        assert_eq!(
            merge_audit(&baseline(), r#"{"verdict": "fine"}"#).unwrap(),
            baseline()
        );
    }
}

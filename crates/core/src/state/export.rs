//! # Plan Export
//!
//! Renders a run's plan, steps and review report as YAML, JSON Lines or
//! Markdown for hand-off to coding agents.

use std::fmt::Write as _;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::{AgentReport, PromptPlan, PromptStep};
use super::store::PlanStore;
use crate::error::WorkflowError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Yaml,
    Jsonl,
    #[serde(rename = "md", alias = "markdown")]
    Markdown,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Yaml => "yaml",
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Markdown => "md",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Yaml => "application/yaml",
            ExportFormat::Jsonl => "application/json",
            ExportFormat::Markdown => "text/markdown",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "yaml" | "yml" => Some(ExportFormat::Yaml),
            "jsonl" => Some(ExportFormat::Jsonl),
            "md" | "markdown" => Some(ExportFormat::Markdown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportRequest {
    pub run_id: String,
    #[serde(default)]
    pub format: ExportFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportMetadata {
    pub filename: String,
    pub content_type: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportResponse {
    pub metadata: ExportMetadata,
    pub content: String,
}

#[derive(Serialize)]
struct ExportBundle<'a> {
    plan: &'a PromptPlan,
    steps: &'a [PromptStep],
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a AgentReport>,
}

#[derive(Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
enum JsonlRecord<'a> {
    Plan(&'a PromptPlan),
    Step(&'a PromptStep),
    Report(&'a AgentReport),
}

/// Export a run. Fails with `NotFound` when the plan or steps are missing.
pub fn export_run(
    store: &dyn PlanStore,
    run_id: &str,
    format: ExportFormat,
) -> Result<ExportResponse, WorkflowError> {
    tracing::info!(
        event = "planning.export.start",
        run_id = %run_id,
        format = format.extension(),
        "Exporting prompts"
    );

    let plan = store.plan(run_id)?;
    let steps = store.steps(run_id)?;
    let report = store.report(run_id)?;
    let plan = match plan {
        Some(plan) if !steps.is_empty() => plan,
        _ => {
            tracing::warn!(
                event = "planning.export.missing",
                run_id = %run_id,
                "Export requested but plan or steps missing"
            );
            return Err(WorkflowError::NotFound(
                "Plan or steps not found for run.".to_string(),
            ));
        }
    };

    let content = match format {
        ExportFormat::Yaml => to_yaml(&plan, &steps, report.as_ref())?,
        ExportFormat::Jsonl => to_jsonl(&plan, &steps, report.as_ref())?,
        ExportFormat::Markdown => to_markdown(&plan, &steps, report.as_ref()),
    };

    let generated_at = Utc::now();
    let filename = format!(
        "prompts-{}-{}.{}",
        run_id,
        generated_at.format("%Y%m%d%H%M%S"),
        format.extension()
    );
    tracing::info!(
        event = "planning.export.complete",
        run_id = %run_id,
        filename = %filename,
        "Export prepared"
    );

    Ok(ExportResponse {
        metadata: ExportMetadata {
            filename,
            content_type: format.content_type().to_string(),
            generated_at,
        },
        content,
    })
}

fn to_yaml(
    plan: &PromptPlan,
    steps: &[PromptStep],
    report: Option<&AgentReport>,
) -> anyhow::Result<String> {
    serde_yaml::to_string(&ExportBundle { plan, steps, report }).context("Failed to render YAML export")
}

fn to_jsonl(
    plan: &PromptPlan,
    steps: &[PromptStep],
    report: Option<&AgentReport>,
) -> anyhow::Result<String> {
    let records = std::iter::once(JsonlRecord::Plan(plan))
        .chain(steps.iter().map(JsonlRecord::Step))
        .chain(report.map(JsonlRecord::Report));
    let mut lines = Vec::new();
    for record in records {
        lines.push(serde_json::to_string(&record).context("Failed to render JSONL export")?);
    }
    Ok(lines.join("\n"))
}

fn to_markdown(plan: &PromptPlan, steps: &[PromptStep], report: Option<&AgentReport>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Project Plan\n");
    let _ = writeln!(out, "**Context**: {}\n", plan.context);

    for (heading, items) in [
        ("Goals", &plan.goals),
        ("Assumptions", &plan.assumptions),
        ("Non Goals", &plan.non_goals),
        ("Risks", &plan.risks),
        ("Milestones", &plan.milestones),
    ] {
        if items.is_empty() {
            continue;
        }
        let _ = writeln!(out, "## {}", heading);
        for item in items {
            let _ = writeln!(out, "- {}", item);
        }
        out.push('\n');
    }

    out.push_str("## Steps\n");
    for (index, step) in steps.iter().enumerate() {
        let _ = writeln!(out, "### Step {}: {}\n", index + 1, step.title);
        let _ = writeln!(out, "**System Prompt**\n{}\n", step.system_prompt);
        let _ = writeln!(out, "**User Prompt**\n{}\n", step.user_prompt);
        for (label, items) in [
            ("Expected Artifacts", &step.expected_artifacts),
            ("Acceptance Criteria", &step.acceptance_criteria),
        ] {
            if items.is_empty() {
                continue;
            }
            let _ = writeln!(out, "**{}**", label);
            for item in items {
                let _ = writeln!(out, "- {}", item);
            }
            out.push('\n');
        }
    }

    if let Some(report) = report {
        out.push_str("## Reviewer Report\n");
        let _ = writeln!(out, "Overall score: {:.2}", report.overall_score);
        for (label, items) in [("Strengths", &report.strengths), ("Concerns", &report.concerns)] {
            if items.is_empty() {
                continue;
            }
            let _ = writeln!(out, "**{}**", label);
            for item in items {
                let _ = writeln!(out, "- {}", item);
            }
        }
    }
    out.trim_end().to_string()
}

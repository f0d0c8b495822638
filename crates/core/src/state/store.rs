//! # Plan Store
//!
//! Run-scoped persistence for the planning pipeline. Each artifact type is
//! read and written whole; the last write wins.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;

use super::plan::{
    AgentReport, DocumentStats, MilestoneObjective, PlanStyle, PromptPlan, PromptStep, RunRecord,
    TargetStack,
};

/// Persistence contract used by ingestion, the pipeline and export.
pub trait PlanStore: Send + Sync {
    fn register_run(&self, run_id: &str, source: Option<&str>, stats: &DocumentStats) -> Result<()>;
    fn run_exists(&self, run_id: &str) -> Result<bool>;
    fn run(&self, run_id: &str) -> Result<Option<RunRecord>>;
    /// Record the stack and style a plan was requested with
    fn attach_plan_context(&self, run_id: &str, target_stack: &TargetStack, style: PlanStyle) -> Result<()>;

    /// Replace the chunk list for a run
    fn add_chunks(&self, run_id: &str, chunks: &[String]) -> Result<()>;
    fn chunks(&self, run_id: &str) -> Result<Vec<String>>;

    fn upsert_objectives(&self, run_id: &str, objectives: &[MilestoneObjective]) -> Result<()>;
    fn objectives(&self, run_id: &str) -> Result<Vec<MilestoneObjective>>;

    fn upsert_plan(&self, run_id: &str, plan: &PromptPlan) -> Result<()>;
    fn plan(&self, run_id: &str) -> Result<Option<PromptPlan>>;

    fn upsert_steps(&self, run_id: &str, steps: &[PromptStep]) -> Result<()>;
    fn steps(&self, run_id: &str) -> Result<Vec<PromptStep>>;

    fn upsert_report(&self, run_id: &str, report: &AgentReport) -> Result<()>;
    fn report(&self, run_id: &str) -> Result<Option<AgentReport>>;

    /// Drop the run and every artifact attached to it. Returns whether it existed.
    fn delete_run(&self, run_id: &str) -> Result<bool>;
}

/// Replace stored steps with caller edits.
///
/// The edited list must carry exactly the ids already stored, in any order;
/// the stored order is kept.
pub fn update_steps(store: &dyn PlanStore, run_id: &str, edited: Vec<PromptStep>) -> Result<Vec<PromptStep>> {
    let current = store.steps(run_id)?;
    if current.is_empty() {
        anyhow::bail!("No steps stored for run {}", run_id);
    }
    let mut by_id: HashMap<String, PromptStep> =
        edited.into_iter().map(|step| (step.id.clone(), step)).collect();
    if by_id.len() != current.len() {
        anyhow::bail!(
            "Expected {} steps for run {}, got {}",
            current.len(),
            run_id,
            by_id.len()
        );
    }
    let mut ordered = Vec::with_capacity(current.len());
    for step in &current {
        let replacement = by_id
            .remove(&step.id)
            .ok_or_else(|| anyhow::anyhow!("Unknown or missing step id: {}", step.id))?;
        replacement
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid step: {}", e))?;
        ordered.push(replacement);
    }
    store.upsert_steps(run_id, &ordered)?;
    Ok(ordered)
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Debug, Default, Clone)]
struct RunArtifacts {
    record: Option<RunRecord>,
    chunks: Vec<String>,
    objectives: Vec<MilestoneObjective>,
    plan: Option<PromptPlan>,
    steps: Vec<PromptStep>,
    report: Option<AgentReport>,
}

/// Process-local store used by the CLI and tests.
#[derive(Debug, Default)]
pub struct InMemoryPlanStore {
    runs: Mutex<HashMap<String, RunArtifacts>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_runs<T>(&self, f: impl FnOnce(&mut HashMap<String, RunArtifacts>) -> T) -> Result<T> {
        let mut runs = self
            .runs
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(f(&mut runs))
    }
}

impl PlanStore for InMemoryPlanStore {
    fn register_run(&self, run_id: &str, source: Option<&str>, stats: &DocumentStats) -> Result<()> {
        self.with_runs(|runs| {
            runs.entry(run_id.to_string()).or_default().record = Some(RunRecord {
                run_id: run_id.to_string(),
                created_at: chrono::Utc::now(),
                source: source.map(str::to_string),
                stats: stats.clone(),
                target_stack: None,
                style: None,
            });
        })
    }

    fn run_exists(&self, run_id: &str) -> Result<bool> {
        self.with_runs(|runs| runs.get(run_id).map(|r| r.record.is_some()).unwrap_or(false))
    }

    fn run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.with_runs(|runs| runs.get(run_id).and_then(|r| r.record.clone()))
    }

    fn attach_plan_context(&self, run_id: &str, target_stack: &TargetStack, style: PlanStyle) -> Result<()> {
        self.with_runs(|runs| {
            if let Some(record) = runs.get_mut(run_id).and_then(|r| r.record.as_mut()) {
                record.target_stack = Some(target_stack.clone());
                record.style = Some(style);
            }
        })
    }

    fn add_chunks(&self, run_id: &str, chunks: &[String]) -> Result<()> {
        self.with_runs(|runs| runs.entry(run_id.to_string()).or_default().chunks = chunks.to_vec())
    }

    fn chunks(&self, run_id: &str) -> Result<Vec<String>> {
        self.with_runs(|runs| runs.get(run_id).map(|r| r.chunks.clone()).unwrap_or_default())
    }

    fn upsert_objectives(&self, run_id: &str, objectives: &[MilestoneObjective]) -> Result<()> {
        self.with_runs(|runs| {
            runs.entry(run_id.to_string()).or_default().objectives = objectives.to_vec()
        })
    }

    fn objectives(&self, run_id: &str) -> Result<Vec<MilestoneObjective>> {
        self.with_runs(|runs| runs.get(run_id).map(|r| r.objectives.clone()).unwrap_or_default())
    }

    fn upsert_plan(&self, run_id: &str, plan: &PromptPlan) -> Result<()> {
        self.with_runs(|runs| runs.entry(run_id.to_string()).or_default().plan = Some(plan.clone()))
    }

    fn plan(&self, run_id: &str) -> Result<Option<PromptPlan>> {
        self.with_runs(|runs| runs.get(run_id).and_then(|r| r.plan.clone()))
    }

    fn upsert_steps(&self, run_id: &str, steps: &[PromptStep]) -> Result<()> {
        self.with_runs(|runs| runs.entry(run_id.to_string()).or_default().steps = steps.to_vec())
    }

    fn steps(&self, run_id: &str) -> Result<Vec<PromptStep>> {
        self.with_runs(|runs| runs.get(run_id).map(|r| r.steps.clone()).unwrap_or_default())
    }

    fn upsert_report(&self, run_id: &str, report: &AgentReport) -> Result<()> {
        self.with_runs(|runs| {
            runs.entry(run_id.to_string()).or_default().report = Some(report.clone())
        })
    }

    fn report(&self, run_id: &str) -> Result<Option<AgentReport>> {
        self.with_runs(|runs| runs.get(run_id).and_then(|r| r.report.clone()))
    }

    fn delete_run(&self, run_id: &str) -> Result<bool> {
        self.with_runs(|runs| runs.remove(run_id).is_some())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::step;
    use super::*;

    #[test]
    fn test_register_and_exists() {
        let store = InMemoryPlanStore::new();
        assert!(!store.run_exists("run-1").unwrap());
        store
            .register_run("run-1", Some("notes.md"), &DocumentStats::default())
            .unwrap();
        assert!(store.run_exists("run-1").unwrap());
        assert_eq!(
            store.run("run-1").unwrap().unwrap().source.as_deref(),
            Some("notes.md")
        );
    }

    #[test]
    fn test_last_write_wins() {
        let store = InMemoryPlanStore::new();
        store.upsert_steps("run-1", &[step("step-001", "A")]).unwrap();
        store
            .upsert_steps("run-1", &[step("step-001", "B"), step("step-002", "C")])
            .unwrap();
        let steps = store.steps("run-1").unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].title, "B");
    }

    #[test]
    fn test_update_steps_keeps_stored_order() {
        let store = InMemoryPlanStore::new();
        store
            .upsert_steps("run-1", &[step("step-001", "A"), step("step-002", "B")])
            .unwrap();

        let mut edited_b = step("step-002", "B edited");
        edited_b.token_budget = 700;
        let updated = update_steps(&store, "run-1", vec![edited_b, step("step-001", "A")]).unwrap();
        assert_eq!(updated[0].id, "step-001");
        assert_eq!(updated[1].title, "B edited");
        assert_eq!(store.steps("run-1").unwrap()[1].token_budget, 700);
    }

    #[test]
    fn test_update_steps_rejects_unknown_ids() {
        let store = InMemoryPlanStore::new();
        store.upsert_steps("run-1", &[step("step-001", "A")]).unwrap();
        let result = update_steps(&store, "run-1", vec![step("step-999", "X")]);
        assert!(result.is_err());
        assert_eq!(store.steps("run-1").unwrap()[0].title, "A");
    }

    #[test]
    fn test_delete_run() {
        let store = InMemoryPlanStore::new();
        store
            .register_run("run-1", None, &DocumentStats::default())
            .unwrap();
        store.add_chunks("run-1", &["chunk".to_string()]).unwrap();
        assert!(store.delete_run("run-1").unwrap());
        assert!(!store.delete_run("run-1").unwrap());
        assert!(store.chunks("run-1").unwrap().is_empty());
    }
}

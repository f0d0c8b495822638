//! # Module Correlator
//!
//! Folds captured log records into a per-module health view of the
//! planning and orchestration workflows: event counts, status, latency
//! figures derived from start/end event pairs, and a feed of recent calls.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::capture::LogRecord;
use crate::skills::llm_helpers::PROMPT_LOG_TYPE;

pub const MAX_CALLS: usize = 150;

const GLOBAL_RUN: &str = "__global__";

/// Static description of a module shown in the dashboard
#[derive(Debug, Clone, Copy)]
pub struct ModuleDefinition {
    pub id: &'static str,
    pub name: &'static str,
    pub category: &'static str,
    pub description: &'static str,
    pub event_names: &'static [&'static str],
    pub event_prefixes: &'static [&'static str],
    pub logger_prefixes: &'static [&'static str],
    pub prompt_agents: &'static [&'static str],
    pub duration_pairs: &'static [(&'static str, &'static str)],
}

pub const MODULES: &[ModuleDefinition] = &[
    ModuleDefinition {
        id: "api_ingest",
        name: "Ingest Endpoint",
        category: "endpoint",
        description: "Receives documents and triggers ingestion.",
        event_names: &[],
        event_prefixes: &["api.ingest."],
        logger_prefixes: &[],
        prompt_agents: &[],
        duration_pairs: &[("api.ingest.start", "api.ingest.complete")],
    },
    ModuleDefinition {
        id: "ingestion_pipeline",
        name: "Ingestion Pipeline",
        category: "pipeline",
        description: "Normalizes input and chunks content for downstream planning.",
        event_names: &[],
        event_prefixes: &["ingest."],
        logger_prefixes: &["conductor_core::state::ingest"],
        prompt_agents: &[],
        duration_pairs: &[("ingest.start", "ingest.complete")],
    },
    ModuleDefinition {
        id: "document_store",
        name: "Document Store",
        category: "storage",
        description: "Persists normalized chunks and run artifacts for planning.",
        event_names: &[],
        event_prefixes: &["store."],
        logger_prefixes: &["conductor_core::state::db", "conductor_core::state::store"],
        prompt_agents: &[],
        duration_pairs: &[],
    },
    ModuleDefinition {
        id: "api_plan",
        name: "Plan Endpoint",
        category: "endpoint",
        description: "Streams multi-agent planning updates to clients.",
        event_names: &["planning.start", "planning.finalize", "planning.failed"],
        event_prefixes: &["api.plan."],
        logger_prefixes: &["conductor_core::swarm::pipeline"],
        prompt_agents: &[],
        duration_pairs: &[("planning.start", "planning.finalize")],
    },
    ModuleDefinition {
        id: "coordinator_agent",
        name: "Coordinator Agent",
        category: "agent",
        description: "Synthesizes milestone objectives from document context.",
        event_names: &[],
        event_prefixes: &["planning.coordinator.", "agent.coordinator."],
        logger_prefixes: &[],
        prompt_agents: &["CoordinatorAgent"],
        duration_pairs: &[("planning.coordinator.start", "planning.coordinator.complete")],
    },
    ModuleDefinition {
        id: "planner_agent",
        name: "Planner Agent",
        category: "agent",
        description: "Drafts the high-level plan for the workflow.",
        event_names: &[],
        event_prefixes: &["planning.planner.", "agent.planner."],
        logger_prefixes: &[],
        prompt_agents: &["PlannerAgent"],
        duration_pairs: &[("planning.planner.start", "planning.planner.complete")],
    },
    ModuleDefinition {
        id: "decomposer_agent",
        name: "Decomposer Agent",
        category: "agent",
        description: "Breaks milestones into executable step-level prompts.",
        event_names: &[],
        event_prefixes: &["planning.decomposer.", "agent.decomposer."],
        logger_prefixes: &[],
        prompt_agents: &["DecomposerAgent"],
        duration_pairs: &[("planning.decomposer.start", "planning.decomposer.complete")],
    },
    ModuleDefinition {
        id: "reviewer_agent",
        name: "Reviewer Agent",
        category: "agent",
        description: "Scores drafted steps against the review rubric.",
        event_names: &[],
        event_prefixes: &["planning.reviewer.", "agent.reviewer."],
        logger_prefixes: &[],
        prompt_agents: &["ReviewerAgent"],
        duration_pairs: &[("planning.reviewer.start", "planning.reviewer.complete")],
    },
    ModuleDefinition {
        id: "api_export",
        name: "Export Endpoint",
        category: "endpoint",
        description: "Packages finalized artifacts for download.",
        event_names: &[],
        event_prefixes: &["api.export.", "planning.export."],
        logger_prefixes: &[],
        prompt_agents: &[],
        duration_pairs: &[
            ("api.export.start", "api.export.complete"),
            ("planning.export.start", "planning.export.complete"),
        ],
    },
    ModuleDefinition {
        id: "orchestrator",
        name: "Coding Orchestrator",
        category: "workflow",
        description: "Turns blueprints into approved milestones and agent prompts.",
        event_names: &[],
        event_prefixes: &["orchestrator."],
        logger_prefixes: &["conductor_core::swarm::orchestrator", "conductor_core::swarm::service"],
        prompt_agents: &["MilestonesAgent", "GraphAuditAgent", "PromptGeneratorAgent"],
        duration_pairs: &[
            ("orchestrator.summary.start", "orchestrator.summary.prepared"),
            ("orchestrator.milestones.start", "orchestrator.milestones.prepared"),
            ("orchestrator.prompts.start", "orchestrator.prompts.generated"),
        ],
    },
];

pub const EDGES: &[(&str, &str, &str)] = &[
    ("api_ingest", "ingestion_pipeline", "Document intake"),
    ("ingestion_pipeline", "document_store", "Persist context"),
    ("document_store", "api_plan", "Supply context"),
    ("api_plan", "coordinator_agent", "Launch objectives"),
    ("coordinator_agent", "planner_agent", "Share milestones"),
    ("planner_agent", "decomposer_agent", "Break into steps"),
    ("decomposer_agent", "reviewer_agent", "Send drafts"),
    ("reviewer_agent", "api_plan", "Return feedback"),
    ("planner_agent", "document_store", "Store plan artifacts"),
    ("api_plan", "api_export", "Finalize outputs"),
    ("document_store", "api_export", "Read artifacts"),
    ("api_ingest", "orchestrator", "Blueprint intake"),
];

// ============================================================================
// Snapshot types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Idle,
    Healthy,
    Degraded,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModuleMetrics {
    pub total_runs: usize,
    pub warning_count: usize,
    pub error_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p95_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilityNode {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub status: ModuleStatus,
    pub event_count: usize,
    pub run_ids: Vec<String>,
    pub last_event: Option<String>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub metrics: ModuleMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilityEdge {
    pub source: String,
    pub target: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilityCall {
    pub module_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub event: Option<String>,
    pub message: String,
    pub log_type: String,
    pub run_id: Option<String>,
    pub payload: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilitySnapshot {
    pub generated_at: DateTime<Utc>,
    pub session_started_at: Option<DateTime<Utc>>,
    pub nodes: Vec<ObservabilityNode>,
    pub edges: Vec<ObservabilityEdge>,
    pub calls: Vec<ObservabilityCall>,
}

#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    pub max_calls: usize,
    pub session_started_at: Option<DateTime<Utc>>,
    /// Inclusive bounds on record timestamps
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            max_calls: MAX_CALLS,
            session_started_at: None,
            start: None,
            end: None,
        }
    }
}

// ============================================================================
// Correlation
// ============================================================================

#[derive(Default)]
struct ModuleStats {
    event_count: usize,
    levels_seen: bool,
    run_ids: BTreeSet<String>,
    last_event: Option<String>,
    last_timestamp: Option<DateTime<Utc>>,
    last_message: Option<String>,
    latencies: Vec<f64>,
    warning_count: usize,
    error_count: usize,
}

impl ModuleStats {
    fn status(&self) -> ModuleStatus {
        if !self.levels_seen {
            ModuleStatus::Idle
        } else if self.error_count > 0 {
            ModuleStatus::Error
        } else if self.warning_count > 0 {
            ModuleStatus::Degraded
        } else {
            ModuleStatus::Healthy
        }
    }

    fn metrics(&self) -> ModuleMetrics {
        let mut metrics = ModuleMetrics {
            total_runs: self.run_ids.len(),
            warning_count: self.warning_count,
            error_count: self.error_count,
            last_message: self.last_message.clone().filter(|m| !m.is_empty()),
            ..ModuleMetrics::default()
        };
        if let Some(last) = self.latencies.last() {
            let avg = self.latencies.iter().sum::<f64>() / self.latencies.len() as f64;
            metrics.avg_latency_ms = Some(round2(avg));
            metrics.p95_latency_ms = Some(round2(percentile(&self.latencies, 0.95)));
            metrics.last_latency_ms = Some(round2(*last));
        }
        metrics
    }
}

/// Classify a record into a module: exact event name, then event prefix,
/// then logger prefix, then (prompt records only) agent name prefix.
pub fn match_module(record: &LogRecord) -> Option<&'static ModuleDefinition> {
    let event = record.event.as_deref().unwrap_or_default();
    if !event.is_empty() {
        if let Some(module) = MODULES.iter().find(|m| m.event_names.contains(&event)) {
            return Some(module);
        }
        if let Some(module) = MODULES
            .iter()
            .find(|m| m.event_prefixes.iter().any(|p| event.starts_with(p)))
        {
            return Some(module);
        }
    }
    if let Some(module) = MODULES
        .iter()
        .find(|m| m.logger_prefixes.iter().any(|p| record.logger.starts_with(p)))
    {
        return Some(module);
    }
    if record.log_type == PROMPT_LOG_TYPE {
        let agent = record
            .payload
            .get("agent")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        if !agent.is_empty() {
            return MODULES.iter().find(|m| {
                m.prompt_agents
                    .iter()
                    .any(|candidate| agent.starts_with(&candidate.to_lowercase()))
            });
        }
    }
    None
}

/// Build the dashboard snapshot from captured records.
pub fn build_observability_snapshot(
    records: &[LogRecord],
    options: &SnapshotOptions,
) -> ObservabilitySnapshot {
    let mut ordered: Vec<&LogRecord> = records
        .iter()
        .filter(|r| options.start.map_or(true, |start| r.timestamp >= start))
        .filter(|r| options.end.map_or(true, |end| r.timestamp <= end))
        .collect();
    // Stable sort keeps sequence order for equal timestamps.
    ordered.sort_by_key(|r| r.timestamp);

    let mut stats: HashMap<&'static str, ModuleStats> = MODULES
        .iter()
        .map(|m| (m.id, ModuleStats::default()))
        .collect();
    let mut active: HashMap<(&'static str, usize, String), DateTime<Utc>> = HashMap::new();
    let mut calls = Vec::new();

    for record in ordered {
        let Some(module) = match_module(record) else {
            continue;
        };
        let Some(entry) = stats.get_mut(module.id) else {
            continue;
        };
        entry.event_count += 1;
        entry.levels_seen = true;
        match record.level.to_uppercase().as_str() {
            "ERROR" | "CRITICAL" => entry.error_count += 1,
            "WARN" | "WARNING" => entry.warning_count += 1,
            _ => {}
        }
        if let Some(run_id) = &record.run_id {
            entry.run_ids.insert(run_id.clone());
        }
        if entry.last_timestamp.map_or(true, |last| record.timestamp >= last) {
            entry.last_timestamp = Some(record.timestamp);
            entry.last_event = record.event.clone();
            entry.last_message = Some(record.message.clone());
        }

        if let Some(event) = record.event.as_deref() {
            let run_key = record.run_id.clone().unwrap_or_else(|| GLOBAL_RUN.to_string());
            for (index, (start, end)) in module.duration_pairs.iter().enumerate() {
                let key = (module.id, index, run_key.clone());
                if event == *start {
                    active.insert(key, record.timestamp);
                } else if event == *end {
                    if let Some(started) = active.remove(&key) {
                        let elapsed = (record.timestamp - started).num_microseconds().unwrap_or(0);
                        entry.latencies.push((elapsed as f64 / 1000.0).max(0.0));
                    }
                }
            }
        }

        calls.push(ObservabilityCall {
            module_id: module.id.to_string(),
            timestamp: record.timestamp,
            level: record.level.clone(),
            event: record.event.clone(),
            message: record.message.clone(),
            log_type: record.log_type.clone(),
            run_id: record.run_id.clone(),
            payload: sanitize_payload(&record.payload),
        });
    }

    calls.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    calls.truncate(options.max_calls.max(1));

    let nodes = MODULES
        .iter()
        .map(|module| {
            let entry = stats.remove(module.id).unwrap_or_default();
            ObservabilityNode {
                id: module.id.to_string(),
                name: module.name.to_string(),
                category: module.category.to_string(),
                description: module.description.to_string(),
                status: entry.status(),
                event_count: entry.event_count,
                run_ids: entry.run_ids.iter().cloned().collect(),
                last_event: entry.last_event.clone(),
                last_timestamp: entry.last_timestamp,
                metrics: entry.metrics(),
            }
        })
        .collect();

    let edges = EDGES
        .iter()
        .map(|(source, target, label)| ObservabilityEdge {
            source: source.to_string(),
            target: target.to_string(),
            label: label.to_string(),
        })
        .collect();

    ObservabilitySnapshot {
        generated_at: Utc::now(),
        session_started_at: options.session_started_at,
        nodes,
        edges,
        calls,
    }
}

fn sanitize_payload(payload: &Map<String, Value>) -> Option<Map<String, Value>> {
    let cleaned: Map<String, Value> = payload
        .iter()
        .filter(|(key, _)| key.as_str() != "content")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Linear interpolation between the two nearest ranks.
pub fn percentile(values: &[f64], fraction: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut ordered = values.to_vec();
    ordered.sort_by(|a, b| a.total_cmp(b));
    let rank = fraction * (ordered.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return ordered[lower];
    }
    ordered[lower] + (ordered[upper] - ordered[lower]) * (rank - lower as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn node<'a>(snapshot: &'a ObservabilitySnapshot, id: &str) -> &'a ObservabilityNode {
        snapshot.nodes.iter().find(|n| n.id == id).unwrap()
    }

    #[test]
    fn test_percentile_interpolates() {
        assert_eq!(percentile(&[], 0.95), 0.0);
        assert_eq!(percentile(&[7.0], 0.95), 7.0);
        let p = percentile(&[10.0, 20.0, 30.0, 40.0, 50.0], 0.95);
        assert!((p - 48.0).abs() < 1e-9);
    }

    #[test]
    fn test_match_order() {
        let exact = LogRecord::new("INFO", "conductor_core::swarm::pipeline", "start")
            .with_event("planning.start");
        assert_eq!(match_module(&exact).unwrap().id, "api_plan");

        let prefixed = LogRecord::new("INFO", "conductor_core::swarm::pipeline", "x")
            .with_event("planning.coordinator.start");
        assert_eq!(match_module(&prefixed).unwrap().id, "coordinator_agent");

        let by_logger = LogRecord::new("INFO", "conductor_core::state::db", "x");
        assert_eq!(match_module(&by_logger).unwrap().id, "document_store");

        let prompt = LogRecord::new("INFO", "conductor_core::skills::llm_helpers", "x")
            .with_log_type("prompts")
            .with_payload("agent", Value::from("GraphAuditAgent"));
        assert_eq!(match_module(&prompt).unwrap().id, "orchestrator");

        let unmatched = LogRecord::new("INFO", "hyper::client", "x");
        assert!(match_module(&unmatched).is_none());
    }

    #[test]
    fn test_durations_status_and_calls() {
        let t0 = Utc::now();
        let records = vec![
            LogRecord::new("INFO", "core", "Coordinator started")
                .with_event("planning.coordinator.start")
                .with_run_id("run-1")
                .at(t0),
            LogRecord::new("WARN", "core", "fallback")
                .with_event("agent.coordinator.fallback")
                .with_run_id("run-1")
                .with_payload("content", Value::from("secret"))
                .at(t0 + Duration::milliseconds(50)),
            LogRecord::new("INFO", "core", "Coordinator finished")
                .with_event("planning.coordinator.complete")
                .with_run_id("run-1")
                .with_payload("objectives", Value::from(5))
                .at(t0 + Duration::milliseconds(120)),
            LogRecord::new("ERROR", "core", "export failed")
                .with_event("planning.export.missing")
                .with_run_id("run-2")
                .at(t0 + Duration::milliseconds(200)),
        ];
        let snapshot = build_observability_snapshot(&records, &SnapshotOptions::default());

        let coordinator = node(&snapshot, "coordinator_agent");
        assert_eq!(coordinator.status, ModuleStatus::Degraded);
        assert_eq!(coordinator.event_count, 3);
        assert_eq!(coordinator.run_ids, vec!["run-1"]);
        assert_eq!(coordinator.metrics.warning_count, 1);
        assert_eq!(coordinator.metrics.avg_latency_ms, Some(120.0));
        assert_eq!(coordinator.metrics.last_message.as_deref(), Some("Coordinator finished"));
        assert_eq!(
            coordinator.last_event.as_deref(),
            Some("planning.coordinator.complete")
        );

        assert_eq!(node(&snapshot, "api_export").status, ModuleStatus::Error);
        assert_eq!(node(&snapshot, "planner_agent").status, ModuleStatus::Idle);
        assert_eq!(node(&snapshot, "planner_agent").metrics.avg_latency_ms, None);

        assert_eq!(snapshot.calls.len(), 4);
        assert_eq!(snapshot.calls[0].event.as_deref(), Some("planning.export.missing"));
        // `content` is stripped and the emptied payload dropped.
        assert_eq!(snapshot.calls[2].payload, None);
        assert_eq!(snapshot.edges.len(), EDGES.len());
        assert_eq!(snapshot.nodes.len(), MODULES.len());
    }

    #[test]
    fn test_calls_are_capped() {
        let records: Vec<LogRecord> = (0..5)
            .map(|i| LogRecord::new("INFO", "core", format!("m{i}")).with_event("ingest.complete"))
            .collect();
        let options = SnapshotOptions {
            max_calls: 2,
            ..SnapshotOptions::default()
        };
        let snapshot = build_observability_snapshot(&records, &options);
        assert_eq!(snapshot.calls.len(), 2);
        assert_eq!(node(&snapshot, "ingestion_pipeline").event_count, 5);
    }
}

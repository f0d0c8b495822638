//! # Plan Database
//!
//! SQLite-backed [`PlanStore`]. Runs and chunks get their own tables; every
//! other artifact is a JSON document keyed by `(run_id, kind)`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::plan::{
    AgentReport, DocumentStats, MilestoneObjective, PlanStyle, PromptPlan, PromptStep, RunRecord,
    TargetStack,
};
use super::store::PlanStore;

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

const KIND_OBJECTIVES: &str = "objectives";
const KIND_PLAN: &str = "plan";
const KIND_STEPS: &str = "steps";
const KIND_REPORT: &str = "report";

pub struct SqlitePlanStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePlanStore {
    /// Open or create the database at `path`
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path.as_ref()).context("Failed to open plan database")?;
        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }

    /// Migration to version 1 - runs, chunks and artifact documents
    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                source TEXT,
                stats_json TEXT NOT NULL DEFAULT '{}',
                target_stack_json TEXT,
                style TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
                idx INTEGER NOT NULL,
                text TEXT NOT NULL,
                PRIMARY KEY (run_id, idx)
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (run_id, kind)
            )
            "#,
            [],
        )?;

        tracing::info!(
            event = "store.migrated",
            schema_version = SCHEMA_VERSION,
            "Plan database initialized"
        );
        Ok(())
    }

    fn put_artifact<T: Serialize + ?Sized>(&self, run_id: &str, kind: &str, value: &T) -> Result<()> {
        let data = serde_json::to_string(value)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO artifacts (run_id, kind, data, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(run_id, kind) DO UPDATE SET
                data = ?3,
                updated_at = datetime('now')
            "#,
            params![run_id, kind, data],
        )
        .with_context(|| format!("Failed to store {} for run {}", kind, run_id))?;
        Ok(())
    }

    fn get_artifact<T: DeserializeOwned>(&self, run_id: &str, kind: &str) -> Result<Option<T>> {
        let conn = self.lock()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM artifacts WHERE run_id = ?1 AND kind = ?2",
                params![run_id, kind],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|data| {
            serde_json::from_str(&data)
                .with_context(|| format!("Corrupt {} artifact for run {}", kind, run_id))
        })
        .transpose()
    }
}

impl PlanStore for SqlitePlanStore {
    fn register_run(&self, run_id: &str, source: Option<&str>, stats: &DocumentStats) -> Result<()> {
        let stats_json = serde_json::to_string(stats)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO runs (run_id, source, stats_json, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(run_id) DO UPDATE SET
                source = ?2,
                stats_json = ?3
            "#,
            params![run_id, source, stats_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn run_exists(&self, run_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let conn = self.lock()?;
        let row: Option<(Option<String>, String, Option<String>, Option<String>, String)> = conn
            .query_row(
                "SELECT source, stats_json, target_stack_json, style, created_at FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        let Some((source, stats_json, stack_json, style, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(RunRecord {
            run_id: run_id.to_string(),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|ts| ts.with_timezone(&Utc))
                .context("Invalid run timestamp")?,
            source,
            stats: serde_json::from_str(&stats_json)?,
            target_stack: stack_json
                .map(|json| serde_json::from_str(&json))
                .transpose()?,
            style: style.as_deref().and_then(PlanStyle::from_str),
        }))
    }

    fn attach_plan_context(&self, run_id: &str, target_stack: &TargetStack, style: PlanStyle) -> Result<()> {
        let stack_json = serde_json::to_string(target_stack)?;
        let conn = self.lock()?;
        conn.execute(
            "UPDATE runs SET target_stack_json = ?2, style = ?3 WHERE run_id = ?1",
            params![run_id, stack_json, style.as_str()],
        )?;
        Ok(())
    }

    fn add_chunks(&self, run_id: &str, chunks: &[String]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE run_id = ?1", params![run_id])?;
        for (idx, text) in chunks.iter().enumerate() {
            tx.execute(
                "INSERT INTO chunks (run_id, idx, text) VALUES (?1, ?2, ?3)",
                params![run_id, idx as i64, text],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn chunks(&self, run_id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT text FROM chunks WHERE run_id = ?1 ORDER BY idx")?;
        let rows = stmt.query_map(params![run_id], |row| row.get(0))?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }
        Ok(chunks)
    }

    fn upsert_objectives(&self, run_id: &str, objectives: &[MilestoneObjective]) -> Result<()> {
        self.put_artifact(run_id, KIND_OBJECTIVES, objectives)
    }

    fn objectives(&self, run_id: &str) -> Result<Vec<MilestoneObjective>> {
        Ok(self.get_artifact(run_id, KIND_OBJECTIVES)?.unwrap_or_default())
    }

    fn upsert_plan(&self, run_id: &str, plan: &PromptPlan) -> Result<()> {
        self.put_artifact(run_id, KIND_PLAN, plan)
    }

    fn plan(&self, run_id: &str) -> Result<Option<PromptPlan>> {
        self.get_artifact(run_id, KIND_PLAN)
    }

    fn upsert_steps(&self, run_id: &str, steps: &[PromptStep]) -> Result<()> {
        self.put_artifact(run_id, KIND_STEPS, steps)
    }

    fn steps(&self, run_id: &str) -> Result<Vec<PromptStep>> {
        Ok(self.get_artifact(run_id, KIND_STEPS)?.unwrap_or_default())
    }

    fn upsert_report(&self, run_id: &str, report: &AgentReport) -> Result<()> {
        self.put_artifact(run_id, KIND_REPORT, report)
    }

    fn report(&self, run_id: &str) -> Result<Option<AgentReport>> {
        self.get_artifact(run_id, KIND_REPORT)
    }

    fn delete_run(&self, run_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM runs WHERE run_id = ?1", params![run_id])?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::store::fixtures::step;
    use tempfile::tempdir;

    fn stats() -> DocumentStats {
        DocumentStats {
            word_count: 10,
            char_count: 60,
            chunk_count: 1,
        }
    }

    #[test]
    fn test_open_creates_tables() {
        let dir = tempdir().unwrap();
        let db = SqlitePlanStore::open_at(dir.path().join("nested/plans.db")).unwrap();
        let conn = db.lock().unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"runs".to_string()));
        assert!(tables.contains(&"chunks".to_string()));
        assert!(tables.contains(&"artifacts".to_string()));
    }

    #[test]
    fn test_schema_version_tracking() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plans.db");

        // Reopening must not rerun migrations
        drop(SqlitePlanStore::open_at(&path).unwrap());
        let db = SqlitePlanStore::open_at(&path).unwrap();
        let conn = db.lock().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_run_record_roundtrip() {
        let db = SqlitePlanStore::open_in_memory().unwrap();
        db.register_run("run-1", Some("notes.txt"), &stats()).unwrap();
        db.attach_plan_context("run-1", &TargetStack::default(), PlanStyle::Creative)
            .unwrap();

        let record = db.run("run-1").unwrap().unwrap();
        assert_eq!(record.source.as_deref(), Some("notes.txt"));
        assert_eq!(record.stats, stats());
        assert_eq!(record.style, Some(PlanStyle::Creative));
        assert_eq!(record.target_stack, Some(TargetStack::default()));
        assert!(db.run("missing").unwrap().is_none());
    }

    #[test]
    fn test_chunks_keep_order_and_replace() {
        let db = SqlitePlanStore::open_in_memory().unwrap();
        db.register_run("run-1", None, &stats()).unwrap();
        db.add_chunks("run-1", &["b".to_string(), "a".to_string()]).unwrap();
        assert_eq!(db.chunks("run-1").unwrap(), vec!["b", "a"]);
        db.add_chunks("run-1", &["c".to_string()]).unwrap();
        assert_eq!(db.chunks("run-1").unwrap(), vec!["c"]);
    }

    #[test]
    fn test_artifacts_last_write_wins_and_cascade() {
        let db = SqlitePlanStore::open_in_memory().unwrap();
        db.register_run("run-1", None, &stats()).unwrap();
        db.upsert_steps("run-1", &[step("step-001", "A")]).unwrap();
        db.upsert_steps("run-1", &[step("step-001", "B")]).unwrap();
        assert_eq!(db.steps("run-1").unwrap()[0].title, "B");

        let plan = PromptPlan {
            goals: vec!["Ship".to_string()],
            ..PromptPlan::default()
        };
        db.upsert_plan("run-1", &plan).unwrap();
        assert_eq!(db.plan("run-1").unwrap(), Some(plan));

        assert!(db.delete_run("run-1").unwrap());
        assert!(db.steps("run-1").unwrap().is_empty());
        assert!(db.plan("run-1").unwrap().is_none());
        assert!(!db.run_exists("run-1").unwrap());
    }
}

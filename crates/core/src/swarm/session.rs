//! # Orchestrator Sessions
//!
//! Registry of live orchestration sessions keyed by run id. The registry
//! lock only guards map operations; each session carries its own async
//! mutex so a slow model call in one session never blocks another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::orchestrator::CodingOrchestrator;

pub struct OrchestratorSession {
    pub orchestrator: CodingOrchestrator,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrchestratorSession {
    pub fn new(orchestrator: CodingOrchestrator, source: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            orchestrator,
            source,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

pub type SessionHandle = Arc<tokio::sync::Mutex<OrchestratorSession>>;

/// Storage for orchestration sessions
pub trait SessionStore: Send + Sync {
    fn get(&self, run_id: &str) -> Result<Option<SessionHandle>>;
    fn put(&self, run_id: &str, session: SessionHandle) -> Result<()>;
    fn remove(&self, run_id: &str) -> Result<bool>;
    /// Run ids in creation order
    fn run_ids(&self) -> Result<Vec<String>>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, (u64, SessionHandle)>>,
    next_seq: Mutex<u64>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> Result<u64> {
        let mut seq = self
            .next_seq
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        *seq += 1;
        Ok(*seq)
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, run_id: &str) -> Result<Option<SessionHandle>> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(sessions.get(run_id).map(|(_, handle)| handle.clone()))
    }

    fn put(&self, run_id: &str, session: SessionHandle) -> Result<()> {
        let seq = self.next_seq()?;
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let seq = sessions.get(run_id).map(|(existing, _)| *existing).unwrap_or(seq);
        sessions.insert(run_id.to_string(), (seq, session));
        Ok(())
    }

    fn remove(&self, run_id: &str) -> Result<bool> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(sessions.remove(run_id).is_some())
    }

    fn run_ids(&self) -> Result<Vec<String>> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let mut entries: Vec<(u64, String)> = sessions
            .iter()
            .map(|(run_id, (seq, _))| (*seq, run_id.clone()))
            .collect();
        entries.sort();
        Ok(entries.into_iter().map(|(_, run_id)| run_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::orchestrator::OrchestratorAgents;

    fn handle(run_id: &str) -> SessionHandle {
        let orchestrator =
            CodingOrchestrator::new(Some(run_id.to_string()), OrchestratorAgents::offline());
        Arc::new(tokio::sync::Mutex::new(OrchestratorSession::new(orchestrator, None)))
    }

    #[test]
    fn test_put_get_remove() {
        let store = InMemorySessionStore::new();
        store.put("orch-b", handle("orch-b")).unwrap();
        store.put("orch-a", handle("orch-a")).unwrap();

        assert!(store.get("orch-a").unwrap().is_some());
        assert!(store.get("orch-c").unwrap().is_none());
        assert_eq!(store.run_ids().unwrap(), vec!["orch-b", "orch-a"]);

        assert!(store.remove("orch-b").unwrap());
        assert!(!store.remove("orch-b").unwrap());
        assert_eq!(store.run_ids().unwrap(), vec!["orch-a"]);
    }

    #[test]
    fn test_replacing_keeps_position() {
        let store = InMemorySessionStore::new();
        store.put("orch-a", handle("orch-a")).unwrap();
        store.put("orch-b", handle("orch-b")).unwrap();
        store.put("orch-a", handle("orch-a")).unwrap();
        assert_eq!(store.run_ids().unwrap(), vec!["orch-a", "orch-b"]);
    }

    #[test]
    fn test_session_locks_are_independent() {
        let store = InMemorySessionStore::new();
        store.put("orch-a", handle("orch-a")).unwrap();
        store.put("orch-b", handle("orch-b")).unwrap();

        let a = store.get("orch-a").unwrap().unwrap();
        let _held = tokio_test::block_on(a.lock());
        assert!(a.try_lock().is_err());

        // Registry and other sessions stay usable while one session is held.
        let b = store.get("orch-b").unwrap().unwrap();
        let session = b.try_lock().unwrap();
        assert_eq!(session.orchestrator.run_id(), "orch-b");
        assert_eq!(store.run_ids().unwrap().len(), 2);
    }
}

//! # Orchestrator Service
//!
//! Session-addressed facade over [`CodingOrchestrator`]. Every operation
//! looks the session up by run id, locks only that session, and bumps its
//! `updated_at` on success.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::state::blueprint::{
    BlueprintSummary, GraphCoverageSnapshot, MilestonePlan, OrchestratorResult, PromptBundle,
};

use super::orchestrator::{CodingOrchestrator, OrchestrationStage, OrchestratorAgents};
use super::session::{InMemorySessionStore, OrchestratorSession, SessionHandle, SessionStore};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryEnvelope {
    pub run_id: String,
    pub summary: BlueprintSummary,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MilestonesEnvelope {
    pub run_id: String,
    pub plan: MilestonePlan,
    pub graph: GraphCoverageSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptsEnvelope {
    pub run_id: String,
    pub prompts: PromptBundle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalResponse {
    pub run_id: String,
    pub approved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStatus {
    pub run_id: String,
    #[serde(default)]
    pub source: Option<String>,
    pub stage: OrchestrationStage,
    pub summary_ready: bool,
    pub summary_approved: bool,
    pub milestones_ready: bool,
    pub milestones_approved: bool,
    pub prompts_ready: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionStatus {
    fn describe(session: &OrchestratorSession) -> Self {
        let orchestrator = &session.orchestrator;
        Self {
            run_id: orchestrator.run_id().to_string(),
            source: session.source.clone(),
            stage: orchestrator.stage(),
            summary_ready: orchestrator.summary_ready(),
            summary_approved: orchestrator.summary_approved(),
            milestones_ready: orchestrator.milestones_ready(),
            milestones_approved: orchestrator.milestones_approved(),
            prompts_ready: orchestrator.prompts_ready(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct OrchestratorService {
    store: Arc<dyn SessionStore>,
    agents: OrchestratorAgents,
}

impl OrchestratorService {
    pub fn new(store: Arc<dyn SessionStore>, agents: OrchestratorAgents) -> Self {
        Self { store, agents }
    }

    /// In-memory registry with the given agents
    pub fn in_memory(agents: OrchestratorAgents) -> Self {
        Self::new(Arc::new(InMemorySessionStore::new()), agents)
    }

    fn session(&self, run_id: &str) -> Result<SessionHandle, WorkflowError> {
        self.store
            .get(run_id)?
            .ok_or_else(|| WorkflowError::SessionNotFound(run_id.to_string()))
    }

    /// Start a session and synthesize its first summary.
    pub async fn create_session(
        &self,
        blueprint: &str,
        source: Option<String>,
    ) -> Result<SummaryEnvelope, WorkflowError> {
        let mut orchestrator = CodingOrchestrator::new(None, self.agents.clone());
        let summary = orchestrator.ingest_blueprint(blueprint).await?.clone();
        let run_id = orchestrator.run_id().to_string();

        let session = OrchestratorSession::new(orchestrator, source.clone());
        self.store
            .put(&run_id, Arc::new(tokio::sync::Mutex::new(session)))?;
        tracing::info!(
            event = "orchestrator.session.created",
            run_id = %run_id,
            source = source.as_deref().unwrap_or("inline"),
            "Orchestrator session created"
        );
        Ok(SummaryEnvelope {
            run_id,
            summary,
            source,
        })
    }

    pub async fn regenerate_summary(&self, run_id: &str) -> Result<SummaryEnvelope, WorkflowError> {
        let handle = self.session(run_id)?;
        let mut session = handle.lock().await;
        let summary = session.orchestrator.regenerate_summary().await?.clone();
        session.touch();
        Ok(SummaryEnvelope {
            run_id: run_id.to_string(),
            summary,
            source: session.source.clone(),
        })
    }

    pub async fn summary(&self, run_id: &str) -> Result<SummaryEnvelope, WorkflowError> {
        let handle = self.session(run_id)?;
        let session = handle.lock().await;
        let summary = session
            .orchestrator
            .summary()
            .cloned()
            .ok_or_else(|| WorkflowError::invalid_state("Summary not available for this run."))?;
        Ok(SummaryEnvelope {
            run_id: run_id.to_string(),
            summary,
            source: session.source.clone(),
        })
    }

    pub async fn approve_summary(
        &self,
        run_id: &str,
        approved: bool,
    ) -> Result<ApprovalResponse, WorkflowError> {
        let handle = self.session(run_id)?;
        let mut session = handle.lock().await;
        session.orchestrator.approve_summary(approved)?;
        session.touch();
        Ok(ApprovalResponse {
            run_id: run_id.to_string(),
            approved,
        })
    }

    pub async fn generate_milestones(&self, run_id: &str) -> Result<MilestonesEnvelope, WorkflowError> {
        let handle = self.session(run_id)?;
        let mut session = handle.lock().await;
        let (plan, graph) = session.orchestrator.generate_milestones().await?;
        session.touch();
        Ok(MilestonesEnvelope {
            run_id: run_id.to_string(),
            plan,
            graph,
        })
    }

    /// Current milestones with the audited (or live) coverage snapshot
    pub async fn milestones(&self, run_id: &str) -> Result<MilestonesEnvelope, WorkflowError> {
        let handle = self.session(run_id)?;
        let session = handle.lock().await;
        let plan = session.orchestrator.milestone_plan().cloned().ok_or_else(|| {
            WorkflowError::invalid_state("Milestones have not been generated for this run.")
        })?;
        Ok(MilestonesEnvelope {
            run_id: run_id.to_string(),
            plan,
            graph: session.orchestrator.current_snapshot(),
        })
    }

    pub async fn approve_milestones(
        &self,
        run_id: &str,
        approved: bool,
    ) -> Result<ApprovalResponse, WorkflowError> {
        let handle = self.session(run_id)?;
        let mut session = handle.lock().await;
        session.orchestrator.approve_milestones(approved)?;
        session.touch();
        Ok(ApprovalResponse {
            run_id: run_id.to_string(),
            approved,
        })
    }

    pub async fn generate_prompts(&self, run_id: &str) -> Result<PromptsEnvelope, WorkflowError> {
        let handle = self.session(run_id)?;
        let mut session = handle.lock().await;
        let prompts = session.orchestrator.generate_prompts().await?.clone();
        session.touch();
        Ok(PromptsEnvelope {
            run_id: run_id.to_string(),
            prompts,
        })
    }

    pub async fn prompts(&self, run_id: &str) -> Result<PromptsEnvelope, WorkflowError> {
        let handle = self.session(run_id)?;
        let session = handle.lock().await;
        let prompts = session.orchestrator.prompts().cloned().ok_or_else(|| {
            WorkflowError::invalid_state("Prompts have not been generated for this run.")
        })?;
        Ok(PromptsEnvelope {
            run_id: run_id.to_string(),
            prompts,
        })
    }

    pub async fn finalize(&self, run_id: &str) -> Result<OrchestratorResult, WorkflowError> {
        let handle = self.session(run_id)?;
        let mut session = handle.lock().await;
        let result = session.orchestrator.finalize()?;
        session.touch();
        Ok(result)
    }

    /// Read the finalized result without finalizing.
    pub async fn result(&self, run_id: &str) -> Result<OrchestratorResult, WorkflowError> {
        let handle = self.session(run_id)?;
        let session = handle.lock().await;
        session.orchestrator.result().cloned().ok_or_else(|| {
            WorkflowError::invalid_state("Workflow has not been finalized for this run.")
        })
    }

    pub async fn describe_session(&self, run_id: &str) -> Result<SessionStatus, WorkflowError> {
        let handle = self.session(run_id)?;
        let session = handle.lock().await;
        Ok(SessionStatus::describe(&session))
    }

    /// Status of every live session, oldest first
    pub async fn list_sessions(&self) -> Result<Vec<SessionStatus>, WorkflowError> {
        let mut statuses = Vec::new();
        for run_id in self.store.run_ids()? {
            // Discarded between listing and lookup.
            let Some(handle) = self.store.get(&run_id)? else {
                continue;
            };
            let session = handle.lock().await;
            statuses.push(SessionStatus::describe(&session));
        }
        Ok(statuses)
    }

    pub fn discard_session(&self, run_id: &str) -> Result<bool, WorkflowError> {
        let removed = self.store.remove(run_id)?;
        if removed {
            tracing::info!(
                event = "orchestrator.session.discarded",
                run_id = %run_id,
                "Orchestrator session discarded"
            );
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLUEPRINT: &str = "Inventory tracker for small warehouses.\n\
        Staff scan items into bins.\n\
        A reporting API feeds the dashboard.\n\
        Risk: barcode hardware varies by site.\n";

    fn service() -> OrchestratorService {
        OrchestratorService::in_memory(OrchestratorAgents::offline())
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let service = service();
        let created = service
            .create_session(BLUEPRINT, Some("blueprint.md".to_string()))
            .await
            .unwrap();
        let run_id = created.run_id.clone();
        assert!(run_id.starts_with("orch-"));
        assert_eq!(created.source.as_deref(), Some("blueprint.md"));

        let status = service.describe_session(&run_id).await.unwrap();
        assert!(status.summary_ready);
        assert!(!status.summary_approved);
        assert_eq!(status.stage, OrchestrationStage::Summarized);

        service.approve_summary(&run_id, true).await.unwrap();
        let milestones = service.generate_milestones(&run_id).await.unwrap();
        assert_eq!(milestones.plan.milestones.len(), 5);
        assert_eq!(service.milestones(&run_id).await.unwrap(), milestones);

        service.approve_milestones(&run_id, true).await.unwrap();
        service.generate_prompts(&run_id).await.unwrap();

        // Reading the result does not finalize.
        let err = service.result(&run_id).await.unwrap_err();
        assert_eq!(err.to_string(), "Workflow has not been finalized for this run.");
        let status = service.describe_session(&run_id).await.unwrap();
        assert_eq!(status.stage, OrchestrationStage::PromptsGenerated);

        let result = service.finalize(&run_id).await.unwrap();
        assert_eq!(result.run_id, run_id);
        assert_eq!(result.prompts.prompts.len(), 5);
        assert_eq!(service.result(&run_id).await.unwrap(), result);

        let status = service.describe_session(&run_id).await.unwrap();
        assert_eq!(status.stage, OrchestrationStage::Finalized);
        assert!(status.updated_at >= status.created_at);
    }

    #[tokio::test]
    async fn test_missing_artifacts_are_invalid_state() {
        let service = service();
        let run_id = service.create_session(BLUEPRINT, None).await.unwrap().run_id;

        let err = service.milestones(&run_id).await.unwrap_err();
        assert_eq!(err.to_string(), "Milestones have not been generated for this run.");
        let err = service.prompts(&run_id).await.unwrap_err();
        assert_eq!(err.to_string(), "Prompts have not been generated for this run.");
        assert!(matches!(
            service.finalize(&run_id).await,
            Err(WorkflowError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let service = service();
        assert!(matches!(
            service.summary("orch-missing").await,
            Err(WorkflowError::SessionNotFound(_))
        ));
        assert!(!service.discard_session("orch-missing").unwrap());
    }

    #[tokio::test]
    async fn test_list_and_discard() {
        let service = service();
        let first = service.create_session(BLUEPRINT, None).await.unwrap().run_id;
        let second = service.create_session(BLUEPRINT, None).await.unwrap().run_id;

        let listed: Vec<String> = service
            .list_sessions()
            .await
            .unwrap()
            .into_iter()
            .map(|status| status.run_id)
            .collect();
        assert_eq!(listed, vec![first.clone(), second.clone()]);

        assert!(service.discard_session(&first).unwrap());
        assert_eq!(service.list_sessions().await.unwrap().len(), 1);
        assert!(matches!(
            service.describe_session(&first).await,
            Err(WorkflowError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_blueprint_creates_nothing() {
        let service = service();
        assert!(matches!(
            service.create_session("   ", None).await,
            Err(WorkflowError::InvalidInput(_))
        ));
        assert!(service.list_sessions().await.unwrap().is_empty());
    }
}

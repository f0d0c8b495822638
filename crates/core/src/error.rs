//! # Error Types
//!
//! Typed failures for the generation stages and the approval-gated
//! orchestration workflow. Persistence and glue code use `anyhow`; these
//! enums are what callers match on.

use crate::models::{Completion, FinishReason};

/// Failure of a single model-backed generation stage.
///
/// Stages never surface these to their callers as hard failures; they are
/// logged and the heuristic output is used instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    /// The model text is not valid JSON after fence stripping.
    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    /// Valid JSON of the wrong shape (missing key, list where object expected).
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// The model returned no usable content.
    #[error("generation failed (finish_reason={finish_reason:?}, response_id={response_id:?}): {details}")]
    GenerationFailed {
        finish_reason: Option<FinishReason>,
        refusal: Option<String>,
        response_id: Option<String>,
        details: String,
    },

    /// Every escalation attempt hit the output-length limit.
    #[error("generation exhausted after {attempts} attempts")]
    GenerationExhausted { attempts: usize },

    /// The completion collaborator could not be reached or rejected the call.
    #[error("transport error: {0}")]
    Transport(String),
}

impl GenerationError {
    /// Build a `GenerationFailed` carrying the diagnostics of an empty completion.
    pub fn failed(completion: &Completion, details: impl Into<String>) -> Self {
        GenerationError::GenerationFailed {
            finish_reason: completion.finish_reason.clone(),
            refusal: completion.refusal.clone(),
            response_id: completion.response_id.clone(),
            details: details.into(),
        }
    }

    /// Short machine-readable label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::MalformedOutput(_) => "malformed_output",
            GenerationError::SchemaViolation(_) => "schema_violation",
            GenerationError::GenerationFailed { .. } => "generation_failed",
            GenerationError::GenerationExhausted { .. } => "generation_exhausted",
            GenerationError::Transport(_) => "transport",
        }
    }
}

/// Errors surfaced by the planning pipeline, the orchestration workflow and
/// the session service.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// An operation was invoked before its prerequisite approval or artifact.
    #[error("{0}")]
    InvalidState(String),

    #[error("Unknown orchestration session: {0}")]
    SessionNotFound(String),

    /// A run or artifact that should exist in the plan store does not.
    #[error("{0}")]
    NotFound(String),

    /// Caller input rejected before any work was done.
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl WorkflowError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        WorkflowError::InvalidState(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        WorkflowError::InvalidInput(message.into())
    }

    /// `NotFound` for a planning run id that was never ingested
    pub fn unknown_run(run_id: &str) -> Self {
        WorkflowError::NotFound(format!("Planning run {} was not found.", run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_carries_completion_diagnostics() {
        let completion = Completion {
            content: None,
            finish_reason: Some(FinishReason::ContentFilter),
            refusal: Some("cannot help".to_string()),
            usage: None,
            response_id: Some("resp-1".to_string()),
            model: Some("gpt-5".to_string()),
        };

        match GenerationError::failed(&completion, "empty content") {
            GenerationError::GenerationFailed {
                finish_reason,
                refusal,
                response_id,
                details,
            } => {
                assert_eq!(finish_reason, Some(FinishReason::ContentFilter));
                assert_eq!(refusal.as_deref(), Some("cannot help"));
                assert_eq!(response_id.as_deref(), Some("resp-1"));
                assert_eq!(details, "empty content");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_state_message_is_verbatim() {
        let err = WorkflowError::invalid_state("Summary must be approved before generating milestones.");
        assert_eq!(
            err.to_string(),
            "Summary must be approved before generating milestones."
        );
    }
}

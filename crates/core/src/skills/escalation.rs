//! # Generation Escalation
//!
//! Drives one model call through an ordered list of attempts. Any non-empty
//! content is accepted. An empty response cut off by the output-length limit
//! moves on to the next attempt, which carries a smaller context budget and a
//! larger token ceiling. Any other empty response is terminal.

use serde::{Deserialize, Serialize};

use crate::config::RetryTuning;
use crate::error::GenerationError;
use crate::models::{ChatCompletion, Completion, CompletionRequest};

/// Budget for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationAttempt {
    /// Character ceiling for the prompt context
    pub context_limit: usize,
    /// Completion-token ceiling
    pub max_tokens: u32,
    /// Maximum number of prior summaries to include, `None` for all
    pub summary_limit: Option<usize>,
}

/// Ordered attempts. Token ceilings never decrease from one attempt to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationPlan {
    attempts: Vec<EscalationAttempt>,
}

impl EscalationPlan {
    pub fn new(attempts: Vec<EscalationAttempt>) -> Self {
        let mut floor = 0u32;
        let attempts = attempts
            .into_iter()
            .map(|mut attempt| {
                attempt.max_tokens = attempt.max_tokens.max(floor).max(1);
                floor = attempt.max_tokens;
                attempt
            })
            .collect();
        Self { attempts }
    }

    pub fn single(context_limit: usize, max_tokens: u32) -> Self {
        Self::new(vec![EscalationAttempt {
            context_limit,
            max_tokens,
            summary_limit: None,
        }])
    }

    /// Base attempt followed by one shrunk-context, boosted-token retry.
    pub fn with_retry(context_limit: usize, max_tokens: u32, retry: &RetryTuning) -> Self {
        Self::new(vec![
            EscalationAttempt {
                context_limit,
                max_tokens,
                summary_limit: None,
            },
            EscalationAttempt {
                context_limit: retry.shrunk_context(context_limit),
                max_tokens: retry.boosted_tokens(max_tokens),
                summary_limit: Some(retry.summary_window),
            },
        ])
    }

    pub fn attempts(&self) -> &[EscalationAttempt] {
        &self.attempts
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

/// Content accepted from an attempt.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub content: String,
    /// 0-based index of the attempt that produced it
    pub attempt: usize,
    pub completion: Completion,
}

/// Run the plan against `client`, building each request with `build_request`.
///
/// Makes at most `plan.len()` calls.
pub async fn run_escalation<F>(
    plan: &EscalationPlan,
    client: &dyn ChatCompletion,
    mut build_request: F,
) -> Result<Accepted, GenerationError>
where
    F: FnMut(usize, &EscalationAttempt) -> CompletionRequest,
{
    let total = plan.len();
    for (index, attempt) in plan.attempts().iter().enumerate() {
        let request = build_request(index, attempt);
        let completion = client.complete(&request).await?;

        if let Some(content) = completion.trimmed_content() {
            return Ok(Accepted {
                content: content.to_string(),
                attempt: index,
                completion: completion.clone(),
            });
        }

        if !completion.is_truncated() {
            return Err(GenerationError::failed(&completion, "empty completion content"));
        }
        tracing::warn!(
            event = "llm.truncated",
            attempt = index + 1,
            attempts = total,
            max_tokens = attempt.max_tokens,
            context_limit = attempt.context_limit,
            "Completion hit the output-length limit with no content"
        );
    }

    Err(GenerationError::GenerationExhausted { attempts: total })
}

//! # LLM Helpers
//!
//! Shared plumbing for model-backed stages: a [`StageLlm`] bundles the
//! completion client with the stage's model configuration and runs an
//! escalation plan while logging every prompt and response to the
//! `prompts` log stream.

use std::sync::Arc;

use crate::error::GenerationError;
use crate::models::{ChatCompletion, ChatMessage, CompletionRequest, ModelConfig};

use super::escalation::{run_escalation, Accepted, EscalationAttempt, EscalationPlan};

/// Log stream tag carried by prompt records.
pub const PROMPT_LOG_TYPE: &str = "prompts";

/// Model access for one stage.
#[derive(Clone)]
pub struct StageLlm {
    pub client: Arc<dyn ChatCompletion>,
    pub config: ModelConfig,
    /// Agent name recorded on prompt log records (e.g. "CoordinatorAgent")
    pub agent: &'static str,
}

impl std::fmt::Debug for StageLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageLlm")
            .field("agent", &self.agent)
            .field("model", &self.config.model)
            .finish()
    }
}

impl StageLlm {
    pub fn new(client: Arc<dyn ChatCompletion>, config: ModelConfig, agent: &'static str) -> Self {
        Self {
            client,
            config,
            agent,
        }
    }

    pub fn request(&self, system: &str, user: impl Into<String>, max_tokens: u32) -> CompletionRequest {
        CompletionRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: self.config.temperature,
            max_tokens,
        }
    }

    /// Run `plan`, building the user prompt for each attempt with `user_prompt`.
    pub async fn generate<F>(
        &self,
        run_id: &str,
        plan: &EscalationPlan,
        system: &str,
        mut user_prompt: F,
    ) -> Result<Accepted, GenerationError>
    where
        F: FnMut(&EscalationAttempt) -> String,
    {
        let agent = self.agent;
        let result = run_escalation(plan, self.client.as_ref(), |index, attempt| {
            let user = user_prompt(attempt);
            log_prompt(agent, run_id, &self.config.model, index + 1, &user);
            self.request(system, user, attempt.max_tokens)
        })
        .await;

        match &result {
            Ok(accepted) => {
                let (prompt_tokens, completion_tokens) = accepted
                    .completion
                    .usage
                    .as_ref()
                    .map(|u| (u.prompt_tokens, u.completion_tokens))
                    .unwrap_or((0, 0));
                tracing::info!(
                    log_type = PROMPT_LOG_TYPE,
                    event = "prompt.response",
                    agent = agent,
                    run_id = %run_id,
                    attempt = accepted.attempt + 1,
                    prompt_tokens,
                    completion_tokens,
                    chars = accepted.content.chars().count(),
                    content = %accepted.content,
                    "Model response accepted"
                );
            }
            Err(e) => {
                tracing::warn!(
                    log_type = PROMPT_LOG_TYPE,
                    event = "prompt.failed",
                    agent = agent,
                    run_id = %run_id,
                    error_kind = e.kind(),
                    error = %e,
                    "Model call produced no usable output"
                );
            }
        }
        result
    }
}

/// Record an outgoing prompt on the `prompts` log stream.
pub fn log_prompt(agent: &str, run_id: &str, model: &str, attempt: usize, prompt: &str) {
    tracing::info!(
        log_type = PROMPT_LOG_TYPE,
        event = "prompt.request",
        agent = agent,
        run_id = %run_id,
        model = %model,
        attempt,
        chars = prompt.chars().count(),
        content = %prompt,
        "Prompt dispatched"
    );
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted completion double for stage tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::GenerationError;
    use crate::models::{ChatCompletion, Completion, CompletionRequest, ModelConfig};

    use super::StageLlm;

    pub struct ScriptedCompletion {
        responses: Mutex<VecDeque<Result<Completion, GenerationError>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedCompletion {
        pub fn new(responses: Vec<Result<Completion, GenerationError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Responses returned in order as plain text completions.
        pub fn texts(responses: &[&str]) -> Self {
            Self::new(
                responses
                    .iter()
                    .map(|text| Ok(Completion::text(*text)))
                    .collect(),
            )
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatCompletion for ScriptedCompletion {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GenerationError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GenerationError::Transport("script exhausted".to_string())))
        }
    }

    /// Wrap a scripted double as a stage LLM.
    pub fn stage_llm(client: std::sync::Arc<ScriptedCompletion>, agent: &'static str) -> StageLlm {
        StageLlm::new(client, ModelConfig::new("scripted-model").with_max_tokens(1000), agent)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{stage_llm, ScriptedCompletion};
    use super::*;
    use crate::models::ChatRole;

    #[tokio::test]
    async fn test_generate_sends_system_and_user_messages() {
        let client = Arc::new(ScriptedCompletion::texts(&["{\"ok\": 1}"]));
        let llm = stage_llm(client.clone(), "TestAgent");
        let plan = EscalationPlan::single(1000, 500);

        let accepted = llm
            .generate("run-1", &plan, "system text", |attempt| {
                format!("limit {}", attempt.context_limit)
            })
            .await
            .unwrap();

        assert_eq!(accepted.content, "{\"ok\": 1}");
        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].role, ChatRole::System);
        assert_eq!(requests[0].user_prompt(), Some("limit 1000"));
        assert_eq!(requests[0].max_tokens, 500);
        assert_eq!(requests[0].model, "scripted-model");
    }
}

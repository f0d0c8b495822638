//! # Conductor Models
//!
//! Centralized LLM configuration and the chat-completion seam shared by every
//! generation stage.
//!
//! Stages talk to a [`ChatCompletion`] collaborator rather than a concrete
//! provider so that the finish reason, refusal and usage of each response stay
//! visible to the escalation controller. [`OpenAiChatClient`] is the network
//! implementation; tests script responses through a double.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::GenerationError;

/// Supported LLM providers
///
/// Every provider is reached through its OpenAI-compatible chat completions
/// endpoint:
/// - OpenAI (GPT) - `OPENAI_API_KEY`
/// - Anthropic (Claude) - `ANTHROPIC_API_KEY`
/// - Gemini (Google) - `GEMINI_API_KEY`
/// - OpenRouter (Gateway) - `OPENROUTER_API_KEY`
/// - Grok (xAI) - `XAI_API_KEY`
/// - DeepSeek - `DEEPSEEK_API_KEY`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    #[serde(rename = "openai")]
    OpenAI,
    Anthropic,
    Gemini,
    OpenRouter,
    Grok,
    DeepSeek,
}

impl LlmProvider {
    /// Get all available providers
    pub fn all() -> Vec<LlmProvider> {
        vec![
            LlmProvider::OpenAI,
            LlmProvider::Anthropic,
            LlmProvider::Gemini,
            LlmProvider::OpenRouter,
            LlmProvider::Grok,
            LlmProvider::DeepSeek,
        ]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Anthropic => "Anthropic",
            LlmProvider::Gemini => "Gemini",
            LlmProvider::OpenRouter => "OpenRouter",
            LlmProvider::Grok => "Grok",
            LlmProvider::DeepSeek => "DeepSeek",
        }
    }

    /// Parse a provider name as found in configuration.
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAI),
            "anthropic" => Some(LlmProvider::Anthropic),
            "gemini" => Some(LlmProvider::Gemini),
            "openrouter" => Some(LlmProvider::OpenRouter),
            "grok" | "xai" => Some(LlmProvider::Grok),
            "deepseek" => Some(LlmProvider::DeepSeek),
            _ => None,
        }
    }

    /// Environment variable holding the API key for this provider
    pub fn api_key_env(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
            LlmProvider::OpenRouter => "OPENROUTER_API_KEY",
            LlmProvider::Grok => "XAI_API_KEY",
            LlmProvider::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    /// OpenAI-compatible base URL used when no override is configured
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "https://api.openai.com/v1",
            LlmProvider::Anthropic => "https://api.anthropic.com/v1",
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            LlmProvider::OpenRouter => "https://openrouter.ai/api/v1",
            LlmProvider::Grok => "https://api.x.ai/v1",
            LlmProvider::DeepSeek => "https://api.deepseek.com/v1",
        }
    }
}

/// Configuration for LLM model selection
///
/// One of these exists per generation stage so that, for example, the summary
/// stage can run on a smaller model than prompt generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// LLM provider to use
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model name (e.g., "gpt-5", "gpt-5.1-mini")
    pub model: String,
    /// Optional base URL override for OpenAI-compatible APIs
    pub base_url: Option<String>,
    /// Sampling temperature, clamped to [0, 1]
    pub temperature: f32,
    /// Completion-token ceiling for the first attempt
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            model: "gpt-5".to_string(),
            base_url: None,
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_provider(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    /// Base URL actually used for requests
    pub fn endpoint(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

// ============================================================================
// Completion types
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A single chat-completion call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Text of the user turn, if any.
    pub fn user_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|message| message.role == ChatRole::User)
            .map(|message| message.content.as_str())
    }
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Other(String),
}

impl FinishReason {
    pub fn from_str(value: &str) -> Self {
        match value {
            "stop" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            other => FinishReason::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Other(other) => other.as_str(),
        }
    }

    /// The response was cut off by the completion-token ceiling.
    pub fn is_truncation(&self) -> bool {
        matches!(self, FinishReason::Length)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Normalized model response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Completion {
    pub content: Option<String>,
    pub finish_reason: Option<FinishReason>,
    pub refusal: Option<String>,
    pub usage: Option<Usage>,
    pub response_id: Option<String>,
    pub model: Option<String>,
}

impl Completion {
    /// A completed response with the given text.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            finish_reason: Some(FinishReason::Stop),
            ..Self::default()
        }
    }

    /// A response cut off by the token ceiling, carrying whatever partial text came back.
    pub fn truncated(partial: impl Into<String>) -> Self {
        Self {
            content: Some(partial.into()),
            finish_reason: Some(FinishReason::Length),
            ..Self::default()
        }
    }

    /// Content with surrounding whitespace removed; `None` when blank.
    pub fn trimmed_content(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|content| !content.is_empty())
    }

    pub fn is_truncated(&self) -> bool {
        self.finish_reason
            .as_ref()
            .map(FinishReason::is_truncation)
            .unwrap_or(false)
    }
}

/// The chat-completion collaborator every model-backed stage depends on.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GenerationError>;
}

// ============================================================================
// OpenAI-compatible HTTP client
// ============================================================================

/// Chat-completions client for OpenAI-compatible endpoints.
///
/// Newer models reject `max_tokens` in favour of `max_completion_tokens` and
/// some reject any non-default temperature; the client retries with the
/// alternative parameter set when the endpoint says so.
pub struct OpenAiChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiChatClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Build a client from a model config, reading the provider's API key from the environment.
    pub fn from_env(config: &ModelConfig) -> anyhow::Result<Self> {
        let key_var = config.provider.api_key_env();
        let api_key = std::env::var(key_var)
            .map_err(|_| anyhow::anyhow!("{} is not set", key_var))?;
        Self::new(config.endpoint(), api_key)
    }

    fn body(request: &CompletionRequest, token_param: &str, with_temperature: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
        });
        body[token_param] = json!(request.max_tokens);
        if with_temperature {
            body["temperature"] = json!(request.temperature);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<(reqwest::StatusCode, String), GenerationError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok((status, text))
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GenerationError> {
        let mut token_param = "max_completion_tokens";
        let mut with_temperature = true;

        // At most one retry per incompatible parameter.
        for _ in 0..3 {
            let body = Self::body(request, token_param, with_temperature);
            let (status, text) = self.post(&body).await?;
            if status.is_success() {
                let payload: Value = serde_json::from_str(&text)
                    .map_err(|e| GenerationError::Transport(format!("invalid response body: {}", e)))?;
                return Ok(parse_completion(&payload));
            }

            let lowered = text.to_lowercase();
            if status == reqwest::StatusCode::BAD_REQUEST {
                if token_param == "max_completion_tokens" && lowered.contains("max_completion_tokens") {
                    tracing::debug!("endpoint rejected max_completion_tokens; retrying with max_tokens");
                    token_param = "max_tokens";
                    continue;
                }
                if with_temperature && lowered.contains("temperature") {
                    tracing::debug!("endpoint rejected temperature; retrying with default temperature");
                    with_temperature = false;
                    continue;
                }
            }
            return Err(GenerationError::Transport(format!("HTTP {}: {}", status, text)));
        }

        Err(GenerationError::Transport(
            "endpoint rejected every parameter combination".to_string(),
        ))
    }
}

/// Normalize a chat-completions response body.
pub fn parse_completion(payload: &Value) -> Completion {
    let choice = payload.get("choices").and_then(|c| c.get(0));
    let message = choice.and_then(|c| c.get("message"));

    let content = message.and_then(|m| m.get("content")).and_then(|content| match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let joined: Vec<&str> = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            if joined.is_empty() {
                None
            } else {
                Some(joined.join(""))
            }
        }
        _ => None,
    });

    let usage = payload.get("usage").map(|usage| Usage {
        prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
        completion_tokens: usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0),
        total_tokens: usage.get("total_tokens").and_then(Value::as_u64).unwrap_or(0),
    });

    Completion {
        content,
        finish_reason: choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(Value::as_str)
            .map(FinishReason::from_str),
        refusal: message
            .and_then(|m| m.get("refusal"))
            .and_then(Value::as_str)
            .map(str::to_string),
        usage,
        response_id: payload.get("id").and_then(Value::as_str).map(str::to_string),
        model: payload.get("model").and_then(Value::as_str).map(str::to_string),
    }
}

//! # Pipeline Configuration
//!
//! Per-stage model selection, completion ceilings and retry tuning, loaded
//! from the environment (the server loads `.env` first via `dotenvy`).
//!
//! | Variable | Default |
//! |----------|---------|
//! | `PROJECTPLANNER_PROVIDER` | `openai` |
//! | `PROJECTPLANNER_BASE_URL` | provider default |
//! | `PROJECTPLANNER_{COORDINATOR,PLANNER,DECOMPOSER}_MODEL` | `gpt-5` |
//! | `PROJECTPLANNER_MAX_COMPLETION_TOKENS` | `4096` |
//! | `CODING_ORCHESTRATOR_{SUMMARY,MILESTONE}_MODEL` | `gpt-5.1-mini` |
//! | `CODING_ORCHESTRATOR_PROMPT_MODEL` | `gpt-5.1` |
//! | `CODING_ORCHESTRATOR_TEMPERATURE` | `0.2` |
//! | `PROJECTPLANNER_LOG_CAPACITY` | `2000` |
//! | `PROJECTPLANNER_DATABASE` | unset (in-memory store) |
//!
//! Orchestrator keys also accept the `PROJECTPLANNER_` prefix.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::{ChatCompletion, LlmProvider, ModelConfig, OpenAiChatClient};

pub const DEFAULT_MAX_COMPLETION_TOKENS: u32 = 4096;
pub const DEFAULT_LOG_CAPACITY: usize = 2000;

/// Generation stages that call a model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Coordinator,
    Planner,
    Decomposer,
    Summary,
    Milestones,
    Prompts,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Coordinator => "coordinator",
            Stage::Planner => "planner",
            Stage::Decomposer => "decomposer",
            Stage::Summary => "summary",
            Stage::Milestones => "milestones",
            Stage::Prompts => "prompts",
        }
    }
}

/// Knobs for the decomposer's second attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryTuning {
    /// Prior step summaries kept on the retry
    pub summary_window: usize,
    /// Fraction of the context ceiling kept on the retry
    pub context_shrink: f64,
    /// Lower bound for the shrunken context ceiling
    pub context_floor: usize,
    /// Extra completion tokens granted on the retry
    pub token_boost: u32,
}

impl Default for RetryTuning {
    fn default() -> Self {
        Self {
            summary_window: 3,
            context_shrink: 0.75,
            context_floor: 4000,
            token_boost: 1024,
        }
    }
}

impl RetryTuning {
    /// Token ceiling for the retry: base + boost, capped at 1.5x base.
    pub fn boosted_tokens(&self, base: u32) -> u32 {
        let cap = base.saturating_mul(3) / 2;
        base.saturating_add(self.token_boost).min(cap.max(base))
    }

    /// Context ceiling for the retry.
    pub fn shrunk_context(&self, base: usize) -> usize {
        ((base as f64 * self.context_shrink) as usize).max(self.context_floor)
    }
}

/// Configuration for the planning pipeline and the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Global LLM provider
    #[serde(default)]
    pub provider: LlmProvider,
    /// Base URL override for OpenAI-compatible endpoints
    pub base_url: Option<String>,
    pub coordinator_model: String,
    pub planner_model: String,
    pub decomposer_model: String,
    pub summary_model: String,
    pub milestone_model: String,
    pub prompt_model: String,
    /// Temperature for the orchestrator stages
    pub orchestrator_temperature: f32,
    pub max_completion_tokens: u32,
    pub retry: RetryTuning,
    /// Maximum captured log records
    pub log_capacity: usize,
    /// SQLite file for the plan store; in-memory when unset
    pub database_path: Option<String>,
    /// Disable model calls entirely and run the heuristics only
    #[serde(default)]
    pub offline: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            base_url: None,
            coordinator_model: "gpt-5".to_string(),
            planner_model: "gpt-5".to_string(),
            decomposer_model: "gpt-5".to_string(),
            summary_model: "gpt-5.1-mini".to_string(),
            milestone_model: "gpt-5.1-mini".to_string(),
            prompt_model: "gpt-5.1".to_string(),
            orchestrator_temperature: 0.2,
            max_completion_tokens: DEFAULT_MAX_COMPLETION_TOKENS,
            retry: RetryTuning::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            database_path: None,
            offline: false,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        // Orchestrator keys fall back to the planner-wide prefix.
        let orchestrator = |name: &str| {
            get(&format!("CODING_ORCHESTRATOR_{}", name))
                .or_else(|| get(&format!("PROJECTPLANNER_{}", name)))
        };

        let max_completion_tokens = match get("PROJECTPLANNER_MAX_COMPLETION_TOKENS")
            .or_else(|| get("PROJECTPLANNER_COORDINATOR_MAX_COMPLETION_TOKENS"))
        {
            Some(raw) => match raw.parse::<u32>() {
                Ok(value) if value > 0 => value,
                _ => {
                    tracing::warn!(
                        event = "config.invalid_value",
                        key = "PROJECTPLANNER_MAX_COMPLETION_TOKENS",
                        value = %raw,
                        "Ignoring invalid completion token ceiling"
                    );
                    defaults.max_completion_tokens
                }
            },
            None => defaults.max_completion_tokens,
        };

        let orchestrator_temperature = orchestrator("TEMPERATURE")
            .and_then(|value| value.parse::<f32>().ok())
            .unwrap_or(defaults.orchestrator_temperature)
            .clamp(0.0, 1.0);

        let retry = RetryTuning {
            summary_window: get("PROJECTPLANNER_DECOMPOSER_SUMMARY_WINDOW")
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.retry.summary_window),
            context_shrink: get("PROJECTPLANNER_DECOMPOSER_CONTEXT_SHRINK")
                .and_then(|value| value.parse::<f64>().ok())
                .filter(|value| *value > 0.0 && *value <= 1.0)
                .unwrap_or(defaults.retry.context_shrink),
            context_floor: get("PROJECTPLANNER_DECOMPOSER_CONTEXT_FLOOR")
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.retry.context_floor),
            token_boost: get("PROJECTPLANNER_DECOMPOSER_TOKEN_BOOST")
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.retry.token_boost),
        };

        let offline = get("PROJECTPLANNER_OFFLINE")
            .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let global_model = get("PROJECTPLANNER_MODEL");
        let stage_model = |key: &str, fallback: &str| {
            get(key)
                .or_else(|| global_model.clone())
                .unwrap_or_else(|| fallback.to_string())
        };

        Self {
            provider: get("PROJECTPLANNER_PROVIDER")
                .and_then(|value| LlmProvider::from_str(&value))
                .unwrap_or_default(),
            base_url: get("PROJECTPLANNER_BASE_URL").or_else(|| get("OPENAI_BASE_URL")),
            coordinator_model: stage_model("PROJECTPLANNER_COORDINATOR_MODEL", &defaults.coordinator_model),
            planner_model: stage_model("PROJECTPLANNER_PLANNER_MODEL", &defaults.planner_model),
            decomposer_model: stage_model("PROJECTPLANNER_DECOMPOSER_MODEL", &defaults.decomposer_model),
            summary_model: orchestrator("SUMMARY_MODEL").unwrap_or(defaults.summary_model),
            milestone_model: orchestrator("MILESTONE_MODEL").unwrap_or(defaults.milestone_model),
            prompt_model: orchestrator("PROMPT_MODEL").unwrap_or(defaults.prompt_model),
            orchestrator_temperature,
            max_completion_tokens,
            retry,
            log_capacity: get("PROJECTPLANNER_LOG_CAPACITY")
                .and_then(|value| value.parse().ok())
                .filter(|value| *value > 0)
                .unwrap_or(defaults.log_capacity),
            database_path: get("PROJECTPLANNER_DATABASE"),
            offline,
        }
    }

    /// Model configuration for one stage.
    pub fn model_config(&self, stage: Stage) -> ModelConfig {
        let (model, temperature) = match stage {
            Stage::Coordinator => (&self.coordinator_model, 0.2),
            Stage::Planner => (&self.planner_model, 0.2),
            Stage::Decomposer => (&self.decomposer_model, 0.25),
            Stage::Summary => (&self.summary_model, self.orchestrator_temperature),
            Stage::Milestones => (&self.milestone_model, self.orchestrator_temperature),
            Stage::Prompts => (&self.prompt_model, self.orchestrator_temperature),
        };
        let mut config = ModelConfig::with_provider(self.provider.clone(), model.clone())
            .with_temperature(temperature)
            .with_max_tokens(self.max_completion_tokens);
        if let Some(url) = &self.base_url {
            config = config.with_base_url(url.clone());
        }
        config
    }

    /// Build the shared completion client.
    ///
    /// Returns `None` when running offline or when no API key is configured;
    /// every stage then runs its heuristic path.
    pub fn build_client(&self) -> Option<Arc<dyn ChatCompletion>> {
        if self.offline {
            return None;
        }
        let config = self.model_config(Stage::Coordinator);
        match OpenAiChatClient::from_env(&config) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                tracing::warn!(
                    event = "config.llm_unavailable",
                    provider = config.provider.display_name(),
                    error = %e,
                    "LLM client unavailable; falling back to heuristics"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_lookup(|_| None);
        assert_eq!(config.max_completion_tokens, 4096);
        assert_eq!(config.summary_model, "gpt-5.1-mini");
        assert_eq!(config.prompt_model, "gpt-5.1");
        assert_eq!(config.log_capacity, 2000);
        assert_eq!(config.retry.summary_window, 3);
    }

    #[test]
    fn test_max_tokens_falls_back_to_coordinator_key() {
        let config = PipelineConfig::from_lookup(lookup(&[(
            "PROJECTPLANNER_COORDINATOR_MAX_COMPLETION_TOKENS",
            "2048",
        )]));
        assert_eq!(config.max_completion_tokens, 2048);

        let config = PipelineConfig::from_lookup(lookup(&[
            ("PROJECTPLANNER_MAX_COMPLETION_TOKENS", "1000"),
            ("PROJECTPLANNER_COORDINATOR_MAX_COMPLETION_TOKENS", "2048"),
        ]));
        assert_eq!(config.max_completion_tokens, 1000);
    }

    #[test]
    fn test_temperature_clamped() {
        let config = PipelineConfig::from_lookup(lookup(&[("CODING_ORCHESTRATOR_TEMPERATURE", "7")]));
        assert_eq!(config.orchestrator_temperature, 1.0);
        assert_eq!(config.model_config(Stage::Summary).temperature, 1.0);
    }

    #[test]
    fn test_orchestrator_keys_fall_back_to_planner_prefix() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("PROJECTPLANNER_SUMMARY_MODEL", "small"),
            ("CODING_ORCHESTRATOR_PROMPT_MODEL", "large"),
            ("PROJECTPLANNER_PROMPT_MODEL", "ignored"),
        ]));
        assert_eq!(config.summary_model, "small");
        assert_eq!(config.prompt_model, "large");
    }

    #[test]
    fn test_invalid_values_use_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("PROJECTPLANNER_MAX_COMPLETION_TOKENS", "lots"),
            ("PROJECTPLANNER_LOG_CAPACITY", "0"),
        ]));
        assert_eq!(config.max_completion_tokens, 4096);
        assert_eq!(config.log_capacity, 2000);
    }

    #[test]
    fn test_boosted_tokens_capped() {
        let retry = RetryTuning::default();
        assert_eq!(retry.boosted_tokens(4096), 5120);
        assert_eq!(retry.boosted_tokens(1000), 1500);
        assert_eq!(retry.shrunk_context(14000), 10500);
        assert_eq!(retry.shrunk_context(4000), 4000);
    }

    #[test]
    fn test_offline_disables_client() {
        let config = PipelineConfig::from_lookup(lookup(&[("PROJECTPLANNER_OFFLINE", "true")]));
        assert!(config.build_client().is_none());
    }
}

//! LLM chat backend and provider resolution.
//!
//! The pipeline talks to the model through the narrow [`ChatBackend`] trait:
//! one system message, one user message, one text reply. [`ProviderChat`]
//! adapts any `edgequake-llm` provider to it; tests plug in scripted
//! backends without touching the network.

use crate::config::QueryConfig;
use crate::error::QueryError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Model used when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// A two-message chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Sampling options for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: usize,
}

impl ChatOptions {
    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Text reply with token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatReply {
    pub content: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// A failed chat call (network, auth, rate limit, provider error).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct BackendError(pub String);

/// Sends one prompt to a language model.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, prompt: &Prompt, options: &ChatOptions) -> Result<ChatReply, BackendError>;
}

/// [`ChatBackend`] over an `edgequake-llm` provider.
#[derive(Clone)]
pub struct ProviderChat {
    provider: Arc<dyn LLMProvider>,
}

impl ProviderChat {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ChatBackend for ProviderChat {
    async fn chat(&self, prompt: &Prompt, options: &ChatOptions) -> Result<ChatReply, BackendError> {
        let messages = vec![
            ChatMessage::system(prompt.system.as_str()),
            ChatMessage::user(prompt.user.as_str()),
        ];
        let options = CompletionOptions {
            temperature: Some(options.temperature),
            max_tokens: Some(options.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| BackendError(e.to_string()))?;

        Ok(ChatReply {
            content: response.content,
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
        })
    }
}

/// Pick the provider name and model without touching the network.
///
/// The name comes from `config.provider_name`, else `EDGEQUAKE_LLM_PROVIDER`,
/// else `openai` when `OPENAI_API_KEY` is set. The model comes from
/// `config.model`, else `EDGEQUAKE_MODEL`, else [`DEFAULT_MODEL`].
/// `None` means nothing was named and auto-detection should run.
fn provider_choice(
    config: &QueryConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Option<(String, String)> {
    let env = |key: &str| env(key).filter(|v| !v.is_empty());
    let name = config
        .provider_name
        .clone()
        .or_else(|| env("EDGEQUAKE_LLM_PROVIDER"))
        .or_else(|| env("OPENAI_API_KEY").map(|_| "openai".to_string()))?;
    let model = config
        .model
        .clone()
        .or_else(|| env("EDGEQUAKE_MODEL"))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    Some((name, model))
}

/// Resolve the LLM provider: a pre-built `config.provider` as-is, then a
/// named provider (see [`provider_choice`]), then whatever
/// `ProviderFactory::from_env` detects from the API keys present.
pub fn resolve_provider(config: &QueryConfig) -> Result<Arc<dyn LLMProvider>, QueryError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some((name, model)) = provider_choice(config, |key| std::env::var(key).ok()) {
        debug!("Creating LLM provider {} / {}", name, model);
        return ProviderFactory::create_llm_provider(&name, &model).map_err(|e| {
            QueryError::ProviderNotConfigured {
                provider: name,
                hint: e.to_string(),
            }
        });
    }

    ProviderFactory::from_env()
        .map(|(llm, _embedding)| llm)
        .map_err(|e| QueryError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!("pass --provider or set a provider API key ({e})"),
        })
}

/// Resolve the configured provider and wrap it as a [`ChatBackend`].
pub fn resolve_chat(config: &QueryConfig) -> Result<Arc<dyn ChatBackend>, QueryError> {
    Ok(Arc::new(ProviderChat::new(resolve_provider(config)?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_follow_config() {
        let config = QueryConfig::builder()
            .temperature(0.3)
            .max_tokens(256)
            .build()
            .unwrap();
        let opts = ChatOptions::from_config(&config);
        assert_eq!(opts.temperature, 0.3);
        assert_eq!(opts.max_tokens, 256);
    }

    fn env_of(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn explicit_provider_and_model_win() {
        let config = QueryConfig::builder()
            .provider_name("anthropic")
            .model("claude-sonnet")
            .build()
            .unwrap();
        let env = env_of(&[("EDGEQUAKE_LLM_PROVIDER", "gemini"), ("EDGEQUAKE_MODEL", "flash")]);
        assert_eq!(
            provider_choice(&config, env),
            Some(("anthropic".into(), "claude-sonnet".into()))
        );
    }

    #[test]
    fn env_provider_keeps_configured_model() {
        let config = QueryConfig::builder().model("llama3-70b-8192").build().unwrap();
        let env = env_of(&[("EDGEQUAKE_LLM_PROVIDER", "groq"), ("EDGEQUAKE_MODEL", "other")]);
        assert_eq!(
            provider_choice(&config, env),
            Some(("groq".into(), "llama3-70b-8192".into()))
        );
    }

    #[test]
    fn openai_key_selects_openai_with_default_model() {
        let env = env_of(&[("OPENAI_API_KEY", "sk-test"), ("EDGEQUAKE_MODEL", "")]);
        assert_eq!(
            provider_choice(&QueryConfig::default(), env),
            Some(("openai".into(), DEFAULT_MODEL.into()))
        );
    }

    #[test]
    fn nothing_named_falls_through_to_detection() {
        let env = env_of(&[("ANTHROPIC_API_KEY", "key"), ("EDGEQUAKE_LLM_PROVIDER", "")]);
        assert_eq!(provider_choice(&QueryConfig::default(), env), None);
    }

    #[test]
    fn default_options_are_greedy() {
        let opts = ChatOptions::from_config(&QueryConfig::default());
        assert_eq!(opts.temperature, 0.0);
        assert_eq!(opts.max_tokens, 1024);
    }
}

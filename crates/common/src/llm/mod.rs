//! Generation model abstraction
//!
//! Providers:
//! - Gemini (`generateContent` REST API)
//! - OpenAI-compatible chat completions
//! - Offline (deterministic replies for local runs without credentials)

mod gemini;
mod offline;
mod openai;

pub use gemini::GeminiChatModel;
pub use offline::OfflineChatModel;
pub use openai::OpenAIChatModel;

use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use crate::resilience::{client_backoff, is_transient_status};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One message of a chat-style prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Per-call sampling options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Ask the provider for a JSON body when it supports it
    pub json_output: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_output_tokens: 2048,
            json_output: false,
        }
    }
}

impl CompletionOptions {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            json_output: false,
        }
    }

    /// Options for schema-constrained artifacts
    pub fn structured(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.structured_temperature,
            max_output_tokens: config.max_output_tokens,
            json_output: true,
        }
    }
}

/// Trait for text generation
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce the model's reply to `messages`. Empty output is an error.
    async fn complete(&self, messages: &[ChatMessage], options: &CompletionOptions)
        -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create a generation model based on configuration
pub fn create_chat_model(config: &GenerationConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiChatModel::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        "offline" => Ok(Arc::new(OfflineChatModel::new(&config.model))),
        other => Err(AppError::configuration(format!(
            "unknown generation provider '{other}'"
        ))),
    }
}

/// Shared HTTP plumbing for the remote providers
struct HttpSettings {
    client: reqwest::Client,
    api_key: String,
    max_retries: u32,
    retry_window: Duration,
}

impl HttpSettings {
    fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                AppError::configuration(format!(
                    "generation.api_key is required for the {} provider",
                    config.provider
                ))
            })?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            max_retries: config.max_retries,
            retry_window: timeout * (config.max_retries + 1),
        })
    }

    /// Send the request built by `build`, retrying network errors, 429 and 5xx.
    async fn send_json<F>(&self, model: &str, build: F) -> Result<serde_json::Value>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let attempts = AtomicU32::new(0);

        backoff::future::retry(client_backoff(self.retry_window), || {
            let request = build();
            let attempts = &attempts;
            async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                let can_retry = attempt < self.max_retries;

                let response = match request.send().await {
                    Ok(response) => response,
                    Err(e) => {
                        let err = AppError::Generation {
                            message: format!("{model} request failed: {e}"),
                        };
                        return Err(if can_retry {
                            tracing::warn!(model, attempt = attempt + 1, error = %err, "Generation request failed, retrying");
                            backoff::Error::transient(err)
                        } else {
                            backoff::Error::permanent(err)
                        });
                    }
                };

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    let err = AppError::Generation {
                        message: format!("{model} API error ({status}): {body}"),
                    };
                    return Err(if can_retry && is_transient_status(status) {
                        tracing::warn!(model, attempt = attempt + 1, status = status.as_u16(), "Generation request failed, retrying");
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    });
                }

                response.json::<serde_json::Value>().await.map_err(|e| {
                    backoff::Error::permanent(AppError::Generation {
                        message: format!("{model} returned an unreadable body: {e}"),
                    })
                })
            }
        })
        .await
    }
}

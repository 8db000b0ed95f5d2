use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;

use super::{ChatMessage, ChatModel, ChatRole, CompletionOptions, HttpSettings};
use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use crate::metrics::record_generation;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini `generateContent` client
pub struct GeminiChatModel {
    http: HttpSettings,
    model: String,
    base_url: String,
}

impl GeminiChatModel {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            http: HttpSettings::new(config)?,
            model: config.model.clone(),
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    fn payload(messages: &[ChatMessage], options: &CompletionOptions) -> serde_json::Value {
        let mut contents = Vec::new();
        let mut system_parts = Vec::new();

        for msg in messages {
            if msg.role == ChatRole::System {
                system_parts.push(json!({ "text": msg.content }));
                continue;
            }

            contents.push(json!({
                "role": if msg.role == ChatRole::Assistant { "model" } else { "user" },
                "parts": [{ "text": msg.content }]
            }));
        }

        let mut generation_config = json!({
            "temperature": options.temperature,
            "maxOutputTokens": options.max_output_tokens,
        });
        if options.json_output {
            generation_config["responseMimeType"] = json!("application/json");
        }

        let mut payload = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if !system_parts.is_empty() {
            payload["systemInstruction"] = json!({ "parts": system_parts });
        }
        payload
    }

    fn extract_text(data: &serde_json::Value) -> Result<String> {
        let parts = data
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .ok_or_else(|| AppError::Generation {
                message: "No candidates in response".to_string(),
            })?;

        let text: String = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect();

        if text.trim().is_empty() {
            return Err(AppError::Generation {
                message: "model returned empty content".to_string(),
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl ChatModel for GeminiChatModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let payload = Self::payload(messages, options);
        let started = Instant::now();

        let result = self
            .http
            .send_json(&self.model, || {
                self.http
                    .client
                    .post(&url)
                    .header("x-goog-api-key", &self.http.api_key)
                    .json(&payload)
            })
            .await
            .and_then(|data| Self::extract_text(&data));

        record_generation(started.elapsed().as_secs_f64(), &self.model, result.is_ok());
        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

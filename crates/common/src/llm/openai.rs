use async_trait::async_trait;
use serde::Serialize;
use std::time::Instant;

use super::{ChatMessage, ChatModel, CompletionOptions, HttpSettings};
use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use crate::metrics::record_generation;

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

/// OpenAI-compatible chat completions client
pub struct OpenAIChatModel {
    http: HttpSettings,
    model: String,
    base_url: String,
}

impl OpenAIChatModel {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            http: HttpSettings::new(config)?,
            model: config.model.clone(),
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        })
    }

    fn request<'a>(&'a self, messages: &'a [ChatMessage], options: &CompletionOptions) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage { role: m.role.as_str(), content: &m.content })
                .collect(),
            max_tokens: options.max_output_tokens,
            temperature: options.temperature,
            response_format: options
                .json_output
                .then(|| serde_json::json!({ "type": "json_object" })),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = self.request(messages, options);
        let started = Instant::now();

        let result = self
            .http
            .send_json(&self.model, || {
                self.http
                    .client
                    .post(&url)
                    .bearer_auth(&self.http.api_key)
                    .json(&request)
            })
            .await
            .and_then(|data| {
                data.pointer("/choices/0/message/content")
                    .and_then(|c| c.as_str())
                    .filter(|c| !c.trim().is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| AppError::Generation {
                        message: "model returned empty content".to_string(),
                    })
            });

        record_generation(started.elapsed().as_secs_f64(), &self.model, result.is_ok());
        result
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let config = GenerationConfig {
            provider: "openai".to_string(),
            api_key: Some("sk-test".to_string()),
            model: "gpt-4o-mini".to_string(),
            ..Default::default()
        };
        let model = OpenAIChatModel::new(&config).unwrap();
        let messages = [ChatMessage::system("rules"), ChatMessage::user("question")];
        let options = CompletionOptions { json_output: true, ..Default::default() };

        let body = serde_json::to_value(model.request(&messages, &options)).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "question");
        assert_eq!(body["response_format"]["type"], "json_object");
    }
}

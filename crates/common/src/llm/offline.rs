use async_trait::async_trait;

use super::{ChatMessage, ChatModel, ChatRole, CompletionOptions};
use crate::errors::Result;

/// Deterministic stand-in used when no provider credential is configured.
///
/// Free-text calls echo the latest user message inside a fixed template.
/// Structured calls get an empty JSON object, so artifact workers report
/// a schema failure instead of inventing quiz content.
pub struct OfflineChatModel {
    model: String,
}

impl OfflineChatModel {
    pub fn new(model: &str) -> Self {
        Self {
            model: format!("offline/{model}"),
        }
    }
}

#[async_trait]
impl ChatModel for OfflineChatModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String> {
        if options.json_output {
            return Ok("{}".to_string());
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.trim())
            .unwrap_or_default();

        let question = last_user.lines().last().unwrap_or_default().trim();

        Ok(format!(
            "Here is what the course material says about \"{question}\". \
             [Offline response - generation.api_key not configured]"
        ))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

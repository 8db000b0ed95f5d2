//! Query contextualization
//!
//! Rewrites a follow-up question into a self-contained search query using
//! the conversation so far. The rewrite only feeds retrieval.

use std::sync::Arc;
use std::time::Duration;

use lectern_common::db::ConversationTurn;
use lectern_common::errors::{AppError, Result};
use lectern_common::llm::{ChatMessage, ChatModel, CompletionOptions};
use lectern_common::resilience::with_timeout;
use tracing::{debug, warn};

use crate::prompts::CONTEXTUALIZE_INSTRUCTION;

pub struct QueryContextualizer {
    model: Arc<dyn ChatModel>,
    options: CompletionOptions,
    timeout: Duration,
}

/// Prior turns as alternating user/assistant messages, oldest first
pub(crate) fn history_messages(history: &[ConversationTurn]) -> Vec<ChatMessage> {
    history
        .iter()
        .flat_map(|turn| {
            [
                ChatMessage::user(turn.query.as_str()),
                ChatMessage::assistant(turn.response.as_str()),
            ]
        })
        .collect()
}

impl QueryContextualizer {
    pub fn new(model: Arc<dyn ChatModel>, options: CompletionOptions, timeout: Duration) -> Self {
        Self {
            model,
            options,
            timeout,
        }
    }

    /// Self-contained form of `raw_query`; falls back to `raw_query` on any failure.
    pub async fn contextualize(&self, raw_query: &str, history: &[ConversationTurn]) -> String {
        if history.is_empty() {
            return raw_query.to_string();
        }

        match self.try_contextualize(raw_query, history).await {
            Ok(rewritten) => {
                debug!(raw = raw_query, rewritten = %rewritten, "Query contextualized");
                rewritten
            }
            Err(e) => {
                warn!(error = %e, "Contextualization failed, using raw query");
                raw_query.to_string()
            }
        }
    }

    pub async fn try_contextualize(
        &self,
        raw_query: &str,
        history: &[ConversationTurn],
    ) -> Result<String> {
        if history.is_empty() {
            return Ok(raw_query.to_string());
        }

        let mut messages = Vec::with_capacity(history.len() * 2 + 2);
        messages.push(ChatMessage::system(CONTEXTUALIZE_INSTRUCTION));
        messages.extend(history_messages(history));
        messages.push(ChatMessage::user(raw_query));

        let rewritten = with_timeout(
            "contextualize",
            self.timeout,
            self.model.complete(&messages, &self.options),
        )
        .await?;

        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            return Err(AppError::Generation {
                message: "contextualizer returned an empty rewrite".into(),
            });
        }
        Ok(rewritten.to_string())
    }
}

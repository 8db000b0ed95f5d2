//! Grounded answer generation

use std::sync::Arc;
use std::time::Duration;

use lectern_common::db::ConversationTurn;
use lectern_common::errors::{AppError, Result};
use lectern_common::llm::{ChatMessage, ChatModel, CompletionOptions};
use lectern_common::resilience::with_timeout;
use lectern_search::DocumentChunk;
use serde::Serialize;
use tracing::warn;

use crate::contextualizer::history_messages;
use crate::prompts::{join_context, CONTEXT_HEADING, GENERATION_FALLBACK};

/// Answer text plus the reason it was degraded, if it was
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedAnswer {
    pub text: String,
    pub degraded: Option<String>,
}

impl GeneratedAnswer {
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

pub struct AnswerGenerator {
    model: Arc<dyn ChatModel>,
    options: CompletionOptions,
    timeout: Duration,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn ChatModel>, options: CompletionOptions, timeout: Duration) -> Self {
        Self {
            model,
            options,
            timeout,
        }
    }

    /// System prompt, prior turns, then the student's question.
    pub fn build_messages(
        query: &str,
        chunks: &[DocumentChunk],
        history: &[ConversationTurn],
        persona: &str,
    ) -> Vec<ChatMessage> {
        let context = join_context(chunks.iter().map(|c| c.text.as_str()), "\n\n");
        let system = if context.is_empty() {
            format!("{persona}\n\n{CONTEXT_HEADING}\n(no matching course material)")
        } else {
            format!("{persona}\n\n{CONTEXT_HEADING}\n{context}")
        };

        let mut messages = Vec::with_capacity(history.len() * 2 + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(history_messages(history));
        messages.push(ChatMessage::user(query));
        messages
    }

    /// Never fails: model errors and empty output become the fallback text.
    pub async fn generate_answer(
        &self,
        query: &str,
        chunks: &[DocumentChunk],
        history: &[ConversationTurn],
        persona: &str,
    ) -> GeneratedAnswer {
        match self.try_generate(query, chunks, history, persona).await {
            Ok(text) => GeneratedAnswer {
                text,
                degraded: None,
            },
            Err(e) => {
                warn!(error = %e, "Answer generation failed, using fallback");
                GeneratedAnswer {
                    text: GENERATION_FALLBACK.to_string(),
                    degraded: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn try_generate(
        &self,
        query: &str,
        chunks: &[DocumentChunk],
        history: &[ConversationTurn],
        persona: &str,
    ) -> Result<String> {
        let messages = Self::build_messages(query, chunks, history, persona);

        with_timeout(
            "generate",
            self.timeout,
            self.model.complete(&messages, &self.options),
        )
        .await
        .and_then(|text| {
            let text = text.trim();
            if text.is_empty() {
                Err(AppError::Generation {
                    message: "model returned no content".into(),
                })
            } else {
                Ok(text.to_string())
            }
        })
    }
}

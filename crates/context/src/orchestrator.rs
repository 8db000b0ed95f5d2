//! Conversation orchestrator
//!
//! Drives one turn through
//! `Start -> HistoryLoaded -> QueryContextualized -> Retrieved -> AnswerGenerated -> Persisted -> Done`.
//!
//! Failure policy per stage:
//! - history load: degrade to an empty history
//! - contextualization: degrade to the raw query
//! - retrieval: abort, never answer ungrounded
//! - generation: degrade to the fallback reply, still persisted
//! - persistence: abort and tell the caller the turn was not remembered
//!
//! Turns for one user are serialised; different users run independently.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use lectern_common::db::{ConversationTurn, HistoryStore};
use lectern_common::errors::{AppError, ErrorCode, Result};
use lectern_common::llm::CompletionOptions;
use lectern_common::metrics::{record_stage, record_turn};
use lectern_search::Retriever;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, instrument, warn};

use crate::contextualizer::QueryContextualizer;
use crate::generator::AnswerGenerator;
use crate::prompts::{self, PERSISTENCE_WARNING, RETRIEVAL_WARNING, TURN_FAILURE_APOLOGY};
use crate::resources::ResourceContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnState {
    Start,
    HistoryLoaded,
    QueryContextualized,
    Retrieved,
    AnswerGenerated,
    Persisted,
    Done,
    Error,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Start => "start",
            TurnState::HistoryLoaded => "history_loaded",
            TurnState::QueryContextualized => "query_contextualized",
            TurnState::Retrieved => "retrieved",
            TurnState::AnswerGenerated => "answer_generated",
            TurnState::Persisted => "persisted",
            TurnState::Done => "done",
            TurnState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Done | TurnState::Error)
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one conversational turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub success: bool,
    pub message: String,
    pub response: String,
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearReply {
    pub success: bool,
    pub message: String,
    pub user_id: i64,
    pub removed: u64,
}

/// Tracks the current state of a turn for logs and stage metrics
struct TurnTrace {
    state: TurnState,
    stage_started: Instant,
}

impl TurnTrace {
    fn new() -> Self {
        Self {
            state: TurnState::Start,
            stage_started: Instant::now(),
        }
    }

    fn advance(&mut self, next: TurnState, outcome: &str) {
        record_stage(next.as_str(), self.stage_started.elapsed(), outcome);
        debug!(from = %self.state, to = %next, outcome, "Turn state");
        self.state = next;
        self.stage_started = Instant::now();
    }

    fn fail(&mut self, stage: TurnState) {
        record_stage(stage.as_str(), self.stage_started.elapsed(), "error");
        debug!(from = %self.state, failed = %stage, "Turn aborted");
        self.state = TurnState::Error;
    }
}

/// Leases holding or awaiting one user's turn lock
#[derive(Debug)]
struct UserSlot {
    lock: Arc<AsyncMutex<()>>,
    leases: usize,
}

/// Per-user turn locks; a slot is dropped once no lease holds or awaits it
#[derive(Debug, Default)]
struct UserLocks {
    slots: Mutex<HashMap<i64, UserSlot>>,
}

/// Counted against its slot from the moment `acquire` starts, so an
/// abandoned wait releases the slot too.
#[derive(Debug)]
struct UserLease<'a> {
    owner: &'a UserLocks,
    user_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl UserLocks {
    fn slots(&self) -> MutexGuard<'_, HashMap<i64, UserSlot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn acquire(&self, user_id: i64) -> UserLease<'_> {
        let (mut lease, lock) = {
            let mut slots = self.slots();
            let slot = slots.entry(user_id).or_insert_with(|| UserSlot {
                lock: Arc::default(),
                leases: 0,
            });
            slot.leases += 1;
            let lease = UserLease {
                owner: self,
                user_id,
                guard: None,
            };
            (lease, slot.lock.clone())
        };
        lease.guard = Some(lock.lock_owned().await);
        lease
    }

    fn len(&self) -> usize {
        self.slots().len()
    }
}

impl Drop for UserLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self.owner.slots();
        if let Some(slot) = slots.get_mut(&self.user_id) {
            slot.leases = slot.leases.saturating_sub(1);
            if slot.leases == 0 {
                slots.remove(&self.user_id);
            }
        }
    }
}

fn validate_user(user_id: i64) -> Result<()> {
    if user_id <= 0 {
        return Err(AppError::validation("user_id", "user_id must be a positive integer"));
    }
    Ok(())
}

pub struct ConversationOrchestrator {
    history: Arc<dyn HistoryStore>,
    retriever: Arc<Retriever>,
    contextualizer: QueryContextualizer,
    generator: AnswerGenerator,
    k: usize,
    persona: String,
    user_locks: UserLocks,
}

impl ConversationOrchestrator {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        retriever: Arc<Retriever>,
        contextualizer: QueryContextualizer,
        generator: AnswerGenerator,
        k: usize,
        persona: String,
    ) -> Self {
        Self {
            history,
            retriever,
            contextualizer,
            generator,
            k,
            persona,
            user_locks: UserLocks::default(),
        }
    }

    pub async fn from_resources(resources: &ResourceContext) -> Result<Self> {
        let config = resources.config();
        let model = resources.get_generation_model().await?;

        let contextualizer = QueryContextualizer::new(
            model.clone(),
            CompletionOptions::from_config(&config.generation),
            config.contextualize_timeout(),
        );
        let generator = AnswerGenerator::new(
            model,
            CompletionOptions::from_config(&config.generation),
            config.generate_timeout(),
        );

        Ok(Self::new(
            resources.get_history_store().await?,
            resources.get_retriever().await?,
            contextualizer,
            generator,
            config.retrieval.default_k,
            prompts::persona(&config.persona),
        ))
    }

    /// Run one conversational turn.
    ///
    /// Only invalid input is an `Err`; every pipeline failure is reported
    /// through `success = false` and a user-safe response.
    #[instrument(skip(self, query))]
    pub async fn answer_query(&self, user_id: i64, query: &str) -> Result<ChatReply> {
        validate_user(user_id)?;
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::validation("query", "query must not be empty"));
        }

        let _lease = self.user_locks.acquire(user_id).await;
        let mut trace = TurnTrace::new();
        let mut warnings = Vec::new();

        let history = match self.history.load_history(user_id).await {
            Ok(history) => {
                trace.advance(TurnState::HistoryLoaded, "ok");
                history
            }
            Err(e) => {
                warn!(error = %e, "History unavailable, continuing without it");
                warnings.push("Earlier conversation could not be loaded.".to_string());
                trace.advance(TurnState::HistoryLoaded, "degraded");
                Vec::new()
            }
        };

        let search_query = self.contextualizer.contextualize(query, &history).await;
        let rewritten = if search_query == query { "unchanged" } else { "ok" };
        trace.advance(TurnState::QueryContextualized, rewritten);

        let chunks = match self.retriever.retrieve(&search_query, self.k, None).await {
            Ok(chunks) => {
                trace.advance(TurnState::Retrieved, "ok");
                chunks
            }
            Err(e) => {
                error!(error = %e, "Retrieval failed, aborting turn");
                trace.fail(TurnState::Retrieved);
                record_turn("retrieval_error");
                warnings.push(RETRIEVAL_WARNING.to_string());
                return Ok(ChatReply {
                    success: false,
                    message: RETRIEVAL_WARNING.to_string(),
                    response: TURN_FAILURE_APOLOGY.to_string(),
                    user_id,
                    warnings,
                    error_code: Some(ErrorCode::RetrievalError),
                });
            }
        };

        let answer = self
            .generator
            .generate_answer(query, &chunks, &history, &self.persona)
            .await;
        let generation_outcome = if answer.is_degraded() { "degraded" } else { "ok" };
        trace.advance(TurnState::AnswerGenerated, generation_outcome);

        if let Err(e) = self.history.append_turn(user_id, query, &answer.text).await {
            error!(error = %e, "Failed to persist turn");
            trace.fail(TurnState::Persisted);
            record_turn("persistence_error");
            warnings.push(PERSISTENCE_WARNING.to_string());
            return Ok(ChatReply {
                success: false,
                message: PERSISTENCE_WARNING.to_string(),
                response: TURN_FAILURE_APOLOGY.to_string(),
                user_id,
                warnings,
                error_code: Some(ErrorCode::PersistenceError),
            });
        }
        trace.advance(TurnState::Persisted, "ok");
        trace.advance(TurnState::Done, generation_outcome);

        let reply = match answer.degraded {
            Some(reason) => {
                record_turn("degraded");
                warnings.push(format!("Answer generation failed: {reason}"));
                ChatReply {
                    success: false,
                    message: "A fallback reply was returned".to_string(),
                    response: answer.text,
                    user_id,
                    warnings,
                    error_code: Some(ErrorCode::GenerationError),
                }
            }
            None => {
                record_turn("success");
                ChatReply {
                    success: true,
                    message: "Response generated successfully".to_string(),
                    response: answer.text,
                    user_id,
                    warnings,
                    error_code: None,
                }
            }
        };

        info!(
            chunks = chunks.len(),
            history_turns = history.len(),
            success = reply.success,
            "Turn complete"
        );
        Ok(reply)
    }

    /// Remove every stored turn for `user_id`. Clearing an empty history succeeds.
    #[instrument(skip(self))]
    pub async fn clear_history(&self, user_id: i64) -> Result<ClearReply> {
        validate_user(user_id)?;
        let _lease = self.user_locks.acquire(user_id).await;

        let reply = match self.history.clear_history(user_id).await {
            Ok(removed) => {
                info!(removed, "History cleared");
                ClearReply {
                    success: true,
                    message: "Chat history cleared successfully".to_string(),
                    user_id,
                    removed,
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to clear history");
                ClearReply {
                    success: false,
                    message: "Chat history could not be cleared".to_string(),
                    user_id,
                    removed: 0,
                }
            }
        };
        Ok(reply)
    }

    /// Stored session for `user_id`, oldest turn first
    pub async fn history(&self, user_id: i64) -> Result<Vec<ConversationTurn>> {
        validate_user(user_id)?;
        self.history.load_history(user_id).await
    }
}

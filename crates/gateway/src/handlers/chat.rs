//! Conversation handlers

use axum::{
    extract::{Path, State},
    Json,
};
use lectern_common::{errors::Result, ConversationTurn};
use lectern_context::{ChatReply, ClearReply};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;

/// One student message
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(range(min = 1))]
    pub user_id: i64,

    #[validate(length(min = 1, max = 4000))]
    pub query: String,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub user_id: i64,
    pub turns: Vec<ConversationTurn>,
}

/// Answer one query in the student's running conversation
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>> {
    request.validate()?;
    let reply = state
        .orchestrator
        .answer_query(request.user_id, &request.query)
        .await?;
    Ok(Json(reply))
}

/// Stored turns for a student, oldest first
pub async fn get_history(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<HistoryResponse>> {
    let turns = state.orchestrator.history(user_id).await?;
    Ok(Json(HistoryResponse { user_id, turns }))
}

/// Forget a student's conversation
pub async fn clear_history(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<ClearReply>> {
    Ok(Json(state.orchestrator.clear_history(user_id).await?))
}

//! Artifact and lecture handlers

use axum::{extract::State, Json};
use lectern_common::errors::Result;
use lectern_context::{
    ArtifactKind, ArtifactParameters, ArtifactReply, ArtifactRequest, LectureRef,
};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::AppState;

const MAX_WRONG_QUESTIONS: usize = 50;

/// Request for one generated artifact
#[derive(Debug, Deserialize, Validate)]
pub struct ProduceArtifactRequest {
    pub kind: ArtifactKind,

    #[serde(default)]
    #[validate(length(max = 500))]
    pub topic: String,

    #[serde(default)]
    #[validate(custom(function = "validate_parameters"))]
    pub parameters: ArtifactParameters,
}

fn validate_parameters(parameters: &ArtifactParameters) -> std::result::Result<(), ValidationError> {
    if parameters.wrong_questions.len() > MAX_WRONG_QUESTIONS {
        return Err(ValidationError::new("too_many_wrong_questions"));
    }
    if parameters.wrong_questions.iter().any(|q| q.len() > 4000) {
        return Err(ValidationError::new("wrong_question_too_long"));
    }
    Ok(())
}

impl From<ProduceArtifactRequest> for ArtifactRequest {
    fn from(request: ProduceArtifactRequest) -> Self {
        ArtifactRequest::new(request.kind, request.topic).with_parameters(request.parameters)
    }
}

#[derive(Serialize)]
pub struct ClearCacheResponse {
    pub success: bool,
    pub removed: u64,
}

#[derive(Serialize)]
pub struct LecturesResponse {
    pub lectures: Vec<LectureRef>,
}

/// Produce (or replay from cache) a quiz, notes, summary or suggestion set
pub async fn produce(
    State(state): State<AppState>,
    Json(request): Json<ProduceArtifactRequest>,
) -> Result<Json<ArtifactReply>> {
    request.validate()?;
    let reply = state.artifacts.produce_artifact(request.into()).await?;
    Ok(Json(reply))
}

pub async fn clear_cache(State(state): State<AppState>) -> Result<Json<ClearCacheResponse>> {
    let removed = state.artifacts.clear_artifact_cache().await?;
    Ok(Json(ClearCacheResponse {
        success: true,
        removed,
    }))
}

/// Lectures that have a transcript in the index
pub async fn lectures(State(state): State<AppState>) -> Result<Json<LecturesResponse>> {
    let lectures = state.artifacts.available_lectures().await?;
    Ok(Json(LecturesResponse { lectures }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_defaults_and_limits() {
        let body: ProduceArtifactRequest =
            serde_json::from_str(r#"{"kind": "mcq", "topic": "pca"}"#).unwrap();
        tokio_test::assert_ok!(body.validate());
        assert_eq!(body.parameters, ArtifactParameters::default());

        let body: ProduceArtifactRequest = serde_json::from_value(serde_json::json!({
            "kind": "suggestions",
            "parameters": {"wrong_questions": vec!["q"; MAX_WRONG_QUESTIONS + 1]},
        }))
        .unwrap();
        tokio_test::assert_err!(body.validate());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let parsed = serde_json::from_str::<ProduceArtifactRequest>(r#"{"kind": "essay"}"#);
        assert!(parsed.is_err());
    }
}

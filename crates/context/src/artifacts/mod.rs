//! Structured study artifacts
//!
//! Each kind is a recipe plugged into the generic retrieve-and-generate
//! worker. Successful artifacts are cached until the cache is cleared.

mod mcq;
mod notes;
mod schema;
mod suggestions;
mod summary;
mod worker;

pub use mcq::{exam_scope, McqQuestion, McqSet};
pub use notes::NotesDocument;
pub use suggestions::{SuggestionSet, TopicSuggestion};
pub use summary::SummaryDocument;
pub use worker::RetrieveAndGenerate;

use std::fmt;
use std::sync::Arc;

use lectern_common::cache::{keys, CacheBackend};
use lectern_common::config::WorkerConfig;
use lectern_common::errors::{AppError, ErrorCode, Result};
use lectern_common::llm::CompletionOptions;
use lectern_common::metrics::{record_artifact, record_cache};
use lectern_search::Retriever;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::resources::ResourceContext;
use worker::Recipe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Mcq,
    Notes,
    Summary,
    Suggestions,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Mcq => "mcq",
            ArtifactKind::Notes => "notes",
            ArtifactKind::Summary => "summary",
            ArtifactKind::Suggestions => "suggestions",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific knobs; fields a kind does not use are cleared before keying.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactParameters {
    pub num_questions: Option<usize>,
    pub week: Option<u32>,
    pub lecture: Option<u32>,
    pub wrong_questions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRequest {
    pub kind: ArtifactKind,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub parameters: ArtifactParameters,
}

impl ArtifactRequest {
    pub fn new(kind: ArtifactKind, topic: impl Into<String>) -> Self {
        Self {
            kind,
            topic: topic.into(),
            parameters: ArtifactParameters::default(),
        }
    }

    pub fn with_parameters(mut self, parameters: ArtifactParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Artifact {
    Mcq(McqSet),
    Notes(NotesDocument),
    Summary(SummaryDocument),
    Suggestions(SuggestionSet),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Mcq(_) => ArtifactKind::Mcq,
            Artifact::Notes(_) => ArtifactKind::Notes,
            Artifact::Summary(_) => ArtifactKind::Summary,
            Artifact::Suggestions(_) => ArtifactKind::Suggestions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactReply {
    pub success: bool,
    pub message: String,
    pub kind: ArtifactKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

/// A lecture transcript present in the index
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LectureRef {
    pub week: u32,
    pub lecture: u32,
    pub source: String,
}

pub struct ArtifactService {
    worker: RetrieveAndGenerate,
    retriever: Arc<Retriever>,
    cache: Arc<dyn CacheBackend>,
    config: WorkerConfig,
    lecture_source: Regex,
}

impl ArtifactService {
    pub fn new(
        worker: RetrieveAndGenerate,
        retriever: Arc<Retriever>,
        cache: Arc<dyn CacheBackend>,
        config: WorkerConfig,
    ) -> Result<Self> {
        let lecture_source =
            Regex::new(r"^Week_(\d+)_Lecture_(\d+)\.pdf$").map_err(|e| AppError::Internal {
                message: format!("invalid lecture source pattern: {e}"),
            })?;
        Ok(Self {
            worker,
            retriever,
            cache,
            config,
            lecture_source,
        })
    }

    pub async fn from_resources(resources: &ResourceContext) -> Result<Self> {
        let config = resources.config();
        let retriever = resources.get_retriever().await?;
        let worker = RetrieveAndGenerate::new(
            retriever.clone(),
            resources.get_generation_model().await?,
            CompletionOptions::from_config(&config.generation),
            CompletionOptions::structured(&config.generation),
            config.generate_timeout(),
            config.workers.max_schema_retries,
        );
        Self::new(
            worker,
            retriever,
            resources.get_artifact_cache().await?,
            config.workers.clone(),
        )
    }

    fn recipe(&self, kind: ArtifactKind) -> Box<dyn Recipe> {
        let config = self.config.clone();
        match kind {
            ArtifactKind::Mcq => Box::new(mcq::McqRecipe::new(config)),
            ArtifactKind::Notes => Box::new(notes::NotesRecipe::new(config)),
            ArtifactKind::Summary => Box::new(summary::SummaryRecipe::new(config)),
            ArtifactKind::Suggestions => Box::new(suggestions::SuggestionsRecipe::new(config)),
        }
    }

    /// Produce (or replay from cache) one artifact.
    ///
    /// Invalid parameters are an `Err`; pipeline failures come back as
    /// `success = false` with no artifact.
    #[instrument(skip(self, request), fields(kind = %request.kind))]
    pub async fn produce_artifact(&self, request: ArtifactRequest) -> Result<ArtifactReply> {
        let recipe = self.recipe(request.kind);
        let request = recipe.normalize(request)?;
        let kind = request.kind;
        let key = keys::artifact(
            kind.as_str(),
            &request.topic,
            &serde_json::to_value(&request.parameters)?,
        );

        if let Some(artifact) = self.cached(&key).await {
            record_artifact(kind.as_str(), "cached");
            return Ok(ArtifactReply {
                success: true,
                message: format!("Returned cached {kind} for '{}'", request.topic),
                kind,
                artifact: Some(artifact),
                cached: true,
                error_code: None,
            });
        }

        match self.worker.produce(recipe.as_ref(), &request).await {
            Ok(artifact) => {
                record_artifact(kind.as_str(), "success");
                self.store(&key, &artifact).await;
                info!(topic = %request.topic, "Artifact produced");
                Ok(ArtifactReply {
                    success: true,
                    message: format!("Successfully generated {kind} for '{}'", request.topic),
                    kind,
                    artifact: Some(artifact),
                    cached: false,
                    error_code: None,
                })
            }
            Err(e) => {
                record_artifact(kind.as_str(), "failure");
                warn!(topic = %request.topic, error = %e, "Artifact generation failed");
                Ok(ArtifactReply {
                    success: false,
                    message: e.to_string(),
                    kind,
                    artifact: None,
                    cached: false,
                    error_code: Some(e.code()),
                })
            }
        }
    }

    async fn cached(&self, key: &str) -> Option<Artifact> {
        let value = match self.cache.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Artifact cache read failed");
                None
            }
        };
        record_cache(value.is_some(), "artifact");

        match serde_json::from_value(value?) {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable cached artifact");
                None
            }
        }
    }

    async fn store(&self, key: &str, artifact: &Artifact) {
        let value = match serde_json::to_value(artifact) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Artifact not cacheable");
                return;
            }
        };
        if let Err(e) = self.cache.put(key, value).await {
            warn!(error = %e, "Artifact cache write failed");
        }
    }

    /// Empty the artifact cache; returns the number of evicted entries.
    pub async fn clear_artifact_cache(&self) -> Result<u64> {
        let removed = self.cache.clear().await?;
        info!(removed, backend = self.cache.backend(), "Artifact cache cleared");
        Ok(removed)
    }

    /// Lecture transcripts in the index, ordered by week then lecture
    pub async fn available_lectures(&self) -> Result<Vec<LectureRef>> {
        let mut lectures: Vec<LectureRef> = self
            .retriever
            .sources()
            .await?
            .into_iter()
            .filter_map(|source| {
                let caps = self.lecture_source.captures(&source)?;
                let week = caps.get(1)?.as_str().parse().ok()?;
                let lecture = caps.get(2)?.as_str().parse().ok()?;
                Some(LectureRef {
                    week,
                    lecture,
                    source,
                })
            })
            .collect();
        lectures.sort();
        Ok(lectures)
    }
}

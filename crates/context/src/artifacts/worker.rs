//! Generic retrieve-and-generate worker
//!
//! retrieve -> assemble prompt -> generate -> parse, with a bounded number
//! of retries on a context-free fallback prompt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lectern_common::errors::{AppError, Result};
use lectern_common::llm::{ChatMessage, ChatModel, CompletionOptions};
use lectern_common::metrics::record_stage;
use lectern_common::resilience::with_timeout;
use lectern_search::{DocumentChunk, MetadataFilter, Retriever};
use tracing::{debug, warn};

use super::{Artifact, ArtifactKind, ArtifactRequest};
use crate::prompts::{join_context, truncate_chars};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RetrievalStep {
    /// Top-`k` chunks by similarity to `query`
    Similar {
        query: String,
        k: usize,
        filter: Option<MetadataFilter>,
    },
    /// Filter-only listing in ordinal order
    Scan { filter: MetadataFilter, limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gather {
    /// Every step contributes one group
    All,
    /// Stop at the first step that finds anything
    FirstNonEmpty,
}

#[derive(Debug, Clone)]
pub(crate) struct RetrievalPlan {
    pub steps: Vec<RetrievalStep>,
    pub gather: Gather,
    pub max_chunks: Option<usize>,
    pub chunk_separator: &'static str,
    pub group_separator: &'static str,
    pub max_context_chars: Option<usize>,
}

impl RetrievalPlan {
    pub fn single(step: RetrievalStep) -> Self {
        Self {
            steps: vec![step],
            ..Self::single_group()
        }
    }

    /// Try `steps` in order and keep the first that finds anything
    pub fn first_non_empty(steps: Vec<RetrievalStep>) -> Self {
        Self {
            steps,
            gather: Gather::FirstNonEmpty,
            ..Self::single_group()
        }
    }

    fn single_group() -> Self {
        Self {
            steps: Vec::new(),
            gather: Gather::All,
            max_chunks: None,
            chunk_separator: "\n",
            group_separator: "\n\n",
            max_context_chars: None,
        }
    }
}

/// Retrieved material handed to prompt assembly and parsing
#[derive(Debug, Clone, Default)]
pub(crate) struct Gathered {
    pub chunks: Vec<DocumentChunk>,
    pub context: String,
}

impl Gathered {
    /// Distinct sources in first-seen order
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for chunk in &self.chunks {
            if !sources.contains(&chunk.metadata.source_id) {
                sources.push(chunk.metadata.source_id.clone());
            }
        }
        sources
    }
}

/// One artifact kind: how to retrieve, prompt and validate
pub(crate) trait Recipe: Send + Sync {
    fn kind(&self) -> ArtifactKind;

    /// Check parameters, fill defaults and clear fields the kind ignores.
    fn normalize(&self, request: ArtifactRequest) -> Result<ArtifactRequest>;

    /// An artifact that needs no retrieval or model call
    fn short_circuit(&self, _request: &ArtifactRequest) -> Option<Artifact> {
        None
    }

    fn plan(&self, request: &ArtifactRequest) -> RetrievalPlan;

    /// `Some` when an empty retrieval must fail the request
    fn no_context(&self, _request: &ArtifactRequest) -> Option<AppError> {
        None
    }

    fn prompt(&self, request: &ArtifactRequest, context: &str) -> Vec<ChatMessage>;

    /// Topic-only prompt used for retries
    fn fallback_prompt(&self, request: &ArtifactRequest) -> Vec<ChatMessage>;

    /// Whether the model should be asked for JSON
    fn structured(&self) -> bool;

    fn parse(&self, request: &ArtifactRequest, raw: &str, gathered: &Gathered)
        -> Result<Artifact>;
}

pub struct RetrieveAndGenerate {
    retriever: Arc<Retriever>,
    model: Arc<dyn ChatModel>,
    text_options: CompletionOptions,
    structured_options: CompletionOptions,
    timeout: Duration,
    max_schema_retries: u32,
}

impl RetrieveAndGenerate {
    pub fn new(
        retriever: Arc<Retriever>,
        model: Arc<dyn ChatModel>,
        text_options: CompletionOptions,
        structured_options: CompletionOptions,
        timeout: Duration,
        max_schema_retries: u32,
    ) -> Self {
        Self {
            retriever,
            model,
            text_options,
            structured_options,
            timeout,
            max_schema_retries,
        }
    }

    pub(crate) async fn produce(
        &self,
        recipe: &dyn Recipe,
        request: &ArtifactRequest,
    ) -> Result<Artifact> {
        if let Some(artifact) = recipe.short_circuit(request) {
            debug!(kind = %recipe.kind(), "Artifact short-circuited");
            return Ok(artifact);
        }

        let started = Instant::now();
        let gathered = match self.gather(&recipe.plan(request)).await {
            Ok(gathered) => {
                record_stage("artifact_retrieve", started.elapsed(), "ok");
                gathered
            }
            Err(e) => {
                record_stage("artifact_retrieve", started.elapsed(), "error");
                return Err(e);
            }
        };

        if gathered.chunks.is_empty() {
            if let Some(err) = recipe.no_context(request) {
                return Err(err);
            }
        }
        debug!(
            kind = %recipe.kind(),
            chunks = gathered.chunks.len(),
            context_chars = gathered.context.len(),
            "Context gathered"
        );

        let options = if recipe.structured() {
            &self.structured_options
        } else {
            &self.text_options
        };

        let mut messages = recipe.prompt(request, &gathered.context);
        let mut attempt = 0;
        loop {
            let result = self
                .generate(&messages, options)
                .await
                .and_then(|raw| recipe.parse(request, &raw, &gathered));

            match result {
                Ok(artifact) => return Ok(artifact),
                Err(e) if e.is_retryable_for_artifact() && attempt < self.max_schema_retries => {
                    attempt += 1;
                    warn!(
                        kind = %recipe.kind(),
                        attempt,
                        error = %e,
                        "Artifact attempt failed, retrying with fallback prompt"
                    );
                    messages = recipe.fallback_prompt(request);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn gather(&self, plan: &RetrievalPlan) -> Result<Gathered> {
        let mut groups: Vec<Vec<DocumentChunk>> = Vec::with_capacity(plan.steps.len());

        for step in &plan.steps {
            let chunks = match step {
                RetrievalStep::Similar { query, k, filter } => {
                    self.retriever.retrieve(query, *k, filter.as_ref()).await?
                }
                RetrievalStep::Scan { filter, limit } => self.retriever.scan(filter, *limit).await?,
            };

            if plan.gather == Gather::FirstNonEmpty {
                if !chunks.is_empty() {
                    groups.push(chunks);
                    break;
                }
            } else {
                groups.push(chunks);
            }
        }

        if let Some(max) = plan.max_chunks {
            let mut budget = max;
            for group in &mut groups {
                group.truncate(budget);
                budget -= group.len();
            }
        }

        let context = groups
            .iter()
            .map(|group| join_context(group.iter().map(|c| c.text.as_str()), plan.chunk_separator))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(plan.group_separator);
        let context = match plan.max_context_chars {
            Some(max) => truncate_chars(&context, max).to_string(),
            None => context,
        };

        Ok(Gathered {
            chunks: groups.into_iter().flatten().collect(),
            context,
        })
    }

    async fn generate(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Result<String> {
        let started = Instant::now();
        let result = with_timeout(
            "generate_artifact",
            self.timeout,
            self.model.complete(messages, options),
        )
        .await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        record_stage("artifact_generate", started.elapsed(), outcome);
        result
    }
}

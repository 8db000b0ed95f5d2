//! Test doubles shared by the pipeline tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lectern_common::config::AppConfig;
use lectern_common::db::{ConversationTurn, HistoryStore, MemoryHistoryStore};
use lectern_common::embeddings::{Embedder, HashingEmbedder};
use lectern_common::errors::{AppError, Result};
use lectern_common::llm::{ChatMessage, ChatModel, CompletionOptions};
use lectern_search::{DocumentChunk, FileVectorIndex, MetadataFilter, ScoredChunk, VectorIndex};

use crate::resources::ResourceContext;

type Script = dyn Fn(usize, &[ChatMessage], &CompletionOptions) -> Result<String> + Send + Sync;

/// Chat model driven by a closure; counts and records every call
pub struct ScriptedModel {
    script: Box<Script>,
    delay: Duration,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    /// `script` receives the zero-based call number
    pub fn new(
        script: impl Fn(usize, &[ChatMessage], &CompletionOptions) -> Result<String>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(reply: impl Into<String>) -> Arc<Self> {
        let reply = reply.into();
        Self::new(move |_, _, _| Ok(reply.clone()))
    }

    /// Replies only after sleeping for `delay` on every call
    pub fn delayed(delay: Duration, reply: impl Into<String>) -> Arc<Self> {
        let reply = reply.into();
        Arc::new(Self {
            script: Box::new(move |_, _, _| Ok(reply.clone())),
            delay,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Self::new(|_, _, _| {
            Err(AppError::Generation {
                message: "model unavailable".into(),
            })
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(messages.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.script)(call, messages, options)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Hashing embedder that remembers every text it was asked to embed
pub struct RecordingEmbedder {
    inner: HashingEmbedder,
    pub texts: Mutex<Vec<String>>,
}

impl RecordingEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: HashingEmbedder::new("hashing", 64).unwrap(),
            texts: Mutex::new(Vec::new()),
        })
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for RecordingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.texts.lock().unwrap().push(text.to_string());
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner.embed_batch(texts).await
    }

    fn model_name(&self) -> &str {
        "recording"
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// History store whose reads or writes can be made to fail
#[derive(Default)]
pub struct FlakyHistoryStore {
    inner: MemoryHistoryStore,
    pub fail_load: bool,
    pub fail_append: bool,
}

impl FlakyHistoryStore {
    pub fn failing_loads() -> Self {
        Self {
            fail_load: true,
            ..Default::default()
        }
    }

    pub fn failing_appends() -> Self {
        Self {
            fail_append: true,
            ..Default::default()
        }
    }
}

fn unavailable() -> AppError {
    AppError::Persistence {
        message: "history store unavailable".into(),
    }
}

#[async_trait]
impl HistoryStore for FlakyHistoryStore {
    async fn load_history(&self, user_id: i64) -> Result<Vec<ConversationTurn>> {
        if self.fail_load {
            return Err(unavailable());
        }
        self.inner.load_history(user_id).await
    }

    async fn append_turn(
        &self,
        user_id: i64,
        query: &str,
        response: &str,
    ) -> Result<ConversationTurn> {
        if self.fail_append {
            return Err(unavailable());
        }
        self.inner.append_turn(user_id, query, response).await
    }

    async fn clear_history(&self, user_id: i64) -> Result<u64> {
        self.inner.clear_history(user_id).await
    }

    fn backend(&self) -> &'static str {
        "flaky"
    }
}

/// Index whose backend is down; errors carry connection details
pub struct UnreachableIndex;

pub const UNREACHABLE_DETAIL: &str = "connection refused: vectors.internal:5432";

fn refused() -> AppError {
    AppError::Retrieval {
        message: UNREACHABLE_DETAIL.into(),
    }
}

#[async_trait]
impl VectorIndex for UnreachableIndex {
    async fn search(
        &self,
        _embedding: &[f32],
        _k: usize,
        _filter: &MetadataFilter,
    ) -> Result<Vec<ScoredChunk>> {
        Err(refused())
    }

    async fn scan(&self, _filter: &MetadataFilter, _limit: usize) -> Result<Vec<DocumentChunk>> {
        Err(refused())
    }

    async fn sources(&self) -> Result<Vec<String>> {
        Err(refused())
    }

    async fn len(&self) -> Result<usize> {
        Err(refused())
    }

    fn dimension(&self) -> Option<usize> {
        None
    }

    fn backend(&self) -> &'static str {
        "unreachable"
    }
}

/// A few weeks of lecture material with week/lecture metadata
pub fn course_chunks() -> Vec<DocumentChunk> {
    let lectures = [
        (1, 1, "Python basics, NumPy arrays and data types for machine learning."),
        (1, 2, "Pandas data frames, loading CSV files and handling missing values."),
        (2, 1, "Linear regression fits a line by minimising squared error between predictions and targets."),
        (2, 2, "Gradient descent updates weights in the direction of the negative gradient of the loss."),
        (3, 1, "Logistic regression models class probabilities with the sigmoid function."),
        (3, 2, "Regularisation with ridge and lasso penalties reduces overfitting in linear models."),
        (4, 1, "Decision trees split features to maximise information gain or reduce Gini impurity."),
    ];

    let mut chunks = Vec::new();
    for (ordinal, (week, lecture, text)) in lectures.iter().enumerate() {
        chunks.push(
            DocumentChunk::new(*text, format!("Week_{week}_Lecture_{lecture}.pdf"), ordinal as u32)
                .with_week(*week)
                .with_lecture(*lecture),
        );
        chunks.push(
            DocumentChunk::new(
                format!("Week {week} slide deck: {text}"),
                format!("MLP Week {week} Slides.pdf"),
                ordinal as u32,
            )
            .with_week(*week),
        );
    }
    chunks
}

/// Resource context over in-memory stores and the sample course index
pub async fn resources(
    model: Arc<dyn ChatModel>,
    history: Arc<dyn HistoryStore>,
) -> (ResourceContext, Arc<RecordingEmbedder>) {
    resources_with(model, history, AppConfig::default()).await
}

/// Same as [`resources`] with caller-chosen settings
pub async fn resources_with(
    model: Arc<dyn ChatModel>,
    history: Arc<dyn HistoryStore>,
    mut config: AppConfig,
) -> (ResourceContext, Arc<RecordingEmbedder>) {
    let embedder = RecordingEmbedder::new();
    let index = FileVectorIndex::build(embedder.as_ref(), course_chunks())
        .await
        .unwrap();

    config.embedding.dimension = embedder.dimension();

    let context = ResourceContext::new(Arc::new(config))
        .with_embedder(embedder.clone())
        .with_vector_index(Arc::new(index))
        .with_generation_model(model)
        .with_history_store(history);
    (context, embedder)
}

/// Resource context whose vector index refuses every query
pub fn unreachable_resources(
    model: Arc<dyn ChatModel>,
    history: Arc<dyn HistoryStore>,
) -> ResourceContext {
    let embedder = RecordingEmbedder::new();
    let mut config = AppConfig::default();
    config.embedding.dimension = embedder.dimension();

    ResourceContext::new(Arc::new(config))
        .with_embedder(embedder)
        .with_vector_index(Arc::new(UnreachableIndex))
        .with_generation_model(model)
        .with_history_store(history)
}

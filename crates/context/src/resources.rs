//! Resource context
//!
//! One instance per process, built before the first request and shared by
//! the orchestrator and the artifact workers. Each resource is constructed
//! at most once; concurrent first callers wait on the same initialisation.

use std::sync::Arc;

use lectern_common::cache::{create_cache, CacheBackend};
use lectern_common::config::AppConfig;
use lectern_common::db::{DbPool, HistoryStore, MemoryHistoryStore, SqlHistoryStore};
use lectern_common::embeddings::{create_embedder, Embedder};
use lectern_common::errors::{AppError, Result};
use lectern_common::llm::{create_chat_model, ChatModel};
use lectern_search::{create_vector_index, Retriever, VectorIndex};
use tokio::sync::OnceCell;
use tracing::info;

pub struct ResourceContext {
    config: Arc<AppConfig>,
    embedder: OnceCell<Arc<dyn Embedder>>,
    index: OnceCell<Arc<dyn VectorIndex>>,
    retriever: OnceCell<Arc<Retriever>>,
    model: OnceCell<Arc<dyn ChatModel>>,
    db: OnceCell<Option<DbPool>>,
    history: OnceCell<Arc<dyn HistoryStore>>,
    cache: OnceCell<Arc<dyn CacheBackend>>,
}

impl ResourceContext {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            config,
            embedder: OnceCell::new(),
            index: OnceCell::new(),
            retriever: OnceCell::new(),
            model: OnceCell::new(),
            db: OnceCell::new(),
            history: OnceCell::new(),
            cache: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Validate configuration and build every resource
    pub async fn initialize(&self) -> Result<()> {
        self.config.validate()?;

        self.get_db().await?;
        let embedder = self.get_embedder().await?;
        let index = self.get_vector_index().await?;
        let model = self.get_generation_model().await?;
        self.get_retriever().await?;
        let history = self.get_history_store().await?;
        let cache = self.get_artifact_cache().await?;

        info!(
            embedder = embedder.model_name(),
            index = index.backend(),
            model = model.model_name(),
            history = history.backend(),
            cache = cache.backend(),
            "Resource context initialized"
        );
        Ok(())
    }

    pub async fn get_embedder(&self) -> Result<Arc<dyn Embedder>> {
        self.embedder
            .get_or_try_init(|| async { create_embedder(&self.config.embedding) })
            .await
            .cloned()
    }

    /// Vector index at `index.path` (file) or `index.table` (pgvector)
    pub async fn get_vector_index(&self) -> Result<Arc<dyn VectorIndex>> {
        self.index
            .get_or_try_init(|| async {
                let db = self.get_db().await?;
                create_vector_index(&self.config.index, db.as_ref()).await
            })
            .await
            .cloned()
    }

    pub async fn get_generation_model(&self) -> Result<Arc<dyn ChatModel>> {
        self.model
            .get_or_try_init(|| async { create_chat_model(&self.config.generation) })
            .await
            .cloned()
    }

    pub async fn get_retriever(&self) -> Result<Arc<Retriever>> {
        self.retriever
            .get_or_try_init(|| async {
                let embedder = self.get_embedder().await?;
                let index = self.get_vector_index().await?;

                if let Some(dimension) = index.dimension() {
                    if dimension != embedder.dimension() {
                        return Err(AppError::configuration(format!(
                            "vector index has dimension {}, embedder '{}' produces {}",
                            dimension,
                            embedder.model_name(),
                            embedder.dimension()
                        )));
                    }
                }

                Ok(Arc::new(Retriever::new(
                    embedder,
                    index,
                    self.config.retrieval.query_cache_entries,
                    self.config.retrieval_timeout(),
                )))
            })
            .await
            .cloned()
    }

    /// Relational pool, present only when a backend needs it
    pub async fn get_db(&self) -> Result<Option<DbPool>> {
        self.db
            .get_or_try_init(|| async {
                if !self.config.needs_database() {
                    return Ok(None);
                }
                DbPool::new(&self.config.database).await.map(Some)
            })
            .await
            .cloned()
    }

    pub async fn get_history_store(&self) -> Result<Arc<dyn HistoryStore>> {
        self.history
            .get_or_try_init(|| async {
                let store: Arc<dyn HistoryStore> = match self.config.history.backend.as_str() {
                    "memory" => Arc::new(MemoryHistoryStore::new()),
                    "sql" => {
                        let pool = self.get_db().await?.ok_or_else(|| {
                            AppError::configuration("the sql history store needs database.url")
                        })?;
                        Arc::new(SqlHistoryStore::new(pool))
                    }
                    other => {
                        return Err(AppError::configuration(format!(
                            "unknown history backend '{other}'"
                        )))
                    }
                };
                Ok(store)
            })
            .await
            .cloned()
    }

    pub async fn get_artifact_cache(&self) -> Result<Arc<dyn CacheBackend>> {
        self.cache
            .get_or_try_init(|| async { create_cache(&self.config.cache).await })
            .await
            .cloned()
    }

    /// Readiness check: the index answers and the database (if any) pings
    pub async fn check_ready(&self) -> Result<()> {
        self.get_vector_index().await?.len().await?;
        if let Some(db) = self.get_db().await? {
            db.ping().await?;
        }
        Ok(())
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = OnceCell::new_with(Some(embedder));
        self
    }

    pub fn with_vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = OnceCell::new_with(Some(index));
        self
    }

    pub fn with_generation_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = OnceCell::new_with(Some(model));
        self
    }

    pub fn with_history_store(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = OnceCell::new_with(Some(history));
        self
    }

    pub fn with_artifact_cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = OnceCell::new_with(Some(cache));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_common::embeddings::HashingEmbedder;
    use lectern_search::{DocumentChunk, FileVectorIndex};

    async fn snapshot_dir(dimension: usize) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashingEmbedder::new("hashing", dimension).unwrap();
        let chunks = vec![DocumentChunk::new("Gradient descent", "Week_2_Lecture_1.pdf", 0)];
        FileVectorIndex::build(&embedder, chunks)
            .await
            .unwrap()
            .save(dir.path())
            .await
            .unwrap();
        dir
    }

    fn config_for(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.index.path = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_resources_are_built_once() {
        let dir = snapshot_dir(lectern_common::DEFAULT_EMBEDDING_DIMENSION).await;
        let resources = ResourceContext::new(Arc::new(config_for(dir.path())));
        tokio_test::assert_ok!(resources.initialize().await);

        let a = resources.get_generation_model().await.unwrap();
        let b = resources.get_generation_model().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let a = resources.get_retriever().await.unwrap();
        let b = resources.get_retriever().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        assert!(resources.get_db().await.unwrap().is_none());
        tokio_test::assert_ok!(resources.check_ready().await);
    }

    #[tokio::test]
    async fn test_missing_index_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let resources = ResourceContext::new(Arc::new(config_for(&dir.path().join("absent"))));
        let err = resources.get_vector_index().await.err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_missing_credential_surfaces() {
        let mut config = AppConfig::default();
        config.generation.provider = "gemini".to_string();
        config.generation.api_key = None;
        let resources = ResourceContext::new(Arc::new(config));
        let err = resources.initialize().await.err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let dir = snapshot_dir(16).await;
        let resources = ResourceContext::new(Arc::new(config_for(dir.path())));
        let err = resources.get_retriever().await.err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use lectern_common::cache::{keys, BoundedCache};
use lectern_common::embeddings::Embedder;
use lectern_common::errors::{AppError, Result};
use lectern_common::metrics::{record_cache, record_retrieval};
use lectern_common::resilience::with_timeout;
use tracing::{debug, instrument};

use super::{DocumentChunk, MetadataFilter, ScoredChunk, VectorIndex};

/// Embeds queries and runs them against the vector index.
///
/// Never mutates the index. Every failure below the validation check is
/// reported as [`AppError::Retrieval`].
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    query_cache: BoundedCache<Arc<Vec<f32>>>,
    timeout: Duration,
}

fn as_retrieval(err: AppError) -> AppError {
    match err {
        AppError::Retrieval { .. } | AppError::Validation { .. } => err,
        other => AppError::Retrieval {
            message: other.to_string(),
        },
    }
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        query_cache_entries: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            query_cache: BoundedCache::new(Some(query_cache_entries)),
            timeout,
        }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Up to `k` chunks most similar to `query`, best first.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<DocumentChunk>> {
        Ok(self
            .retrieve_scored(query, k, filter)
            .await?
            .into_iter()
            .map(|s| s.chunk)
            .collect())
    }

    #[instrument(skip(self, query, filter), fields(backend = self.index.backend()))]
    pub async fn retrieve_scored(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Err(AppError::validation("k", "k must be a positive integer"));
        }

        let started = Instant::now();
        let default_filter = MetadataFilter::default();
        let filter = filter.unwrap_or(&default_filter);

        let results = with_timeout("retrieve", self.timeout, async {
            let embedding = self.embed_query(query).await?;
            self.index.search(&embedding, k, filter).await
        })
        .await
        .map_err(as_retrieval)?;

        record_retrieval(self.index.backend(), k, results.len());
        debug!(
            results = results.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Retrieval complete"
        );
        Ok(results)
    }

    /// Filter-only listing, used when there is no query text to rank by.
    pub async fn scan(&self, filter: &MetadataFilter, limit: usize) -> Result<Vec<DocumentChunk>> {
        with_timeout("scan", self.timeout, self.index.scan(filter, limit))
            .await
            .map_err(as_retrieval)
    }

    pub async fn sources(&self) -> Result<Vec<String>> {
        with_timeout("sources", self.timeout, self.index.sources())
            .await
            .map_err(as_retrieval)
    }

    async fn embed_query(&self, query: &str) -> Result<Arc<Vec<f32>>> {
        let key = keys::embedding(self.embedder.model_name(), query);
        if let Some(hit) = self.query_cache.get(&key) {
            record_cache(true, "query_embedding");
            return Ok(hit);
        }
        record_cache(false, "query_embedding");

        let embedding = Arc::new(self.embedder.embed(query).await?);
        self.query_cache.insert(key, embedding.clone());
        Ok(embedding)
    }
}

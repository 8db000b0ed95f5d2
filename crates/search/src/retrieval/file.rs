//! In-memory index loaded from a JSON snapshot
//!
//! Snapshot layout (`<index.path>/index.json`):
//! `{ "dimension": 384, "entries": [ { "embedding": [...], "chunk": {...} } ] }`

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lectern_common::embeddings::Embedder;
use lectern_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{cosine, DocumentChunk, MetadataFilter, ScoredChunk, VectorIndex};

pub const SNAPSHOT_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    embedding: Vec<f32>,
    chunk: DocumentChunk,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    dimension: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    entries: Vec<IndexEntry>,
}

/// Exact cosine k-NN over entries held in insertion order
pub struct FileVectorIndex {
    dimension: usize,
    model: Option<String>,
    entries: Vec<IndexEntry>,
}

fn snapshot_path(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == "json") {
        path.to_path_buf()
    } else {
        path.join(SNAPSHOT_FILE)
    }
}

impl FileVectorIndex {
    /// Load `<dir>/index.json` (or `dir` itself when it names a `.json` file)
    pub async fn load(path: &Path) -> Result<Self> {
        let file = snapshot_path(path);
        let raw = tokio::fs::read_to_string(&file).await.map_err(|e| {
            AppError::configuration(format!(
                "cannot read vector index at {}: {}",
                file.display(),
                e
            ))
        })?;

        let snapshot: Snapshot = serde_json::from_str(&raw).map_err(|e| {
            AppError::configuration(format!(
                "malformed vector index at {}: {}",
                file.display(),
                e
            ))
        })?;

        let index = Self::from_snapshot(snapshot)?;
        info!(
            path = %file.display(),
            entries = index.entries.len(),
            dimension = index.dimension,
            "Vector index loaded"
        );
        Ok(index)
    }

    fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        if let Some((position, entry)) = snapshot
            .entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.embedding.len() != snapshot.dimension)
        {
            return Err(AppError::configuration(format!(
                "index entry {} ({}) has dimension {}, expected {}",
                position,
                entry.chunk.metadata.source_id,
                entry.embedding.len(),
                snapshot.dimension
            )));
        }

        Ok(Self {
            dimension: snapshot.dimension,
            model: snapshot.model,
            entries: snapshot.entries,
        })
    }

    /// Build an index from pre-computed `(embedding, chunk)` pairs
    pub fn from_entries(dimension: usize, entries: Vec<(Vec<f32>, DocumentChunk)>) -> Result<Self> {
        Self::from_snapshot(Snapshot {
            dimension,
            model: None,
            entries: entries
                .into_iter()
                .map(|(embedding, chunk)| IndexEntry { embedding, chunk })
                .collect(),
        })
    }

    /// Embed `chunks` with `embedder` and index them in the given order
    pub async fn build(embedder: &dyn Embedder, chunks: Vec<DocumentChunk>) -> Result<Self> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder.embed_batch(&texts).await?;
        let mut index = Self::from_entries(
            embedder.dimension(),
            embeddings.into_iter().zip(chunks).collect(),
        )?;
        index.model = Some(embedder.model_name().to_string());
        Ok(index)
    }

    /// Write the snapshot to `<dir>/index.json`
    pub async fn save(&self, dir: &Path) -> Result<PathBuf> {
        let file = snapshot_path(dir);
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let snapshot = Snapshot {
            dimension: self.dimension,
            model: self.model.clone(),
            entries: self.entries.clone(),
        };
        tokio::fs::write(&file, serde_json::to_vec(&snapshot)?).await?;
        Ok(file)
    }

    /// Embedding model recorded in the snapshot, if any
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }
}

#[async_trait]
impl VectorIndex for FileVectorIndex {
    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredChunk>> {
        if embedding.len() != self.dimension {
            return Err(AppError::Retrieval {
                message: format!(
                    "query embedding has dimension {}, index expects {}",
                    embedding.len(),
                    self.dimension
                ),
            });
        }

        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .filter(|e| filter.matches(&e.chunk.metadata))
            .map(|e| (cosine(embedding, &e.embedding), e))
            .collect();

        // sort_by is stable, so equal scores keep insertion order
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, e)| ScoredChunk {
                chunk: e.chunk.clone(),
                score,
            })
            .collect())
    }

    async fn scan(&self, filter: &MetadataFilter, limit: usize) -> Result<Vec<DocumentChunk>> {
        let mut matched: Vec<&DocumentChunk> = self
            .entries
            .iter()
            .map(|e| &e.chunk)
            .filter(|c| filter.matches(&c.metadata))
            .collect();
        matched.sort_by_key(|c| c.metadata.ordinal);
        Ok(matched.into_iter().take(limit).cloned().collect())
    }

    async fn sources(&self) -> Result<Vec<String>> {
        let sources: BTreeSet<&str> = self
            .entries
            .iter()
            .map(|e| e.chunk.metadata.source_id.as_str())
            .collect();
        Ok(sources.into_iter().map(str::to_string).collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_common::embeddings::HashingEmbedder;

    fn unit(dimension: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimension];
        v[hot] = 1.0;
        v
    }

    fn hundred_chunk_index() -> FileVectorIndex {
        let entries = (0..100u32)
            .map(|i| {
                let embedding = vec![1.0, i as f32 / 100.0, (i % 7) as f32];
                (embedding, DocumentChunk::new(format!("chunk {i}"), format!("doc{}.pdf", i % 4), i))
            })
            .collect();
        FileVectorIndex::from_entries(3, entries).unwrap()
    }

    #[tokio::test]
    async fn test_search_caps_at_k_and_orders_by_score() {
        let index = hundred_chunk_index();
        let results = index
            .search(&[1.0, 0.5, 3.0], 3, &MetadataFilter::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_k_larger_than_index_returns_all() {
        let index = hundred_chunk_index();
        let results = index
            .search(&[1.0, 0.0, 0.0], 500, &MetadataFilter::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 100);
    }

    #[tokio::test]
    async fn test_unmatched_filter_returns_empty() {
        let index = hundred_chunk_index();
        let results = index
            .search(&[1.0, 0.0, 0.0], 5, &MetadataFilter::source("missing"))
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let entries = vec![
            (unit(2, 0), DocumentChunk::new("first", "a.pdf", 0)),
            (unit(2, 1), DocumentChunk::new("other", "a.pdf", 1)),
            (unit(2, 0), DocumentChunk::new("second", "b.pdf", 0)),
            (unit(2, 0), DocumentChunk::new("third", "c.pdf", 0)),
        ];
        let index = FileVectorIndex::from_entries(2, entries).unwrap();
        let texts: Vec<_> = index
            .search(&unit(2, 0), 3, &MetadataFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.chunk.text)
            .collect();
        assert_eq!(texts, ["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch_is_retrieval_error() {
        let index = hundred_chunk_index();
        let err = index
            .search(&[1.0, 0.0], 3, &MetadataFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Retrieval { .. }));
    }

    #[tokio::test]
    async fn test_scan_orders_by_ordinal() {
        let entries = vec![
            (unit(2, 0), DocumentChunk::new("w1 c2", "MLP Week 1 Slides.pdf", 2).with_week(1)),
            (unit(2, 1), DocumentChunk::new("w2 c0", "MLP Week 2 Slides.pdf", 0).with_week(2)),
            (unit(2, 0), DocumentChunk::new("w1 c0", "MLP Week 1 Slides.pdf", 0).with_week(1)),
            (unit(2, 1), DocumentChunk::new("w1 c1", "MLP Week 1 Slides.pdf", 1).with_week(1)),
        ];
        let index = FileVectorIndex::from_entries(2, entries).unwrap();

        let chunks = index.scan(&MetadataFilter::week(1), 2).await.unwrap();
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, ["w1 c0", "w1 c1"]);

        assert_eq!(
            index.sources().await.unwrap(),
            ["MLP Week 1 Slides.pdf", "MLP Week 2 Slides.pdf"]
        );
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = HashingEmbedder::new("hashing", 32).unwrap();
        let chunks = vec![
            DocumentChunk::new("Linear regression fits a line", "Week_1_Lecture_1.pdf", 0)
                .with_week(1)
                .with_lecture(1),
            DocumentChunk::new("Logistic regression classifies", "Week_2_Lecture_1.pdf", 0)
                .with_week(2)
                .with_lecture(1),
        ];
        let built = FileVectorIndex::build(&embedder, chunks).await.unwrap();
        let file = built.save(dir.path()).await.unwrap();
        assert!(file.ends_with(SNAPSHOT_FILE));

        let loaded = FileVectorIndex::load(dir.path()).await.unwrap();
        assert_eq!(loaded.len().await.unwrap(), 2);
        assert_eq!(loaded.dimension(), Some(32));
        assert_eq!(loaded.model(), Some("hashing"));
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileVectorIndex::load(&dir.path().join("nowhere")).await.err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_inconsistent_snapshot_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"dimension":3,"entries":[{"embedding":[1.0,0.0],"chunk":{"text":"t","metadata":{"source_id":"s.pdf"}}}]}"#;
        tokio::fs::write(dir.path().join(SNAPSHOT_FILE), body).await.unwrap();

        let err = FileVectorIndex::load(dir.path()).await.err().unwrap();
        assert!(matches!(err, AppError::Configuration { .. }));
    }
}

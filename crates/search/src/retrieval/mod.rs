//! Vector retrieval over course material
//!
//! Two index backends share one contract:
//! - `FileVectorIndex`: JSON snapshot loaded into memory, exact cosine k-NN
//! - `PgVectorIndex`: Postgres `chunks` table with a pgvector column

mod file;
mod pgvector;
mod retriever;

pub use file::FileVectorIndex;
pub use pgvector::PgVectorIndex;
pub use retriever::Retriever;

use lectern_common::config::IndexConfig;
use lectern_common::db::DbPool;
use lectern_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Metadata attached to a chunk at ingestion time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source document, e.g. `Week_3_Lecture_2.pdf`
    pub source_id: String,

    /// Position of the chunk within its source
    #[serde(default)]
    pub ordinal: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lecture: Option<u32>,
}

/// A bounded span of source text; immutable once indexed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl DocumentChunk {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>, ordinal: u32) -> Self {
        Self {
            text: text.into(),
            metadata: ChunkMetadata {
                source_id: source_id.into(),
                ordinal,
                week: None,
                lecture: None,
            },
        }
    }

    pub fn with_week(mut self, week: u32) -> Self {
        self.metadata.week = Some(week);
        self
    }

    pub fn with_lecture(mut self, lecture: u32) -> Self {
        self.metadata.lecture = Some(lecture);
        self
    }
}

/// Chunk with its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Exact-match predicate over chunk metadata.
///
/// Every present field must match; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lecture: Option<u32>,
}

impl MetadataFilter {
    pub fn source(source_id: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            ..Default::default()
        }
    }

    pub fn week(week: u32) -> Self {
        Self {
            week: Some(week),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source_id.is_none() && self.week.is_none() && self.lecture.is_none()
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.source_id
            .as_deref()
            .map_or(true, |s| s == metadata.source_id)
            && self.week.map_or(true, |w| metadata.week == Some(w))
            && self.lecture.map_or(true, |l| metadata.lecture == Some(l))
    }
}

/// Read-only nearest-neighbour index
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    /// Up to `k` chunks by decreasing similarity; ties keep insertion order.
    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredChunk>>;

    /// Filter-only listing ordered by `(ordinal, insertion)`.
    async fn scan(&self, filter: &MetadataFilter, limit: usize) -> Result<Vec<DocumentChunk>>;

    /// Distinct source ids, sorted.
    async fn sources(&self) -> Result<Vec<String>>;

    /// Number of indexed chunks
    async fn len(&self) -> Result<usize>;

    /// Embedding dimension when known up front
    fn dimension(&self) -> Option<usize>;

    fn backend(&self) -> &'static str;
}

/// Open the configured index backend
pub async fn create_vector_index(
    config: &IndexConfig,
    db: Option<&DbPool>,
) -> Result<Arc<dyn VectorIndex>> {
    match config.backend.as_str() {
        "file" => Ok(Arc::new(FileVectorIndex::load(&config.path).await?)),
        "pgvector" => {
            let db = db.ok_or_else(|| {
                AppError::configuration("the pgvector index needs a database connection")
            })?;
            Ok(Arc::new(PgVectorIndex::new(db.clone(), &config.table)?))
        }
        other => Err(AppError::configuration(format!("unknown index backend '{other}'"))),
    }
}

/// Cosine similarity; zero vectors score 0
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(source: &str, week: Option<u32>, lecture: Option<u32>) -> ChunkMetadata {
        ChunkMetadata {
            source_id: source.to_string(),
            ordinal: 0,
            week,
            lecture,
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = MetadataFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&meta("a.pdf", None, None)));
    }

    #[test]
    fn test_filter_requires_every_present_field() {
        let filter = MetadataFilter {
            source_id: Some("Week_2_Lecture_1.pdf".to_string()),
            week: Some(2),
            lecture: None,
        };
        assert!(filter.matches(&meta("Week_2_Lecture_1.pdf", Some(2), Some(1))));
        assert!(!filter.matches(&meta("Week_2_Lecture_1.pdf", None, Some(1))));
        assert!(!filter.matches(&meta("Week_2_Lecture_2.pdf", Some(2), Some(2))));
    }

    #[test]
    fn test_cosine() {
        assert!((cosine(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_chunk_metadata_defaults() {
        let chunk: DocumentChunk =
            serde_json::from_str(r#"{"text":"t","metadata":{"source_id":"s.pdf"}}"#).unwrap();
        assert_eq!(chunk.metadata.ordinal, 0);
        assert_eq!(chunk.metadata.week, None);
    }
}

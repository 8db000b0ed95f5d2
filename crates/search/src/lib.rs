//! Lectern Retrieval
//!
//! Read-only access to the pre-built course index:
//! - Document chunks and exact-match metadata filters
//! - Vector index backends (JSON snapshot on disk, pgvector)
//! - The query retriever used by the conversation and artifact pipelines

pub mod retrieval;

pub use retrieval::{
    create_vector_index, ChunkMetadata, DocumentChunk, FileVectorIndex, MetadataFilter,
    PgVectorIndex, Retriever, ScoredChunk, VectorIndex,
};

//! Lectern Common Library
//!
//! Shared code for the Lectern crates including:
//! - Configuration management
//! - Error types and handling
//! - Embedding and generation model clients
//! - Conversation history storage
//! - Artifact caching
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod resilience;

// Re-export commonly used types
pub use errors::{AppError, ErrorCode, Result};
pub use config::AppConfig;
pub use db::{ConversationTurn, DbPool, HistoryStore};
pub use embeddings::Embedder;
pub use llm::{ChatMessage, ChatModel, ChatRole, CompletionOptions};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// Default generation model
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-1.5-flash";

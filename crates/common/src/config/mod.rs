//! Configuration management for Lectern services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{AppError, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Conversation history storage
    pub history: HistoryConfig,

    /// Embedding function configuration
    pub embedding: EmbeddingConfig,

    /// Generation model configuration
    pub generation: GenerationConfig,

    /// Vector index location
    pub index: IndexConfig,

    /// Retrieval tuning
    pub retrieval: RetrievalConfig,

    /// Conversation pipeline tuning
    pub pipeline: PipelineConfig,

    /// Artifact cache configuration
    pub cache: CacheConfig,

    /// Structured worker tuning
    pub workers: WorkerConfig,

    /// Assistant persona
    pub persona: PersonaConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    pub max_connections: u32,

    /// Minimum number of connections
    pub min_connections: u32,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,

    /// Create the history table on startup when absent
    pub auto_migrate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// `sql` or `memory`
    pub backend: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, hashing
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    pub model: String,

    /// Embedding dimension
    pub dimension: usize,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum retries
    pub max_retries: u32,

    /// Batch size for embedding requests
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Generation provider: gemini, openai, offline
    pub provider: String,

    /// Credential for the provider
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model identifier
    pub model: String,

    /// Sampling temperature for free-text answers
    pub temperature: f32,

    /// Sampling temperature for structured artifacts
    pub structured_temperature: f32,

    /// Output token cap per call
    pub max_output_tokens: u32,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum retries for transient failures
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IndexConfig {
    /// `file` or `pgvector`
    pub backend: String,

    /// Directory holding `index.json` for the file backend
    pub path: PathBuf,

    /// Table name for the pgvector backend
    pub table: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Chunks retrieved per conversational turn
    pub default_k: usize,

    /// Per-search timeout in milliseconds
    pub timeout_ms: u64,

    /// Memoised query embeddings
    pub query_cache_entries: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Timeout for the contextualization call
    pub contextualize_timeout_ms: u64,

    /// Timeout for answer and artifact generation calls
    pub generate_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// `memory` or `redis`
    pub backend: String,

    /// Capacity for the memory backend (None = unbounded)
    pub max_entries: Option<usize>,

    /// Redis URL for the redis backend
    pub redis_url: Option<String>,

    /// Key prefix for the redis backend
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Simplified retries after a schema or generation failure
    pub max_schema_retries: u32,

    /// Default MCQ count when the caller gives none
    pub default_num_questions: usize,

    /// Largest MCQ count a caller may request
    pub max_num_questions: usize,

    /// Chunk cap for topic quizzes
    pub mcq_max_context_chunks: usize,

    /// Chunk cap for exam-scope quizzes
    pub exam_max_context_chunks: usize,

    /// Context below this length is replaced by a topic-only instruction
    pub min_context_chars: usize,

    /// Chunks retrieved for topic notes
    pub notes_retrieve_k: usize,

    /// Chunks kept for topic notes
    pub notes_use_chunks: usize,

    /// Chunks scanned for lecture and week summaries
    pub summary_chunks: usize,

    /// Chunks retrieved per wrongly answered question
    pub suggestions_k_per_question: usize,

    /// Context cap for suggestions
    pub suggestions_max_context_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersonaConfig {
    /// Name the assistant introduces itself with
    pub assistant_name: String,

    /// Course the assistant tutors
    pub course_name: String,

    /// Optional course outline appended to the system prompt
    pub course_outline: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    pub log_level: String,

    /// Enable JSON logging
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    pub metrics_port: u16,

    /// Service name for logs
    pub service_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 120,
            shutdown_timeout_secs: 30,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            read_url: None,
            max_connections: 20,
            min_connections: 1,
            connect_timeout_secs: 10,
            idle_timeout_secs: 300,
            auto_migrate: true,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { backend: "memory".to_string() }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".to_string(),
            api_key: None,
            api_base: None,
            model: crate::DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: crate::DEFAULT_EMBEDDING_DIMENSION,
            timeout_secs: 30,
            max_retries: 3,
            batch_size: 32,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "offline".to_string(),
            api_key: None,
            api_base: None,
            model: crate::DEFAULT_GENERATION_MODEL.to_string(),
            temperature: 0.7,
            structured_temperature: 0.3,
            max_output_tokens: 2048,
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: "file".to_string(),
            path: PathBuf::from("vector_store"),
            table: "chunks".to_string(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 3,
            timeout_ms: 10_000,
            query_cache_entries: 256,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            contextualize_timeout_ms: 20_000,
            generate_timeout_ms: 60_000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            max_entries: Some(512),
            redis_url: None,
            key_prefix: "lectern:artifact:".to_string(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_schema_retries: 1,
            default_num_questions: 5,
            max_num_questions: 50,
            mcq_max_context_chunks: 20,
            exam_max_context_chunks: 50,
            min_context_chars: 200,
            notes_retrieve_k: 20,
            notes_use_chunks: 15,
            summary_chunks: 10,
            suggestions_k_per_question: 3,
            suggestions_max_context_chars: 5000,
        }
    }
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            assistant_name: "Kia".to_string(),
            course_name: "Machine Learning Practice".to_string(),
            course_outline: None,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: true,
            metrics_port: 9090,
            service_name: "lectern".to_string(),
        }
    }
}

const EMBEDDING_PROVIDERS: &[&str] = &["openai", "hashing"];
const GENERATION_PROVIDERS: &[&str] = &["gemini", "openai", "offline"];

/// Slack for the untimed parts of a turn (history load, persistence, encoding)
const TURN_BUDGET_MARGIN: Duration = Duration::from_millis(250);

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g., APP__GENERATION__API_KEY=...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject configurations that cannot build the resource context
    pub fn validate(&self) -> Result<()> {
        let provider = self.embedding.provider.as_str();
        if !EMBEDDING_PROVIDERS.contains(&provider) {
            return Err(AppError::configuration(format!(
                "unknown embedding provider '{provider}'"
            )));
        }
        if provider == "openai" && !has_value(&self.embedding.api_key) {
            return Err(AppError::configuration(
                "embedding.api_key is required for the openai provider",
            ));
        }

        let provider = self.generation.provider.as_str();
        if !GENERATION_PROVIDERS.contains(&provider) {
            return Err(AppError::configuration(format!(
                "unknown generation provider '{provider}'"
            )));
        }
        if provider != "offline" && !has_value(&self.generation.api_key) {
            return Err(AppError::configuration(format!(
                "generation.api_key is required for the {provider} provider"
            )));
        }

        match self.index.backend.as_str() {
            "file" => {}
            "pgvector" if self.database.url.trim().is_empty() => {
                return Err(AppError::configuration(
                    "database.url is required for the pgvector index",
                ));
            }
            "pgvector" => {}
            other => {
                return Err(AppError::configuration(format!("unknown index backend '{other}'")));
            }
        }

        match self.history.backend.as_str() {
            "memory" => {}
            "sql" if self.database.url.trim().is_empty() => {
                return Err(AppError::configuration(
                    "database.url is required for the sql history store",
                ));
            }
            "sql" => {}
            other => {
                return Err(AppError::configuration(format!("unknown history backend '{other}'")));
            }
        }

        match self.cache.backend.as_str() {
            "memory" => {}
            "redis" if !has_value(&self.cache.redis_url) => {
                return Err(AppError::configuration(
                    "cache.redis_url is required for the redis cache",
                ));
            }
            "redis" => {}
            other => {
                return Err(AppError::configuration(format!("unknown cache backend '{other}'")));
            }
        }

        let positive = [
            ("retrieval.default_k", self.retrieval.default_k),
            ("workers.default_num_questions", self.workers.default_num_questions),
            ("workers.max_num_questions", self.workers.max_num_questions),
            ("workers.mcq_max_context_chunks", self.workers.mcq_max_context_chunks),
            ("workers.exam_max_context_chunks", self.workers.exam_max_context_chunks),
            ("workers.notes_retrieve_k", self.workers.notes_retrieve_k),
            ("workers.notes_use_chunks", self.workers.notes_use_chunks),
            ("workers.summary_chunks", self.workers.summary_chunks),
            ("workers.suggestions_k_per_question", self.workers.suggestions_k_per_question),
            (
                "workers.suggestions_max_context_chars",
                self.workers.suggestions_max_context_chars,
            ),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::configuration(format!("{name} must be at least 1")));
        }
        if self.workers.default_num_questions > self.workers.max_num_questions {
            return Err(AppError::configuration(
                "workers.default_num_questions must not exceed workers.max_num_questions",
            ));
        }

        let steps = [
            ("pipeline.contextualize_timeout_ms", self.pipeline.contextualize_timeout_ms),
            ("retrieval.timeout_ms", self.retrieval.timeout_ms),
            ("pipeline.generate_timeout_ms", self.pipeline.generate_timeout_ms),
        ];
        if let Some((name, _)) = steps.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::configuration(format!("{name} must be at least 1")));
        }

        // The HTTP timeout must outlast every timed step of a turn
        let needed = self.turn_budget() + TURN_BUDGET_MARGIN;
        if self.request_timeout() <= needed {
            return Err(AppError::configuration(format!(
                "server.request_timeout_secs ({}s) must exceed the turn budget of {}ms \
                 (contextualize + retrieval + generate + {}ms)",
                self.server.request_timeout_secs,
                needed.as_millis(),
                TURN_BUDGET_MARGIN.as_millis(),
            )));
        }

        Ok(())
    }

    /// Worst-case time one conversational turn spends in timed steps
    pub fn turn_budget(&self) -> Duration {
        self.contextualize_timeout() + self.retrieval_timeout() + self.generate_timeout()
    }

    /// Whether anything needs a relational connection
    pub fn needs_database(&self) -> bool {
        self.history.backend == "sql" || self.index.backend == "pgvector"
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval.timeout_ms)
    }

    pub fn contextualize_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.contextualize_timeout_ms)
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.generate_timeout_ms)
    }
}

fn has_value(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.retrieval.default_k, 3);
        assert_eq!(config.index.path, PathBuf::from("vector_store"));
        assert_eq!(config.workers.max_schema_retries, 1);
        assert!(config.validate().is_ok());
        assert!(!config.needs_database());
    }

    #[test]
    fn test_read_database_fallback() {
        let mut config = AppConfig::default();
        config.database.url = "postgres://localhost/lectern".to_string();
        assert_eq!(config.read_database_url(), "postgres://localhost/lectern");
    }

    #[test]
    fn test_remote_generation_requires_credential() {
        let mut config = AppConfig::default();
        config.generation.provider = "gemini".to_string();
        assert!(matches!(config.validate(), Err(AppError::Configuration { .. })));

        config.generation.api_key = Some("   ".to_string());
        assert!(config.validate().is_err());

        config.generation.api_key = Some("key".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_k_rejected() {
        let mut config = AppConfig::default();
        config.retrieval.default_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_worker_settings_rejected() {
        let zeroed: [fn(&mut WorkerConfig); 6] = [
            |w| w.notes_retrieve_k = 0,
            |w| w.notes_use_chunks = 0,
            |w| w.suggestions_k_per_question = 0,
            |w| w.summary_chunks = 0,
            |w| w.mcq_max_context_chunks = 0,
            |w| w.max_num_questions = 0,
        ];
        for zero in zeroed {
            let mut config = AppConfig::default();
            zero(&mut config.workers);
            let err = config.validate().unwrap_err();
            assert!(matches!(err, AppError::Configuration { .. }));
            assert!(err.to_string().contains("must be at least 1"), "{err}");
        }

        let mut config = AppConfig::default();
        config.workers.default_num_questions = config.workers.max_num_questions + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_timeout_outlasts_turn_budget() {
        let config = AppConfig::default();
        assert!(config.request_timeout() > config.turn_budget());
        assert!(config.validate().is_ok());

        // Step budgets summing past the HTTP timeout would turn slow turns into bare 408s
        let mut config = AppConfig::default();
        config.server.request_timeout_secs = 60;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("turn budget"), "{err}");

        let mut config = AppConfig::default();
        config.server.request_timeout_secs = 1;
        config.pipeline.contextualize_timeout_ms = 200;
        config.retrieval.timeout_ms = 300;
        config.pipeline.generate_timeout_ms = 200;
        assert!(config.validate().is_ok());

        config.pipeline.generate_timeout_ms = 500;
        assert!(config.validate().is_err());

        config.pipeline.generate_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backends_require_their_urls() {
        let mut config = AppConfig::default();
        config.history.backend = "sql".to_string();
        assert!(config.validate().is_err());
        config.database.url = "sqlite::memory:".to_string();
        assert!(config.validate().is_ok());
        assert!(config.needs_database());

        config.cache.backend = "redis".to_string();
        assert!(config.validate().is_err());
        config.cache.redis_url = Some("redis://localhost:6379".to_string());
        assert!(config.validate().is_ok());

        config.index.backend = "faiss".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: AppConfig = Config::builder()
            .set_override("retrieval.default_k", 5)
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize())
            .unwrap();
        assert_eq!(config.retrieval.default_k, 5);
        assert_eq!(config.retrieval.timeout_ms, 10_000);
        assert_eq!(config.generation.provider, "offline");
    }
}

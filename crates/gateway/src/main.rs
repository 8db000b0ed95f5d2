//! Lectern HTTP gateway
//!
//! Builds the resource context once at startup, then serves:
//! - Tutoring chat and per-student history
//! - Structured artifacts (quizzes, notes, summaries, suggestions)
//! - Lecture listing, health and readiness checks

mod handlers;
mod middleware;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{delete, get, post},
    Router,
};
use lectern_common::{config::AppConfig, metrics, Result};
use lectern_context::{ArtifactService, ConversationOrchestrator, ResourceContext};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub resources: Arc<ResourceContext>,
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub artifacts: Arc<ArtifactService>,
}

impl AppState {
    /// Wire the pipeline services onto an initialized resource context
    pub async fn build(resources: Arc<ResourceContext>) -> Result<Self> {
        let orchestrator = ConversationOrchestrator::from_resources(&resources).await?;
        let artifacts = ArtifactService::from_resources(&resources).await?;
        Ok(Self {
            config: Arc::new(resources.config().clone()),
            orchestrator: Arc::new(orchestrator),
            artifacts: Arc::new(artifacts),
            resources,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config);

    info!("Starting Lectern gateway v{}", lectern_common::VERSION);

    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "Metrics exporter listening");
    }
    metrics::register_metrics();

    // Every resource is built before the listener binds
    let resources = Arc::new(ResourceContext::new(Arc::new(config)));
    resources.initialize().await.map_err(|e| {
        error!(error = %e, "Failed to initialize resources");
        e
    })?;
    let state = AppState::build(resources).await?;

    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port)
        .parse()
        .context("invalid server.host / server.port")?;
    let app = create_router(state);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Bounded by the HTTP timeout; validated config keeps it above a turn's step budgets
    let bounded = Router::new()
        .route("/v1/chat", post(handlers::chat::chat))
        .route(
            "/v1/chat/{user_id}/history",
            get(handlers::chat::get_history).delete(handlers::chat::clear_history),
        )
        .route("/v1/artifacts/cache", delete(handlers::artifacts::clear_cache))
        .route("/v1/lectures", get(handlers::artifacts::lectures))
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .layer(TimeoutLayer::new(state.config.request_timeout()));

    // Search count grows with the request; each step has its own timeout
    let pipeline = Router::new().route("/v1/artifacts", post(handlers::artifacts::produce));

    Router::new()
        .merge(bounded)
        .merge(pipeline)
        .layer(axum::middleware::from_fn(middleware::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use async_trait::async_trait;
    use lectern_common::embeddings::HashingEmbedder;
    use lectern_common::llm::{ChatMessage, ChatModel, CompletionOptions};
    use lectern_context::prompts::GENERATION_FALLBACK;
    use std::time::Duration;
    use lectern_search::{DocumentChunk, FileVectorIndex};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app() -> Router {
        app_with(AppConfig::default(), None).await
    }

    async fn app_with(config: AppConfig, model: Option<Arc<dyn ChatModel>>) -> Router {
        let embedder =
            HashingEmbedder::new(&config.embedding.model, config.embedding.dimension).unwrap();
        let chunks = vec![
            DocumentChunk::new(
                "Gradient descent updates weights against the gradient of the loss.",
                "Week_2_Lecture_1.pdf",
                0,
            )
            .with_week(2)
            .with_lecture(1),
            DocumentChunk::new(
                "Logistic regression models class probabilities with the sigmoid.",
                "Week_3_Lecture_2.pdf",
                1,
            )
            .with_week(3)
            .with_lecture(2),
        ];
        let index = FileVectorIndex::build(&embedder, chunks).await.unwrap();

        let mut resources =
            ResourceContext::new(Arc::new(config)).with_vector_index(Arc::new(index));
        if let Some(model) = model {
            resources = resources.with_generation_model(model);
        }
        resources.initialize().await.unwrap();
        create_router(AppState::build(Arc::new(resources)).await.unwrap())
    }

    /// Model that answers only after `delay`
    struct SlowModel {
        delay: Duration,
    }

    #[async_trait]
    impl ChatModel for SlowModel {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            Ok("A late answer".to_string())
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let app = app().await;
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = send(&app, Method::GET, "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
    }

    #[tokio::test]
    async fn test_chat_then_history_then_clear() {
        let app = app().await;
        let (status, reply) = send(
            &app,
            Method::POST,
            "/v1/chat",
            Some(json!({"user_id": 7, "query": "What is gradient descent?"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["success"], true);

        let (_, history) = send(&app, Method::GET, "/v1/chat/7/history", None).await;
        assert_eq!(history["turns"].as_array().unwrap().len(), 1);
        assert_eq!(history["turns"][0]["query"], "What is gradient descent?");

        let (status, cleared) = send(&app, Method::DELETE, "/v1/chat/7/history", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cleared["removed"], 1);
    }

    #[tokio::test]
    async fn test_invalid_chat_body_is_rejected() {
        let app = app().await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/v1/chat",
            Some(json!({"user_id": 0, "query": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_artifact_routes() {
        let app = app().await;
        let (status, lectures) = send(&app, Method::GET, "/v1/lectures", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(lectures["lectures"].as_array().unwrap().len(), 2);

        let (status, reply) = send(
            &app,
            Method::POST,
            "/v1/artifacts",
            Some(json!({"kind": "notes", "topic": "gradient descent"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["success"], true);
        assert_eq!(reply["artifact"]["kind"], "notes");

        let (status, cleared) = send(&app, Method::DELETE, "/v1/artifacts/cache", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cleared["removed"], 1);

        let (status, _) = send(
            &app,
            Method::POST,
            "/v1/artifacts",
            Some(json!({"kind": "summary", "topic": ""})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_slow_model_degrades_instead_of_timing_out() {
        let mut config = AppConfig::default();
        config.server.request_timeout_secs = 1;
        config.pipeline.contextualize_timeout_ms = 200;
        config.retrieval.timeout_ms = 300;
        config.pipeline.generate_timeout_ms = 200;
        let model: Arc<dyn ChatModel> = Arc::new(SlowModel {
            delay: Duration::from_millis(400),
        });
        let app = app_with(config, Some(model)).await;

        for query in ["What is gradient descent?", "And the learning rate?"] {
            let (status, reply) = send(
                &app,
                Method::POST,
                "/v1/chat",
                Some(json!({"user_id": 12, "query": query})),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(reply["success"], false);
            assert_eq!(reply["response"], GENERATION_FALLBACK);
            assert_eq!(reply["error_code"], "GENERATION_ERROR");
        }

        let (_, history) = send(&app, Method::GET, "/v1/chat/12/history", None).await;
        assert_eq!(history["turns"].as_array().unwrap().len(), 2);
    }
}

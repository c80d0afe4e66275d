//! Router assembly and server lifecycle.

use std::sync::Arc;

use anyhow::Context;
use axum::middleware;
use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::budget::{CharRatioEstimator, TokenEstimator};
use crate::classify::{
    ClassificationInvoker, ClassificationService, LlmClassifier, RemoteClassifier,
};
use crate::config::{ClassifierConfig, Config};
use crate::labeler::Labeler;
use crate::llm::OpenAiClient;
use crate::store::Store;

use super::auth;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub labeler: Arc<Labeler>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    dev_mode: bool,
    auth_required: bool,
}

/// Build the classification backend named by the config.
fn build_service(
    config: &Config,
    estimator: Arc<dyn TokenEstimator>,
) -> Arc<dyn ClassificationService> {
    match &config.classifier {
        ClassifierConfig::Remote { url, api_key } => {
            tracing::info!("Classifying through remote endpoint {}", url);
            Arc::new(RemoteClassifier::with_timeout(
                url.clone(),
                api_key.clone(),
                config.classify_timeout,
            ))
        }
        ClassifierConfig::Model {
            api_key,
            api_url,
            model,
            temperature,
        } => {
            tracing::info!("Classifying in process with {} via {}", model, api_url);
            let client = Arc::new(OpenAiClient::with_api_url(api_key.clone(), api_url.clone()));
            let invoker = ClassificationInvoker::new(client)
                .with_model(model.clone())
                .with_temperature(*temperature)
                .with_timeout(config.classify_timeout);
            Arc::new(LlmClassifier::new(invoker, estimator))
        }
    }
}

/// Assemble the API router over prepared state.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/api/health", get(health));

    let protected_routes = Router::new()
        .nest(
            "/api/jobs",
            super::jobs::routes(state.config.max_upload_bytes),
        )
        .nest("/api/account", super::account::routes())
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = Store::open(&config.database_path, config.initial_balance).with_context(|| {
        format!(
            "Failed to open database at {}",
            config.database_path.display()
        )
    })?;

    let estimator: Arc<dyn TokenEstimator> = Arc::new(CharRatioEstimator::default());
    let service = build_service(&config, Arc::clone(&estimator));
    let labeler = Arc::new(Labeler::new(
        Arc::new(store),
        service,
        estimator,
        config.pricing,
    ));

    labeler
        .recover_interrupted()
        .map_err(|e| anyhow::anyhow!("Failed to recover interrupted jobs: {}", e))?;

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState { config, labeler });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
///
/// In-flight classifications are not awaited; their jobs stay Submitted and
/// are failed by `recover_interrupted` on the next start.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        dev_mode: state.config.dev_mode,
        auth_required: state.config.auth.auth_required(state.config.dev_mode),
    })
}

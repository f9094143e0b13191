//! HTTP trigger surface: turns dashboard button presses into queued tasks.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use gradq_core::{TaskKind, TaskMessage, TaskPayload};
use gradq_ingest::config::parse_var;
use gradq_queue::{AmqpDispatcher, BrokerConfig, TaskDispatcher};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "gradq-web";

/// Header stamped on every message published from this surface.
pub const CALLER: &str = "web";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<dyn TaskDispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self { dispatcher }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/scrape", post(scrape_handler))
        .route("/recompute", post(recompute_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(Arc::new(state))
}

pub const DEFAULT_PORT: u16 = 8080;

/// `GRADQ_WEB_PORT`, falling back to the default when unset, malformed, or zero.
pub fn port_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> u16 {
    parse_var(&lookup, "GRADQ_WEB_PORT")
        .filter(|port: &u16| *port > 0)
        .unwrap_or(DEFAULT_PORT)
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port = port_from_lookup(|key| std::env::var(key).ok());
    let dispatcher = AmqpDispatcher::new(BrokerConfig::from_env());
    let state = AppState::new(Arc::new(dispatcher));
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web surface listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn scrape_handler(State(state): State<Arc<AppState>>) -> Response {
    enqueue(&state, TaskKind::ScrapeNewData).await
}

async fn recompute_handler(State(state): State<Arc<AppState>>) -> Response {
    enqueue(&state, TaskKind::RecomputeAnalytics).await
}

async fn healthz_handler() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

async fn enqueue(state: &AppState, kind: TaskKind) -> Response {
    let message = TaskMessage::new(kind, TaskPayload::new()).with_header("caller", CALLER);
    match state.dispatcher.publish(message).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({"status": "queued", "task": kind.as_str()})),
        )
            .into_response(),
        Err(err) => {
            error!(kind = %kind, error = %err, "failed to publish task");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "publish_failed"})),
            )
                .into_response()
        }
    }
}

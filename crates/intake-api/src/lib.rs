//! Intake API /v1: REST endpoints over the pipeline
pub mod handlers;
pub mod metrics;
pub mod middleware;

use axum::{
    routing::{get, post},
    Router,
};
use intake_pipeline::Pipeline;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use metrics::Metrics;

/// Default listen address, overridden by `INTAKE_ADDR`
pub const DEFAULT_ADDR: &str = "0.0.0.0:8787";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Result<Self, prometheus::Error> {
        Ok(Self {
            pipeline: Arc::new(pipeline),
            metrics: Arc::new(Metrics::new()?),
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/v1/process", post(handlers::process))
        .route("/v1/conversations/:id", get(handlers::get_conversation))
        .route("/v1/conversations/:id/events", get(handlers::get_events))
        .route("/v1/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::track_latency,
        ))
        .layer(middleware::cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(addr: &str, state: AppState) -> std::io::Result<()> {
    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(target: "intake::pipeline", addr = %addr, "intake API listening");
    axum::serve(listener, app).await
}

//! Request middleware: CORS and per-route latency.
use axum::extract::{MatchedPath, State};
use axum::middleware::Next;
use axum::{body::Body, http::Request, response::Response};
use std::time::Instant;
use tower_http::cors::CorsLayer;

use crate::AppState;

pub fn cors() -> CorsLayer {
    CorsLayer::permissive()
}

/// Observe request latency, labelled by route template rather than raw path.
pub async fn track_latency(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();

    let response = next.run(req).await;

    state
        .metrics
        .http_latency
        .with_label_values(&[&method, &path, response.status().as_str()])
        .observe(start.elapsed().as_secs_f64());
    response
}

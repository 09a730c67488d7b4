use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::metrics::ImageAgeMetrics;

pub fn app(metrics: Arc<ImageAgeMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}

pub async fn serve(address: SocketAddr, metrics: Arc<ImageAgeMetrics>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!(%address, "Serving metrics");
    axum::serve(listener, app(metrics)).await
}

#[derive(Debug)]
struct ErrorResponse(crate::Error);

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to encode metrics: {}", self.0)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let body = Json(json!({
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

async fn metrics_handler(
    State(metrics): State<Arc<ImageAgeMetrics>>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let body = metrics.encode().map_err(ErrorResponse)?;
    Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body))
}

async fn healthz() -> &'static str {
    "ok"
}

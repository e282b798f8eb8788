//! HTTP server wiring for the serving layer. Handlers validate the request
//! shape, delegate to [`QueryService`], and map failures onto structured
//! error responses; neither kind of failure stops the process.

use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use hyper::Server;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use super::service::QueryService;
use super::{ErrorResponse, FieldError, PredictRequest, SearchRequest, StatsRequest};
use crate::error::PipelineError;
use crate::observability::metrics as obs;

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "fpi-pipeline",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus exposition endpoint; 404 when no recorder was installed.
async fn metrics_endpoint(
    Extension(handle): Extension<Option<PrometheusHandle>>,
) -> impl IntoResponse {
    match handle {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn validation_error(endpoint: &'static str, detail: &str, fields: Vec<FieldError>) -> Response {
    obs::serving::request_error(endpoint, "validation");
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorResponse::validation(detail, fields)),
    )
        .into_response()
}

fn service_error(endpoint: &'static str, e: PipelineError) -> Response {
    error!(endpoint, "request failed: {e}");
    obs::serving::request_error(endpoint, "service");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::service(e.to_string())),
    )
        .into_response()
}

/// Deserializes the request body, turning shape mismatches into 422s
/// instead of opaque rejections.
fn parse_body<T: DeserializeOwned>(
    endpoint: &'static str,
    body: serde_json::Value,
) -> Result<T, Response> {
    serde_json::from_value(body)
        .map_err(|e| validation_error(endpoint, &e.to_string(), Vec::new()))
}

async fn search_handler(
    Extension(service): Extension<Arc<QueryService>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    const ENDPOINT: &str = "search";
    let started = Instant::now();
    obs::serving::request(ENDPOINT);

    let request: SearchRequest = match parse_body(ENDPOINT, body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let errors = request.validate();
    if !errors.is_empty() {
        return validation_error(ENDPOINT, "invalid search request", errors);
    }

    let response = match service.search(request).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => service_error(ENDPOINT, e),
    };
    obs::serving::duration(ENDPOINT, started.elapsed().as_secs_f64());
    response
}

async fn stats_handler(
    Extension(service): Extension<Arc<QueryService>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    const ENDPOINT: &str = "stats";
    let started = Instant::now();
    obs::serving::request(ENDPOINT);

    let request: StatsRequest = match parse_body(ENDPOINT, body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let errors = request.validate();
    if !errors.is_empty() {
        return validation_error(ENDPOINT, "invalid stats request", errors);
    }

    let response = match service.stats(request).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => service_error(ENDPOINT, e),
    };
    obs::serving::duration(ENDPOINT, started.elapsed().as_secs_f64());
    response
}

async fn predict_handler(
    Extension(service): Extension<Arc<QueryService>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    const ENDPOINT: &str = "predict";
    let started = Instant::now();
    obs::serving::request(ENDPOINT);

    let request: PredictRequest = match parse_body(ENDPOINT, body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let errors = request.validate();
    if !errors.is_empty() {
        return validation_error(ENDPOINT, "invalid predict request", errors);
    }

    let response = match service.predict(request).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => service_error(ENDPOINT, e),
    };
    obs::serving::duration(ENDPOINT, started.elapsed().as_secs_f64());
    response
}

/// Create the HTTP router with all serving routes.
pub fn create_router(
    service: Arc<QueryService>,
    metrics_handle: Option<PrometheusHandle>,
) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/transactions/search", post(search_handler))
        .route("/api/stats", post(stats_handler))
        .route("/api/predict", post(predict_handler))
        .layer(Extension(service))
        .layer(Extension(metrics_handle))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port
pub async fn start_server(
    service: Arc<QueryService>,
    port: u16,
    metrics_handle: Option<PrometheusHandle>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(service, metrics_handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    println!("🚀 HTTP server running on http://localhost:{port}");
    println!("💚 Health check: http://localhost:{port}/health");
    println!("🔎 Search:       POST http://localhost:{port}/api/transactions/search");
    println!("📊 Stats:        POST http://localhost:{port}/api/stats");
    println!("🔮 Predict:      POST http://localhost:{port}/api/predict");

    Server::bind(&addr).serve(app.into_make_service()).await?;

    Ok(())
}

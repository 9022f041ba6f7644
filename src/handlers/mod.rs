//! # Handlers Module
//!
//! This module contains HTTP request handlers for the telemetry ingestion
//! service. [`upload`] implements the resumable upload protocol; this
//! module wraps it with uniform CORS and error-to-response handling, plus
//! the health check used by load balancer probes.

use std::sync::Arc;
use worker::*;

use crate::config::Config;
use crate::middleware::CorsMiddleware;

pub mod upload;

/// Dispatches the `/measurements` endpoints (pre-request, chunk/status PUT)
/// and converts any [`crate::errors::AppError`] into its HTTP response.
pub async fn handle_measurement_routes(
    req: Request,
    env: Env,
    config: Arc<Config>,
    upload_id: Option<String>,
) -> Result<Response> {
    use upload::{chunk_or_status, pre_request};

    let method = req.method();

    let result = match (method, upload_id) {
        (Method::Post, None) => pre_request(req, &env, &config).await,
        (Method::Put, Some(upload_id)) => chunk_or_status(req, &env, &config, &upload_id).await,
        _ => return Response::error("Not Found", 404),
    };

    match result {
        Ok(response) => Ok(CorsMiddleware::apply_headers(response)),
        Err(app_error) => match app_error.to_response() {
            Ok(response) => Ok(CorsMiddleware::apply_headers(response)),
            Err(_) => Response::error("Internal Server Error", 500)
                .map(CorsMiddleware::apply_headers),
        },
    }
}

/// Provides a health check endpoint for monitoring and load balancer probes.
pub async fn handle_health_check(_req: Request, _env: Env) -> Result<Response> {
    Response::from_json(&serde_json::json!({
        "status": "healthy",
        "service": "telemetry-ingest-cf-workers",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Handles requests to unmatched routes with a 404 Not Found response.
pub async fn handle_not_found(_req: Request, _env: Env) -> Result<Response> {
    Response::error("Not Found", 404)
}

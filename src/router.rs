//! # Request Routing and Dispatch
//!
//! This module handles HTTP request routing for the telemetry ingestion
//! service. It implements a pattern-based router that dispatches requests
//! to appropriate handlers based on HTTP method and URL path.
//!
//! ## Supported Routes
//!
//! - `GET /health` — health check endpoint
//! - `POST /measurements` — upload pre-request, creates a session
//! - `PUT /measurements/<uploadId>/` — chunk write or status query
//! - `OPTIONS *` — CORS preflight requests
//!
//! ## Architecture Benefits
//!
//! - **Centralized Routing**: Single point for request dispatch logic
//! - **CORS Handling**: Automatic handling of cross-origin requests
//! - **Extensibility**: Easy to add new route patterns

use std::sync::Arc;
use worker::*;

use crate::config::Config;
use crate::constants::{UPLOAD_TYPE_QUERY_PARAM, UPLOAD_TYPE_RESUMABLE};
use crate::handlers::{handle_health_check, handle_measurement_routes, handle_not_found};
use crate::middleware::CorsMiddleware;

/// Handles incoming HTTP requests and routes them to appropriate handlers.
///
/// # Request Flow
///
/// 1. **CORS Preflight**: Handles OPTIONS requests for cross-origin support
/// 2. **Path Extraction**: Extracts URL path and HTTP method from request
/// 3. **Pattern Matching**: Matches against known route patterns
/// 4. **Handler Dispatch**: Delegates to appropriate handler function
/// 5. **Error Handling**: Returns 404 for unmatched routes
pub async fn handle_request(req: Request, env: Env, config: Arc<Config>) -> Result<Response> {
    // Handle CORS preflight requests early to avoid unnecessary processing
    if req.method() == Method::Options {
        return CorsMiddleware::handle_preflight();
    }

    let url = req.url()?;
    let path = url.path().to_string();
    let method = req.method();

    console_log!("Routing request: {} {}", method, path);

    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    match (method, segments.as_slice()) {
        // Health check endpoint for monitoring and load balancer probes
        (Method::Get, ["health"]) => handle_health_check(req, env).await,

        // Pre-request: creates a session, returns its URL in `Location`.
        (Method::Post, ["measurements"])
            if url.query_pairs().any(|(k, v)| k == UPLOAD_TYPE_QUERY_PARAM && v == UPLOAD_TYPE_RESUMABLE) =>
        {
            handle_measurement_routes(req, env, config, None).await
        }

        // Chunk write or status query against an existing session.
        (Method::Put, ["measurements", upload_id]) => {
            handle_measurement_routes(req, env, config, Some(upload_id.to_string())).await
        }

        // Default 404 handler for unmatched routes
        _ => handle_not_found(req, env).await,
    }
}

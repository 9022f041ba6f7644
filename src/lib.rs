//! # Telemetry Ingest - Cloudflare Workers
//!
//! A resumable-upload ingestion service for mobile measurement telemetry,
//! built with Rust and Cloudflare Workers. Each measurement (a bounded set
//! of location/sensor data files sharing one `measurementId`) is uploaded
//! as a single resumable binary blob accompanied by structured metadata
//! headers, following a pre-request/chunk/status protocol.
//!
//! ## Architecture
//!
//! - **Router**: Routes incoming requests to appropriate handlers
//! - **Middleware**: CORS handling
//! - **Handlers**: `/measurements` pre-request and chunk/status PUT logic
//! - **Session**: a per-upload Durable Object tracking state, byte
//!   offsets, and the backend handle, with TTL-based expiry via its alarm
//! - **Storage**: the abstract `StorageBackend` trait and its GridFS-style
//!   (staged-in-DO, assembled-on-finalize) and R2-native multipart
//!   implementations
//! - **Documents**: the persisted measurement metadata document, written
//!   once a session finalizes
//! - **Auth**: pluggable bearer-token verification (mocked, static JWK set,
//!   or OIDC discovery)
//! - **Cleanup**: the Cron-triggered orphaned-blob sweep
//!
//! ## Example Usage
//!
//! ```text
//! POST /measurements?uploadType=resumable   - Pre-request: opens a session
//! PUT  /measurements/{uploadId}/            - Chunk write or status query
//! GET  /health                              - Health check
//! ```

use std::sync::{Arc, OnceLock};
use worker::*;

mod auth;
mod cleanup;
mod config;
mod constants;
mod documents;
mod errors;
mod handlers;
mod logging;
mod metadata;
mod middleware;
mod router;
mod session;
mod storage;
mod utils;

use config::Config;
use constants::STORAGE_CONFIG_KV_NAME;
use logging::Logger;

static CONFIG_CACHE: OnceLock<Arc<Config>> = OnceLock::new();

/// Main entry point for the Cloudflare Worker.
///
/// This function serves as the primary request handler that:
/// 1. Sets up panic handling for better debugging
/// 2. Loads configuration from KV storage with fallback to defaults
/// 3. Delegates request routing to the router module
///
/// # Arguments
///
/// * `req` - The incoming HTTP request
/// * `env` - Cloudflare Worker environment providing access to bindings
/// * `_ctx` - Request context (unused in current implementation)
///
/// # Returns
///
/// Returns a `Result<Response>` containing either the HTTP response or an error.
///
/// # Error Handling
///
/// All errors are handled gracefully and converted to appropriate HTTP responses
/// with structured error messages and proper status codes.
///
/// # Performance Considerations
///
/// - Configuration is loaded once per request and shared via Arc for efficiency
/// - Request logging is minimal to reduce overhead
/// - Panic hook is set only once globally
/// - CORS headers are created per request for thread safety in WASM environment
#[event(fetch)]
pub async fn main(req: Request, env: Env, _ctx: Context) -> Result<Response> {
    // Set up panic hook for better error reporting in development
    console_error_panic_hook::set_once();

    let logger = Logger::new(uuid::Uuid::new_v4().to_string());
    let method = req.method();
    let path = req.url()?.path().to_string();
    logger.info("request received", Some(serde_json::json!({"method": method.to_string(), "path": path})));

    let config = load_config(&env).await?;

    // Route the request to appropriate handlers
    let response = router::handle_request(req, env, config).await;
    match &response {
        Ok(resp) if resp.status_code() >= 400 => logger.warn(
            "request completed with an error status",
            Some(serde_json::json!({"path": path, "status": resp.status_code()})),
        ),
        Ok(resp) => logger.info(
            "request completed",
            Some(serde_json::json!({"path": path, "status": resp.status_code()})),
        ),
        Err(err) => logger.error("request failed", Some(serde_json::json!({"path": path, "error": err.to_string()}))),
    }
    response
}

/// Fires on the Cron Trigger configured in `wrangler.toml` (by convention,
/// matching `upload.expiration`) and sweeps orphaned blobs.
#[event(scheduled)]
pub async fn scheduled(_event: ScheduledEvent, env: Env, _ctx: ScheduleContext) {
    console_error_panic_hook::set_once();
    if let Err(err) = cleanup::run(&env).await {
        console_log!("cleanup tick failed: {err}");
    }
}

async fn load_config(env: &Env) -> Result<Arc<Config>> {
    if let Some(config) = CONFIG_CACHE.get() {
        return Ok(config.clone());
    }

    let kv = env.kv(STORAGE_CONFIG_KV_NAME)?;
    let config = Arc::new(Config::load(&kv).await?);
    let _ = CONFIG_CACHE.set(config.clone());
    Ok(config)
}

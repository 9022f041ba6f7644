//! # Middleware Components
//!
//! Cross-cutting request/response concerns that don't belong to any single
//! handler. CORS is the only one left here — header-metadata validation now
//! lives in [`crate::metadata`] (it has to run against the session's stored
//! metadata, not just the request in isolation) and bearer-token extraction
//! lives in [`crate::auth`] alongside the providers that consume it.

use crate::utils::cors_headers;
use worker::*;

/// Applies and answers Cross-Origin Resource Sharing concerns uniformly
/// across every handler, so individual handlers never have to remember to.
pub struct CorsMiddleware;

impl CorsMiddleware {
    /// Adds CORS headers to an existing response.
    pub fn apply_headers(response: Response) -> Response {
        response.with_headers(cors_headers())
    }

    /// Answers a CORS preflight (`OPTIONS`) request.
    pub fn handle_preflight() -> Result<Response> {
        Ok(Response::empty()?.with_headers(cors_headers()))
    }
}

//! # Utility Functions
//!
//! Small helpers shared across the upload protocol handlers: the blob key
//! an upload is stored under, and the CORS header set every response
//! carries.

use crate::constants::{CORS_ALLOW_HEADERS, CORS_ALLOW_METHODS, CORS_ALLOW_ORIGIN};
use worker::Headers;

/// The blob key (object name in the backend bucket) for a given upload-id.
/// Also doubles as the metadata-document filename, so the two are joinable
/// without a separate lookup table.
pub fn blob_key_for(upload_id: &str) -> String {
    upload_id.to_string()
}

/// Creates the CORS header set applied to every response, preflight or not.
pub fn cors_headers() -> Headers {
    let headers = Headers::new();
    let _ = headers.set("Access-Control-Allow-Origin", CORS_ALLOW_ORIGIN);
    let _ = headers.set("Access-Control-Allow-Methods", CORS_ALLOW_METHODS);
    let _ = headers.set("Access-Control-Allow-Headers", CORS_ALLOW_HEADERS);
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_key_matches_upload_id() {
        assert_eq!(blob_key_for("abc-123"), "abc-123");
    }
}

//! # Error Handling and Response Management
//!
//! Structured error types, automatic HTTP response generation, and
//! conversion from the underlying Cloudflare Workers runtime errors,
//! covering the full error taxonomy of the upload protocol: each variant
//! carries the context needed to build its wire-level response.

use thiserror::Error;
use worker::{Error as WorkerError, Response, Result};
use serde_json::json;

use crate::constants::HEADER_RANGE;

#[derive(Error, Debug)]
pub enum AppError {
    /// No valid bearer token, or the auth provider rejected it.
    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// Session lookup by upload-id found nothing (or the caller is not its
    /// owner, which is surfaced identically to avoid leaking existence).
    #[error("Session not found: {upload_id}")]
    SessionNotFound { upload_id: String },

    /// `from` did not equal `session.bytesReceived`; the client must resume
    /// at `current_offset`.
    #[error("Range mismatch for {upload_id}: expected offset {current_offset}")]
    RangeMismatch {
        upload_id: String,
        current_offset: u64,
    },

    /// Metadata failed field-level validation.
    #[error("Invalid metadata field '{field}': {reason}")]
    InvalidMetadata { field: String, reason: String },

    /// Declared size exceeds `measurement.payload.limit`.
    #[error("Payload too large: {declared} exceeds limit {limit}")]
    PayloadTooLarge { declared: u64, limit: u64 },

    /// `locationCount == 0` on pre-request.
    #[error("Missing locations: locationCount is zero")]
    MissingLocations,

    /// Backend failure eligible for one internal retry; surfaced as 500 if
    /// the retry also fails.
    #[error("Backend transient error: {message}")]
    BackendTransient { message: String },

    /// Backend failure that moved the session to Aborted.
    #[error("Backend permanent error: {message}")]
    BackendPermanent { message: String },

    /// Request validation error for inputs outside the metadata model.
    #[error("Validation error: {message}")]
    ValidationError { message: String },

    /// R2 storage operation failure not otherwise classified.
    #[error("R2 storage error: {message}")]
    R2Error { message: String },

    /// KV storage operation failure.
    #[error("KV storage error: {message}")]
    KvError { message: String },

    /// D1 database operation failure.
    #[error("Database error: {message}")]
    DatabaseError { message: String },

    /// Durable Object session-store operation failure.
    #[error("Session store error: {message}")]
    SessionStoreError { message: String },

    /// Configuration loading or validation error.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Unexpected internal server error.
    #[error("Internal server error: {message}")]
    InternalError { message: String },
}

impl AppError {
    /// Converts the application error into an HTTP response with the
    /// matching status code. `RangeMismatch` additionally sets the `Range`
    /// response header so the client knows where to resume.
    pub fn to_response(&self) -> Result<Response> {
        let (status, error_code, message) = match self {
            AppError::Unauthorized { reason } => (401, "UNAUTHORIZED", reason.clone()),
            AppError::SessionNotFound { upload_id } => (
                404,
                "SESSION_NOT_FOUND",
                format!("Session not found: {upload_id}"),
            ),
            AppError::RangeMismatch {
                upload_id,
                current_offset,
            } => (
                308,
                "RANGE_MISMATCH",
                format!("Resume {upload_id} at offset {current_offset}"),
            ),
            AppError::InvalidMetadata { field, reason } => (
                422,
                "INVALID_METADATA",
                format!("Invalid field '{field}': {reason}"),
            ),
            AppError::PayloadTooLarge { declared, limit } => (
                422,
                "PAYLOAD_TOO_LARGE",
                format!("Declared size {declared} exceeds limit {limit}"),
            ),
            AppError::MissingLocations => (
                412,
                "MISSING_LOCATIONS",
                "locationCount is zero but required locations were expected".to_string(),
            ),
            AppError::BackendTransient { message } => (500, "BACKEND_TRANSIENT", message.clone()),
            AppError::BackendPermanent { message } => (500, "BACKEND_PERMANENT", message.clone()),
            AppError::ValidationError { message } => (400, "VALIDATION_ERROR", message.clone()),
            AppError::R2Error { message } => (502, "R2_ERROR", message.clone()),
            AppError::KvError { message } => (502, "KV_ERROR", message.clone()),
            AppError::DatabaseError { message } => (502, "DATABASE_ERROR", message.clone()),
            AppError::SessionStoreError { message } => {
                (502, "SESSION_STORE_ERROR", message.clone())
            }
            AppError::ConfigError { message } => (500, "CONFIG_ERROR", message.clone()),
            AppError::InternalError { message } => (500, "INTERNAL_ERROR", message.clone()),
        };

        let error_response = json!({
            "error": {
                "code": error_code,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        });

        let mut response = Response::from_json(&error_response)?.with_status(status);

        if let AppError::RangeMismatch { current_offset, .. } = self {
            if *current_offset > 0 {
                let _ = response
                    .headers_mut()
                    .set(HEADER_RANGE, &format!("bytes=0-{}", current_offset - 1));
            }
        }

        Ok(response)
    }
}

/// Automatic conversion from Cloudflare Worker errors to application errors,
/// classifying by message substring since the `worker` crate does not
/// itself distinguish binding failures by type.
impl From<WorkerError> for AppError {
    fn from(err: WorkerError) -> Self {
        let error_msg = err.to_string();

        if error_msg.contains("KV") || error_msg.contains("kv") {
            AppError::KvError { message: error_msg }
        } else if error_msg.contains("R2") || error_msg.contains("bucket") {
            AppError::R2Error { message: error_msg }
        } else if error_msg.contains("D1") || error_msg.contains("database") {
            AppError::DatabaseError { message: error_msg }
        } else {
            AppError::InternalError { message: error_msg }
        }
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_mismatch_maps_to_308() {
        let err = AppError::RangeMismatch {
            upload_id: "u1".into(),
            current_offset: 4,
        };
        let response = err.to_response().unwrap();
        assert_eq!(response.status_code(), 308);
    }

    #[test]
    fn missing_locations_maps_to_412() {
        let response = AppError::MissingLocations.to_response().unwrap();
        assert_eq!(response.status_code(), 412);
    }

    #[test]
    fn invalid_metadata_maps_to_422() {
        let err = AppError::InvalidMetadata {
            field: "length".into(),
            reason: "not a number".into(),
        };
        assert_eq!(err.to_response().unwrap().status_code(), 422);
    }
}

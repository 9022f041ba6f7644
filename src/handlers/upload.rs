//! # Upload Protocol Handler
//!
//! HTTP handlers for the three endpoints under `/measurements`: pre-request
//! (session creation), chunk PUT (range-accounted write, possibly
//! finalizing), and status PUT (range query). Each orchestrates the
//! metadata model, the session Durable Object (via
//! [`crate::session::client`]), and, on the completing chunk, the
//! configured storage backend indirectly through the session's own
//! `finalize` action.

use serde_json::Value;
use worker::*;

use crate::auth::{extract_bearer_token, provider_for, AuthenticatedUser};
use crate::config::Config;
use crate::constants::{HEADER_CONTENT_RANGE, HEADER_UPLOAD_CONTENT_LENGTH, MEASUREMENTS_BASE_PATH};
use crate::errors::{AppError, AppResult};
use crate::metadata::MeasurementMetadata;
use crate::session::{client, Session, SessionState};
use crate::utils::blob_key_for;
use uuid::Uuid;

/// `POST /measurements?uploadType=resumable` — creates a session and
/// returns its URL in `Location`.
pub async fn pre_request(mut req: Request, env: &Env, config: &Config) -> AppResult<Response> {
    let user = authenticate(&req, config).await?;

    let body = req.bytes().await.map_err(|err| AppError::InternalError {
        message: format!("failed to read request body: {err}"),
    })?;
    let metadata = MeasurementMetadata::from_json(&body, config)?;
    metadata.check_has_locations()?;

    let declared_total_bytes = required_u64_header(&req, HEADER_UPLOAD_CONTENT_LENGTH)?;
    if declared_total_bytes > config.measurement_payload_limit {
        return Err(AppError::PayloadTooLarge {
            declared: declared_total_bytes,
            limit: config.measurement_payload_limit,
        });
    }

    let upload_id = Uuid::new_v4().to_string();
    let key = blob_key_for(&upload_id);
    let backend_kind = config.storage.backend_kind();

    let (status, payload) = client::create(
        env,
        &config.session_namespace,
        &upload_id,
        &user.user_id,
        &metadata,
        declared_total_bytes,
        backend_kind,
        &key,
        &config.database_name,
        config.storage.bucket_binding(),
        config.upload_expiration_ms,
    )
    .await
    .map_err(|err| AppError::SessionStoreError {
        message: format!("failed to create session: {err}"),
    })?;

    if status != 200 {
        return Err(session_error(payload, &upload_id));
    }

    let location = format!(
        "{}{MEASUREMENTS_BASE_PATH}/{upload_id}/",
        config.http_endpoint.trim_end_matches('/')
    );

    let mut response = Response::empty()?.with_status(200);
    response
        .headers_mut()
        .set("Location", &location)
        .map_err(|err| AppError::InternalError {
            message: format!("failed to set Location header: {err}"),
        })?;
    Ok(response)
}

/// `PUT /measurements/<uploadId>/` — dispatches to the chunk-write or
/// status-query handling, disambiguated by the `Content-Range` value
/// (`bytes <from>-<to>/<total>` vs `bytes */<total>`).
pub async fn chunk_or_status(
    mut req: Request,
    env: &Env,
    config: &Config,
    upload_id: &str,
) -> AppResult<Response> {
    let user = authenticate(&req, config).await?;
    let content_range = required_header(&req, HEADER_CONTENT_RANGE)?;
    let range = ContentRange::parse(&content_range)?;

    let (status, payload) = client::get(env, &config.session_namespace, upload_id)
        .await
        .map_err(|err| AppError::SessionStoreError {
            message: format!("failed to load session: {err}"),
        })?;
    if status != 200 {
        return Err(session_error(payload, upload_id));
    }

    let session = parse_session(&payload, upload_id)?;
    if session.owner != user.user_id {
        return Err(AppError::SessionNotFound {
            upload_id: upload_id.to_string(),
        });
    }

    match range {
        ContentRange::Status { total } => status_query(&session, total, upload_id),
        ContentRange::Range { from, to, total } => {
            if total != session.declared_total_bytes {
                return Err(AppError::InvalidMetadata {
                    field: "Content-Range".to_string(),
                    reason: "declared total does not match the session".to_string(),
                });
            }

            // A client that never saw the 201 (dropped connection, retried
            // send) will replay the final chunk; the session is already
            // Done by then, so answer from that state instead of trying to
            // append past a session that no longer accepts writes.
            if session.state == SessionState::Done {
                return Ok(Response::empty()?.with_status(200));
            }

            let header_metadata = MeasurementMetadata::from_headers(req.headers(), config)?;
            if header_metadata != session.metadata {
                return Err(AppError::InvalidMetadata {
                    field: "metadata".to_string(),
                    reason: "chunk header metadata does not match the session's stored metadata"
                        .to_string(),
                });
            }

            let body = req.bytes().await.map_err(|err| AppError::InternalError {
                message: format!("failed to read chunk body: {err}"),
            })?;
            if body.len() as u64 != to - from + 1 {
                return Err(AppError::InvalidMetadata {
                    field: HEADER_CONTENT_RANGE.to_string(),
                    reason: "chunk body length does not match the declared range".to_string(),
                });
            }
            chunk_put(body, env, config, upload_id, &user, &session, from, total).await
        }
    }
}

/// Status PUT: `Content-Range: bytes */total`, empty body.
fn status_query(session: &Session, total: u64, upload_id: &str) -> AppResult<Response> {
    if total != session.declared_total_bytes {
        return Err(AppError::InvalidMetadata {
            field: "Content-Range".to_string(),
            reason: "declared total does not match the session".to_string(),
        });
    }

    if session.state == SessionState::Done {
        return Ok(Response::empty()?.with_status(200));
    }

    Err(AppError::RangeMismatch {
        upload_id: upload_id.to_string(),
        current_offset: session.bytes_received,
    })
}

#[allow(clippy::too_many_arguments)]
async fn chunk_put(
    body: Vec<u8>,
    env: &Env,
    config: &Config,
    upload_id: &str,
    user: &AuthenticatedUser,
    session: &Session,
    from: u64,
    total: u64,
) -> AppResult<Response> {
    if total != session.declared_total_bytes {
        return Err(AppError::InvalidMetadata {
            field: "Content-Range".to_string(),
            reason: "declared total does not match the session".to_string(),
        });
    }

    if from != session.bytes_received {
        return Err(AppError::RangeMismatch {
            upload_id: upload_id.to_string(),
            current_offset: session.bytes_received,
        });
    }

    let (status, payload) = client::append(
        env,
        &config.session_namespace,
        upload_id,
        &user.user_id,
        from,
        &body,
    )
    .await
    .map_err(|err| AppError::SessionStoreError {
        message: format!("failed to append chunk: {err}"),
    })?;

    if status != 200 {
        return Err(session_error(payload, upload_id));
    }

    let updated = parse_session(&payload, upload_id)?;

    if updated.bytes_received < updated.declared_total_bytes {
        return Ok(Response::empty()?.with_status(308));
    }

    let (status, payload) = client::transition(
        env,
        &config.session_namespace,
        upload_id,
        &user.user_id,
        SessionState::Finalizing,
    )
    .await
    .map_err(|err| AppError::SessionStoreError {
        message: format!("failed to transition to finalizing: {err}"),
    })?;
    if status != 200 {
        return Err(session_error(payload, upload_id));
    }

    let (status, payload) = client::finalize(
        env,
        &config.session_namespace,
        upload_id,
        &user.user_id,
        &user.user_id,
    )
    .await
    .map_err(|err| AppError::SessionStoreError {
        message: format!("failed to finalize upload: {err}"),
    })?;

    if status != 200 {
        return Err(AppError::BackendPermanent {
            message: payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("finalize failed")
                .to_string(),
        });
    }

    Ok(Response::empty()?.with_status(201))
}

async fn authenticate(req: &Request, config: &Config) -> AppResult<AuthenticatedUser> {
    let token = extract_bearer_token(req.headers())?;
    provider_for(&config.auth).authenticate(&token).await
}

fn required_header(req: &Request, name: &str) -> AppResult<String> {
    req.headers()
        .get(name)
        .map_err(|err| AppError::InternalError {
            message: format!("failed to read header '{name}': {err}"),
        })?
        .ok_or_else(|| AppError::InvalidMetadata {
            field: name.to_string(),
            reason: "header is missing".to_string(),
        })
}

fn required_u64_header(req: &Request, name: &str) -> AppResult<u64> {
    required_header(req, name)?
        .parse()
        .map_err(|_| AppError::InvalidMetadata {
            field: name.to_string(),
            reason: "must be a non-negative integer".to_string(),
        })
}

enum ContentRange {
    Status { total: u64 },
    Range { from: u64, to: u64, total: u64 },
}

impl ContentRange {
    /// Parses `bytes <from>-<to>/<total>` or `bytes */<total>`.
    fn parse(raw: &str) -> AppResult<Self> {
        let invalid = || AppError::InvalidMetadata {
            field: HEADER_CONTENT_RANGE.to_string(),
            reason: "must be 'bytes <from>-<to>/<total>' or 'bytes */<total>'".to_string(),
        };

        let rest = raw.strip_prefix("bytes ").ok_or_else(invalid)?;
        let (range_part, total_part) = rest.split_once('/').ok_or_else(invalid)?;
        let total: u64 = total_part.parse().map_err(|_| invalid())?;

        if range_part == "*" {
            return Ok(ContentRange::Status { total });
        }

        let (from_part, to_part) = range_part.split_once('-').ok_or_else(invalid)?;
        let from: u64 = from_part.parse().map_err(|_| invalid())?;
        let to: u64 = to_part.parse().map_err(|_| invalid())?;
        Ok(ContentRange::Range { from, to, total })
    }
}

fn parse_session(payload: &Value, upload_id: &str) -> AppResult<Session> {
    let session_value = payload.get("session").ok_or_else(|| AppError::SessionNotFound {
        upload_id: upload_id.to_string(),
    })?;

    if session_value.is_null() {
        return Err(AppError::SessionNotFound {
            upload_id: upload_id.to_string(),
        });
    }

    serde_json::from_value(session_value.clone()).map_err(|err| AppError::InternalError {
        message: format!("malformed session payload: {err}"),
    })
}

/// Translates a non-200 response from the session Durable Object into the
/// matching [`AppError`].
fn session_error(payload: Value, upload_id: &str) -> AppError {
    let error = payload.get("error").and_then(Value::as_str).unwrap_or("");

    match error {
        "not_found" => AppError::SessionNotFound {
            upload_id: upload_id.to_string(),
        },
        "range_mismatch" => AppError::RangeMismatch {
            upload_id: upload_id.to_string(),
            current_offset: payload
                .get("current_offset")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        },
        "overflow" => AppError::PayloadTooLarge {
            declared: payload.get("declared").and_then(Value::as_u64).unwrap_or(0),
            limit: payload.get("limit").and_then(Value::as_u64).unwrap_or(0),
        },
        "invalid_state" | "illegal_transition" => AppError::BackendPermanent {
            message: format!("session in unexpected state for {upload_id}"),
        },
        other => AppError::InternalError {
            message: format!("unexpected session error '{other}' for {upload_id}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_parses_explicit_range() {
        let parsed = ContentRange::parse("bytes 0-3/8").unwrap();
        assert!(matches!(
            parsed,
            ContentRange::Range {
                from: 0,
                to: 3,
                total: 8
            }
        ));
    }

    #[test]
    fn content_range_parses_status_query() {
        let parsed = ContentRange::parse("bytes */8").unwrap();
        assert!(matches!(parsed, ContentRange::Status { total: 8 }));
    }

    #[test]
    fn content_range_rejects_malformed_value() {
        assert!(ContentRange::parse("nonsense").is_err());
    }

    #[test]
    fn session_error_maps_not_found() {
        let err = session_error(serde_json::json!({"error": "not_found"}), "u1");
        assert!(matches!(err, AppError::SessionNotFound { .. }));
    }

    #[test]
    fn session_error_maps_range_mismatch_with_offset() {
        let err = session_error(
            serde_json::json!({"error": "range_mismatch", "current_offset": 4}),
            "u1",
        );
        assert!(matches!(
            err,
            AppError::RangeMismatch {
                current_offset: 4,
                ..
            }
        ));
    }
}

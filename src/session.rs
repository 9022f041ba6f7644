//! # Session Store
//!
//! Implemented as a Durable Object, one instance per upload-id
//! (`namespace.id_from_name(&upload_id)`). Cloudflare never runs two
//! `fetch` invocations against the same Durable Object instance
//! concurrently, which gives chunk-PUTs for the same upload-id the
//! serialization they need without an explicit lock — this object both
//! tracks session state and, through the storage backends in
//! [`crate::storage`], drives the actual byte writes, so concurrent writes
//! against one upload-id are serialized by the platform rather than by code
//! of its own.
//!
//! The Worker talks to this object through a small internal action
//! protocol (JSON body, `action` field) rather than a literal mutator
//! closure, since closures cannot cross the Worker/Durable-Object
//! boundary — each action below is one of the atomic read-modify-write
//! steps the upload handlers actually need.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use worker::*;

use crate::documents::MeasurementDocument;
use crate::metadata::MeasurementMetadata;
use crate::storage::{backend_for, BackendContext, BackendHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Finalizing,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Gridfs,
    CloudObject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub upload_id: String,
    pub owner: String,
    pub device_id: Uuid,
    pub measurement_id: u64,
    pub metadata: MeasurementMetadata,
    pub declared_total_bytes: u64,
    pub bytes_received: u64,
    pub backend_kind: BackendKind,
    pub backend_handle: BackendHandle,
    pub database_binding: String,
    pub bucket_binding: String,
    pub upload_expiration_ms: i64,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub state: SessionState,
}

const SESSION_KEY: &str = "session";

#[derive(Debug, Deserialize)]
struct CreateRequest {
    upload_id: String,
    owner: String,
    metadata: MeasurementMetadata,
    declared_total_bytes: u64,
    backend_kind: BackendKind,
    key: String,
    database_binding: String,
    bucket_binding: String,
    upload_expiration_ms: i64,
}

#[derive(Debug, Deserialize)]
struct AppendRequest {
    owner: String,
    offset: u64,
    /// Base64-encoded chunk bytes (JSON has no binary wire type).
    bytes: String,
}

#[derive(Debug, Deserialize)]
struct TransitionRequest {
    owner: String,
    to: SessionState,
}

#[durable_object]
pub struct UploadSession {
    state: State,
    env: Env,
}

impl DurableObject for UploadSession {
    fn new(state: State, env: Env) -> Self {
        Self { state, env }
    }

    async fn fetch(&self, mut req: Request) -> Result<Response> {
        let body: serde_json::Value = req.json().await.unwrap_or(json!({}));
        let action = body["action"].as_str().unwrap_or("");

        match action {
            "create" => self.create(body).await,
            "get" => self.get().await,
            "append" => self.append(body).await,
            "transition" => self.transition(body).await,
            "finalize" => self.finalize(body).await,
            "remove" => self.remove().await,
            _ => json_response(&json!({"error": "unknown action"}), 400),
        }
    }

    async fn alarm(&self) -> Result<Response> {
        let Some(mut session) = self.load().await? else {
            return Response::empty();
        };

        if matches!(session.state, SessionState::Open | SessionState::Finalizing) {
            let age_ms = (Utc::now() - session.last_activity_at).num_milliseconds();
            if age_ms >= session.upload_expiration_ms {
                session.state = SessionState::Aborted;
                self.state.storage().put(SESSION_KEY, &session).await?;

                let backend = backend_for(session.backend_kind);
                let ctx = self.backend_context(&session);
                let _ = backend.abort(&ctx, session.backend_handle.clone()).await;
            }
        }

        Response::empty()
    }
}

impl UploadSession {
    fn backend_context<'a>(&'a self, session: &'a Session) -> BackendContext<'a> {
        BackendContext {
            state: &self.state,
            env: &self.env,
            bucket_binding: &session.bucket_binding,
            database_binding: &session.database_binding,
        }
    }

    async fn load(&self) -> Result<Option<Session>> {
        match self.state.storage().get::<Session>(SESSION_KEY).await {
            Ok(session) => Ok(Some(session)),
            Err(err) if err.to_string().contains("No such value") => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create(&self, body: serde_json::Value) -> Result<Response> {
        let req: CreateRequest = serde_json::from_value(body)
            .map_err(|err| Error::RustError(format!("invalid create request: {err}")))?;

        if let Some(existing) = self.load().await? {
            return json_response(&json!({"session": existing}), 200);
        }

        let now = Utc::now();
        let backend = backend_for(req.backend_kind);
        let ctx = BackendContext {
            state: &self.state,
            env: &self.env,
            bucket_binding: &req.bucket_binding,
            database_binding: &req.database_binding,
        };

        let backend_handle = backend
            .begin(&ctx, &req.key)
            .await
            .map_err(|err| Error::RustError(err.to_string()))?;

        let session = Session {
            upload_id: req.upload_id,
            owner: req.owner,
            device_id: req.metadata.device_id,
            measurement_id: req.metadata.measurement_id,
            metadata: req.metadata,
            declared_total_bytes: req.declared_total_bytes,
            bytes_received: 0,
            backend_kind: req.backend_kind,
            backend_handle,
            database_binding: req.database_binding,
            bucket_binding: req.bucket_binding,
            upload_expiration_ms: req.upload_expiration_ms,
            created_at: now,
            last_activity_at: now,
            state: SessionState::Open,
        };

        self.state.storage().put(SESSION_KEY, &session).await?;
        self.reschedule_alarm(&session).await?;

        json_response(&json!({"session": session}), 200)
    }

    async fn get(&self) -> Result<Response> {
        match self.load().await? {
            Some(session) => json_response(&json!({"session": session}), 200),
            None => json_response(&json!({"session": serde_json::Value::Null}), 200),
        }
    }

    async fn append(&self, body: serde_json::Value) -> Result<Response> {
        let req: AppendRequest = serde_json::from_value(body)
            .map_err(|err| Error::RustError(format!("invalid append request: {err}")))?;

        let Some(mut session) = self.load().await? else {
            return json_response(&json!({"error": "not_found"}), 404);
        };

        if session.owner != req.owner {
            return json_response(&json!({"error": "not_found"}), 404);
        }

        if session.state != SessionState::Open {
            return json_response(
                &json!({"error": "invalid_state", "state": session.state}),
                409,
            );
        }

        if req.offset != session.bytes_received {
            return json_response(
                &json!({"error": "range_mismatch", "current_offset": session.bytes_received}),
                409,
            );
        }

        let bytes = base64_decode(&req.bytes)
            .map_err(|err| Error::RustError(format!("invalid chunk encoding: {err}")))?;

        if req.offset + bytes.len() as u64 > session.declared_total_bytes {
            return json_response(
                &json!({
                    "error": "overflow",
                    "declared": req.offset + bytes.len() as u64,
                    "limit": session.declared_total_bytes,
                }),
                409,
            );
        }

        let backend = backend_for(session.backend_kind);
        let ctx = self.backend_context(&session);
        let new_handle = backend
            .append(&ctx, session.backend_handle.clone(), req.offset, bytes.clone())
            .await
            .map_err(|err| Error::RustError(err.to_string()))?;

        session.backend_handle = new_handle;
        session.bytes_received += bytes.len() as u64;
        session.last_activity_at = Utc::now();
        self.state.storage().put(SESSION_KEY, &session).await?;
        self.reschedule_alarm(&session).await?;

        json_response(&json!({"session": session}), 200)
    }

    async fn transition(&self, body: serde_json::Value) -> Result<Response> {
        let req: TransitionRequest = serde_json::from_value(body)
            .map_err(|err| Error::RustError(format!("invalid transition request: {err}")))?;

        let Some(mut session) = self.load().await? else {
            return json_response(&json!({"error": "not_found"}), 404);
        };

        if session.owner != req.owner {
            return json_response(&json!({"error": "not_found"}), 404);
        }

        let allowed = matches!(
            (session.state, req.to),
            (SessionState::Open, SessionState::Finalizing)
                | (SessionState::Finalizing, SessionState::Done)
                | (SessionState::Open, SessionState::Aborted)
                | (SessionState::Finalizing, SessionState::Aborted)
        ) || session.state == req.to;

        if !allowed {
            return json_response(
                &json!({"error": "illegal_transition", "from": session.state, "to": req.to}),
                409,
            );
        }

        session.state = req.to;
        session.last_activity_at = Utc::now();
        self.state.storage().put(SESSION_KEY, &session).await?;

        if req.to == SessionState::Aborted {
            let backend = backend_for(session.backend_kind);
            let ctx = self.backend_context(&session);
            let _ = backend.abort(&ctx, session.backend_handle.clone()).await;
        } else {
            self.reschedule_alarm(&session).await?;
        }

        json_response(&json!({"session": session}), 200)
    }

    /// Drives `backend.finalize` for a session already in `Finalizing`,
    /// then transitions to `Done` on success or `Aborted` on failure — the
    /// `backend.finalize ok / err` branch of the state diagram.
    async fn finalize(&self, body: serde_json::Value) -> Result<Response> {
        #[derive(Deserialize)]
        struct FinalizeRequest {
            owner: String,
            user_id: String,
        }

        let req: FinalizeRequest = serde_json::from_value(body)
            .map_err(|err| Error::RustError(format!("invalid finalize request: {err}")))?;

        let Some(mut session) = self.load().await? else {
            return json_response(&json!({"error": "not_found"}), 404);
        };

        if session.owner != req.owner {
            return json_response(&json!({"error": "not_found"}), 404);
        }

        if session.state != SessionState::Finalizing {
            return json_response(
                &json!({"error": "invalid_state", "state": session.state}),
                409,
            );
        }

        let document = MeasurementDocument::new(
            &session.upload_id,
            session.declared_total_bytes,
            &req.user_id,
            session.metadata.clone(),
        );

        let backend = backend_for(session.backend_kind);
        let ctx = self.backend_context(&session);
        let outcome = backend
            .finalize(&ctx, session.backend_handle.clone(), document)
            .await;

        match outcome {
            Ok(()) => {
                session.state = SessionState::Done;
                session.last_activity_at = Utc::now();
                self.state.storage().put(SESSION_KEY, &session).await?;
                json_response(&json!({"session": session}), 200)
            }
            Err(err) => {
                session.state = SessionState::Aborted;
                self.state.storage().put(SESSION_KEY, &session).await?;
                json_response(&json!({"error": "finalize_failed", "message": err.to_string()}), 500)
            }
        }
    }

    async fn remove(&self) -> Result<Response> {
        self.state.storage().delete_all().await?;
        Response::empty()
    }

    async fn reschedule_alarm(&self, session: &Session) -> Result<()> {
        let fire_at = session.last_activity_at
            + chrono::Duration::milliseconds(session.upload_expiration_ms);
        self.state
            .storage()
            .set_alarm(fire_at.timestamp_millis())
            .await
    }
}

fn json_response(value: &serde_json::Value, status: u16) -> Result<Response> {
    Ok(Response::from_json(value)?.with_status(status))
}

fn base64_decode(encoded: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(encoded)
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// The Worker-side client for talking to an [`UploadSession`], used by the
/// upload protocol handlers. Each call routes to the Durable Object instance
/// named after the upload-id, so requests for the same upload-id always
/// land on the same instance and are serialized by the platform.
pub mod client {
    use serde_json::{json, Value};
    use worker::{Env, Method, Request, RequestInit, Result};

    use super::{base64_encode, BackendKind};
    use crate::metadata::MeasurementMetadata;

    /// Raw call: posts `body` to the named upload-id's Durable Object and
    /// returns its response status and JSON payload.
    async fn call(
        env: &Env,
        namespace_binding: &str,
        upload_id: &str,
        body: Value,
    ) -> Result<(u16, Value)> {
        let namespace = env.durable_object(namespace_binding)?;
        let stub = namespace.id_from_name(upload_id)?.get_stub()?;

        let mut init = RequestInit::new();
        init.with_method(Method::Post)
            .with_body(Some(serde_json::to_string(&body)?.into()));

        let request = Request::new_with_init("https://session.internal/", &init)?;
        let mut response = stub.fetch_with_request(request).await?;
        let status = response.status_code();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        Ok((status, payload))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        env: &Env,
        namespace_binding: &str,
        upload_id: &str,
        owner: &str,
        metadata: &MeasurementMetadata,
        declared_total_bytes: u64,
        backend_kind: BackendKind,
        key: &str,
        database_binding: &str,
        bucket_binding: &str,
        upload_expiration_ms: i64,
    ) -> Result<(u16, Value)> {
        call(
            env,
            namespace_binding,
            upload_id,
            json!({
                "action": "create",
                "upload_id": upload_id,
                "owner": owner,
                "metadata": metadata,
                "declared_total_bytes": declared_total_bytes,
                "backend_kind": backend_kind,
                "key": key,
                "database_binding": database_binding,
                "bucket_binding": bucket_binding,
                "upload_expiration_ms": upload_expiration_ms,
            }),
        )
        .await
    }

    pub async fn get(env: &Env, namespace_binding: &str, upload_id: &str) -> Result<(u16, Value)> {
        call(env, namespace_binding, upload_id, json!({"action": "get"})).await
    }

    pub async fn append(
        env: &Env,
        namespace_binding: &str,
        upload_id: &str,
        owner: &str,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(u16, Value)> {
        call(
            env,
            namespace_binding,
            upload_id,
            json!({
                "action": "append",
                "owner": owner,
                "offset": offset,
                "bytes": base64_encode(bytes),
            }),
        )
        .await
    }

    pub async fn transition(
        env: &Env,
        namespace_binding: &str,
        upload_id: &str,
        owner: &str,
        to: super::SessionState,
    ) -> Result<(u16, Value)> {
        call(
            env,
            namespace_binding,
            upload_id,
            json!({"action": "transition", "owner": owner, "to": to}),
        )
        .await
    }

    pub async fn finalize(
        env: &Env,
        namespace_binding: &str,
        upload_id: &str,
        owner: &str,
        user_id: &str,
    ) -> Result<(u16, Value)> {
        call(
            env,
            namespace_binding,
            upload_id,
            json!({"action": "finalize", "owner": owner, "user_id": user_id}),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_serializes_snake_case() {
        let value = serde_json::to_value(SessionState::Finalizing).unwrap();
        assert_eq!(value, serde_json::json!("finalizing"));
    }

    #[test]
    fn backend_handle_exposes_its_key() {
        let handle = BackendHandle::Gridfs {
            key: "upload-1".to_string(),
        };
        assert_eq!(handle.key(), "upload-1");
    }
}

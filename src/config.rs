//! # Configuration Management
//!
//! Configuration is stored in Cloudflare KV under the `config` key and
//! loaded once per isolate with fallback to defaults, mirroring the
//! service's original KV-backed configuration layer.
//!
//! ## Configuration Options
//!
//! - `http`: `endpoint` used to build absolute `Location` headers (a Worker
//!   has no bindable `port`/`host` of its own, so only the external-facing
//!   prefix is meaningful).
//! - `upload_expiration_ms`: session + staged-blob TTL.
//! - `measurement_payload_limit`: max declared upload size, bytes.
//! - `storage`: `gridfs` or `cloud_object`, with the associated subtree.
//! - `auth`: `mocked`, `static_jwk`, or `oidc`, with the associated subtree.
//! - `recognized_format_versions` / `recognized_modalities`: the server-side
//!   registries `InvalidMetadata` validation checks against.

use crate::constants::{
    DEFAULT_MEASUREMENT_PAYLOAD_LIMIT, DEFAULT_UPLOAD_EXPIRATION_MS, STORAGE_BUCKET_NAME,
    UPLOAD_DB_NAME, UPLOAD_SESSION_NAMESPACE,
};
use serde::{Deserialize, Serialize};
use worker::kv::KvStore;
use worker::{console_log, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    /// GridFS-style backend: staged chunks live in the owning Durable
    /// Object's storage, assembled into `uploads_folder` (an R2 bucket
    /// binding name, kept under its original config key for document
    /// compatibility) on finalize.
    Gridfs { uploads_folder: String },
    /// Cloud-object backend: R2 native multipart upload.
    CloudObject { bucket_name: String },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Gridfs {
            uploads_folder: STORAGE_BUCKET_NAME.to_string(),
        }
    }
}

impl StorageConfig {
    /// The backend kind a session should be created with.
    pub fn backend_kind(&self) -> crate::session::BackendKind {
        match self {
            StorageConfig::Gridfs { .. } => crate::session::BackendKind::Gridfs,
            StorageConfig::CloudObject { .. } => crate::session::BackendKind::CloudObject,
        }
    }

    /// The R2 bucket binding name backing this backend.
    pub fn bucket_binding(&self) -> &str {
        match self {
            StorageConfig::Gridfs { uploads_folder } => uploads_folder,
            StorageConfig::CloudObject { bucket_name } => bucket_name,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Accepts any syntactically-valid bearer token. Tests and the
    /// zero-config default.
    Mocked,
    /// Verifies a JWT against a fixed, pinned JWK set.
    StaticJwk { jwks: Vec<StaticJwk> },
    /// Discovers issuer metadata + JWKS via OIDC.
    Oidc {
        issuer: String,
        client_id: String,
        #[serde(default)]
        tenant: Option<String>,
    },
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig::Mocked
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticJwk {
    pub kid: String,
    /// RSA/EC public key material in the form `jsonwebtoken::DecodingKey`
    /// expects (PEM for RSA/EC, raw secret bytes for HMAC), base64-free.
    pub pem: String,
    pub alg: String,
}

/// Configuration structure for the telemetry ingestion service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the D1 database binding used for the metadata document store.
    pub database_name: String,

    /// Name of the Durable Object namespace binding backing the session store.
    pub session_namespace: String,

    /// External-facing URL prefix used to build the `Location` header on a
    /// successful pre-request (`http.endpoint` in the source configuration).
    pub http_endpoint: String,

    /// Session + staged-blob TTL, in milliseconds (`upload.expiration`).
    pub upload_expiration_ms: i64,

    /// Maximum declared upload size, in bytes (`measurement.payload.limit`).
    pub measurement_payload_limit: u64,

    /// Selects and configures the storage backend (`storage-type`).
    pub storage: StorageConfig,

    /// Selects and configures the auth adapter (`auth-type`).
    pub auth: AuthConfig,

    /// Format versions accepted by metadata validation.
    pub recognized_format_versions: Vec<i64>,

    /// Modality tags accepted by metadata validation.
    pub recognized_modalities: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_name: UPLOAD_DB_NAME.to_string(),
            session_namespace: UPLOAD_SESSION_NAMESPACE.to_string(),
            http_endpoint: "https://localhost".to_string(),
            upload_expiration_ms: DEFAULT_UPLOAD_EXPIRATION_MS,
            measurement_payload_limit: DEFAULT_MEASUREMENT_PAYLOAD_LIMIT,
            storage: StorageConfig::default(),
            auth: AuthConfig::default(),
            recognized_format_versions: vec![1, 2, 3],
            recognized_modalities: vec![
                "BICYCLE".to_string(),
                "CAR".to_string(),
                "WALKING".to_string(),
                "BUS".to_string(),
                "TRAIN".to_string(),
            ],
        }
    }
}

impl Config {
    /// Loads configuration from KV storage with fallback to defaults.
    ///
    /// A Worker has no process exit code to signal a bad startup
    /// configuration; instead, a malformed `config` document is propagated
    /// as an error from this call, which `lib.rs` turns into a response
    /// before any routing occurs — refusing every request until the
    /// configuration is fixed is the closest analogue to "non-zero exit on
    /// startup config error".
    pub async fn load(kv: &KvStore) -> Result<Self> {
        match kv.get("config").json().await? {
            Some(config) => {
                console_log!("Configuration loaded from KV storage");
                Ok(config)
            }
            None => {
                console_log!("Config not found in KV, using default");
                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_gridfs_and_mocked_auth() {
        let config = Config::default();
        assert!(matches!(config.storage, StorageConfig::Gridfs { .. }));
        assert!(matches!(config.auth, AuthConfig::Mocked));
        assert_eq!(config.upload_expiration_ms, DEFAULT_UPLOAD_EXPIRATION_MS);
    }
}

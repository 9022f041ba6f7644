//! # Storage Contract
//!
//! Abstracts over where an upload's bytes actually end up. The session
//! store owns offset bookkeeping and calls into one of these
//! implementations at `begin`/`append`/`finalize`/`abort` time; neither
//! concrete backend knows about sessions or HTTP.
//!
//! Both backends run inside the owning Durable Object, so `BackendContext`
//! bundles the DO's own `State` (for GridFS's DO-local staging) alongside
//! `Env` (for R2/D1 bindings) and the two binding names resolved once at
//! session-creation time from the server configuration.

pub mod cloud_object;
pub mod gridfs;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use worker::{Env, State};

use crate::documents::MeasurementDocument;
use crate::errors::AppResult;

pub use cloud_object::CloudObjectBackend;
pub use gridfs::GridfsBackend;

/// Backend-specific state carried on the `Session`, opaque to everything
/// except the backend that created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum BackendHandle {
    Gridfs {
        key: String,
    },
    CloudObject {
        key: String,
        r2_upload_id: String,
        parts: Vec<UploadedPartRecord>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedPartRecord {
    pub part_number: u16,
    pub etag: String,
}

impl BackendHandle {
    pub fn key(&self) -> &str {
        match self {
            BackendHandle::Gridfs { key } => key,
            BackendHandle::CloudObject { key, .. } => key,
        }
    }
}

/// Everything a backend needs to touch bindings, bundled so the trait
/// methods stay readable.
pub struct BackendContext<'a> {
    pub state: &'a State,
    pub env: &'a Env,
    pub bucket_binding: &'a str,
    pub database_binding: &'a str,
}

/// The storage operations a session drives over its lifetime.
///
/// `append`/`finalize`/`abort` MUST be safe to retry: a client disconnect
/// mid-chunk or a transient backend failure leaves the handle unchanged
/// rather than partially mutated.
#[async_trait(?Send)]
pub trait StorageBackend {
    /// Opens staging for a new upload-id. Idempotent: calling `begin` again
    /// for an id that already has a handle should be safe.
    async fn begin(&self, ctx: &BackendContext<'_>, key: &str) -> AppResult<BackendHandle>;

    /// Writes `bytes` at `offset`. The caller (the session store) has
    /// already checked `offset == bytesReceived`; this only needs to apply
    /// the write and report back the possibly-updated handle.
    async fn append(
        &self,
        ctx: &BackendContext<'_>,
        handle: BackendHandle,
        offset: u64,
        bytes: Vec<u8>,
    ) -> AppResult<BackendHandle>;

    /// Makes the upload durably visible under `document.filename` and
    /// inserts the metadata document. Must be safe to call more than once
    /// for the same handle if a prior attempt failed after partially
    /// completing.
    async fn finalize(
        &self,
        ctx: &BackendContext<'_>,
        handle: BackendHandle,
        document: MeasurementDocument,
    ) -> AppResult<()>;

    /// Releases all staging resources. Safe to call from any state,
    /// including after a successful `finalize` (a no-op there).
    async fn abort(&self, ctx: &BackendContext<'_>, handle: BackendHandle) -> AppResult<()>;
}

/// Resolves the configured backend kind to its implementation.
pub fn backend_for(kind: crate::session::BackendKind) -> Box<dyn StorageBackend> {
    match kind {
        crate::session::BackendKind::Gridfs => Box::new(GridfsBackend),
        crate::session::BackendKind::CloudObject => Box::new(CloudObjectBackend),
    }
}

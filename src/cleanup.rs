//! # Cleanup Scheduler
//!
//! Per-session expiry is already driven by each
//! [`crate::session::UploadSession`]'s own Durable Object alarm (its TTL
//! timeout moves a stalled session to Aborted), so the remaining job here
//! is sweeping orphan blobs — objects a backend wrote while staging or
//! finalizing whose metadata document was never inserted, because the
//! client vanished or the Worker crashed between the blob write and the D1
//! insert. Cloudflare's Cron Triggers fire this on an interval configured
//! in `wrangler.toml` (mirroring `upload.expiration` by convention); the
//! handler re-reads the live configuration on each tick rather than
//! trusting whatever triggered it.

use worker::{Env, Result};

use crate::config::Config;
use crate::constants::STORAGE_CONFIG_KV_NAME;
use crate::documents::DocumentStore;
use crate::logging::Logger;

/// Runs one cleanup tick: lists every object in the configured bucket,
/// and deletes those older than the TTL with no corresponding metadata
/// document (i.e. never finalized).
pub async fn run(env: &Env) -> Result<()> {
    let kv = env.kv(STORAGE_CONFIG_KV_NAME)?;
    let config = Config::load(&kv).await?;

    let bucket = env.bucket(config.storage.bucket_binding())?;
    let store = DocumentStore::new(env, &config.database_name)
        .map_err(|err| worker::Error::RustError(err.to_string()))?;

    let cutoff_ms = worker::Date::now().as_millis() as i64 - config.upload_expiration_ms;

    let mut cursor: Option<String> = None;
    let mut swept = 0u32;
    let mut retained = 0u32;

    loop {
        let mut listing = bucket.list();
        if let Some(cursor) = &cursor {
            listing = listing.cursor(cursor.clone());
        }
        let page = listing.execute().await?;

        for object in page.objects() {
            let uploaded_ms = object.uploaded().as_millis() as i64;
            if uploaded_ms > cutoff_ms {
                continue;
            }

            let has_document = store
                .get(&object.key())
                .await
                .map_err(|err| worker::Error::RustError(err.to_string()))?
                .is_some();

            if has_document {
                retained += 1;
                continue;
            }

            bucket.delete(object.key()).await?;
            swept += 1;
        }

        cursor = page.cursor();
        if !page.truncated() || cursor.is_none() {
            break;
        }
    }

    Logger::new("cleanup".to_string()).info(
        "cleanup tick finished",
        Some(serde_json::json!({"swept": swept, "retained": retained})),
    );

    Ok(())
}

//! # GridFS-style Backend
//!
//! Stages incoming bytes under the owning Durable Object's own
//! transactional storage — this runtime's nearest equivalent of "a local
//! scratch file under a configured directory", since a Worker has no
//! filesystem of its own. `finalize` streams the concatenated staged bytes
//! into the blob bucket under `filename = upload-id` and inserts the
//! metadata document; on failure the staged entries are left in place for
//! retry until the session's TTL sweeps them.

use async_trait::async_trait;
use worker::Storage;

use super::{BackendContext, BackendHandle, StorageBackend};
use crate::documents::{DocumentStore, MeasurementDocument};
use crate::errors::{AppError, AppResult};

const CHUNK_KEY_PREFIX: &str = "chunk:";

pub struct GridfsBackend;

#[async_trait(?Send)]
impl StorageBackend for GridfsBackend {
    async fn begin(&self, _ctx: &BackendContext<'_>, key: &str) -> AppResult<BackendHandle> {
        Ok(BackendHandle::Gridfs {
            key: key.to_string(),
        })
    }

    async fn append(
        &self,
        ctx: &BackendContext<'_>,
        handle: BackendHandle,
        offset: u64,
        bytes: Vec<u8>,
    ) -> AppResult<BackendHandle> {
        let storage = ctx.state.storage();
        stage_chunk(&storage, offset, &bytes).await?;
        Ok(handle)
    }

    async fn finalize(
        &self,
        ctx: &BackendContext<'_>,
        handle: BackendHandle,
        document: MeasurementDocument,
    ) -> AppResult<()> {
        let storage = ctx.state.storage();
        let bytes = read_staged(&storage).await?;

        let bucket = ctx
            .env
            .bucket(ctx.bucket_binding)
            .map_err(|err| AppError::R2Error {
                message: format!("Unable to access R2 bucket: {err}"),
            })?;

        bucket
            .put(handle.key().to_string(), bytes)
            .execute()
            .await
            .map_err(|err| AppError::R2Error {
                message: format!("Failed to write staged upload to bucket: {err}"),
            })?;

        let store = DocumentStore::new(ctx.env, ctx.database_binding)?;
        store.insert(&document).await?;

        delete_staged(&storage).await?;
        Ok(())
    }

    async fn abort(&self, ctx: &BackendContext<'_>, _handle: BackendHandle) -> AppResult<()> {
        let storage = ctx.state.storage();
        delete_staged(&storage).await
    }
}

async fn stage_chunk(storage: &Storage, offset: u64, bytes: &[u8]) -> AppResult<()> {
    let key = format!("{CHUNK_KEY_PREFIX}{offset:020}");
    storage
        .put(&key, bytes)
        .await
        .map_err(|err| AppError::SessionStoreError {
            message: format!("Failed to stage chunk at offset {offset}: {err}"),
        })
}

async fn chunk_keys(storage: &Storage) -> AppResult<Vec<String>> {
    let options = worker::ListOptions::new().prefix(CHUNK_KEY_PREFIX);
    let map = storage
        .list_with_options(options)
        .await
        .map_err(|err| AppError::SessionStoreError {
            message: format!("Failed to list staged chunks: {err}"),
        })?;

    map.keys()
        .into_iter()
        .map(|key| {
            key.map_err(worker::Error::from)
                .map(|value| value.as_string().unwrap_or_default())
                .map_err(|err| AppError::SessionStoreError {
                    message: format!("Failed to read staged chunk key: {err}"),
                })
        })
        .collect()
}

async fn read_staged(storage: &Storage) -> AppResult<Vec<u8>> {
    let keys = chunk_keys(storage).await?;
    let mut concatenated = Vec::new();
    for key in keys {
        let chunk: Vec<u8> =
            storage
                .get(&key)
                .await
                .map_err(|err| AppError::SessionStoreError {
                    message: format!("Failed to read staged chunk {key}: {err}"),
                })?;
        concatenated.extend_from_slice(&chunk);
    }
    Ok(concatenated)
}

async fn delete_staged(storage: &Storage) -> AppResult<()> {
    let keys = chunk_keys(storage).await?;
    if keys.is_empty() {
        return Ok(());
    }
    storage
        .delete_multiple(keys)
        .await
        .map_err(|err| AppError::SessionStoreError {
            message: format!("Failed to delete staged chunks: {err}"),
        })?;
    Ok(())
}

//! # Cloud-Object Backend
//!
//! Drives R2's native multipart-upload primitive directly: each `append`
//! uploads the incoming byte range as the next sequential part, and
//! `finalize` completes the upload and inserts the metadata document. The
//! upload-id doubles as both the R2 object key and the metadata-document
//! filename so the two are joinable.

use async_trait::async_trait;
use worker::{Bucket, UploadedPart};

use super::{BackendContext, BackendHandle, StorageBackend, UploadedPartRecord};
use crate::documents::{DocumentStore, MeasurementDocument};
use crate::errors::{AppError, AppResult};

pub struct CloudObjectBackend;

#[async_trait(?Send)]
impl StorageBackend for CloudObjectBackend {
    async fn begin(&self, ctx: &BackendContext<'_>, key: &str) -> AppResult<BackendHandle> {
        let bucket = bucket(ctx)?;

        let multipart = bucket
            .create_multipart_upload(key.to_string())
            .execute()
            .await
            .map_err(|err| AppError::R2Error {
                message: format!("Failed to open multipart upload: {err}"),
            })?;

        let r2_upload_id = multipart.upload_id().await;

        Ok(BackendHandle::CloudObject {
            key: key.to_string(),
            r2_upload_id,
            parts: Vec::new(),
        })
    }

    async fn append(
        &self,
        ctx: &BackendContext<'_>,
        handle: BackendHandle,
        _offset: u64,
        bytes: Vec<u8>,
    ) -> AppResult<BackendHandle> {
        let BackendHandle::CloudObject {
            key,
            r2_upload_id,
            mut parts,
        } = handle
        else {
            return Err(AppError::InternalError {
                message: "cloud-object append called with a non-cloud-object handle".to_string(),
            });
        };

        let bucket = bucket(ctx)?;
        let multipart = bucket
            .resume_multipart_upload(key.clone(), r2_upload_id.clone())
            .map_err(|err| AppError::R2Error {
                message: format!("Failed to resume multipart upload: {err}"),
            })?;

        let part_number = parts.len() as u16 + 1;
        let uploaded = multipart
            .upload_part(part_number, bytes)
            .await
            .map_err(|err| AppError::R2Error {
                message: format!("Failed to upload part {part_number}: {err}"),
            })?;

        parts.push(UploadedPartRecord {
            part_number,
            etag: uploaded.etag(),
        });

        Ok(BackendHandle::CloudObject {
            key,
            r2_upload_id,
            parts,
        })
    }

    async fn finalize(
        &self,
        ctx: &BackendContext<'_>,
        handle: BackendHandle,
        document: MeasurementDocument,
    ) -> AppResult<()> {
        let BackendHandle::CloudObject {
            key,
            r2_upload_id,
            parts,
        } = handle
        else {
            return Err(AppError::InternalError {
                message: "cloud-object finalize called with a non-cloud-object handle".to_string(),
            });
        };

        let bucket = bucket(ctx)?;
        let multipart = bucket
            .resume_multipart_upload(key, r2_upload_id)
            .map_err(|err| AppError::R2Error {
                message: format!("Failed to resume multipart upload: {err}"),
            })?;

        let uploaded_parts: Vec<UploadedPart> = parts
            .into_iter()
            .map(|part| UploadedPart::new(part.part_number, part.etag))
            .collect();

        multipart
            .complete(uploaded_parts)
            .await
            .map_err(|err| AppError::R2Error {
                message: format!("Failed to complete multipart upload: {err}"),
            })?;

        let store = DocumentStore::new(ctx.env, ctx.database_binding)?;
        store.insert(&document).await
    }

    async fn abort(&self, ctx: &BackendContext<'_>, handle: BackendHandle) -> AppResult<()> {
        let BackendHandle::CloudObject {
            key, r2_upload_id, ..
        } = handle
        else {
            return Err(AppError::InternalError {
                message: "cloud-object abort called with a non-cloud-object handle".to_string(),
            });
        };

        let bucket = bucket(ctx)?;
        let Ok(multipart) = bucket.resume_multipart_upload(key, r2_upload_id) else {
            return Ok(());
        };

        // Best-effort: the upload may already be complete or gone.
        let _ = multipart.abort().await;
        Ok(())
    }
}

fn bucket(ctx: &BackendContext<'_>) -> AppResult<Bucket> {
    ctx.env
        .bucket(ctx.bucket_binding)
        .map_err(|err| AppError::R2Error {
            message: format!("Unable to access R2 bucket: {err}"),
        })
}

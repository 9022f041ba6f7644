//! # Metadata Document Store
//!
//! Persists the finalized record each upload leaves behind once its storage
//! backend completes: the blob's own key plus every metadata field, joined
//! by a shared `filename` (the upload-id). Backed by D1, replacing the
//! original service's upload-progress table with a single row per
//! completed measurement — progress tracking now lives in the session
//! store, not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use worker::{d1::D1Database, wasm_bindgen::JsValue, Env};

use crate::errors::{AppError, AppResult};
use crate::metadata::MeasurementMetadata;

/// A GeoJSON `MultiPoint` over the session's start/end locations, in
/// `[longitude, latitude]` order per coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiPointGeometry {
    #[serde(rename = "type")]
    pub geometry_type: String,
    pub coordinates: Vec<[f64; 2]>,
}

impl MultiPointGeometry {
    pub fn from_metadata(metadata: &MeasurementMetadata) -> Option<Self> {
        let start = metadata.measurement.start_location.as_ref()?;
        let end = metadata.measurement.end_location.as_ref()?;
        Some(Self {
            geometry_type: "MultiPoint".to_string(),
            coordinates: vec![
                [start.longitude, start.latitude],
                [end.longitude, end.latitude],
            ],
        })
    }
}

/// The document persisted on successful finalize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementDocument {
    pub filename: String,
    pub upload_length: u64,
    pub upload_date: DateTime<Utc>,
    pub properties: MeasurementMetadata,
    pub user_id: String,
    pub geometry: Option<MultiPointGeometry>,
}

impl MeasurementDocument {
    pub fn new(
        upload_id: &str,
        upload_length: u64,
        user_id: &str,
        metadata: MeasurementMetadata,
    ) -> Self {
        let geometry = MultiPointGeometry::from_metadata(&metadata);
        Self {
            filename: upload_id.to_string(),
            upload_length,
            upload_date: Utc::now(),
            properties: metadata,
            user_id: user_id.to_string(),
            geometry,
        }
    }
}

/// D1-backed persistence layer for finalized measurement documents.
pub struct DocumentStore {
    db: D1Database,
}

impl DocumentStore {
    pub fn new(env: &Env, binding: &str) -> AppResult<Self> {
        let db = env.d1(binding).map_err(|err| AppError::DatabaseError {
            message: format!("Failed to access D1 binding `{binding}`: {err}"),
        })?;

        Ok(Self { db })
    }

    /// Inserts the finalized document. Called exactly once per upload, after
    /// the backend has durably written the blob — insertion failure here
    /// does not roll back the blob write; the row is retried by the caller
    /// until it succeeds, matching the "retained for retry until TTL"
    /// behavior described for the staged-file backend.
    pub async fn insert(&self, document: &MeasurementDocument) -> AppResult<()> {
        let statement = self.db.prepare(
            "INSERT INTO measurements (
                filename,
                upload_length,
                upload_date,
                user_id,
                properties,
                geometry
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(filename) DO UPDATE SET
                upload_length = excluded.upload_length,
                upload_date = excluded.upload_date,
                user_id = excluded.user_id,
                properties = excluded.properties,
                geometry = excluded.geometry",
        );

        let properties_json = serde_json::to_string(&document.properties).map_err(|err| {
            AppError::DatabaseError {
                message: format!("Failed to serialize measurement properties: {err}"),
            }
        })?;

        let geometry_json = document
            .geometry
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| AppError::DatabaseError {
                message: format!("Failed to serialize measurement geometry: {err}"),
            })?;

        let statement = statement
            .bind(&[
                JsValue::from_str(&document.filename),
                JsValue::from_f64(document.upload_length as f64),
                JsValue::from_str(&document.upload_date.to_rfc3339()),
                JsValue::from_str(&document.user_id),
                JsValue::from_str(&properties_json),
                geometry_json.map_or(JsValue::NULL, |json| JsValue::from_str(&json)),
            ])
            .map_err(map_d1_error("bind insert measurement"))?;

        statement
            .run()
            .await
            .map(|_| ())
            .map_err(map_d1_error("insert measurement"))
    }

    /// Fetches a finalized document by its upload-id filename, used by
    /// status polling after a session has already completed and been torn
    /// down.
    pub async fn get(&self, filename: &str) -> AppResult<Option<MeasurementDocument>> {
        let statement = self
            .db
            .prepare("SELECT * FROM measurements WHERE filename = ?1");
        let statement = statement
            .bind(&[JsValue::from_str(filename)])
            .map_err(map_d1_error("bind load measurement"))?;
        let row: Option<MeasurementRow> = statement
            .first(None)
            .await
            .map_err(map_d1_error("load measurement"))?;

        row.map(MeasurementRow::try_into_document).transpose()
    }
}

#[derive(Debug, Deserialize)]
struct MeasurementRow {
    filename: String,
    upload_length: f64,
    upload_date: String,
    user_id: String,
    properties: String,
    geometry: Option<String>,
}

impl MeasurementRow {
    fn try_into_document(self) -> AppResult<MeasurementDocument> {
        let upload_date = DateTime::parse_from_rfc3339(&self.upload_date)
            .map_err(|err| AppError::DatabaseError {
                message: format!("Invalid upload_date timestamp: {err}"),
            })?
            .with_timezone(&Utc);

        let properties: MeasurementMetadata =
            serde_json::from_str(&self.properties).map_err(|err| AppError::DatabaseError {
                message: format!("Invalid properties in database: {err}"),
            })?;

        let geometry = self
            .geometry
            .map(|json| {
                serde_json::from_str(&json).map_err(|err| AppError::DatabaseError {
                    message: format!("Invalid geometry in database: {err}"),
                })
            })
            .transpose()?;

        Ok(MeasurementDocument {
            filename: self.filename,
            upload_length: self.upload_length as u64,
            upload_date,
            properties,
            user_id: self.user_id,
            geometry,
        })
    }
}

fn map_d1_error(operation: &'static str) -> impl Fn(worker::Error) -> AppError {
    move |err| AppError::DatabaseError {
        message: format!("{operation} failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ApplicationInfo, Attachments, DeviceInfo, GeoLocation, MeasurementInfo};
    use uuid::Uuid;

    fn sample_metadata(with_locations: bool) -> MeasurementMetadata {
        let (start, end, count) = if with_locations {
            (
                Some(GeoLocation {
                    timestamp: 1000,
                    latitude: 51.0,
                    longitude: 13.0,
                }),
                Some(GeoLocation {
                    timestamp: 2000,
                    latitude: 51.1,
                    longitude: 13.1,
                }),
                2,
            )
        } else {
            (None, None, 0)
        };

        MeasurementMetadata {
            device_id: Uuid::new_v4(),
            measurement_id: 1,
            device: DeviceInfo {
                os_version: "14".into(),
                device_type: "Pixel".into(),
            },
            application: ApplicationInfo {
                app_version: "1.0".into(),
                format_version: 3,
            },
            measurement: MeasurementInfo {
                length: 100.0,
                location_count: count,
                start_location: start,
                end_location: end,
                modality: "BICYCLE".into(),
            },
            attachments: Attachments::default(),
        }
    }

    #[test]
    fn geometry_built_from_start_and_end_locations() {
        let metadata = sample_metadata(true);
        let geometry = MultiPointGeometry::from_metadata(&metadata).unwrap();
        assert_eq!(geometry.geometry_type, "MultiPoint");
        assert_eq!(geometry.coordinates, vec![[13.0, 51.0], [13.1, 51.1]]);
    }

    #[test]
    fn geometry_absent_without_locations() {
        let metadata = sample_metadata(false);
        assert!(MultiPointGeometry::from_metadata(&metadata).is_none());
    }

    #[test]
    fn document_round_trips_through_json_shape() {
        let metadata = sample_metadata(true);
        let document = MeasurementDocument::new("upload-1", 134697, "user-1", metadata);
        let serialized = serde_json::to_value(&document).unwrap();
        assert_eq!(serialized["filename"], "upload-1");
        assert_eq!(serialized["uploadLength"], 134697);
        assert!(serialized["geometry"]["coordinates"].is_array());
    }
}

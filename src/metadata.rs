//! # Metadata Model
//!
//! Typed representation of measurement metadata plus the two codecs that
//! produce it: [`MeasurementMetadata::from_json`] for the pre-request body
//! and [`MeasurementMetadata::from_headers`] for the flat chunk-PUT header
//! set. Both codecs parse once into this type and run the same field-level
//! validators, so the two wire encodings cannot diverge — callers should
//! never inspect raw JSON or headers again once a `MeasurementMetadata` has
//! been built.

use crate::config::Config;
use crate::constants::*;
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use worker::Headers;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub os_version: String,
    pub device_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInfo {
    pub app_version: String,
    pub format_version: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementInfo {
    pub length: f64,
    pub location_count: u64,
    #[serde(default)]
    pub start_location: Option<GeoLocation>,
    #[serde(default)]
    pub end_location: Option<GeoLocation>,
    pub modality: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachments {
    #[serde(default)]
    pub log_count: u64,
    #[serde(default)]
    pub image_count: u64,
    #[serde(default)]
    pub video_count: u64,
    #[serde(default)]
    pub files_size: u64,
}

impl Default for Attachments {
    fn default() -> Self {
        Self {
            log_count: 0,
            image_count: 0,
            video_count: 0,
            files_size: 0,
        }
    }
}

/// The typed metadata record shared by both wire encodings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementMetadata {
    pub device_id: Uuid,
    pub measurement_id: u64,
    pub device: DeviceInfo,
    pub application: ApplicationInfo,
    pub measurement: MeasurementInfo,
    #[serde(default)]
    pub attachments: Attachments,
}

impl MeasurementMetadata {
    /// Parses the pre-request JSON body into a validated record.
    pub fn from_json(body: &[u8], config: &Config) -> AppResult<Self> {
        let metadata: MeasurementMetadata =
            serde_json::from_slice(body).map_err(|err| AppError::InvalidMetadata {
                field: "body".to_string(),
                reason: format!("malformed metadata JSON: {err}"),
            })?;

        metadata.validate(config)?;
        Ok(metadata)
    }

    /// Parses the flat chunk-PUT header set into a validated record.
    pub fn from_headers(headers: &Headers, config: &Config) -> AppResult<Self> {
        let device_id = parse_uuid_header(headers, HEADER_DEVICE_ID)?;
        let measurement_id = parse_u64_header(headers, HEADER_MEASUREMENT_ID)?;

        let device = DeviceInfo {
            os_version: required_header(headers, HEADER_OS_VERSION)?,
            device_type: required_header(headers, HEADER_DEVICE_TYPE)?,
        };

        let application = ApplicationInfo {
            app_version: required_header(headers, HEADER_APP_VERSION)?,
            format_version: parse_i64_header(headers, HEADER_FORMAT_VERSION)?,
        };

        let length = parse_f64_header(headers, HEADER_LENGTH)?;
        let location_count = parse_u64_header(headers, HEADER_LOCATION_COUNT)?;
        let modality = required_header(headers, HEADER_MODALITY)?;

        let start_location = optional_geo_location(
            headers,
            HEADER_START_LOC_LAT,
            HEADER_START_LOC_LON,
            HEADER_START_LOC_TS,
        )?;
        let end_location = optional_geo_location(
            headers,
            HEADER_END_LOC_LAT,
            HEADER_END_LOC_LON,
            HEADER_END_LOC_TS,
        )?;

        let measurement = MeasurementInfo {
            length,
            location_count,
            start_location,
            end_location,
            modality,
        };

        let attachments = Attachments {
            log_count: optional_u64_header(headers, HEADER_LOG_COUNT)?,
            image_count: optional_u64_header(headers, HEADER_IMAGE_COUNT)?,
            video_count: optional_u64_header(headers, HEADER_VIDEO_COUNT)?,
            files_size: optional_u64_header(headers, HEADER_FILES_SIZE)?,
        };

        let metadata = MeasurementMetadata {
            device_id,
            measurement_id,
            device,
            application,
            measurement,
            attachments,
        };

        metadata.validate(config)?;
        Ok(metadata)
    }

    /// Field-level validation shared by both codecs.
    pub fn validate(&self, config: &Config) -> AppResult<()> {
        if self.measurement.length < 0.0 {
            return Err(AppError::InvalidMetadata {
                field: "length".to_string(),
                reason: "must be a non-negative decimal".to_string(),
            });
        }

        if !config
            .recognized_format_versions
            .contains(&self.application.format_version)
        {
            return Err(AppError::InvalidMetadata {
                field: "formatVersion".to_string(),
                reason: format!(
                    "format version {} is not recognized by this server",
                    self.application.format_version
                ),
            });
        }

        if !config
            .recognized_modalities
            .iter()
            .any(|m| m == &self.measurement.modality)
        {
            return Err(AppError::InvalidMetadata {
                field: "modality".to_string(),
                reason: format!("modality '{}' is not recognized", self.measurement.modality),
            });
        }

        let locations = (&self.measurement.start_location, &self.measurement.end_location);
        match (self.measurement.location_count, locations) {
            (0, (None, None)) => {}
            (0, _) => {
                return Err(AppError::InvalidMetadata {
                    field: "locationCount".to_string(),
                    reason: "locationCount is zero but a location was provided".to_string(),
                })
            }
            (_, (Some(_), Some(_))) => {}
            (_, _) => {
                return Err(AppError::InvalidMetadata {
                    field: "locationCount".to_string(),
                    reason: "locationCount is non-zero but a location is missing".to_string(),
                })
            }
        }

        for location in [&self.measurement.start_location, &self.measurement.end_location]
            .into_iter()
            .flatten()
        {
            validate_geo_location(location)?;
        }

        Ok(())
    }

    /// `412 MissingLocations` is raised only at pre-request time, not by
    /// field-level `validate` — a zero location count is a *legal*
    /// metadata record, just not an admissible one for a new upload.
    pub fn check_has_locations(&self) -> AppResult<()> {
        if self.measurement.location_count == 0 {
            return Err(AppError::MissingLocations);
        }
        Ok(())
    }
}

fn validate_geo_location(location: &GeoLocation) -> AppResult<()> {
    if location.timestamp < 0 {
        return Err(AppError::InvalidMetadata {
            field: "timestamp".to_string(),
            reason: "must be non-negative".to_string(),
        });
    }
    if !(-90.0..=90.0).contains(&location.latitude) {
        return Err(AppError::InvalidMetadata {
            field: "latitude".to_string(),
            reason: "must be within [-90, 90]".to_string(),
        });
    }
    if !(-180.0..=180.0).contains(&location.longitude) {
        return Err(AppError::InvalidMetadata {
            field: "longitude".to_string(),
            reason: "must be within [-180, 180]".to_string(),
        });
    }
    Ok(())
}

fn required_header(headers: &Headers, name: &str) -> AppResult<String> {
    headers
        .get(name)
        .map_err(|err| AppError::InternalError {
            message: format!("failed to read header '{name}': {err}"),
        })?
        .ok_or_else(|| AppError::InvalidMetadata {
            field: name.to_string(),
            reason: "header is missing".to_string(),
        })
}

fn parse_uuid_header(headers: &Headers, name: &str) -> AppResult<Uuid> {
    let raw = required_header(headers, name)?;
    Uuid::parse_str(&raw).map_err(|_| AppError::InvalidMetadata {
        field: name.to_string(),
        reason: "must be a well-formed UUID".to_string(),
    })
}

fn parse_u64_header(headers: &Headers, name: &str) -> AppResult<u64> {
    let raw = required_header(headers, name)?;
    raw.parse::<u64>().map_err(|_| AppError::InvalidMetadata {
        field: name.to_string(),
        reason: "must be a non-negative integer".to_string(),
    })
}

fn parse_i64_header(headers: &Headers, name: &str) -> AppResult<i64> {
    let raw = required_header(headers, name)?;
    raw.parse::<i64>().map_err(|_| AppError::InvalidMetadata {
        field: name.to_string(),
        reason: "must be an integer".to_string(),
    })
}

fn parse_f64_header(headers: &Headers, name: &str) -> AppResult<f64> {
    let raw = required_header(headers, name)?;
    raw.parse::<f64>().map_err(|_| AppError::InvalidMetadata {
        field: name.to_string(),
        reason: "must be a decimal number".to_string(),
    })
}

fn optional_u64_header(headers: &Headers, name: &str) -> AppResult<u64> {
    match headers.get(name).map_err(|err| AppError::InternalError {
        message: format!("failed to read header '{name}': {err}"),
    })? {
        Some(raw) if !raw.is_empty() => {
            raw.parse::<u64>().map_err(|_| AppError::InvalidMetadata {
                field: name.to_string(),
                reason: "must be a non-negative integer".to_string(),
            })
        }
        _ => Ok(0),
    }
}

fn optional_geo_location(
    headers: &Headers,
    lat_header: &str,
    lon_header: &str,
    ts_header: &str,
) -> AppResult<Option<GeoLocation>> {
    let lat = headers.get(lat_header).ok().flatten();
    let lon = headers.get(lon_header).ok().flatten();
    let ts = headers.get(ts_header).ok().flatten();

    match (lat, lon, ts) {
        (None, None, None) => Ok(None),
        (Some(lat), Some(lon), Some(ts)) => Ok(Some(GeoLocation {
            latitude: lat.parse().map_err(|_| AppError::InvalidMetadata {
                field: lat_header.to_string(),
                reason: "must be a decimal number".to_string(),
            })?,
            longitude: lon.parse().map_err(|_| AppError::InvalidMetadata {
                field: lon_header.to_string(),
                reason: "must be a decimal number".to_string(),
            })?,
            timestamp: ts.parse().map_err(|_| AppError::InvalidMetadata {
                field: ts_header.to_string(),
                reason: "must be an integer".to_string(),
            })?,
        })),
        _ => Err(AppError::InvalidMetadata {
            field: lat_header.to_string(),
            reason: "latitude/longitude/timestamp must all be present or all absent".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json(location_count: u64, with_locations: bool) -> serde_json::Value {
        let location = serde_json::json!({"timestamp": 1000, "latitude": 10.0, "longitude": 20.0});
        serde_json::json!({
            "deviceId": "550e8400-e29b-41d4-a716-446655440000",
            "measurementId": 42,
            "device": {"osVersion": "14", "deviceType": "phone"},
            "application": {"appVersion": "1.0", "formatVersion": 3},
            "measurement": {
                "length": 12.5,
                "locationCount": location_count,
                "startLocation": if with_locations { Some(location.clone()) } else { None },
                "endLocation": if with_locations { Some(location) } else { None },
                "modality": "BICYCLE",
            },
        })
    }

    #[test]
    fn from_json_accepts_well_formed_metadata() {
        let config = Config::default();
        let body = sample_json(2, true).to_string();
        let metadata = MeasurementMetadata::from_json(body.as_bytes(), &config).unwrap();
        assert_eq!(metadata.measurement_id, 42);
        assert_eq!(metadata.measurement.location_count, 2);
    }

    #[test]
    fn from_json_rejects_location_count_mismatch() {
        let config = Config::default();
        let body = sample_json(2, false).to_string();
        let err = MeasurementMetadata::from_json(body.as_bytes(), &config).unwrap_err();
        assert!(matches!(err, AppError::InvalidMetadata { field, .. } if field == "locationCount"));
    }

    #[test]
    fn from_json_rejects_unrecognized_format_version() {
        let config = Config::default();
        let mut value = sample_json(0, false);
        value["application"]["formatVersion"] = serde_json::json!(999);
        let body = value.to_string();
        let err = MeasurementMetadata::from_json(body.as_bytes(), &config).unwrap_err();
        assert!(matches!(err, AppError::InvalidMetadata { field, .. } if field == "formatVersion"));
    }

    #[test]
    fn from_json_rejects_out_of_bounds_latitude() {
        let config = Config::default();
        let mut value = sample_json(2, true);
        value["measurement"]["startLocation"]["latitude"] = serde_json::json!(120.0);
        let body = value.to_string();
        let err = MeasurementMetadata::from_json(body.as_bytes(), &config).unwrap_err();
        assert!(matches!(err, AppError::InvalidMetadata { field, .. } if field == "latitude"));
    }

    #[test]
    fn check_has_locations_rejects_zero_count() {
        let config = Config::default();
        let body = sample_json(0, false).to_string();
        let metadata = MeasurementMetadata::from_json(body.as_bytes(), &config).unwrap();
        assert!(matches!(
            metadata.check_has_locations(),
            Err(AppError::MissingLocations)
        ));
    }
}

//! # Application Constants
//!
//! Centralizes binding names, size limits, and HTTP header names used
//! throughout the service.

/// Standard KV binding name for the server configuration document.
pub const STORAGE_CONFIG_KV_NAME: &str = "STORAGE_CONFIG";

/// Standard R2 bucket binding name for the blob/cloud-object store.
pub const STORAGE_BUCKET_NAME: &str = "STORAGE_BUCKET";

/// Standard D1 database binding name for the metadata document store.
pub const UPLOAD_DB_NAME: &str = "UPLOAD_DB";

/// Durable Object namespace binding name for per-upload session state.
pub const UPLOAD_SESSION_NAMESPACE: &str = "UPLOAD_SESSION";

/// Default session + staged-blob TTL (ms): 60 seconds of inactivity.
pub const DEFAULT_UPLOAD_EXPIRATION_MS: i64 = 60_000;

/// Default maximum declared measurement payload size (bytes).
pub const DEFAULT_MEASUREMENT_PAYLOAD_LIMIT: u64 = 10_737_418_240;

/// Versioned base path for the upload protocol.
pub const MEASUREMENTS_BASE_PATH: &str = "/measurements";

/// Query parameter marking the pre-request call.
pub const UPLOAD_TYPE_QUERY_PARAM: &str = "uploadType";
pub const UPLOAD_TYPE_RESUMABLE: &str = "resumable";

/// Header carrying the declared total byte count on pre-request.
pub const HEADER_UPLOAD_CONTENT_LENGTH: &str = "x-upload-content-length";

/// Header carrying the byte range being written on a chunk/status PUT.
pub const HEADER_CONTENT_RANGE: &str = "Content-Range";

/// Header the client polls for the resumption offset.
pub const HEADER_RANGE: &str = "Range";

/// Header carrying the bearer token.
pub const HEADER_AUTHORIZATION: &str = "Authorization";

/// Metadata header set mirrored onto every chunk PUT (flat form of the typed metadata model).
pub const HEADER_DEVICE_TYPE: &str = "deviceType";
pub const HEADER_OS_VERSION: &str = "osVersion";
pub const HEADER_DEVICE_ID: &str = "deviceId";
pub const HEADER_MEASUREMENT_ID: &str = "measurementId";
pub const HEADER_APP_VERSION: &str = "appVersion";
pub const HEADER_FORMAT_VERSION: &str = "formatVersion";
pub const HEADER_LENGTH: &str = "length";
pub const HEADER_LOCATION_COUNT: &str = "locationCount";
pub const HEADER_MODALITY: &str = "modality";
pub const HEADER_START_LOC_LAT: &str = "startLocLat";
pub const HEADER_START_LOC_LON: &str = "startLocLon";
pub const HEADER_START_LOC_TS: &str = "startLocTS";
pub const HEADER_END_LOC_LAT: &str = "endLocLat";
pub const HEADER_END_LOC_LON: &str = "endLocLon";
pub const HEADER_END_LOC_TS: &str = "endLocTS";
pub const HEADER_LOG_COUNT: &str = "logCount";
pub const HEADER_IMAGE_COUNT: &str = "imageCount";
pub const HEADER_VIDEO_COUNT: &str = "videoCount";
pub const HEADER_FILES_SIZE: &str = "filesSize";

/// CORS header for allowed origins
pub const CORS_ALLOW_ORIGIN: &str = "*";

/// CORS header for allowed methods
pub const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, OPTIONS";

/// CORS header for allowed headers
pub const CORS_ALLOW_HEADERS: &str = "Content-Type, Authorization, Content-Range, x-upload-content-length, deviceType, osVersion, deviceId, measurementId, appVersion, formatVersion, length, locationCount, modality, startLocLat, startLocLon, startLocTS, endLocLat, endLocLon, endLocTS, logCount, imageCount, videoCount, filesSize";

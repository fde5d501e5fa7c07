use axum::Json;
use axum::body::Body;
use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, LOCATION, RANGE, WWW_AUTHENTICATE};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::digest::{Digest, DigestError};
use crate::storage::driver::DriverError;

/// Wire-level error codes of the v2 protocol. Serialized in SCREAMING_CASE
/// inside the error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unknown,
    Unauthorized,
    DigestInvalid,
    SizeInvalid,
    NameInvalid,
    TagInvalid,
    NameUnknown,
    ManifestUnknown,
    ManifestInvalid,
    ManifestUnverified,
    BlobUnknown,
    BlobUploadUnknown,
    BlobUploadInvalid,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ErrorInfo {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// `{"errors":[...]}` body carried by every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub errors: Vec<ErrorInfo>,
}

impl ErrorEnvelope {
    pub fn single(info: ErrorInfo) -> Self {
        ErrorEnvelope { errors: vec![info] }
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("blob unknown: {0}")]
    BlobUnknown(Digest),

    #[error("blob upload unknown: {0}")]
    BlobUploadUnknown(String),

    #[error("blob upload invalid: {0}")]
    BlobUploadInvalid(String),

    #[error("digest invalid: {0}")]
    DigestInvalid(String),

    #[error("digest verification failed for {0}")]
    DigestMismatch(Digest),

    #[error("declared size {declared} does not match upload size {actual}")]
    SizeInvalid { declared: u64, actual: u64 },

    #[error("invalid repository name: {0}")]
    NameInvalid(String),

    #[error("invalid tag: {0}")]
    TagInvalid(String),

    #[error("repository not known to registry: {0}")]
    NameUnknown(String),

    #[error("manifest unknown: {0}")]
    ManifestUnknown(String),

    #[error("manifest invalid: {0}")]
    ManifestInvalid(String),

    #[error("manifest references unknown layers")]
    ManifestUnverified { missing: Vec<Digest> },

    #[error("access denied")]
    Unauthorized { challenge: Option<String> },

    /// Out-of-order chunk: answered with 416 and the authoritative range
    /// so the client can resume.
    #[error("range not satisfiable for upload {uuid}")]
    RangeNotSatisfiable {
        name: String,
        uuid: String,
        offset: u64,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Axum(#[from] axum::Error),
}

impl From<DigestError> for RegistryError {
    fn from(err: DigestError) -> Self {
        RegistryError::DigestInvalid(err.to_string())
    }
}

impl RegistryError {
    fn error_info(&self) -> (StatusCode, ErrorInfo) {
        match self {
            Self::BlobUnknown(digest) => (
                StatusCode::NOT_FOUND,
                ErrorInfo::new(ErrorCode::BlobUnknown, "blob unknown to registry")
                    .with_detail(json!({ "digest": digest.to_string() })),
            ),
            Self::BlobUploadUnknown(uuid) => (
                StatusCode::NOT_FOUND,
                ErrorInfo::new(ErrorCode::BlobUploadUnknown, "blob upload unknown to registry")
                    .with_detail(json!({ "uuid": uuid })),
            ),
            Self::BlobUploadInvalid(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorInfo::new(ErrorCode::BlobUploadInvalid, msg),
            ),
            Self::DigestInvalid(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorInfo::new(ErrorCode::DigestInvalid, msg),
            ),
            Self::DigestMismatch(digest) => (
                StatusCode::BAD_REQUEST,
                ErrorInfo::new(
                    ErrorCode::DigestInvalid,
                    "provided digest did not match uploaded content",
                )
                .with_detail(json!({ "digest": digest.to_string() })),
            ),
            Self::SizeInvalid { declared, actual } => (
                StatusCode::BAD_REQUEST,
                ErrorInfo::new(ErrorCode::SizeInvalid, "provided length did not match content length")
                    .with_detail(json!({ "declared": declared, "actual": actual })),
            ),
            Self::NameInvalid(name) => (
                StatusCode::BAD_REQUEST,
                ErrorInfo::new(ErrorCode::NameInvalid, "invalid repository name")
                    .with_detail(json!({ "name": name })),
            ),
            Self::TagInvalid(tag) => (
                StatusCode::BAD_REQUEST,
                ErrorInfo::new(ErrorCode::TagInvalid, "invalid tag")
                    .with_detail(json!({ "tag": tag })),
            ),
            Self::NameUnknown(name) => (
                StatusCode::NOT_FOUND,
                ErrorInfo::new(ErrorCode::NameUnknown, "repository name not known to registry")
                    .with_detail(json!({ "name": name })),
            ),
            Self::ManifestUnknown(reference) => (
                StatusCode::NOT_FOUND,
                ErrorInfo::new(ErrorCode::ManifestUnknown, "manifest unknown")
                    .with_detail(json!({ "reference": reference })),
            ),
            Self::ManifestInvalid(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorInfo::new(ErrorCode::ManifestInvalid, msg),
            ),
            Self::ManifestUnverified { missing } => (
                StatusCode::BAD_REQUEST,
                ErrorInfo::new(
                    ErrorCode::ManifestUnverified,
                    "manifest references layers unknown to this repository",
                )
                .with_detail(json!({
                    "missing": missing.iter().map(|d| d.to_string()).collect::<Vec<_>>()
                })),
            ),
            Self::Unauthorized { .. } => (
                StatusCode::UNAUTHORIZED,
                ErrorInfo::new(ErrorCode::Unauthorized, "access to the resource is not authorized"),
            ),
            Self::RangeNotSatisfiable { .. } | Self::Driver(_) | Self::Io(_) | Self::Axum(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorInfo::new(ErrorCode::Unknown, "an internal error occurred"),
            ),
        }
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        // 416 carries the authoritative range instead of an error body.
        if let Self::RangeNotSatisfiable { name, uuid, offset } = &self {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(LOCATION, format!("/v2/{name}/blobs/uploads/{uuid}"))
                .header(RANGE, format!("0-{}", offset.saturating_sub(1)))
                .header(CONTENT_LENGTH, "0")
                .header("Docker-Upload-UUID", uuid.as_str())
                .body(Body::empty())
                .unwrap();
        }

        match &self {
            Self::Driver(_) | Self::Io(_) | Self::Axum(_) => {
                tracing::error!(error = %self, "internal server error");
            }
            _ => tracing::debug!(error = %self, "request failed"),
        }

        let challenge = match &self {
            Self::Unauthorized { challenge } => challenge.clone(),
            _ => None,
        };

        let (status, info) = self.error_info();
        let mut response = (status, Json(ErrorEnvelope::single(info))).into_response();
        if let Some(challenge) = challenge
            && let Ok(value) = challenge.parse()
        {
            response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
        response
    }
}

/// Maps a driver-layer "not found" into the semantic not-found of the
/// calling layer, passing other driver errors through.
pub trait NotFoundExt<T> {
    fn or_not_found(self, err: RegistryError) -> Result<T, RegistryError>;
}

impl<T> NotFoundExt<T> for Result<T, DriverError> {
    fn or_not_found(self, err: RegistryError) -> Result<T, RegistryError> {
        self.map_err(|e| {
            if e.is_not_found() {
                err
            } else {
                RegistryError::Driver(e)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Algorithm;

    #[test]
    fn error_codes_serialize_screaming() {
        let json = serde_json::to_string(&ErrorCode::ManifestUnverified).unwrap();
        assert_eq!(json, "\"MANIFEST_UNVERIFIED\"");
        let json = serde_json::to_string(&ErrorCode::BlobUploadUnknown).unwrap();
        assert_eq!(json, "\"BLOB_UPLOAD_UNKNOWN\"");
    }

    #[test]
    fn envelope_shape() {
        let env = ErrorEnvelope::single(
            ErrorInfo::new(ErrorCode::BlobUnknown, "blob unknown")
                .with_detail(json!({"digest": "sha256:abc"})),
        );
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["errors"][0]["code"], "BLOB_UNKNOWN");
        assert_eq!(value["errors"][0]["detail"]["digest"], "sha256:abc");
    }

    #[test]
    fn unverified_lists_missing_digests() {
        let d = Digest::from_bytes(Algorithm::Sha256, b"missing");
        let err = RegistryError::ManifestUnverified {
            missing: vec![d.clone()],
        };
        let (status, info) = err.error_info();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            info.detail.unwrap()["missing"][0],
            serde_json::Value::String(d.to_string())
        );
    }

    #[test]
    fn driver_errors_do_not_leak_paths() {
        let err = RegistryError::Driver(DriverError::PathNotFound("/blobs/secret".into()));
        let (status, info) = err.error_info();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!info.message.contains("/blobs"));
        assert!(info.detail.is_none());
    }
}

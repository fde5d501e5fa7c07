//! Blob and upload handlers: content-addressed reads plus the resumable
//! chunked upload flow (start, append, status, finalize, cancel).

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use axum::http::{HeaderMap, Response, StatusCode};
use axum::response::IntoResponse;
use futures::TryStreamExt;
use tokio::io;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::digest::Digest;
use crate::error::RegistryError;
use crate::utils::state::AppState;
use crate::utils::validation::{is_valid_name, parse_range};

const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";
const DOCKER_UPLOAD_UUID: &str = "Docker-Upload-UUID";

fn check_name(name: &str) -> Result<(), RegistryError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(RegistryError::NameInvalid(name.to_string()))
    }
}

/// GET /v2/<name>/blobs/<digest>
pub async fn get_blob_handler(
    State(state): State<Arc<AppState>>,
    Path((name, digest)): Path<(String, String)>,
) -> Result<impl IntoResponse, RegistryError> {
    check_name(&name)?;
    let digest = Digest::parse(&digest)?;

    let (info, reader) = state.layers.open(&name, &digest).await?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_LENGTH, info.size)
        .header(DOCKER_CONTENT_DIGEST, digest.to_string())
        .body(Body::from_stream(ReaderStream::new(reader)))
        .unwrap())
}

/// HEAD /v2/<name>/blobs/<digest>
pub async fn head_blob_handler(
    State(state): State<Arc<AppState>>,
    Path((name, digest)): Path<(String, String)>,
) -> Result<impl IntoResponse, RegistryError> {
    check_name(&name)?;
    let digest = Digest::parse(&digest)?;

    if !state.layers.exists(&name, &digest).await? {
        return Err(RegistryError::BlobUnknown(digest));
    }
    let info = state.layers.blobs().stat(&digest).await?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(CONTENT_LENGTH, info.size)
        .header(DOCKER_CONTENT_DIGEST, digest.to_string())
        .body(Body::empty())
        .unwrap())
}

/// POST /v2/<name>/blobs/uploads/
///
/// Allocates a server-side upload session and points the client at it.
pub async fn post_upload_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, RegistryError> {
    check_name(&name)?;
    if params.contains_key("digest") {
        return Err(RegistryError::BlobUploadInvalid(
            "single-request upload is not supported; finish the session with PUT".to_string(),
        ));
    }

    let session = state.layers.start_upload(&name).await?;
    Ok(Response::builder()
        .status(StatusCode::ACCEPTED)
        .header(LOCATION, state.urls.upload_url(&name, session.uuid()))
        .header(RANGE, "0-0")
        .header(CONTENT_LENGTH, 0)
        .header(DOCKER_UPLOAD_UUID, session.uuid())
        .body(Body::empty())
        .unwrap())
}

/// PATCH /v2/<name>/blobs/uploads/<uuid>
///
/// Appends a chunk at the current offset. A `Content-Range` that does not
/// start at the server's offset is answered with 416 and the authoritative
/// range; the session stays open.
pub async fn patch_upload_handler(
    State(state): State<Arc<AppState>>,
    Path((name, uuid)): Path<(String, String)>,
    headers: HeaderMap,
    request: Request,
) -> Result<impl IntoResponse, RegistryError> {
    check_name(&name)?;
    let mut session = state.layers.resume(&name, &uuid).await?;

    if let Some(range) = headers.get(CONTENT_RANGE) {
        let range = range
            .to_str()
            .ok()
            .and_then(parse_range)
            .ok_or_else(|| {
                RegistryError::BlobUploadInvalid("malformed Content-Range header".to_string())
            })?;
        if range.0 != session.offset() {
            return Err(RegistryError::RangeNotSatisfiable {
                name,
                uuid,
                offset: session.offset(),
            });
        }
    }

    let stream = request.into_body().into_data_stream().map_err(io::Error::other);
    let mut reader = StreamReader::new(stream);
    let offset = session.append(&mut reader).await?;

    Ok(Response::builder()
        .status(StatusCode::ACCEPTED)
        .header(LOCATION, state.urls.upload_url(&name, &uuid))
        .header(RANGE, format!("0-{}", offset.saturating_sub(1)))
        .header(CONTENT_LENGTH, 0)
        .header(DOCKER_UPLOAD_UUID, uuid.as_str())
        .body(Body::empty())
        .unwrap())
}

/// PUT /v2/<name>/blobs/uploads/<uuid>?digest=<digest>[&size=<n>]
///
/// Streams an optional final chunk, then verifies and commits the upload
/// into the blob store.
pub async fn put_upload_handler(
    State(state): State<Arc<AppState>>,
    Path((name, uuid)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    request: Request,
) -> Result<impl IntoResponse, RegistryError> {
    check_name(&name)?;
    let digest = params.get("digest").ok_or_else(|| {
        RegistryError::BlobUploadInvalid("digest parameter is required to finish an upload".to_string())
    })?;
    let digest = Digest::parse(digest)?;
    let size = match params.get("size") {
        Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
            RegistryError::BlobUploadInvalid("malformed size parameter".to_string())
        })?),
        None => None,
    };

    let mut session = state.layers.resume(&name, &uuid).await?;
    let stream = request.into_body().into_data_stream().map_err(io::Error::other);
    let mut reader = StreamReader::new(stream);
    session.append(&mut reader).await?;

    state.layers.finish(session, size, &digest).await?;

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header(LOCATION, state.urls.blob_url(&name, &digest))
        .header(CONTENT_LENGTH, 0)
        .header(DOCKER_CONTENT_DIGEST, digest.to_string())
        .body(Body::empty())
        .unwrap())
}

/// GET or HEAD /v2/<name>/blobs/uploads/<uuid>
///
/// Reports the current confirmed offset so a client can resume.
pub async fn get_upload_status_handler(
    State(state): State<Arc<AppState>>,
    Path((name, uuid)): Path<(String, String)>,
) -> Result<impl IntoResponse, RegistryError> {
    check_name(&name)?;
    let session = state.layers.resume(&name, &uuid).await?;

    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(LOCATION, state.urls.upload_url(&name, &uuid))
        .header(RANGE, format!("0-{}", session.offset().saturating_sub(1)))
        .header(CONTENT_LENGTH, 0)
        .header(DOCKER_UPLOAD_UUID, uuid.as_str())
        .body(Body::empty())
        .unwrap())
}

/// DELETE /v2/<name>/blobs/uploads/<uuid>
pub async fn delete_upload_handler(
    State(state): State<Arc<AppState>>,
    Path((name, uuid)): Path<(String, String)>,
) -> Result<impl IntoResponse, RegistryError> {
    check_name(&name)?;
    let session = state.layers.resume(&name, &uuid).await?;
    session.cancel().await?;
    Ok(StatusCode::NO_CONTENT)
}

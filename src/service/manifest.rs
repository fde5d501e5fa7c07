//! Manifest and tag handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, LINK, LOCATION};
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use serde::Serialize;

use crate::digest::Digest;
use crate::error::RegistryError;
use crate::manifest::{MANIFEST_MEDIA_TYPE, SignedManifest};
use crate::utils::state::AppState;
use crate::utils::validation::{is_valid_digest, is_valid_name, is_valid_reference};

const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

#[derive(Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

fn check_name(name: &str) -> Result<(), RegistryError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(RegistryError::NameInvalid(name.to_string()))
    }
}

fn check_reference(reference: &str) -> Result<(), RegistryError> {
    if is_valid_reference(reference) {
        Ok(())
    } else {
        Err(RegistryError::TagInvalid(reference.to_string()))
    }
}

async fn fetch(
    state: &AppState,
    name: &str,
    reference: &str,
) -> Result<(Digest, Vec<u8>), RegistryError> {
    if is_valid_digest(reference) {
        let digest = Digest::parse(reference)?;
        let raw = state.manifests.get_by_digest(name, &digest).await?;
        Ok((digest, raw))
    } else {
        state.manifests.get(name, reference).await
    }
}

/// GET /v2/<name>/manifests/<reference>
///
/// `reference` is a tag or a digest. The stored bytes are returned as-is;
/// clients verify the embedded signature themselves.
pub async fn get_manifest_handler(
    State(state): State<Arc<AppState>>,
    Path((name, reference)): Path<(String, String)>,
) -> Result<impl IntoResponse, RegistryError> {
    check_name(&name)?;
    check_reference(&reference)?;

    let (digest, raw) = fetch(&state, &name, &reference).await?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, MANIFEST_MEDIA_TYPE)
        .header(CONTENT_LENGTH, raw.len())
        .header(DOCKER_CONTENT_DIGEST, digest.to_string())
        .body(Body::from(raw))
        .unwrap())
}

/// HEAD /v2/<name>/manifests/<reference>
pub async fn head_manifest_handler(
    State(state): State<Arc<AppState>>,
    Path((name, reference)): Path<(String, String)>,
) -> Result<impl IntoResponse, RegistryError> {
    check_name(&name)?;
    check_reference(&reference)?;

    let (digest, raw) = fetch(&state, &name, &reference).await?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, MANIFEST_MEDIA_TYPE)
        .header(CONTENT_LENGTH, raw.len())
        .header(DOCKER_CONTENT_DIGEST, digest.to_string())
        .body(Body::empty())
        .unwrap())
}

/// PUT /v2/<name>/manifests/<reference>
pub async fn put_manifest_handler(
    State(state): State<Arc<AppState>>,
    Path((name, reference)): Path<(String, String)>,
    request: Request,
) -> Result<impl IntoResponse, RegistryError> {
    check_name(&name)?;
    check_reference(&reference)?;

    let raw = axum::body::to_bytes(request.into_body(), usize::MAX).await?;
    let manifest = SignedManifest::parse(&raw)?;
    if manifest.name != name {
        return Err(RegistryError::ManifestInvalid(format!(
            "manifest name {} does not match repository {}",
            manifest.name, name
        )));
    }

    // pushed by digest, the reference must match the canonical payload
    let tag = if is_valid_digest(&reference) {
        let declared = Digest::parse(&reference)?;
        if declared != manifest.digest(&raw)? {
            return Err(RegistryError::DigestInvalid(
                "provided digest does not match manifest payload".to_string(),
            ));
        }
        manifest.tag.clone()
    } else {
        reference.clone()
    };

    let digest = state.manifests.put(&name, &tag, &raw).await?;
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header(LOCATION, state.urls.manifest_url(&name, &digest.to_string()))
        .header(CONTENT_LENGTH, 0)
        .header(DOCKER_CONTENT_DIGEST, digest.to_string())
        .body(Body::empty())
        .unwrap())
}

/// DELETE /v2/<name>/manifests/<reference>
///
/// Removes the tag pointer; revisions stay addressable by digest.
pub async fn delete_manifest_handler(
    State(state): State<Arc<AppState>>,
    Path((name, reference)): Path<(String, String)>,
) -> Result<impl IntoResponse, RegistryError> {
    check_name(&name)?;
    check_reference(&reference)?;

    if is_valid_digest(&reference) {
        return Err(RegistryError::ManifestInvalid(
            "manifests are deleted by tag; revisions are immutable".to_string(),
        ));
    }
    state.manifests.delete_tag(&name, &reference).await?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /v2/<name>/tags/list
///
/// Optional pagination: `?n=<limit>&last=<tag>`, continued through an
/// RFC 5988 `Link` header.
pub async fn get_tag_list_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, RegistryError> {
    check_name(&name)?;

    let mut tags = state.manifests.tags(&name).await?;

    if let Some(last) = params.get("last") {
        match tags.iter().position(|t| t == last) {
            Some(index) => {
                tags = tags.split_off(index + 1);
            }
            None => tags.clear(),
        }
    }

    let mut next_link = None;
    if let Some(n) = params.get("n") {
        let n: usize = n
            .parse()
            .map_err(|_| RegistryError::TagInvalid(format!("bad page size: {n}")))?;
        if n > 0 && tags.len() > n {
            tags.truncate(n);
            let last = tags[n - 1].clone();
            next_link = Some(format!(
                "<{}?n={}&last={}>; rel=\"next\"",
                state.urls.tags_url(&name),
                n,
                last
            ));
        }
    }

    let body = serde_json::to_string(&TagList { name, tags })
        .map_err(|e| RegistryError::Io(std::io::Error::other(e)))?;
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .header(CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap();
    if let Some(link) = next_link
        && let Ok(value) = link.parse()
    {
        response.headers_mut().insert(LINK, value);
    }
    Ok(response)
}

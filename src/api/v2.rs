//! v2 protocol routing. Repository names contain slashes, so the routes
//! cannot be expressed as fixed path templates; the sub-router captures
//! the whole tail and dispatches on its segment shape.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};

use crate::error::RegistryError;
use crate::service::blob::{
    delete_upload_handler, get_blob_handler, get_upload_status_handler, head_blob_handler,
    patch_upload_handler, post_upload_handler, put_upload_handler,
};
use crate::service::manifest::{
    delete_manifest_handler, get_manifest_handler, get_tag_list_handler, head_manifest_handler,
    put_manifest_handler,
};
use crate::utils::state::AppState;

pub fn create_v2_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(probe))
        .route("/{*tail}", any(dispatch_handler))
}

/// GET /v2/ — version probe. Reachable means 200 with an empty JSON body;
/// the access middleware turns refusals into a 401 challenge first.
async fn probe() -> impl IntoResponse {
    const EMPTY_JSON: &str = "{}";
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .header(CONTENT_LENGTH, EMPTY_JSON.len())
        .body(Body::from(EMPTY_JSON))
        .unwrap()
}

async fn dispatch_handler(
    State(state): State<Arc<AppState>>,
    Path(tail): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    request: Request,
) -> Result<Response, RegistryError> {
    let method = request.method().clone();
    let segments: Vec<&str> = tail.split('/').collect();

    match segments.as_slice() {
        // tail: {name}/manifests/{reference}
        [name @ .., "manifests", reference] if !name.is_empty() => {
            let path = Path((name.join("/"), reference.to_string()));
            match method {
                Method::GET => get_manifest_handler(State(state), path)
                    .await
                    .map(IntoResponse::into_response),
                Method::HEAD => head_manifest_handler(State(state), path)
                    .await
                    .map(IntoResponse::into_response),
                Method::PUT => put_manifest_handler(State(state), path, request)
                    .await
                    .map(IntoResponse::into_response),
                Method::DELETE => delete_manifest_handler(State(state), path)
                    .await
                    .map(IntoResponse::into_response),
                _ => Ok(method_not_allowed()),
            }
        }
        // tail: {name}/tags/list
        [name @ .., "tags", "list"] if !name.is_empty() => {
            if method == Method::GET {
                get_tag_list_handler(State(state), Path(name.join("/")), Query(params))
                    .await
                    .map(IntoResponse::into_response)
            } else {
                Ok(method_not_allowed())
            }
        }
        // tail: {name}/blobs/uploads/ (trailing slash yields an empty last segment)
        [name @ .., "blobs", "uploads", uuid] if !name.is_empty() && uuid.is_empty() => {
            if method == Method::POST {
                post_upload_handler(State(state), Path(name.join("/")), Query(params))
                    .await
                    .map(IntoResponse::into_response)
            } else {
                Ok(method_not_allowed())
            }
        }
        // tail: {name}/blobs/uploads/{uuid}
        [name @ .., "blobs", "uploads", uuid] if !name.is_empty() => {
            let path = Path((name.join("/"), uuid.to_string()));
            match method {
                Method::GET | Method::HEAD => get_upload_status_handler(State(state), path)
                    .await
                    .map(IntoResponse::into_response),
                Method::PATCH => patch_upload_handler(State(state), path, headers, request)
                    .await
                    .map(IntoResponse::into_response),
                Method::PUT => put_upload_handler(State(state), path, Query(params), request)
                    .await
                    .map(IntoResponse::into_response),
                Method::DELETE => delete_upload_handler(State(state), path)
                    .await
                    .map(IntoResponse::into_response),
                _ => Ok(method_not_allowed()),
            }
        }
        // tail: {name}/blobs/{digest}
        [name @ .., "blobs", digest] if !name.is_empty() && *digest != "uploads" => {
            let path = Path((name.join("/"), digest.to_string()));
            match method {
                Method::GET => get_blob_handler(State(state), path)
                    .await
                    .map(IntoResponse::into_response),
                Method::HEAD => head_blob_handler(State(state), path)
                    .await
                    .map(IntoResponse::into_response),
                _ => Ok(method_not_allowed()),
            }
        }
        _ => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

fn method_not_allowed() -> Response {
    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

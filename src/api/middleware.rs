use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;

use crate::auth::Access;
use crate::error::RegistryError;
use crate::utils::state::AppState;

/// Consults the access controller before every handler. On refusal the
/// challenge is surfaced as a 401 with `WWW-Authenticate`.
pub async fn check_access(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, RegistryError> {
    let access = access_for(request.method(), request.uri().path());
    match state.access.authorized(request.headers(), &access).await {
        Ok(()) => Ok(next.run(request).await),
        Err(challenge) => Err(RegistryError::Unauthorized {
            challenge: Some(challenge.header_value()),
        }),
    }
}

/// Derives the requested access from the route: repository name from the
/// path shape, pull for reads, push for mutations.
fn access_for(method: &Method, path: &str) -> Access {
    let (pull, push) = match *method {
        Method::GET | Method::HEAD => (true, false),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE => (false, true),
        _ => (false, false),
    };
    Access {
        repository: extract_repository(path),
        pull,
        push,
    }
}

fn extract_repository(path: &str) -> Option<String> {
    let tail = path.strip_prefix("/v2/")?;
    let segments: Vec<&str> = tail.split('/').collect();
    match segments.as_slice() {
        [name @ .., "manifests", _reference] if !name.is_empty() => Some(name.join("/")),
        [name @ .., "blobs", digest] if !name.is_empty() && *digest != "uploads" => {
            Some(name.join("/"))
        }
        [name @ .., "blobs", "uploads", _] if !name.is_empty() => Some(name.join("/")),
        [name @ .., "tags", "list"] if !name.is_empty() => Some(name.join("/")),
        _ => None,
    }
}

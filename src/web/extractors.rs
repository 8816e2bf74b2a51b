//! Axum extractors and middleware guarding the control surface per §6: every
//! non-public route requires `X-Internal-Token`; `/admin/*` additionally requires an
//! admin bearer token. `X-Owner-Id` is optional and scopes listing/cancel/link calls.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;

use crate::app_state::AppState;
use crate::web::error::{ApiError, ApiErrorCode};

/// The caller-supplied owner id, if `X-Owner-Id` was present. Absence scopes listing
/// calls to "all" (the admin view) per §6.
#[derive(Debug, Clone, Default)]
pub struct OwnerId(pub Option<String>);

impl OwnerId {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self(
            headers
                .get("x-owner-id")
                .and_then(|v| v.to_str().ok())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
        )
    }
}

impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

fn unauthorized(message: &str) -> ApiError {
    ApiError {
        code: ApiErrorCode::Unauthorized,
        message: message.to_string(),
        step: None,
        status: None,
    }
}

fn forbidden(message: &str) -> ApiError {
    ApiError {
        code: ApiErrorCode::Forbidden,
        message: message.to_string(),
        step: None,
        status: None,
    }
}

/// Rejects any request missing or mismatching `X-Internal-Token`.
pub async fn require_internal_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = request
        .headers()
        .get("x-internal-token")
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(token) if token == state.config.internal_token => Ok(next.run(request).await),
        _ => Err(unauthorized("missing or invalid X-Internal-Token")),
    }
}

/// Rejects any `/admin/*` request missing or mismatching the configured admin bearer
/// token, checked in addition to [`require_internal_token`].
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == state.config.admin_token => Ok(next.run(request).await),
        _ => Err(forbidden("missing or invalid admin bearer token")),
    }
}

/// Maps a missing `X-Owner-Id` to an unauthorized error for routes that require it
/// (credential link/status/unlink; an owner id is mandatory to scope those).
pub fn require_owner(owner: &OwnerId) -> Result<&str, ApiError> {
    owner
        .0
        .as_deref()
        .ok_or_else(|| unauthorized("X-Owner-Id header is required for this operation"))
}

//! Standardized API error responses, mapping [`AppError`](crate::error::AppError)'s
//! kinds onto the HTTP status codes documented in the control surface's error
//! taxonomy.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApiErrorCode {
    InvalidInput,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    WafBlocked,
    Network,
    Internal,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: ApiErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self.code {
            ApiErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ApiErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::Conflict => StatusCode::CONFLICT,
            ApiErrorCode::WafBlocked => StatusCode::SERVICE_UNAVAILABLE,
            ApiErrorCode::Network | ApiErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        match e {
            AppError::InvalidInput(message) => ApiError {
                code: ApiErrorCode::InvalidInput,
                message,
                step: None,
                status: None,
            },
            AppError::Unauthorized(message) => ApiError {
                code: ApiErrorCode::Unauthorized,
                message,
                step: None,
                status: None,
            },
            AppError::Forbidden(message) => ApiError {
                code: ApiErrorCode::Forbidden,
                message,
                step: None,
                status: None,
            },
            AppError::NotFound(message) => ApiError {
                code: ApiErrorCode::NotFound,
                message,
                step: None,
                status: None,
            },
            AppError::WafBlocked(message) => ApiError {
                code: ApiErrorCode::WafBlocked,
                message,
                step: None,
                status: None,
            },
            AppError::Network { step, status, message } => ApiError {
                code: ApiErrorCode::Network,
                message,
                step: Some(format!("{step:?}").to_lowercase()),
                status,
            },
            AppError::Internal(message) => ApiError {
                code: ApiErrorCode::Internal,
                message,
                step: None,
                status: None,
            },
        }
    }
}

impl From<crate::upstream::UpstreamError> for AppError {
    fn from(e: crate::upstream::UpstreamError) -> Self {
        use crate::upstream::UpstreamError as U;
        match e {
            U::LoginWrong => AppError::Unauthorized("login credentials rejected".to_string()),
            U::NoPaymentInfo => AppError::InvalidInput("no payment method on file".to_string()),
            // Neither kind is a transport failure; both are resolved absences of a
            // bookable offer, so they surface as not-found rather than network/500.
            U::NoOffer => AppError::NotFound("no offer available for this venue".to_string()),
            U::NoTable => AppError::NotFound("no table available matching the request".to_string()),
            U::WafBlocked => AppError::WafBlocked("blocked by WAF challenge after exhausting retry budget".to_string()),
            U::Network { step, status, message } => AppError::Network { step, status, message },
        }
    }
}

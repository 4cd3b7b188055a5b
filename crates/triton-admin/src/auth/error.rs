//! Authentication errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Authentication errors.
///
/// Every verifier-specific failure is normalized into one of these before it
/// reaches the request layer. Messages are fixed strings so upstream protocol
/// detail is never echoed to a client.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Identity source rejected the username/password pair.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Credentials were accepted but no matching user entry exists.
    #[error("user not found")]
    UserNotFound,

    /// Directory bind or search failed for a reason other than bad credentials.
    #[error("directory error")]
    DirectoryError,

    /// Identity source could not be reached or did not answer in time.
    #[error("authentication service unavailable")]
    ServiceUnavailable,

    /// No authorization header on a protected request.
    #[error("missing authorization header")]
    MissingToken,

    /// Authorization header present but not a bearer credential.
    #[error("invalid authorization header format")]
    InvalidAuthHeader,

    /// Token signature, structure or claims are invalid.
    #[error("invalid token")]
    InvalidToken,

    /// Token expired.
    #[error("token expired")]
    TokenExpired,

    /// Caller lacks the role a route requires.
    #[error("forbidden: {0} role required")]
    Forbidden(String),

    /// Internal error.
    #[error("internal auth error")]
    Internal(String),
}

impl AuthError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::UserNotFound
            | AuthError::DirectoryError
            | AuthError::MissingToken
            | AuthError::InvalidAuthHeader
            | AuthError::InvalidToken
            | AuthError::TokenExpired => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuthError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::UserNotFound => "user_not_found",
            AuthError::DirectoryError => "directory_error",
            AuthError::ServiceUnavailable => "service_unavailable",
            AuthError::MissingToken => "missing_token",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::InvalidToken => "invalid_token",
            AuthError::TokenExpired => "token_expired",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::Internal(_) => "internal_error",
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct AuthErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let AuthError::Internal(detail) = &self {
            tracing::error!(detail = %detail, "internal authentication error");
        }

        let body = Json(AuthErrorResponse {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });

        (status, body).into_response()
    }
}

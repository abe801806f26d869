//! Structured API error responses with error codes
//!
//! Every gateway rejection and handler failure is rendered through
//! [`ApiError`] so clients get one machine-readable envelope.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;

// ============================================================================
// Error Codes
// ============================================================================

/// Error codes for API responses
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication errors (1xxx)
    /// No usable session or credential
    AuthRequired,
    /// Client secret header missing on a protected route
    ClientSecretRequired,
    /// Client secret not recognised
    InvalidClientSecret,
    /// Refresh token missing or invalid
    InvalidToken,
    /// Caller is known but lacks the required role
    InsufficientPermissions,

    // Rate limiting errors (2xxx)
    /// Too many requests, rate limit exceeded
    RateLimitExceeded,

    // Validation errors (3xxx)
    /// Request body is malformed
    InvalidRequestBody,

    // Resource errors (4xxx)
    /// No route behind the gateway matched
    ResourceNotFound,

    // Infrastructure errors (8xxx)
    /// Credential store or verifier failed
    VerificationFailed,
    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn numeric_code(&self) -> u32 {
        match self {
            ErrorCode::AuthRequired => 1001,
            ErrorCode::ClientSecretRequired => 1002,
            ErrorCode::InvalidClientSecret => 1003,
            ErrorCode::InvalidToken => 1004,
            ErrorCode::InsufficientPermissions => 1005,

            ErrorCode::RateLimitExceeded => 2001,

            ErrorCode::InvalidRequestBody => 3001,

            ErrorCode::ResourceNotFound => 4001,

            ErrorCode::VerificationFailed => 8001,
            ErrorCode::InternalError => 8999,
        }
    }

    /// Get the HTTP status code for this error
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::AuthRequired
            | ErrorCode::ClientSecretRequired
            | ErrorCode::InvalidClientSecret
            | ErrorCode::InvalidToken => StatusCode::UNAUTHORIZED,
            ErrorCode::InsufficientPermissions => StatusCode::FORBIDDEN,
            ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InvalidRequestBody => StatusCode::BAD_REQUEST,
            ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,
            ErrorCode::VerificationFailed | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code_str = match self {
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::ClientSecretRequired => "CLIENT_SECRET_REQUIRED",
            ErrorCode::InvalidClientSecret => "INVALID_CLIENT_SECRET",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::InvalidRequestBody => "INVALID_REQUEST_BODY",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::VerificationFailed => "VERIFICATION_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", code_str)
    }
}

// ============================================================================
// Structured Error Response
// ============================================================================

/// Structured error response for API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error details
    pub error: ErrorDetails,
}

/// Detailed error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code for easy categorization
    pub numeric_code: u32,

    /// Human-readable error message
    pub message: String,

    /// Retry information for rate limiting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ApiError {
    /// Create a new API error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                numeric_code: code.numeric_code(),
                message: message.into(),
                retry_after: None,
            },
        }
    }

    /// Set retry-after seconds (for rate limiting)
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.error.retry_after = Some(seconds);
        self
    }

    /// Get the HTTP status code
    pub fn status(&self) -> StatusCode {
        self.error.code.http_status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code_str = self.error.code.to_string();
        let retry_after = self.error.retry_after;
        let mut response = (status, Json(self)).into_response();

        // Add error code header for easier debugging
        if let Ok(code_value) = HeaderValue::from_str(&code_str) {
            response.headers_mut().insert(
                axum::http::header::HeaderName::from_static("x-error-code"),
                code_value,
            );
        }
        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, HeaderValue::from(seconds));
        }

        response
    }
}

// ============================================================================
// Conversion from AuthError
// ============================================================================

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let message = err.public_message();
        match err {
            // Missing and invalid credentials are indistinguishable to the caller
            AuthError::MissingCredential | AuthError::InvalidCredential => {
                ApiError::new(ErrorCode::AuthRequired, message)
            }
            AuthError::MissingClientSecret => {
                ApiError::new(ErrorCode::ClientSecretRequired, message)
            }
            AuthError::InvalidClientSecret => {
                ApiError::new(ErrorCode::InvalidClientSecret, message)
            }
            AuthError::VerificationFailed => ApiError::new(ErrorCode::VerificationFailed, message),
            AuthError::RateLimited { retry_after_secs } => {
                let error = ApiError::new(ErrorCode::RateLimitExceeded, message);
                match retry_after_secs {
                    Some(seconds) => error.with_retry_after(seconds),
                    None => error,
                }
            }
            AuthError::Forbidden => ApiError::new(ErrorCode::InsufficientPermissions, message),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Create an invalid token error
pub fn invalid_token() -> ApiError {
    ApiError::new(ErrorCode::InvalidToken, "Invalid or expired session")
}

/// Create an invalid request body error
pub fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::InvalidRequestBody, message.into())
}

/// Create a not found error
pub fn not_found(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::ResourceNotFound, message.into())
}

/// Create an internal error
pub fn internal_error(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::InternalError, message.into())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numeric() {
        assert_eq!(ErrorCode::AuthRequired.numeric_code(), 1001);
        assert_eq!(ErrorCode::RateLimitExceeded.numeric_code(), 2001);
        assert_eq!(ErrorCode::InvalidRequestBody.numeric_code(), 3001);
        assert_eq!(ErrorCode::InternalError.numeric_code(), 8999);
    }

    #[test]
    fn test_auth_error_mapping() {
        let missing = ApiError::from(AuthError::MissingCredential);
        let invalid = ApiError::from(AuthError::InvalidCredential);
        assert_eq!(missing.error.code, invalid.error.code);
        assert_eq!(missing.error.message, invalid.error.message);
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(
            ApiError::from(AuthError::Forbidden).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(AuthError::VerificationFailed).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rate_limit_error() {
        let error = ApiError::from(AuthError::RateLimited {
            retry_after_secs: Some(42),
        });
        assert_eq!(error.error.code, ErrorCode::RateLimitExceeded);
        assert_eq!(error.error.retry_after, Some(42));

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "42");
        assert_eq!(response.headers()["x-error-code"], "RATE_LIMIT_EXCEEDED");
    }

    #[test]
    fn test_error_serialization() {
        let error = ApiError::from(AuthError::InvalidClientSecret);
        let json = serde_json::to_string(&error).unwrap();

        assert!(json.contains("INVALID_CLIENT_SECRET"));
        assert!(json.contains("Invalid client secret"));
        assert!(json.contains("1003"));
        assert!(!json.contains("retry_after"));
    }
}

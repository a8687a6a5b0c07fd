//! Service error taxonomy.
//!
//! Every failure is classified into one of six caller-visible classes and
//! tagged with an internal machine code. The machine code and detail are for
//! server-side logs only; `public_message` is the single place that decides
//! what a caller may see, so distinguishable failures (wrong password vs.
//! unknown email vs. expired token) collapse into indistinguishable
//! responses.

use thiserror::Error;

use crate::db::StoreError;

/// Internal machine codes. Logged with full context, never surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidRequest,
    InvalidToken,
    TokenExpired,
    TokenAlreadyUsed,
    AuthenticationFailed,
    SocialEmailNotVerified,
    ConfigFetchFailed,
    ConfigRejected,
    InvalidRedirectUrl,
    InvalidAccessTokenTtl,
    RegistrationClosed,
    EmailDomainNotAllowed,
    PasswordAlreadySet,
    SecretCorrupted,
    RateLimitExceeded,
    StorageFailure,
    EmailDispatchFailed,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::TokenAlreadyUsed => "TOKEN_ALREADY_USED",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::SocialEmailNotVerified => "SOCIAL_EMAIL_NOT_VERIFIED",
            ErrorCode::ConfigFetchFailed => "CONFIG_FETCH_FAILED",
            ErrorCode::ConfigRejected => "CONFIG_REJECTED",
            ErrorCode::InvalidRedirectUrl => "INVALID_REDIRECT_URL",
            ErrorCode::InvalidAccessTokenTtl => "INVALID_ACCESS_TOKEN_TTL",
            ErrorCode::RegistrationClosed => "REGISTRATION_CLOSED",
            ErrorCode::EmailDomainNotAllowed => "EMAIL_DOMAIN_NOT_ALLOWED",
            ErrorCode::PasswordAlreadySet => "PASSWORD_ALREADY_SET",
            ErrorCode::SecretCorrupted => "SECRET_CORRUPTED",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::StorageFailure => "STORAGE_FAILURE",
            ErrorCode::EmailDispatchFailed => "EMAIL_DISPATCH_FAILED",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("bad request [{0}]: {1}")]
    BadRequest(ErrorCode, String),

    #[error("unauthorized [{0}]: {1}")]
    Unauthorized(ErrorCode, String),

    #[error("forbidden [{0}]: {1}")]
    Forbidden(ErrorCode, String),

    #[error("not found [{0}]: {1}")]
    NotFound(ErrorCode, String),

    #[error("rate limited [{0}]: {1}")]
    RateLimited(ErrorCode, String),

    #[error("internal [{0}]: {1}")]
    Internal(ErrorCode, String),
}

impl ServiceError {
    /// The undifferentiated primary/2FA authentication failure.
    pub fn authentication_failed(detail: impl Into<String>) -> Self {
        ServiceError::Unauthorized(ErrorCode::AuthenticationFailed, detail.into())
    }

    /// Generic config rejection. The detail is logged; callers see one
    /// message no matter which check failed.
    pub fn config_rejected(detail: impl Into<String>) -> Self {
        ServiceError::BadRequest(ErrorCode::ConfigRejected, detail.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::BadRequest(code, _)
            | ServiceError::Unauthorized(code, _)
            | ServiceError::Forbidden(code, _)
            | ServiceError::NotFound(code, _)
            | ServiceError::RateLimited(code, _)
            | ServiceError::Internal(code, _) => *code,
        }
    }

    /// The centralized taxonomy-to-caller-message boundary. One generic
    /// message per class; nothing else about the failure leaks out.
    pub fn public_message(&self) -> &'static str {
        match self {
            ServiceError::BadRequest(..) => "Invalid request.",
            ServiceError::Unauthorized(..) => "Authentication failed.",
            ServiceError::Forbidden(..) => "Access denied.",
            ServiceError::NotFound(..) => "Not found.",
            ServiceError::RateLimited(..) => "Too many requests. Please try again later.",
            ServiceError::Internal(..) => "An unexpected error occurred.",
        }
    }

    /// Log the full internal context at the boundary, then hand back the
    /// caller-visible message.
    pub fn log_and_public_message(&self) -> &'static str {
        match self {
            ServiceError::Internal(code, detail) => {
                tracing::error!(code = %code, detail = %detail, "request failed");
            }
            other => {
                tracing::warn!(code = %other.code(), error = %other, "request rejected");
            }
        }
        self.public_message()
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TokenNotFound => {
                ServiceError::BadRequest(ErrorCode::InvalidToken, "no matching token".into())
            }
            StoreError::TokenExpired => {
                ServiceError::BadRequest(ErrorCode::TokenExpired, "token expired".into())
            }
            StoreError::TokenAlreadyUsed => ServiceError::BadRequest(
                ErrorCode::TokenAlreadyUsed,
                "token was already consumed".into(),
            ),
            StoreError::PasswordAlreadySet => ServiceError::BadRequest(
                ErrorCode::PasswordAlreadySet,
                "account already has a password; password reset required".into(),
            ),
            StoreError::UniqueViolation { constraint } => ServiceError::Internal(
                ErrorCode::StorageFailure,
                format!("unexpected unique violation: {constraint}"),
            ),
            StoreError::Backend(err) => {
                ServiceError::Internal(ErrorCode::StorageFailure, err.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::Internal(ErrorCode::Internal, err.to_string())
    }
}

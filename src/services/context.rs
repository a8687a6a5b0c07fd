//! Typed request context and auth-header parsing.
//!
//! The routing layer (out of scope here) verifies the config once per
//! request and threads an [`AuthContext`] value through instead of
//! attaching ad hoc fields to its request object.

use crate::error::{ErrorCode, ServiceError};
use crate::models::ClientConfig;
use crate::services::client_id::verify_client_id;
use crate::services::tokens::AccessTokenClaims;

/// Header carrying the user-scoped access token.
pub const ACCESS_TOKEN_HEADER: &str = "x-uoa-access-token";

/// Everything later pipeline stages need to know about the caller.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub config: ClientConfig,
    pub config_url: String,
    /// Present once a user-scoped access token was verified.
    pub claims: Option<AccessTokenClaims>,
}

impl AuthContext {
    pub fn new(config: ClientConfig, config_url: String) -> Self {
        Self {
            config,
            config_url,
            claims: None,
        }
    }

    pub fn with_claims(mut self, claims: AccessTokenClaims) -> Self {
        self.claims = Some(claims);
        self
    }
}

/// Strip a required `Bearer ` prefix, as used by the domain-scoped
/// `Authorization` header.
pub fn parse_bearer(header_value: &str) -> Option<&str> {
    header_value
        .trim()
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Extract the token from the `x-uoa-access-token` header value; the
/// Bearer prefix is optional there.
pub fn parse_access_token_header(header_value: &str) -> Option<&str> {
    let value = header_value.trim();
    let token = value.strip_prefix("Bearer ").map(str::trim).unwrap_or(value);
    (!token.is_empty()).then_some(token)
}

/// Check a domain-scoped `Authorization: Bearer <client-id-hash>` header.
pub fn authorize_domain_header(
    header_value: &str,
    domain: &str,
    secret: &str,
) -> Result<(), ServiceError> {
    let presented = parse_bearer(header_value).ok_or_else(|| {
        ServiceError::Unauthorized(
            ErrorCode::InvalidToken,
            "authorization header is not a bearer credential".to_string(),
        )
    })?;
    if verify_client_id(presented, domain, secret) {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized(
            ErrorCode::InvalidToken,
            "client id does not match the domain".to_string(),
        ))
    }
}

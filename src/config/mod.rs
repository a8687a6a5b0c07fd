//! Environment-driven service configuration.
//!
//! Everything the engine needs arrives here at process start: the shared
//! signing secret, the service identifier used as token audience, the
//! access-token TTL, provider credentials and rate-limit knobs. Components
//! receive values by injection; nothing reads the environment after
//! construction.

use serde::Deserialize;
use std::env;

use crate::error::{ErrorCode, ServiceError};

/// Access-token TTLs are specified in whole minutes only (`"15m"` to
/// `"60m"`). Anything else, other units included, is rejected outright so a
/// mistyped config can never mint long-lived tokens.
pub const MIN_ACCESS_TTL_MINUTES: i64 = 15;
pub const MAX_ACCESS_TTL_MINUTES: i64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Process-wide shared secret: signs configs and tokens, peppers token
    /// hashes, and seeds the 2FA encryption key. Never rendered anywhere.
    pub shared_secret: String,
    /// This service's identifier; config documents and every issued token
    /// must carry it as audience.
    pub audience: String,
    /// Base URL for links embedded in outbound email.
    pub public_base_url: String,
    pub access_token_ttl_minutes: i64,
    pub database_url: String,
    pub log_level: String,
    pub totp_issuer: String,
    pub smtp: SmtpConfig,
    pub google: GoogleOAuthConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub request_token_attempts: u32,
    pub request_token_window_seconds: u64,
    pub exchange_attempts: u32,
    pub exchange_window_seconds: u64,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ServiceError> {
        dotenvy::dotenv().ok();

        let config = ServiceConfig {
            shared_secret: get_env("UOA_SHARED_SECRET", None)?,
            audience: get_env("UOA_AUDIENCE", Some("uoa"))?,
            public_base_url: get_env("UOA_PUBLIC_BASE_URL", Some("http://localhost:8080"))?,
            access_token_ttl_minutes: parse_access_token_ttl(&get_env(
                "UOA_ACCESS_TOKEN_TTL",
                Some("30m"),
            )?)?,
            database_url: get_env("DATABASE_URL", None)?,
            log_level: get_env("LOG_LEVEL", Some("info"))?,
            totp_issuer: get_env("UOA_TOTP_ISSUER", Some("UOA"))?,
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", None)?,
                port: get_env("SMTP_PORT", Some("587"))?
                    .parse()
                    .map_err(|e: std::num::ParseIntError| {
                        ServiceError::Internal(ErrorCode::Internal, format!("SMTP_PORT: {e}"))
                    })?,
                user: get_env("SMTP_USER", None)?,
                password: get_env("SMTP_PASSWORD", None)?,
                from: get_env("SMTP_FROM", None)?,
            },
            google: GoogleOAuthConfig {
                client_id: get_env("GOOGLE_CLIENT_ID", Some(""))?,
                client_secret: get_env("GOOGLE_CLIENT_SECRET", Some(""))?,
                redirect_uri: get_env("GOOGLE_REDIRECT_URI", Some(""))?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "10")?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900")?,
                request_token_attempts: parse_env("RATE_LIMIT_REQUEST_TOKEN_ATTEMPTS", "5")?,
                request_token_window_seconds: parse_env(
                    "RATE_LIMIT_REQUEST_TOKEN_WINDOW_SECONDS",
                    "3600",
                )?,
                exchange_attempts: parse_env("RATE_LIMIT_EXCHANGE_ATTEMPTS", "30")?,
                exchange_window_seconds: parse_env("RATE_LIMIT_EXCHANGE_WINDOW_SECONDS", "60")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ServiceError> {
        if self.shared_secret.len() < 32 {
            return Err(ServiceError::Internal(
                ErrorCode::Internal,
                "UOA_SHARED_SECRET must be at least 32 characters".to_string(),
            ));
        }
        if self.audience.is_empty() {
            return Err(ServiceError::Internal(
                ErrorCode::Internal,
                "UOA_AUDIENCE must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse the operator-supplied access-token TTL. Whole minutes only,
/// clamped to nothing: out-of-window values are errors, not adjustments.
pub fn parse_access_token_ttl(value: &str) -> Result<i64, ServiceError> {
    let rejected = || {
        ServiceError::BadRequest(
            ErrorCode::InvalidAccessTokenTtl,
            format!(
                "access token ttl {value:?} must be whole minutes between \
                 {MIN_ACCESS_TTL_MINUTES}m and {MAX_ACCESS_TTL_MINUTES}m"
            ),
        )
    };

    let digits = value.strip_suffix('m').ok_or_else(rejected)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(rejected());
    }
    let minutes: i64 = digits.parse().map_err(|_| rejected())?;
    if !(MIN_ACCESS_TTL_MINUTES..=MAX_ACCESS_TTL_MINUTES).contains(&minutes) {
        return Err(rejected());
    }
    Ok(minutes)
}

fn get_env(key: &str, default: Option<&str>) -> Result<String, ServiceError> {
    match env::var(key) {
        Ok(value) => Ok(value),
        Err(_) => default.map(str::to_string).ok_or_else(|| {
            ServiceError::Internal(
                ErrorCode::Internal,
                format!("{key} is required but not set"),
            )
        }),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ServiceError> {
    get_env(key, Some(default))?.parse().map_err(|_| {
        ServiceError::Internal(ErrorCode::Internal, format!("{key} is not a valid number"))
    })
}

/// Initialize structured logging. The env filter wins over the configured
/// level when `RUST_LOG` is set.
pub fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .flatten_event(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_accepts_whole_minutes_inside_the_window() {
        assert_eq!(parse_access_token_ttl("15m").unwrap(), 15);
        assert_eq!(parse_access_token_ttl("30m").unwrap(), 30);
        assert_eq!(parse_access_token_ttl("60m").unwrap(), 60);
    }

    #[test]
    fn ttl_rejects_values_outside_the_window() {
        assert!(parse_access_token_ttl("14m").is_err());
        assert!(parse_access_token_ttl("61m").is_err());
        assert!(parse_access_token_ttl("0m").is_err());
    }

    #[test]
    fn ttl_rejects_other_units_and_noise() {
        assert!(parse_access_token_ttl("1h").is_err());
        assert!(parse_access_token_ttl("1800s").is_err());
        assert!(parse_access_token_ttl("30").is_err());
        assert!(parse_access_token_ttl("m").is_err());
        assert!(parse_access_token_ttl("-30m").is_err());
        assert!(parse_access_token_ttl("30 m").is_err());
        assert!(parse_access_token_ttl("").is_err());
    }

    #[test]
    fn ttl_errors_carry_the_policy_code() {
        let err = parse_access_token_ttl("1h").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidAccessTokenTtl);
    }
}

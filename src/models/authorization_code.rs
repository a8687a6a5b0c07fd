//! Single-use authorization codes.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Codes live for five minutes; they exist only to bridge the redirect
/// back to the client before the real access token is minted.
pub const CODE_TTL_MINUTES: i64 = 5;

/// An issued authorization code, stored hashed. Bound to the user, tenant
/// domain, config URL and redirect URL it was issued for, so it cannot be
/// replayed under another tenant or redirect context.
#[derive(Debug, Clone, FromRow)]
pub struct AuthorizationCode {
    pub id: Uuid,
    pub code_hash: String,
    pub user_id: Uuid,
    pub domain: String,
    pub config_url: String,
    pub redirect_url: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AuthorizationCode {
    pub fn new(
        code_hash: String,
        user_id: Uuid,
        domain: String,
        config_url: String,
        redirect_url: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            code_hash,
            user_id,
            domain,
            config_url,
            redirect_url,
            expires_at: now + Duration::minutes(CODE_TTL_MINUTES),
            used_at: None,
            created_at: now,
        }
    }
}

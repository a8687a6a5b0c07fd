//! One-time verification token rows.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Token kind codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    LoginLink,
    VerifyEmail,
    VerifyEmailSetPassword,
    PasswordReset,
    TwoFaReset,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::LoginLink => "login_link",
            TokenKind::VerifyEmail => "verify_email",
            TokenKind::VerifyEmailSetPassword => "verify_email_set_password",
            TokenKind::PasswordReset => "password_reset",
            TokenKind::TwoFaReset => "two_fa_reset",
        }
    }

    /// Lifetime per kind: login links are short, mailbox-sitting flows get
    /// longer windows.
    pub fn ttl(&self) -> Duration {
        match self {
            TokenKind::LoginLink => Duration::minutes(15),
            TokenKind::VerifyEmail | TokenKind::VerifyEmailSetPassword => Duration::hours(24),
            TokenKind::PasswordReset => Duration::hours(1),
            TokenKind::TwoFaReset => Duration::hours(1),
        }
    }
}

/// A single-use, email-delivered token. Only the peppered hash of the raw
/// token is stored; `used_at` flips None -> Some exactly once via a
/// conditional update.
#[derive(Debug, Clone, FromRow)]
pub struct VerificationToken {
    pub id: Uuid,
    pub kind_code: String,
    pub token_hash: String,
    pub email: String,
    pub user_key: String,
    pub domain: Option<String>,
    /// Binds the token to the issuing tenant context.
    pub config_url: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl VerificationToken {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: TokenKind,
        token_hash: String,
        email: String,
        user_key: String,
        domain: Option<String>,
        config_url: String,
        user_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind_code: kind.as_str().to_string(),
            token_hash,
            email,
            user_key,
            domain,
            config_url,
            expires_at: now + kind.ttl(),
            used_at: None,
            user_id,
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }
}

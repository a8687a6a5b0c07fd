//! Persistence boundary.
//!
//! The engine consumes a transactional row store through [`AuthStore`];
//! everything concurrency-critical is expressed as a single store call so
//! each implementation can make it atomic (a transaction in Postgres, one
//! mutex hold in memory). One-time-token consumption and authorization-code
//! exchange are conditional updates whose affected-row count is the
//! concurrency arbiter; there is deliberately no select-then-update
//! anywhere above this trait.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{AuthorizationCode, DomainRole, TokenKind, User, VerificationToken};

pub use memory::MemStore;
pub use postgres::PgStore;

/// Unique constraint names, shared by both implementations so callers can
/// branch on which constraint fired.
pub const USERS_USER_KEY_UNIQ: &str = "users_user_key_uniq";
pub const DOMAIN_ROLES_PKEY: &str = "domain_roles_pkey";
pub const DOMAIN_ROLES_SUPERUSER_UNIQ: &str = "domain_roles_superuser_uniq";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("token not found")]
    TokenNotFound,

    #[error("token expired")]
    TokenExpired,

    #[error("token already used")]
    TokenAlreadyUsed,

    #[error("password already set")]
    PasswordAlreadySet,

    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_unique_violation_of(&self, constraint: &str) -> bool {
        matches!(self, StoreError::UniqueViolation { constraint: c } if c == constraint)
    }
}

/// Side effect executed atomically with one-time-token consumption. The
/// target user is resolved from the consumed token row itself.
#[derive(Debug, Clone)]
pub enum TokenSideEffect {
    /// Login links: consumption itself is the whole effect.
    None,
    /// Password reset: overwrite whatever hash exists.
    SetPassword { password_hash: String },
    /// Email verification: create the account from the token row's
    /// email/user_key/domain if missing. When a password hash is supplied
    /// and the account already exists, it is applied only if no password is
    /// set; an existing password fails the whole consumption with
    /// [`StoreError::PasswordAlreadySet`], leaving the token unconsumed.
    EnsureUser { password_hash: Option<String> },
    /// 2FA reset: disable 2FA and discard the stored secret.
    DisableTwoFa,
}

/// Result of a successful consumption: the burned token row and the user it
/// resolved to after the side effect.
#[derive(Debug, Clone)]
pub struct ConsumedToken {
    pub token: VerificationToken,
    pub user: User,
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    // -- users ----------------------------------------------------------

    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn find_user_by_key(&self, user_key: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Overwrite name/avatar (social logins treat the provider as the
    /// source of truth).
    async fn update_user_profile(
        &self,
        id: Uuid,
        name: Option<String>,
        avatar_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_two_fa_secret(
        &self,
        id: Uuid,
        encrypted_secret: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_two_fa_enabled(
        &self,
        id: Uuid,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // -- one-time tokens ------------------------------------------------

    async fn insert_verification_token(
        &self,
        token: &VerificationToken,
    ) -> Result<(), StoreError>;

    /// Consume a one-time token and apply its side effect atomically.
    ///
    /// The token must match (hash, kind, config_url); the used_at flip is a
    /// conditional update requiring `used_at IS NULL AND expires_at > now`,
    /// so of two racing consumers exactly one succeeds and the other sees
    /// [`StoreError::TokenAlreadyUsed`]. A failed side effect rolls the
    /// consumption back.
    async fn consume_verification_token(
        &self,
        token_hash: &str,
        kind: TokenKind,
        config_url: &str,
        now: DateTime<Utc>,
        effect: TokenSideEffect,
    ) -> Result<ConsumedToken, StoreError>;

    // -- authorization codes --------------------------------------------

    async fn insert_authorization_code(
        &self,
        code: &AuthorizationCode,
    ) -> Result<(), StoreError>;

    /// Conditional update returning the code row iff it was unused and
    /// unexpired; `None` means invalid-or-already-used.
    async fn consume_authorization_code(
        &self,
        code_hash: &str,
        config_url: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, StoreError>;

    // -- domain roles ---------------------------------------------------

    /// Plain insert; uniqueness violations surface with the constraint
    /// name so the role resolver can tell "superuser taken" from
    /// "this (domain, user) already has a row".
    async fn insert_domain_role(&self, role: &DomainRole) -> Result<(), StoreError>;

    async fn find_domain_role(
        &self,
        domain: &str,
        user_id: Uuid,
    ) -> Result<Option<DomainRole>, StoreError>;
}

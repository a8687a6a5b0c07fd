//! User entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A user account. `user_key` is the actual uniqueness key: the bare email
/// under global identity scope, `"{domain}|{email}"` under per-domain scope.
/// `domain` is None exactly when the account is globally scoped.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub user_key: String,
    pub password_hash: Option<String>,
    pub two_fa_enabled: bool,
    /// Encrypted at rest (`v1:<iv>:<ct>:<tag>`); never the raw base32 secret.
    pub two_fa_secret: Option<String>,
    pub domain: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: String, user_key: String, domain: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            user_key,
            password_hash: None,
            two_fa_enabled: false,
            two_fa_secret: None,
            domain,
            name: None,
            avatar_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_password(mut self, password_hash: String) -> Self {
        self.password_hash = Some(password_hash);
        self
    }

    pub fn with_profile(mut self, name: Option<String>, avatar_url: Option<String>) -> Self {
        self.name = name;
        self.avatar_url = avatar_url;
        self
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

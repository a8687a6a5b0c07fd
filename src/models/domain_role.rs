//! Per-domain role rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Superuser,
    User,
}

impl RoleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::Superuser => "superuser",
            RoleKind::User => "user",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "superuser" => Some(RoleKind::Superuser),
            "user" => Some(RoleKind::User),
            _ => None,
        }
    }
}

/// Composite key (domain, user_id). A storage-level partial unique
/// constraint guarantees at most one superuser row per domain.
#[derive(Debug, Clone, FromRow)]
pub struct DomainRole {
    pub domain: String,
    pub user_id: Uuid,
    pub role_code: String,
    pub created_at: DateTime<Utc>,
}

impl DomainRole {
    pub fn new(domain: String, user_id: Uuid, role: RoleKind, now: DateTime<Utc>) -> Self {
        Self {
            domain,
            user_id,
            role_code: role.as_str().to_string(),
            created_at: now,
        }
    }

    pub fn role(&self) -> RoleKind {
        RoleKind::from_code(&self.role_code).unwrap_or(RoleKind::User)
    }
}

//! PostgreSQL implementation of [`AuthStore`].
//!
//! Uses sqlx with runtime-checked queries. Consumption paths run inside a
//! transaction; the conditional `UPDATE ... WHERE used_at IS NULL AND
//! expires_at > $now` plus its affected-row count is what arbitrates racing
//! consumers, also across multiple server processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Postgres;
use uuid::Uuid;

use crate::db::{AuthStore, ConsumedToken, StoreError, TokenSideEffect};
use crate::models::{AuthorizationCode, DomainRole, TokenKind, User, VerificationToken};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        email TEXT NOT NULL,
        user_key TEXT NOT NULL,
        password_hash TEXT,
        two_fa_enabled BOOLEAN NOT NULL DEFAULT FALSE,
        two_fa_secret TEXT,
        domain TEXT,
        name TEXT,
        avatar_url TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS users_user_key_uniq ON users (user_key)",
    r#"
    CREATE TABLE IF NOT EXISTS verification_tokens (
        id UUID PRIMARY KEY,
        kind_code TEXT NOT NULL,
        token_hash TEXT NOT NULL,
        email TEXT NOT NULL,
        user_key TEXT NOT NULL,
        domain TEXT,
        config_url TEXT NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        used_at TIMESTAMPTZ,
        user_id UUID,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS verification_tokens_hash_idx ON verification_tokens (token_hash)",
    r#"
    CREATE TABLE IF NOT EXISTS authorization_codes (
        id UUID PRIMARY KEY,
        code_hash TEXT NOT NULL,
        user_id UUID NOT NULL,
        domain TEXT NOT NULL,
        config_url TEXT NOT NULL,
        redirect_url TEXT NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        used_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS authorization_codes_hash_idx ON authorization_codes (code_hash)",
    r#"
    CREATE TABLE IF NOT EXISTS domain_roles (
        domain TEXT NOT NULL,
        user_id UUID NOT NULL,
        role_code TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        CONSTRAINT domain_roles_pkey PRIMARY KEY (domain, user_id)
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS domain_roles_superuser_uniq ON domain_roles (domain) WHERE role_code = 'superuser'",
];

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and constraints. Idempotent; run at startup.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
        }
        tracing::info!("database schema ensured");
        Ok(())
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn fetch_user(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        user_key: &str,
    ) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_key = $1")
            .bind(user_key)
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_sqlx)
    }

    async fn apply_effect(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        token: &VerificationToken,
        effect: TokenSideEffect,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        match effect {
            TokenSideEffect::None => Self::fetch_user(tx, &token.user_key)
                .await?
                .ok_or(StoreError::TokenNotFound),

            TokenSideEffect::SetPassword { password_hash } => {
                let result = sqlx::query(
                    "UPDATE users SET password_hash = $1, updated_at = $2 WHERE user_key = $3",
                )
                .bind(&password_hash)
                .bind(now)
                .bind(&token.user_key)
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx)?;
                if result.rows_affected() != 1 {
                    return Err(StoreError::TokenNotFound);
                }
                Self::fetch_user(tx, &token.user_key)
                    .await?
                    .ok_or(StoreError::TokenNotFound)
            }

            TokenSideEffect::EnsureUser { password_hash } => {
                match Self::fetch_user(tx, &token.user_key).await? {
                    Some(existing) => {
                        if let Some(hash) = password_hash {
                            // Never overwrite an existing password through an
                            // email-verification token.
                            let result = sqlx::query(
                                "UPDATE users SET password_hash = $1, updated_at = $2 \
                                 WHERE id = $3 AND password_hash IS NULL",
                            )
                            .bind(&hash)
                            .bind(now)
                            .bind(existing.id)
                            .execute(&mut **tx)
                            .await
                            .map_err(map_sqlx)?;
                            if result.rows_affected() != 1 {
                                return Err(StoreError::PasswordAlreadySet);
                            }
                            Self::fetch_user(tx, &token.user_key)
                                .await?
                                .ok_or(StoreError::TokenNotFound)
                        } else {
                            Ok(existing)
                        }
                    }
                    None => {
                        let mut user = User::new(
                            token.email.clone(),
                            token.user_key.clone(),
                            token.domain.clone(),
                        );
                        user.password_hash = password_hash;
                        insert_user_in(&mut **tx, &user).await?;
                        Ok(user)
                    }
                }
            }

            TokenSideEffect::DisableTwoFa => {
                let result = sqlx::query(
                    "UPDATE users SET two_fa_enabled = FALSE, two_fa_secret = NULL, \
                     updated_at = $1 WHERE user_key = $2",
                )
                .bind(now)
                .bind(&token.user_key)
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx)?;
                if result.rows_affected() != 1 {
                    return Err(StoreError::TokenNotFound);
                }
                Self::fetch_user(tx, &token.user_key)
                    .await?
                    .ok_or(StoreError::TokenNotFound)
            }
        }
    }
}

async fn insert_user_in<'e, E>(executor: E, user: &User) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO users (id, email, user_key, password_hash, two_fa_enabled, two_fa_secret,
                           domain, name, avatar_url, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(user.id)
    .bind(&user.email)
    .bind(&user.user_key)
    .bind(&user.password_hash)
    .bind(user.two_fa_enabled)
    .bind(&user.two_fa_secret)
    .bind(&user.domain)
    .bind(&user.name)
    .bind(&user.avatar_url)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(executor)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

#[async_trait]
impl AuthStore for PgStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        insert_user_in(&self.pool, user).await
    }

    async fn find_user_by_key(&self, user_key: &str) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_key = $1")
            .bind(user_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)
    }

    async fn update_user_profile(
        &self,
        id: Uuid,
        name: Option<String>,
        avatar_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET name = $1, avatar_url = $2, updated_at = $3 WHERE id = $4")
            .bind(&name)
            .bind(&avatar_url)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn set_two_fa_secret(
        &self,
        id: Uuid,
        encrypted_secret: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET two_fa_secret = $1, updated_at = $2 WHERE id = $3")
            .bind(encrypted_secret)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn set_two_fa_enabled(
        &self,
        id: Uuid,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET two_fa_enabled = $1, updated_at = $2 WHERE id = $3")
            .bind(enabled)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn insert_verification_token(
        &self,
        token: &VerificationToken,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO verification_tokens (id, kind_code, token_hash, email, user_key, domain,
                                             config_url, expires_at, used_at, user_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(token.id)
        .bind(&token.kind_code)
        .bind(&token.token_hash)
        .bind(&token.email)
        .bind(&token.user_key)
        .bind(&token.domain)
        .bind(&token.config_url)
        .bind(token.expires_at)
        .bind(token.used_at)
        .bind(token.user_id)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn consume_verification_token(
        &self,
        token_hash: &str,
        kind: TokenKind,
        config_url: &str,
        now: DateTime<Utc>,
        effect: TokenSideEffect,
    ) -> Result<ConsumedToken, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let Some(token) = sqlx::query_as::<_, VerificationToken>(
            "SELECT * FROM verification_tokens \
             WHERE token_hash = $1 AND kind_code = $2 AND config_url = $3",
        )
        .bind(token_hash)
        .bind(kind.as_str())
        .bind(config_url)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?
        else {
            return Err(StoreError::TokenNotFound);
        };

        let result = sqlx::query(
            "UPDATE verification_tokens SET used_at = $1 \
             WHERE id = $2 AND used_at IS NULL AND expires_at > $1",
        )
        .bind(now)
        .bind(token.id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() != 1 {
            // Re-read to tell a racing consumption from plain expiry.
            let used: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
                "SELECT used_at FROM verification_tokens WHERE id = $1",
            )
            .bind(token.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?;
            return match used.flatten() {
                Some(_) => Err(StoreError::TokenAlreadyUsed),
                None => Err(StoreError::TokenExpired),
            };
        }

        let user = Self::apply_effect(&mut tx, &token, effect, now).await?;
        tx.commit().await.map_err(map_sqlx)?;

        let mut token = token;
        token.used_at = Some(now);
        Ok(ConsumedToken { token, user })
    }

    async fn insert_authorization_code(
        &self,
        code: &AuthorizationCode,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO authorization_codes (id, code_hash, user_id, domain, config_url,
                                             redirect_url, expires_at, used_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(code.id)
        .bind(&code.code_hash)
        .bind(code.user_id)
        .bind(&code.domain)
        .bind(&code.config_url)
        .bind(&code.redirect_url)
        .bind(code.expires_at)
        .bind(code.used_at)
        .bind(code.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn consume_authorization_code(
        &self,
        code_hash: &str,
        config_url: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, StoreError> {
        sqlx::query_as::<_, AuthorizationCode>(
            "UPDATE authorization_codes SET used_at = $1 \
             WHERE code_hash = $2 AND config_url = $3 AND used_at IS NULL AND expires_at > $1 \
             RETURNING *",
        )
        .bind(now)
        .bind(code_hash)
        .bind(config_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    async fn insert_domain_role(&self, role: &DomainRole) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO domain_roles (domain, user_id, role_code, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&role.domain)
        .bind(role.user_id)
        .bind(&role.role_code)
        .bind(role.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn find_domain_role(
        &self,
        domain: &str,
        user_id: Uuid,
    ) -> Result<Option<DomainRole>, StoreError> {
        sqlx::query_as::<_, DomainRole>(
            "SELECT * FROM domain_roles WHERE domain = $1 AND user_id = $2",
        )
        .bind(domain)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)
    }
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::UniqueViolation {
                constraint: db_err.constraint().unwrap_or("unknown").to_string(),
            };
        }
    }
    StoreError::Backend(anyhow::anyhow!(err))
}

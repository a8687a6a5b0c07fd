//! In-memory implementation of [`AuthStore`].
//!
//! Used by the test suite and by single-process deployments that do not
//! need durability. One mutex guards all tables; each trait call holds it
//! for the whole operation, which gives the same atomicity the Postgres
//! implementation gets from transactions. Constraint names match the
//! Postgres schema so callers branch identically against either backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use uuid::Uuid;

use crate::db::{
    AuthStore, ConsumedToken, StoreError, TokenSideEffect, DOMAIN_ROLES_PKEY,
    DOMAIN_ROLES_SUPERUSER_UNIQ, USERS_USER_KEY_UNIQ,
};
use crate::models::{AuthorizationCode, DomainRole, RoleKind, TokenKind, User, VerificationToken};

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    tokens: Vec<VerificationToken>,
    codes: Vec<AuthorizationCode>,
    roles: Vec<DomainRole>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store lock poisoned")
    }
}

fn apply_effect(
    inner: &mut Inner,
    token: &VerificationToken,
    effect: TokenSideEffect,
    now: DateTime<Utc>,
) -> Result<User, StoreError> {
    let user_key = token.user_key.as_str();
    match effect {
        TokenSideEffect::None => inner
            .users
            .iter()
            .find(|u| u.user_key == user_key)
            .cloned()
            .ok_or(StoreError::TokenNotFound),

        TokenSideEffect::SetPassword { password_hash } => {
            let user = inner
                .users
                .iter_mut()
                .find(|u| u.user_key == user_key)
                .ok_or(StoreError::TokenNotFound)?;
            user.password_hash = Some(password_hash);
            user.updated_at = now;
            Ok(user.clone())
        }

        TokenSideEffect::EnsureUser { password_hash } => {
            match inner.users.iter_mut().find(|u| u.user_key == user_key) {
                Some(existing) => {
                    if let Some(hash) = password_hash {
                        if existing.has_password() {
                            return Err(StoreError::PasswordAlreadySet);
                        }
                        existing.password_hash = Some(hash);
                        existing.updated_at = now;
                    }
                    Ok(existing.clone())
                }
                None => {
                    let mut user = User::new(
                        token.email.clone(),
                        token.user_key.clone(),
                        token.domain.clone(),
                    );
                    user.password_hash = password_hash;
                    inner.users.push(user.clone());
                    Ok(user)
                }
            }
        }

        TokenSideEffect::DisableTwoFa => {
            let user = inner
                .users
                .iter_mut()
                .find(|u| u.user_key == user_key)
                .ok_or(StoreError::TokenNotFound)?;
            user.two_fa_enabled = false;
            user.two_fa_secret = None;
            user.updated_at = now;
            Ok(user.clone())
        }
    }
}

#[async_trait]
impl AuthStore for MemStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.users.iter().any(|u| u.user_key == user.user_key) {
            return Err(StoreError::UniqueViolation {
                constraint: USERS_USER_KEY_UNIQ.to_string(),
            });
        }
        inner.users.push(user.clone());
        Ok(())
    }

    async fn find_user_by_key(&self, user_key: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|u| u.user_key == user_key)
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.iter().find(|u| u.id == id).cloned())
    }

    async fn update_user_profile(
        &self,
        id: Uuid,
        name: Option<String>,
        avatar_url: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(user) = inner.users.iter_mut().find(|u| u.id == id) {
            user.name = name;
            user.avatar_url = avatar_url;
            user.updated_at = now;
        }
        Ok(())
    }

    async fn set_two_fa_secret(
        &self,
        id: Uuid,
        encrypted_secret: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(user) = inner.users.iter_mut().find(|u| u.id == id) {
            user.two_fa_secret = Some(encrypted_secret.to_string());
            user.updated_at = now;
        }
        Ok(())
    }

    async fn set_two_fa_enabled(
        &self,
        id: Uuid,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(user) = inner.users.iter_mut().find(|u| u.id == id) {
            user.two_fa_enabled = enabled;
            user.updated_at = now;
        }
        Ok(())
    }

    async fn insert_verification_token(
        &self,
        token: &VerificationToken,
    ) -> Result<(), StoreError> {
        self.lock().tokens.push(token.clone());
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
        let mut inner = self.lock();

        let index = inner
            .tokens
            .iter()
            .position(|t| {
                t.token_hash == token_hash
                    && t.kind_code == kind.as_str()
                    && t.config_url == config_url
            })
            .ok_or(StoreError::TokenNotFound)?;

        if inner.tokens[index].is_used() {
            return Err(StoreError::TokenAlreadyUsed);
        }
        if inner.tokens[index].is_expired(now) {
            return Err(StoreError::TokenExpired);
        }

        // Apply the side effect before flipping used_at so a rejected
        // effect leaves the token consumable, mirroring transaction
        // rollback in the Postgres implementation.
        let token_row = inner.tokens[index].clone();
        let user = apply_effect(&mut inner, &token_row, effect, now)?;

        inner.tokens[index].used_at = Some(now);
        let token = inner.tokens[index].clone();
        Ok(ConsumedToken { token, user })
    }

    async fn insert_authorization_code(
        &self,
        code: &AuthorizationCode,
    ) -> Result<(), StoreError> {
        self.lock().codes.push(code.clone());
        Ok(())
    }

    async fn consume_authorization_code(
        &self,
        code_hash: &str,
        config_url: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, StoreError> {
        let mut inner = self.lock();
        let Some(code) = inner.codes.iter_mut().find(|c| {
            c.code_hash == code_hash
                && c.config_url == config_url
                && c.used_at.is_none()
                && c.expires_at > now
        }) else {
            return Ok(None);
        };
        code.used_at = Some(now);
        Ok(Some(code.clone()))
    }

    async fn insert_domain_role(&self, role: &DomainRole) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner
            .roles
            .iter()
            .any(|r| r.domain == role.domain && r.user_id == role.user_id)
        {
            return Err(StoreError::UniqueViolation {
                constraint: DOMAIN_ROLES_PKEY.to_string(),
            });
        }
        if role.role() == RoleKind::Superuser
            && inner
                .roles
                .iter()
                .any(|r| r.domain == role.domain && r.role() == RoleKind::Superuser)
        {
            return Err(StoreError::UniqueViolation {
                constraint: DOMAIN_ROLES_SUPERUSER_UNIQ.to_string(),
            });
        }
        inner.roles.push(role.clone());
        Ok(())
    }

    async fn find_domain_role(
        &self,
        domain: &str,
        user_id: Uuid,
    ) -> Result<Option<DomainRole>, StoreError> {
        Ok(self
            .lock()
            .roles
            .iter()
            .find(|r| r.domain == domain && r.user_id == user_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenKind;

    fn token(hash: &str, kind: TokenKind, config_url: &str, now: DateTime<Utc>) -> VerificationToken {
        VerificationToken::new(
            kind,
            hash.to_string(),
            "a@example.com".to_string(),
            "a@example.com".to_string(),
            None,
            config_url.to_string(),
            None,
            now,
        )
    }

    #[tokio::test]
    async fn duplicate_user_key_is_a_unique_violation() {
        let store = MemStore::new();
        let user = User::new("a@example.com".into(), "a@example.com".into(), None);
        store.insert_user(&user).await.unwrap();

        let dup = User::new("a@example.com".into(), "a@example.com".into(), None);
        let err = store.insert_user(&dup).await.unwrap_err();
        assert!(err.is_unique_violation_of(USERS_USER_KEY_UNIQ));
    }

    #[tokio::test]
    async fn consumption_requires_kind_and_config_url_match() {
        let store = MemStore::new();
        let now = Utc::now();
        store
            .insert_user(&User::new(
                "a@example.com".into(),
                "a@example.com".into(),
                None,
            ))
            .await
            .unwrap();
        store
            .insert_verification_token(&token("h", TokenKind::LoginLink, "https://t/cfg", now))
            .await
            .unwrap();

        let wrong_kind = store
            .consume_verification_token("h", TokenKind::PasswordReset, "https://t/cfg", now, TokenSideEffect::None)
            .await;
        assert!(matches!(wrong_kind, Err(StoreError::TokenNotFound)));

        let wrong_url = store
            .consume_verification_token("h", TokenKind::LoginLink, "https://other/cfg", now, TokenSideEffect::None)
            .await;
        assert!(matches!(wrong_url, Err(StoreError::TokenNotFound)));

        let ok = store
            .consume_verification_token("h", TokenKind::LoginLink, "https://t/cfg", now, TokenSideEffect::None)
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn rejected_side_effect_leaves_token_unconsumed() {
        let store = MemStore::new();
        let now = Utc::now();
        let user = User::new("a@example.com".into(), "a@example.com".into(), None)
            .with_password("$argon2id$existing".into());
        store.insert_user(&user).await.unwrap();
        store
            .insert_verification_token(&token(
                "h",
                TokenKind::VerifyEmailSetPassword,
                "https://t/cfg",
                now,
            ))
            .await
            .unwrap();

        let effect = TokenSideEffect::EnsureUser {
            password_hash: Some("$argon2id$new".into()),
        };
        let err = store
            .consume_verification_token("h", TokenKind::VerifyEmailSetPassword, "https://t/cfg", now, effect)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PasswordAlreadySet));

        // The token must still be consumable afterwards.
        let again = store
            .consume_verification_token(
                "h",
                TokenKind::VerifyEmailSetPassword,
                "https://t/cfg",
                now,
                TokenSideEffect::None,
            )
            .await;
        assert!(again.is_ok());
    }
}

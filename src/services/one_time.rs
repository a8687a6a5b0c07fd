//! One-time, email-delivered tokens.
//!
//! One generic lifecycle backs four flows: login links, email verification
//! (with or without an initial password), password reset and 2FA reset.
//! The raw 256-bit token travels exactly once, inside the email link; only
//! `sha256(token ‖ shared_secret)` is stored. Consumption is a conditional
//! update bound to (kind, config_url) plus the side effect, all in one
//! store transaction.
//!
//! Every request endpoint returns the same acknowledgement whether or not
//! the address has an account. Which mail (if any) goes out is decided
//! internally and logged, never surfaced.

use std::sync::Arc;
use uuid::Uuid;
use validator::ValidateEmail;

use crate::db::{AuthStore, ConsumedToken, TokenSideEffect};
use crate::error::{ErrorCode, ServiceError};
use crate::models::{ClientConfig, RegistrationMode, TokenKind, User, VerificationToken};
use crate::services::client_id::{normalize_domain, user_key};
use crate::services::email::Mailer;
use crate::utils::encoding::{peppered_hash, random_token};
use crate::utils::{hash_password, Clock, Password};

/// The one acknowledgement every request flow returns.
pub const REQUEST_ACK: &str = "If that address has a matching account, an email is on its way.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowAck {
    pub message: &'static str,
}

impl FlowAck {
    fn accepted() -> Self {
        Self {
            message: REQUEST_ACK,
        }
    }
}

#[derive(Clone)]
pub struct OneTimeTokenService {
    secret: String,
    public_base_url: String,
    store: Arc<dyn AuthStore>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
}

impl OneTimeTokenService {
    pub fn new(
        secret: String,
        public_base_url: String,
        store: Arc<dyn AuthStore>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            secret,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            store,
            mailer,
            clock,
        }
    }

    /// Create a token row and return the raw token.
    async fn issue(
        &self,
        kind: TokenKind,
        email: &str,
        config: &ClientConfig,
        config_url: &str,
        user_id: Option<Uuid>,
    ) -> Result<String, ServiceError> {
        let raw = random_token();
        let key = user_key(config.user_scope, email, &config.domain);
        let domain = match config.user_scope {
            crate::models::UserScope::Global => None,
            crate::models::UserScope::PerDomain => Some(normalize_domain(&config.domain)),
        };
        let token = VerificationToken::new(
            kind,
            peppered_hash(&raw, &self.secret),
            email.trim().to_ascii_lowercase(),
            key,
            domain,
            config_url.to_string(),
            user_id,
            self.clock.now(),
        );
        self.store.insert_verification_token(&token).await?;
        Ok(raw)
    }

    fn link(&self, path: &str, raw_token: &str) -> String {
        format!("{}/{path}?token={raw_token}", self.public_base_url)
    }

    /// Send or skip; either way the caller gets nothing back that reveals
    /// the decision. Dispatch failures are logged, not surfaced.
    async fn send(&self, to: &str, subject: &str, text: String, html: String) {
        if let Err(e) = self.mailer.send(to, subject, &text, &html).await {
            tracing::error!(code = %ErrorCode::EmailDispatchFailed, error = %e, "email dispatch failed");
        }
    }

    fn check_email(&self, email: &str) -> Result<(), ServiceError> {
        if email.validate_email() {
            Ok(())
        } else {
            Err(ServiceError::BadRequest(
                ErrorCode::InvalidRequest,
                "malformed email address".to_string(),
            ))
        }
    }

    // -- request flows --------------------------------------------------

    pub async fn request_login_link(
        &self,
        email: &str,
        config: &ClientConfig,
        config_url: &str,
    ) -> Result<FlowAck, ServiceError> {
        self.check_email(email)?;
        let key = user_key(config.user_scope, email, &config.domain);

        match self.store.find_user_by_key(&key).await? {
            Some(user) => {
                let raw = self
                    .issue(TokenKind::LoginLink, email, config, config_url, Some(user.id))
                    .await?;
                let link = self.link("login", &raw);
                self.send(
                    email,
                    "Your sign-in link",
                    format!("Sign in by opening this link:\n\n{link}\n\nIt expires in 15 minutes."),
                    format!(
                        r#"<p>Sign in by clicking the link below:</p><p><a href="{link}">Sign in</a></p><p>This link expires in 15 minutes.</p>"#
                    ),
                )
                .await;
            }
            None => {
                tracing::info!("login link requested for unknown address");
            }
        }
        Ok(FlowAck::accepted())
    }

    /// Registration: issue a verify-email token. Depending on the tenant's
    /// registration policy the follow-up consumption also sets the first
    /// password.
    pub async fn request_email_verification(
        &self,
        email: &str,
        config: &ClientConfig,
        config_url: &str,
    ) -> Result<FlowAck, ServiceError> {
        self.check_email(email)?;

        if config.registration.mode == RegistrationMode::Closed {
            return Err(ServiceError::Forbidden(
                ErrorCode::RegistrationClosed,
                "tenant registration is closed".to_string(),
            ));
        }
        // Policy, not enumeration: the answer is the same for every address
        // in a disallowed domain, account or not.
        if !config.email_domain_allowed(email) {
            return Err(ServiceError::Forbidden(
                ErrorCode::EmailDomainNotAllowed,
                "email domain is not in the registration allow-list".to_string(),
            ));
        }

        let key = user_key(config.user_scope, email, &config.domain);
        let existing = self.store.find_user_by_key(&key).await?;
        if existing.as_ref().is_some_and(User::has_password) {
            // Already registered: the reset flow is the way back in. Same
            // acknowledgement either way.
            tracing::info!("registration requested for an already-registered address");
            return Ok(FlowAck::accepted());
        }

        let kind = if config.registration.set_password {
            TokenKind::VerifyEmailSetPassword
        } else {
            TokenKind::VerifyEmail
        };
        let raw = self
            .issue(kind, email, config, config_url, existing.map(|u| u.id))
            .await?;
        let link = self.link("verify-email", &raw);
        self.send(
            email,
            "Verify your email address",
            format!("Confirm your email by opening this link:\n\n{link}\n\nIt expires in 24 hours."),
            format!(
                r#"<p>Confirm your email address by clicking the link below:</p><p><a href="{link}">Verify email</a></p><p>This link expires in 24 hours.</p>"#
            ),
        )
        .await;
        Ok(FlowAck::accepted())
    }

    pub async fn request_password_reset(
        &self,
        email: &str,
        config: &ClientConfig,
        config_url: &str,
    ) -> Result<FlowAck, ServiceError> {
        self.check_email(email)?;
        let key = user_key(config.user_scope, email, &config.domain);

        match self.store.find_user_by_key(&key).await? {
            Some(user) => {
                let raw = self
                    .issue(TokenKind::PasswordReset, email, config, config_url, Some(user.id))
                    .await?;
                let link = self.link("reset-password", &raw);
                self.send(
                    email,
                    "Reset your password",
                    format!("Reset your password by opening this link:\n\n{link}\n\nIt expires in one hour. If you didn't request this, ignore this email."),
                    format!(
                        r#"<p>Reset your password by clicking the link below:</p><p><a href="{link}">Reset password</a></p><p>This link expires in one hour. If you didn't request this, ignore this email.</p>"#
                    ),
                )
                .await;
            }
            None => {
                tracing::info!("password reset requested for unknown address");
            }
        }
        Ok(FlowAck::accepted())
    }

    pub async fn request_two_fa_reset(
        &self,
        email: &str,
        config: &ClientConfig,
        config_url: &str,
    ) -> Result<FlowAck, ServiceError> {
        self.check_email(email)?;
        let key = user_key(config.user_scope, email, &config.domain);

        match self.store.find_user_by_key(&key).await? {
            Some(user) if user.two_fa_enabled => {
                let raw = self
                    .issue(TokenKind::TwoFaReset, email, config, config_url, Some(user.id))
                    .await?;
                let link = self.link("reset-2fa", &raw);
                self.send(
                    email,
                    "Reset two-factor authentication",
                    format!("Disable two-factor authentication on your account by opening this link:\n\n{link}\n\nIt expires in one hour. If you didn't request this, ignore this email."),
                    format!(
                        r#"<p>Disable two-factor authentication by clicking the link below:</p><p><a href="{link}">Reset 2FA</a></p><p>This link expires in one hour. If you didn't request this, ignore this email.</p>"#
                    ),
                )
                .await;
            }
            _ => {
                tracing::info!("2fa reset requested for unknown address or 2fa-less account");
            }
        }
        Ok(FlowAck::accepted())
    }

    // -- consumption ----------------------------------------------------

    /// Redeem a login link; the caller continues into code issuance.
    pub async fn consume_login_link(
        &self,
        raw_token: &str,
        config_url: &str,
    ) -> Result<User, ServiceError> {
        self.consume(raw_token, TokenKind::LoginLink, config_url, TokenSideEffect::None)
            .await
    }

    /// Redeem a verify-email token. `new_password` must be present exactly
    /// for the set-password variant; an existing password always wins and
    /// fails the consumption without burning the token.
    pub async fn consume_email_verification(
        &self,
        raw_token: &str,
        config: &ClientConfig,
        config_url: &str,
        new_password: Option<Password>,
    ) -> Result<User, ServiceError> {
        let (kind, effect) = match new_password {
            Some(password) => (
                TokenKind::VerifyEmailSetPassword,
                TokenSideEffect::EnsureUser {
                    password_hash: Some(hash_password(&password)?),
                },
            ),
            None => (
                TokenKind::VerifyEmail,
                TokenSideEffect::EnsureUser {
                    password_hash: None,
                },
            ),
        };
        if config.registration.set_password && kind == TokenKind::VerifyEmail {
            return Err(ServiceError::BadRequest(
                ErrorCode::InvalidRequest,
                "this tenant's verification flow requires a password".to_string(),
            ));
        }
        self.consume(raw_token, kind, config_url, effect).await
    }

    pub async fn consume_password_reset(
        &self,
        raw_token: &str,
        config_url: &str,
        new_password: Password,
    ) -> Result<User, ServiceError> {
        let effect = TokenSideEffect::SetPassword {
            password_hash: hash_password(&new_password)?,
        };
        self.consume(raw_token, TokenKind::PasswordReset, config_url, effect)
            .await
    }

    pub async fn consume_two_fa_reset(
        &self,
        raw_token: &str,
        config_url: &str,
    ) -> Result<User, ServiceError> {
        self.consume(raw_token, TokenKind::TwoFaReset, config_url, TokenSideEffect::DisableTwoFa)
            .await
    }

    async fn consume(
        &self,
        raw_token: &str,
        kind: TokenKind,
        config_url: &str,
        effect: TokenSideEffect,
    ) -> Result<User, ServiceError> {
        let ConsumedToken { token, user } = self
            .store
            .consume_verification_token(
                &peppered_hash(raw_token, &self.secret),
                kind,
                config_url,
                self.clock.now(),
                effect,
            )
            .await?;

        tracing::info!(
            kind = %token.kind_code,
            user_id = %user.id,
            "one-time token consumed"
        );
        Ok(user)
    }
}

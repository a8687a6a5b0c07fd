//! Primary authentication.
//!
//! Password and social-provider login both end the same way: ensure the
//! domain role exists, then either hand back a signed 2FA challenge or an
//! authorization-code redirect. Every login failure, wrong password,
//! unknown account, unverified social email, bad 2FA code, surfaces as the
//! same generic authentication failure.

use std::sync::Arc;
use uuid::Uuid;

use crate::db::{AuthStore, StoreError};
use crate::error::{ErrorCode, ServiceError};
use crate::models::{AuthMethod, ClientConfig, User};
use crate::services::client_id::{normalize_domain, user_key};
use crate::services::roles::DomainRoleService;
use crate::services::social::{self, IdentityProvider, SocialProfile};
use crate::services::tokens::{build_redirect_to_url, select_redirect_url, TokenService};
use crate::services::two_factor::TwoFactorService;
use crate::utils::{verify_password_or_dummy, Clock, Password};

/// Where a successful primary authentication leads.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Fully authenticated: redirect back to the client with a code.
    Redirect { redirect_to: String },
    /// Primary auth passed but a 2FA code is still owed. The token is
    /// short-lived, signed, and never logged.
    TwoFaRequired { challenge_token: String },
}

#[derive(Clone)]
pub struct Authenticator {
    secret: String,
    audience: String,
    store: Arc<dyn AuthStore>,
    roles: DomainRoleService,
    two_fa: TwoFactorService,
    tokens: TokenService,
    clock: Arc<dyn Clock>,
}

impl Authenticator {
    pub fn new(
        secret: String,
        audience: String,
        store: Arc<dyn AuthStore>,
        roles: DomainRoleService,
        two_fa: TwoFactorService,
        tokens: TokenService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            secret,
            audience,
            store,
            roles,
            two_fa,
            tokens,
            clock,
        }
    }

    /// Email + password login.
    pub async fn password_login(
        &self,
        email: &str,
        password: Password,
        config: &ClientConfig,
        config_url: &str,
        requested_redirect: Option<&str>,
    ) -> Result<LoginOutcome, ServiceError> {
        if !config.allows_method(AuthMethod::Password) {
            return Err(ServiceError::authentication_failed(
                "password auth is not enabled for this tenant",
            ));
        }
        let redirect_url = select_redirect_url(&config.redirect_urls, requested_redirect)?;

        let key = user_key(config.user_scope, email, &config.domain);
        let user = self.store.find_user_by_key(&key).await?;

        // The dummy verification keeps a lookup miss indistinguishable from
        // a wrong password by timing.
        let stored_hash = user.as_ref().and_then(|u| u.password_hash.as_deref());
        if !verify_password_or_dummy(&password, stored_hash) {
            return Err(ServiceError::authentication_failed(
                "unknown account or password mismatch",
            ));
        }
        let user = user.ok_or_else(|| {
            ServiceError::authentication_failed("verified password without a user row")
        })?;

        self.finish_primary(user, "password", config, config_url, &redirect_url)
            .await
    }

    /// Redeem a 2FA challenge token plus TOTP code for the final redirect.
    pub async fn complete_two_fa(
        &self,
        challenge_token: &str,
        code: &str,
    ) -> Result<LoginOutcome, ServiceError> {
        let claims = self.two_fa.verify_challenge(challenge_token)?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::authentication_failed("challenge subject is not a uuid"))?;
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| ServiceError::authentication_failed("challenge for unknown user"))?;

        self.two_fa.verify_login_code(&user, code)?;

        let auth_code = self
            .tokens
            .issue_authorization_code(user.id, &claims.domain, &claims.config_url, &claims.redirect_url)
            .await?;
        Ok(LoginOutcome::Redirect {
            redirect_to: build_redirect_to_url(&claims.redirect_url, &auth_code)?,
        })
    }

    /// Begin a social login: validate policy, pin the redirect, and return
    /// the signed state token that must come back with the provider's
    /// callback.
    pub fn start_social_login(
        &self,
        provider: &str,
        config: &ClientConfig,
        config_url: &str,
        requested_redirect: Option<&str>,
    ) -> Result<String, ServiceError> {
        if !config.allows_method(AuthMethod::Social) || !config.allows_provider(provider) {
            return Err(ServiceError::BadRequest(
                ErrorCode::InvalidRequest,
                format!("provider {provider} is not enabled for this tenant"),
            ));
        }
        let redirect_url = select_redirect_url(&config.redirect_urls, requested_redirect)?;
        social::issue_state(
            &self.secret,
            &self.audience,
            self.clock.now(),
            provider,
            &normalize_domain(&config.domain),
            config_url,
            &redirect_url,
        )
    }

    /// Provider callback: verify the state, exchange the provider code for
    /// a profile, then log in or provision.
    pub async fn social_callback(
        &self,
        provider: &dyn IdentityProvider,
        provider_code: &str,
        state_token: &str,
        config: &ClientConfig,
    ) -> Result<LoginOutcome, ServiceError> {
        let state = social::verify_state(&self.secret, &self.audience, state_token)?;
        if state.provider != provider.name() {
            return Err(ServiceError::authentication_failed(
                "state token was issued for another provider",
            ));
        }
        let profile = provider.exchange_code(provider_code).await?;
        self.social_login(profile, config, &state.config_url, &state.redirect_url)
            .await
    }

    /// Core of the social path: verified-email gate, upsert by user key,
    /// provider-sourced profile overwrite, allow-list for new accounts
    /// only.
    pub async fn social_login(
        &self,
        profile: SocialProfile,
        config: &ClientConfig,
        config_url: &str,
        redirect_url: &str,
    ) -> Result<LoginOutcome, ServiceError> {
        if !profile.email_verified {
            return Err(ServiceError::Unauthorized(
                ErrorCode::SocialEmailNotVerified,
                format!("{} account email is not verified", profile.provider),
            ));
        }

        let method = profile.provider.clone();
        let key = user_key(config.user_scope, &profile.email, &config.domain);
        let user = match self.store.find_user_by_key(&key).await? {
            Some(mut existing) => {
                // The provider is the source of truth for name and avatar.
                self.store
                    .update_user_profile(
                        existing.id,
                        profile.name.clone(),
                        profile.avatar_url.clone(),
                        self.clock.now(),
                    )
                    .await?;
                existing.name = profile.name;
                existing.avatar_url = profile.avatar_url;
                existing
            }
            None => {
                // Only creation is gated by the allow-list; accounts that
                // predate a tightening keep working.
                if !config.email_domain_allowed(&profile.email) {
                    return Err(ServiceError::Forbidden(
                        ErrorCode::EmailDomainNotAllowed,
                        "email domain is not allowed to register".to_string(),
                    ));
                }
                let domain = match config.user_scope {
                    crate::models::UserScope::Global => None,
                    crate::models::UserScope::PerDomain => {
                        Some(normalize_domain(&config.domain))
                    }
                };
                let user = User::new(profile.email.trim().to_ascii_lowercase(), key.clone(), domain)
                    .with_profile(profile.name, profile.avatar_url);
                match self.store.insert_user(&user).await {
                    Ok(()) => user,
                    Err(StoreError::UniqueViolation { .. }) => {
                        // Lost a provisioning race; the winner's row is ours.
                        self.store.find_user_by_key(&key).await?.ok_or_else(|| {
                            ServiceError::Internal(
                                ErrorCode::StorageFailure,
                                "user row vanished after insert conflict".to_string(),
                            )
                        })?
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        self.finish_primary(user, &method, config, config_url, redirect_url)
            .await
    }

    /// Consume a login link and continue into the same post-auth path as
    /// the other methods.
    pub async fn login_link_authenticated(
        &self,
        user: User,
        config: &ClientConfig,
        config_url: &str,
        requested_redirect: Option<&str>,
    ) -> Result<LoginOutcome, ServiceError> {
        let redirect_url = select_redirect_url(&config.redirect_urls, requested_redirect)?;
        self.finish_primary(user, "login_link", config, config_url, &redirect_url)
            .await
    }

    async fn finish_primary(
        &self,
        user: User,
        method: &str,
        config: &ClientConfig,
        config_url: &str,
        redirect_url: &str,
    ) -> Result<LoginOutcome, ServiceError> {
        let domain = normalize_domain(&config.domain);
        self.roles.ensure_role(&domain, user.id).await?;

        if config.require_two_fa || user.two_fa_enabled {
            let challenge_token =
                self.two_fa
                    .issue_challenge(user.id, &domain, config_url, redirect_url, method)?;
            tracing::info!(user_id = %user.id, domain = %domain, method = %method, "2fa challenge issued");
            return Ok(LoginOutcome::TwoFaRequired { challenge_token });
        }

        let code = self
            .tokens
            .issue_authorization_code(user.id, &domain, config_url, redirect_url)
            .await?;
        tracing::info!(user_id = %user.id, domain = %domain, method = %method, "primary authentication succeeded");
        Ok(LoginOutcome::Redirect {
            redirect_to: build_redirect_to_url(redirect_url, &code)?,
        })
    }
}

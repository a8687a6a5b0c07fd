//! Multi-tenant authentication and token issuance.
//!
//! Client applications ("domains") delegate login, 2FA and token
//! verification here; each tenant's policy arrives as a signed config
//! document fetched from a URL the tenant controls. This crate is the
//! trust/protocol engine only: HTTP routing, org CRUD, the mail provider
//! and the row store are collaborators behind the traits in
//! [`services::email`], [`services::tokens`] and [`db`].

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use crate::config::ServiceConfig;
use crate::db::{AuthStore, PgStore};
use crate::error::ServiceError;
use crate::services::{
    Authenticator, ConfigVerifier, DomainRoleService, FixedWindowLimiter, GoogleProvider, Mailer,
    NoOrgContext, OneTimeTokenService, OrgContextSource, SmtpMailer, TokenService,
    TwoFactorService,
};
use crate::utils::{Clock, SystemClock};

/// One explicit context built at process start and injected everywhere; no
/// component reads ambient global state.
#[derive(Clone)]
pub struct ServiceContext {
    pub config: ServiceConfig,
    pub store: Arc<dyn AuthStore>,
    pub mailer: Arc<dyn Mailer>,
    pub clock: Arc<dyn Clock>,
    pub config_verifier: ConfigVerifier,
    pub tokens: TokenService,
    pub two_fa: TwoFactorService,
    pub one_time: OneTimeTokenService,
    pub roles: DomainRoleService,
    pub authn: Authenticator,
    pub google: GoogleProvider,
    pub login_limiter: Arc<FixedWindowLimiter>,
    pub request_token_limiter: Arc<FixedWindowLimiter>,
    pub exchange_limiter: Arc<FixedWindowLimiter>,
}

impl ServiceContext {
    /// Wire the engine against explicit collaborators.
    pub fn new(
        config: ServiceConfig,
        store: Arc<dyn AuthStore>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_org_source(config, store, mailer, clock, Arc::new(NoOrgContext))
    }

    pub fn with_org_source(
        config: ServiceConfig,
        store: Arc<dyn AuthStore>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
        org_source: Arc<dyn OrgContextSource>,
    ) -> Self {
        let secret = config.shared_secret.clone();
        let audience = config.audience.clone();

        let config_verifier = ConfigVerifier::new(secret.clone(), audience.clone());
        let tokens = TokenService::new(
            secret.clone(),
            audience.clone(),
            config.access_token_ttl_minutes,
            store.clone(),
            org_source,
            clock.clone(),
        );
        let two_fa = TwoFactorService::new(
            secret.clone(),
            audience.clone(),
            config.totp_issuer.clone(),
            store.clone(),
            clock.clone(),
        );
        let one_time = OneTimeTokenService::new(
            secret.clone(),
            config.public_base_url.clone(),
            store.clone(),
            mailer.clone(),
            clock.clone(),
        );
        let roles = DomainRoleService::new(store.clone(), clock.clone());
        let authn = Authenticator::new(
            secret,
            audience,
            store.clone(),
            roles.clone(),
            two_fa.clone(),
            tokens.clone(),
            clock.clone(),
        );
        let google = GoogleProvider::new(
            config.google.client_id.clone(),
            config.google.client_secret.clone(),
            config.google.redirect_uri.clone(),
        );

        let login_limiter = Arc::new(FixedWindowLimiter::new(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
            clock.clone(),
        ));
        let request_token_limiter = Arc::new(FixedWindowLimiter::new(
            config.rate_limit.request_token_attempts,
            config.rate_limit.request_token_window_seconds,
            clock.clone(),
        ));
        let exchange_limiter = Arc::new(FixedWindowLimiter::new(
            config.rate_limit.exchange_attempts,
            config.rate_limit.exchange_window_seconds,
            clock.clone(),
        ));

        Self {
            config,
            store,
            mailer,
            clock,
            config_verifier,
            tokens,
            two_fa,
            one_time,
            roles,
            authn,
            google,
            login_limiter,
            request_token_limiter,
            exchange_limiter,
        }
    }

    /// Production wiring: Postgres store (schema ensured), SMTP mailer,
    /// wall clock.
    pub async fn connect(config: ServiceConfig) -> Result<Self, ServiceError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .map_err(|e| {
                ServiceError::Internal(
                    crate::error::ErrorCode::StorageFailure,
                    format!("database connect: {e}"),
                )
            })?;
        let store = PgStore::new(pool);
        store.migrate().await?;

        let mailer = SmtpMailer::new(&config.smtp)?;
        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(mailer),
            Arc::new(SystemClock),
        ))
    }
}

//! Shared setup for integration tests: the engine wired against the
//! in-memory store, a capturing mailer and a settable clock.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use uoa_service::config::{GoogleOAuthConfig, RateLimitConfig, ServiceConfig, SmtpConfig};
use uoa_service::db::MemStore;
use uoa_service::models::{AuthMethod, ClientConfig, User};
use uoa_service::services::MemoryMailer;
use uoa_service::utils::ManualClock;
use uoa_service::ServiceContext;

pub const SHARED_SECRET: &str = "integration-test-shared-secret-0123456789";
pub const AUDIENCE: &str = "uoa";
pub const CONFIG_URL: &str = "https://tenant.example/.well-known/uoa.json";
pub const REDIRECT_URL: &str = "https://app.tenant.example/callback";

pub struct TestApp {
    pub ctx: ServiceContext,
    pub store: Arc<MemStore>,
    pub mailer: Arc<MemoryMailer>,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn spawn() -> Self {
        let store = Arc::new(MemStore::new());
        let mailer = Arc::new(MemoryMailer::new());
        // Anchored to the real clock so JWT expiry checks line up, but
        // advanceable for window and TTL tests.
        let clock = Arc::new(ManualClock::at(Utc::now()));

        let ctx = ServiceContext::new(
            test_config(),
            store.clone(),
            mailer.clone(),
            clock.clone(),
        );
        Self {
            ctx,
            store,
            mailer,
            clock,
        }
    }

    /// Last outbound email to `to`, or panic: the flows under test promise
    /// one.
    pub fn last_email_to(&self, to: &str) -> uoa_service::services::email::SentEmail {
        self.mailer
            .sent_to(to)
            .into_iter()
            .last()
            .unwrap_or_else(|| panic!("no email captured for {to}"))
    }
}

pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        shared_secret: SHARED_SECRET.to_string(),
        audience: AUDIENCE.to_string(),
        public_base_url: "https://id.uoa.example".to_string(),
        access_token_ttl_minutes: 30,
        database_url: "postgres://unused-in-tests".to_string(),
        log_level: "info".to_string(),
        totp_issuer: "UOA".to_string(),
        smtp: SmtpConfig {
            host: "smtp.test.example".to_string(),
            port: 587,
            user: "mailer".to_string(),
            password: "unused".to_string(),
            from: "no-reply@uoa.example".to_string(),
        },
        google: GoogleOAuthConfig {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
        },
        rate_limit: RateLimitConfig {
            login_attempts: 10,
            login_window_seconds: 900,
            request_token_attempts: 5,
            request_token_window_seconds: 3600,
            exchange_attempts: 30,
            exchange_window_seconds: 60,
        },
    }
}

/// A tenant config the way the trust verifier would hand it over.
pub fn tenant_config() -> ClientConfig {
    ClientConfig {
        domain: "tenant.example".to_string(),
        redirect_urls: vec![REDIRECT_URL.to_string()],
        auth_methods: vec![AuthMethod::Password, AuthMethod::LoginLink, AuthMethod::Social],
        ..ClientConfig::default()
    }
}

/// Insert a password-bearing user the way the registration flow would.
pub async fn seed_password_user(app: &TestApp, email: &str, password: &str) -> User {
    use uoa_service::db::AuthStore;
    use uoa_service::utils::{hash_password, Password};

    let hash = hash_password(&Password::new(password.to_string())).unwrap();
    let user = User::new(email.to_string(), email.to_string(), None).with_password(hash);
    app.store.insert_user(&user).await.unwrap();
    user
}

/// Pull the raw one-time token out of a captured email link.
pub fn token_from_email(text: &str) -> String {
    let start = text
        .find("token=")
        .expect("email text carries a token link")
        + "token=".len();
    text[start..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect()
}

/// Pull the authorization code out of a redirect URL.
pub fn code_from_redirect(redirect_to: &str) -> String {
    let url = url::Url::parse(redirect_to).expect("redirect is a valid url");
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .expect("redirect carries a code parameter")
}

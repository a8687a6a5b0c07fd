//! Tenant policy document.
//!
//! Ephemeral: fetched from the tenant-controlled URL and signature-verified
//! on every request, never persisted. All fields are defaulted so a partial
//! document still parses; the trust checks live in
//! [`crate::services::config_trust`], not here.

use serde::{Deserialize, Serialize};

/// Authentication methods a tenant may enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Password,
    LoginLink,
    Social,
}

/// Whether one email is one identity service-wide, or one per tenant domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserScope {
    #[default]
    Global,
    PerDomain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMode {
    #[default]
    SelfService,
    Closed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrationPolicy {
    #[serde(default)]
    pub mode: RegistrationMode,
    /// When set, only these email domains may create new accounts.
    /// Existing accounts are never blocked by a later tightening.
    #[serde(default)]
    pub email_domains: Option<Vec<String>>,
    /// true: registration verifies email and sets a password in one step;
    /// false: passwordless registration, sign-in via login links.
    #[serde(default)]
    pub set_password: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OrgFeatures {
    #[serde(default)]
    pub orgs: bool,
    #[serde(default)]
    pub teams: bool,
    #[serde(default)]
    pub groups: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub redirect_urls: Vec<String>,
    #[serde(default)]
    pub auth_methods: Vec<AuthMethod>,
    #[serde(default)]
    pub user_scope: UserScope,
    #[serde(default)]
    pub require_two_fa: bool,
    #[serde(default)]
    pub registration: RegistrationPolicy,
    #[serde(default)]
    pub social_providers: Vec<String>,
    #[serde(default)]
    pub org_features: OrgFeatures,
    #[serde(default)]
    pub language: Option<String>,
    /// Opaque theme settings, rendered by the (out-of-scope) UI layer.
    #[serde(default)]
    pub theme: Option<serde_json::Value>,
}

impl ClientConfig {
    pub fn allows_method(&self, method: AuthMethod) -> bool {
        self.auth_methods.contains(&method)
    }

    pub fn allows_provider(&self, provider: &str) -> bool {
        self.social_providers.iter().any(|p| p == provider)
    }

    /// Registration allow-list check for NEW accounts only.
    pub fn email_domain_allowed(&self, email: &str) -> bool {
        let Some(allowed) = &self.registration.email_domains else {
            return true;
        };
        let Some((_, domain)) = email.rsplit_once('@') else {
            return false;
        };
        allowed
            .iter()
            .any(|d| d.trim().eq_ignore_ascii_case(domain))
    }
}

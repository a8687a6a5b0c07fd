//! Social identity providers.
//!
//! A provider exchanges its authorization code for a verified profile; the
//! signed state token carries the tenant context across the provider
//! round-trip so no server-side session is needed. Provider failures
//! collapse to the generic authentication failure; details are logged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, ServiceError};
use crate::services::tokens::{sign_claims, verify_claims, PURPOSE_SOCIAL_STATE};

const STATE_TTL_MINUTES: i64 = 10;

/// Profile returned by a provider after code exchange.
#[derive(Debug, Clone)]
pub struct SocialProfile {
    pub provider: String,
    pub email: String,
    /// Whether the provider itself vouches for the address. Accounts with
    /// unverified emails must never authenticate.
    pub email_verified: bool,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn exchange_code(&self, code: &str) -> Result<SocialProfile, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    email: String,
    verified_email: bool,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Clone)]
pub struct GoogleProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client_id,
            client_secret,
            redirect_uri,
            http,
        }
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    async fn exchange_code(&self, code: &str) -> Result<SocialProfile, ServiceError> {
        let failed = |detail: String| {
            tracing::error!(provider = "google", detail = %detail, "provider code exchange failed");
            ServiceError::authentication_failed(detail)
        };

        let token_res = self
            .http
            .post("https://oauth2.googleapis.com/token")
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| failed(format!("token request: {e}")))?;

        if !token_res.status().is_success() {
            return Err(failed(format!("token endpoint returned {}", token_res.status())));
        }
        let token: GoogleTokenResponse = token_res
            .json()
            .await
            .map_err(|e| failed(format!("token response decode: {e}")))?;

        let info_res = self
            .http
            .get("https://www.googleapis.com/oauth2/v2/userinfo")
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| failed(format!("userinfo request: {e}")))?;

        if !info_res.status().is_success() {
            return Err(failed(format!("userinfo endpoint returned {}", info_res.status())));
        }
        let info: GoogleUserInfo = info_res
            .json()
            .await
            .map_err(|e| failed(format!("userinfo decode: {e}")))?;

        Ok(SocialProfile {
            provider: "google".to_string(),
            email: info.email,
            email_verified: info.verified_email,
            name: info.name,
            avatar_url: info.picture,
        })
    }
}

/// Claims of the signed state token that survives the provider round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialStateClaims {
    pub provider: String,
    pub domain: String,
    pub config_url: String,
    pub redirect_url: String,
    pub aud: String,
    pub purpose: String,
    pub iat: i64,
    pub exp: i64,
}

pub fn issue_state(
    secret: &str,
    audience: &str,
    now: chrono::DateTime<chrono::Utc>,
    provider: &str,
    domain: &str,
    config_url: &str,
    redirect_url: &str,
) -> Result<String, ServiceError> {
    let claims = SocialStateClaims {
        provider: provider.to_string(),
        domain: domain.to_string(),
        config_url: config_url.to_string(),
        redirect_url: redirect_url.to_string(),
        aud: audience.to_string(),
        purpose: PURPOSE_SOCIAL_STATE.to_string(),
        iat: now.timestamp(),
        exp: (now + chrono::Duration::minutes(STATE_TTL_MINUTES)).timestamp(),
    };
    sign_claims(secret, &claims)
}

pub fn verify_state(
    secret: &str,
    audience: &str,
    token: &str,
) -> Result<SocialStateClaims, ServiceError> {
    let claims: SocialStateClaims = verify_claims(secret, audience, token)?;
    if claims.purpose != PURPOSE_SOCIAL_STATE {
        return Err(ServiceError::Unauthorized(
            ErrorCode::InvalidToken,
            format!("token purpose {} is not a social state", claims.purpose),
        ));
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const SECRET: &str = "shared-signing-secret-for-tests";

    #[test]
    fn state_roundtrip_preserves_tenant_context() {
        let token = issue_state(
            SECRET,
            "uoa",
            Utc::now(),
            "google",
            "tenant.example",
            "https://t/cfg",
            "https://t/cb",
        )
        .unwrap();

        let claims = verify_state(SECRET, "uoa", &token).unwrap();
        assert_eq!(claims.provider, "google");
        assert_eq!(claims.domain, "tenant.example");
        assert_eq!(claims.config_url, "https://t/cfg");
        assert_eq!(claims.redirect_url, "https://t/cb");
    }

    #[test]
    fn state_rejects_wrong_secret_or_audience() {
        let token = issue_state(
            SECRET,
            "uoa",
            Utc::now(),
            "google",
            "tenant.example",
            "https://t/cfg",
            "https://t/cb",
        )
        .unwrap();

        assert!(verify_state("other-secret-other-secret", "uoa", &token).is_err());
        assert!(verify_state(SECRET, "someone-else", &token).is_err());
    }
}

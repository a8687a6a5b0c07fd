//! Authorization-code and access-token issuance.
//!
//! Codes are 256-bit random values stored as peppered hashes and redeemed
//! through a conditional update, so a code can be exchanged exactly once
//! even under racing requests or multiple server processes. Access tokens
//! are stateless HS256 JWTs carrying everything verification needs (role
//! and org context are embedded at mint time, so verify does no lookups).

use chrono::Duration;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

use crate::db::AuthStore;
use crate::error::{ErrorCode, ServiceError};
use crate::models::{AuthorizationCode, ClientConfig, RoleKind};
use crate::services::client_id::{create_client_id, normalize_domain};
use crate::utils::encoding::{peppered_hash, random_token};
use crate::utils::Clock;

/// `purpose` claim values. Access, 2FA-challenge and social-state tokens
/// share one signing secret; the purpose claim is what keeps one class from
/// ever verifying as another.
pub const PURPOSE_ACCESS: &str = "access";
pub const PURPOSE_TWO_FA_CHALLENGE: &str = "two_fa_challenge";
pub const PURPOSE_SOCIAL_STATE: &str = "social_state";

/// Org membership snapshot embedded into access tokens at mint time.
/// Sourced from the (out-of-scope) org subsystem via [`OrgContextSource`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgContext {
    pub org_id: String,
    pub org_role: Option<String>,
    #[serde(default)]
    pub team_ids: Vec<String>,
    #[serde(default)]
    pub team_roles: Vec<String>,
    #[serde(default)]
    pub group_ids: Vec<String>,
    #[serde(default)]
    pub group_admin: Vec<bool>,
}

/// Interface boundary to the org/team/group subsystem.
#[async_trait::async_trait]
pub trait OrgContextSource: Send + Sync {
    async fn org_context(
        &self,
        user_id: Uuid,
        domain: &str,
    ) -> Result<Option<OrgContext>, ServiceError>;
}

/// Default source for deployments without the org feature.
pub struct NoOrgContext;

#[async_trait::async_trait]
impl OrgContextSource for NoOrgContext {
    async fn org_context(
        &self,
        _user_id: Uuid,
        _domain: &str,
    ) -> Result<Option<OrgContext>, ServiceError> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user id).
    pub sub: String,
    pub email: String,
    pub domain: String,
    pub client_id: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub org: Option<OrgContext>,
    pub aud: String,
    pub purpose: String,
    pub iat: i64,
    pub exp: i64,
}

/// Code-exchange response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenExchange {
    pub access_token: String,
    pub token_type: String,
}

impl TokenExchange {
    fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
        }
    }
}

/// Sign a claims payload with the shared secret. Also used by the 2FA
/// challenge and social-state tokens.
pub(crate) fn sign_claims<T: Serialize>(secret: &str, claims: &T) -> Result<String, ServiceError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ServiceError::Internal(ErrorCode::Internal, format!("token signing failed: {e}")))
}

/// Verify signature, audience and expiry, then deserialize the claims. The
/// caller still has to check the `purpose` claim.
pub(crate) fn verify_claims<T: DeserializeOwned>(
    secret: &str,
    audience: &str,
    token: &str,
) -> Result<T, ServiceError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[audience]);
    validation.set_required_spec_claims(&["aud", "exp"]);

    jsonwebtoken::decode::<T>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        ServiceError::Unauthorized(ErrorCode::InvalidToken, format!("token verification: {e}"))
    })
}

#[derive(Clone)]
pub struct TokenService {
    secret: String,
    audience: String,
    access_ttl_minutes: i64,
    store: Arc<dyn AuthStore>,
    org_source: Arc<dyn OrgContextSource>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(
        secret: String,
        audience: String,
        access_ttl_minutes: i64,
        store: Arc<dyn AuthStore>,
        org_source: Arc<dyn OrgContextSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            secret,
            audience,
            access_ttl_minutes,
            store,
            org_source,
            clock,
        }
    }

    /// Create a single-use authorization code bound to the tenant context
    /// it was issued under. Returns the raw code; only its peppered hash is
    /// persisted.
    pub async fn issue_authorization_code(
        &self,
        user_id: Uuid,
        domain: &str,
        config_url: &str,
        redirect_url: &str,
    ) -> Result<String, ServiceError> {
        let raw = random_token();
        let code = AuthorizationCode::new(
            peppered_hash(&raw, &self.secret),
            user_id,
            normalize_domain(domain),
            config_url.to_string(),
            redirect_url.to_string(),
            self.clock.now(),
        );
        self.store.insert_authorization_code(&code).await?;

        tracing::debug!(user_id = %user_id, domain = %code.domain, "authorization code issued");
        Ok(raw)
    }

    /// Exchange a code for an access token. The conditional update in the
    /// store is the concurrency arbiter: a second exchange of the same code
    /// affects zero rows and fails here as invalid-or-already-used.
    pub async fn exchange_code(
        &self,
        code: &str,
        config: &ClientConfig,
        config_url: &str,
    ) -> Result<TokenExchange, ServiceError> {
        let invalid = || {
            ServiceError::BadRequest(
                ErrorCode::InvalidToken,
                "authorization code invalid, expired or already used".to_string(),
            )
        };

        let consumed = self
            .store
            .consume_authorization_code(
                &peppered_hash(code, &self.secret),
                config_url,
                self.clock.now(),
            )
            .await?
            .ok_or_else(invalid)?;

        // Issued under one tenant context, redeemable only under the same.
        if consumed.domain != normalize_domain(&config.domain) {
            return Err(invalid());
        }

        let user = self
            .store
            .find_user_by_id(consumed.user_id)
            .await?
            .ok_or_else(invalid)?;

        let role = self
            .store
            .find_domain_role(&consumed.domain, user.id)
            .await?
            .map(|r| r.role())
            .unwrap_or(RoleKind::User);

        let org = self.org_source.org_context(user.id, &consumed.domain).await?;

        let access_token =
            self.mint_access_token(user.id, &user.email, &consumed.domain, role, org)?;
        Ok(TokenExchange::bearer(access_token))
    }

    pub fn mint_access_token(
        &self,
        user_id: Uuid,
        email: &str,
        domain: &str,
        role: RoleKind,
        org: Option<OrgContext>,
    ) -> Result<String, ServiceError> {
        let now = self.clock.now();
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            domain: domain.to_string(),
            client_id: create_client_id(domain, &self.secret),
            role: role.as_str().to_string(),
            org,
            aud: self.audience.clone(),
            purpose: PURPOSE_ACCESS.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(self.access_ttl_minutes)).timestamp(),
        };
        sign_claims(&self.secret, &claims)
    }

    /// Verify an access token. Signature, audience, expiry and purpose all
    /// collapse to one generic UNAUTHORIZED.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, ServiceError> {
        let claims: AccessTokenClaims = verify_claims(&self.secret, &self.audience, token)?;
        if claims.purpose != PURPOSE_ACCESS {
            return Err(ServiceError::Unauthorized(
                ErrorCode::InvalidToken,
                format!("token purpose {} is not an access token", claims.purpose),
            ));
        }
        Ok(claims)
    }

}

/// Open-redirect guard: the requested URL must exactly match an allow-list
/// entry; with no request, default only when exactly one URL is allowed.
pub fn select_redirect_url(
    allowed: &[String],
    requested: Option<&str>,
) -> Result<String, ServiceError> {
    match requested {
        Some(requested) => {
            if allowed.iter().any(|a| a == requested) {
                Ok(requested.to_string())
            } else {
                Err(ServiceError::BadRequest(
                    ErrorCode::InvalidRedirectUrl,
                    format!("redirect url {requested} is not in the allow-list"),
                ))
            }
        }
        None => match allowed {
            [only] => Ok(only.clone()),
            [] => Err(ServiceError::BadRequest(
                ErrorCode::InvalidRedirectUrl,
                "no redirect urls configured".to_string(),
            )),
            _ => Err(ServiceError::BadRequest(
                ErrorCode::InvalidRedirectUrl,
                "redirect url required when several are allowed".to_string(),
            )),
        },
    }
}

/// Append the issued code as a query parameter on the selected URL.
pub fn build_redirect_to_url(redirect_url: &str, code: &str) -> Result<String, ServiceError> {
    let mut url = Url::parse(redirect_url).map_err(|e| {
        ServiceError::BadRequest(
            ErrorCode::InvalidRedirectUrl,
            format!("redirect url unparsable: {e}"),
        )
    })?;
    url.query_pairs_mut().append_pair("code", code);
    Ok(url.to_string())
}

//! Tenant config fetching and trust verification.
//!
//! The config document is a signed JWT served from a URL the tenant
//! controls. Verification order: the URL itself must not smuggle the shared
//! secret out, the signature and audience must check out, the payload must
//! not contain the secret anywhere (it gets rendered into client-facing
//! UI), and the domain claim must belong to the host that served it. Every
//! rejection collapses to the same generic error; the reason is only
//! logged.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::error::{ErrorCode, ServiceError};
use crate::models::ClientConfig;
use crate::services::client_id::normalize_domain;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Substrings shorter than this are too noisy to scan for; the exact-match
/// check still applies.
const SECRET_SCAN_MIN_LEN: usize = 8;

#[derive(Clone)]
pub struct ConfigVerifier {
    secret: String,
    audience: String,
    http: reqwest::Client,
}

impl ConfigVerifier {
    pub fn new(secret: String, audience: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            secret,
            audience,
            http,
        }
    }

    /// Fetch the tenant's config document and run the full trust check.
    pub async fn fetch_and_verify(&self, config_url: &str) -> Result<ClientConfig, ServiceError> {
        self.guard_config_url(config_url)?;

        let response = self.http.get(config_url).send().await.map_err(|e| {
            ServiceError::BadRequest(
                ErrorCode::ConfigFetchFailed,
                format!("config fetch from {config_url} failed: {e}"),
            )
        })?;

        if !response.status().is_success() {
            return Err(ServiceError::BadRequest(
                ErrorCode::ConfigFetchFailed,
                format!("config fetch from {config_url} returned {}", response.status()),
            ));
        }

        let document = response.text().await.map_err(|e| {
            ServiceError::BadRequest(
                ErrorCode::ConfigFetchFailed,
                format!("config body read failed: {e}"),
            )
        })?;

        self.verify_document(document.trim(), config_url)
    }

    /// Verify a fetched document against the URL it was fetched from.
    pub fn verify_document(
        &self,
        document: &str,
        config_url: &str,
    ) -> Result<ClientConfig, ServiceError> {
        self.guard_config_url(config_url)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["aud"]);
        validation.validate_exp = false;

        let decoded = jsonwebtoken::decode::<Value>(
            document,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| ServiceError::config_rejected(format!("signature/audience check: {e}")))?;

        // The payload is later rendered into tenant UI; it must not carry
        // the signing secret anywhere, not even nested.
        if self.value_contains_secret(&decoded.claims) {
            return Err(ServiceError::config_rejected(
                "config payload contains the shared secret",
            ));
        }

        let config: ClientConfig = serde_json::from_value(decoded.claims)
            .map_err(|e| ServiceError::config_rejected(format!("config deserialization: {e}")))?;

        self.check_domain_binding(&config, config_url)?;
        Ok(config)
    }

    /// Reject config URLs that would exfiltrate the shared secret, raw or
    /// percent-encoded.
    fn guard_config_url(&self, config_url: &str) -> Result<(), ServiceError> {
        let encoded = urlencoding::encode(&self.secret);
        if config_url.contains(&self.secret) || config_url.contains(encoded.as_ref()) {
            return Err(ServiceError::config_rejected(
                "config url contains the shared secret",
            ));
        }
        Ok(())
    }

    /// A signed document for tenant A must not claim tenant B's domain: the
    /// domain claim has to match the host serving the config, or be a
    /// parent of it.
    fn check_domain_binding(
        &self,
        config: &ClientConfig,
        config_url: &str,
    ) -> Result<(), ServiceError> {
        let claimed = normalize_domain(&config.domain);
        if claimed.is_empty() {
            return Err(ServiceError::config_rejected("config has no domain claim"));
        }

        let url = Url::parse(config_url)
            .map_err(|e| ServiceError::config_rejected(format!("config url unparsable: {e}")))?;
        let host = url
            .host_str()
            .map(normalize_domain)
            .ok_or_else(|| ServiceError::config_rejected("config url has no host"))?;

        if host == claimed || host.ends_with(&format!(".{claimed}")) {
            Ok(())
        } else {
            Err(ServiceError::config_rejected(format!(
                "domain claim {claimed} does not match config host {host}"
            )))
        }
    }

    fn value_contains_secret(&self, value: &Value) -> bool {
        match value {
            Value::String(s) => self.string_contains_secret(s),
            Value::Array(items) => items.iter().any(|v| self.value_contains_secret(v)),
            Value::Object(map) => map
                .iter()
                .any(|(k, v)| self.string_contains_secret(k) || self.value_contains_secret(v)),
            _ => false,
        }
    }

    fn string_contains_secret(&self, s: &str) -> bool {
        if self.secret.len() >= SECRET_SCAN_MIN_LEN {
            s.contains(&self.secret)
        } else {
            s == self.secret
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "shared-signing-secret-for-tests";
    const AUDIENCE: &str = "uoa";

    fn verifier() -> ConfigVerifier {
        ConfigVerifier::new(SECRET.to_string(), AUDIENCE.to_string())
    }

    fn sign(claims: &Value) -> String {
        sign_with(claims, SECRET)
    }

    fn sign_with(claims: &Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn base_claims() -> Value {
        json!({
            "aud": AUDIENCE,
            "domain": "tenant.example",
            "redirect_urls": ["https://tenant.example/callback"],
            "auth_methods": ["password"],
        })
    }

    #[test]
    fn valid_document_verifies() {
        let token = sign(&base_claims());
        let config = verifier()
            .verify_document(&token, "https://tenant.example/.well-known/uoa.json")
            .unwrap();
        assert_eq!(config.domain, "tenant.example");
        assert_eq!(config.redirect_urls.len(), 1);
    }

    #[test]
    fn subdomain_host_may_claim_parent_domain() {
        let token = sign(&base_claims());
        assert!(verifier()
            .verify_document(&token, "https://auth.tenant.example/uoa.json")
            .is_ok());
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let token = sign_with(&base_claims(), "some-other-secret-entirely");
        let err = verifier()
            .verify_document(&token, "https://tenant.example/uoa.json")
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigRejected);
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let mut claims = base_claims();
        claims["aud"] = json!("someone-else");
        let token = sign(&claims);
        assert!(verifier()
            .verify_document(&token, "https://tenant.example/uoa.json")
            .is_err());
    }

    #[test]
    fn missing_audience_is_rejected() {
        let mut claims = base_claims();
        claims.as_object_mut().unwrap().remove("aud");
        let token = sign(&claims);
        assert!(verifier()
            .verify_document(&token, "https://tenant.example/uoa.json")
            .is_err());
    }

    #[test]
    fn domain_claim_must_match_config_host() {
        let mut claims = base_claims();
        claims["domain"] = json!("victim.example");
        let token = sign(&claims);
        let err = verifier()
            .verify_document(&token, "https://tenant.example/uoa.json")
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigRejected);
    }

    #[test]
    fn secret_in_top_level_string_is_rejected() {
        let mut claims = base_claims();
        claims["language"] = json!(SECRET);
        let token = sign(&claims);
        assert!(verifier()
            .verify_document(&token, "https://tenant.example/uoa.json")
            .is_err());
    }

    #[test]
    fn secret_nested_in_object_or_array_is_rejected() {
        let mut claims = base_claims();
        claims["theme"] = json!({ "colors": { "primary": format!("x{SECRET}y") } });
        let token = sign(&claims);
        assert!(verifier()
            .verify_document(&token, "https://tenant.example/uoa.json")
            .is_err());

        let mut claims = base_claims();
        claims["redirect_urls"] = json!(["https://ok.example", SECRET]);
        let token = sign(&claims);
        assert!(verifier()
            .verify_document(&token, "https://tenant.example/uoa.json")
            .is_err());
    }

    #[test]
    fn secret_as_substring_is_rejected() {
        let mut claims = base_claims();
        claims["theme"] = json!(format!("prefix-{SECRET}-suffix"));
        let token = sign(&claims);
        assert!(verifier()
            .verify_document(&token, "https://tenant.example/uoa.json")
            .is_err());
    }

    #[test]
    fn config_url_containing_secret_is_rejected_before_use() {
        let token = sign(&base_claims());
        let url = format!("https://tenant.example/uoa.json?k={SECRET}");
        assert!(verifier().verify_document(&token, &url).is_err());

        let encoded = urlencoding::encode(SECRET).into_owned();
        let url = format!("https://tenant.example/uoa.json?k={encoded}");
        assert!(verifier().verify_document(&token, &url).is_err());
    }

    #[test]
    fn all_rejections_share_one_public_message() {
        let bad_sig_token = sign_with(&base_claims(), "wrong-secret-wrong-secret");
        let bad_sig = verifier()
            .verify_document(&bad_sig_token, "https://tenant.example/c")
            .unwrap_err();

        let mut claims = base_claims();
        claims["domain"] = json!("victim.example");
        let bad_domain_token = sign(&claims);
        let bad_domain = verifier()
            .verify_document(&bad_domain_token, "https://tenant.example/c")
            .unwrap_err();

        assert_eq!(bad_sig.public_message(), bad_domain.public_message());
    }
}

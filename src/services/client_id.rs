//! Domain identity resolution.
//!
//! A tenant's client id is a deterministic keyed hash of its normalized
//! domain. It doubles as the domain-scoped bearer credential and as a
//! diagnostic identifier; nothing here touches storage.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::models::UserScope;

type HmacSha256 = Hmac<Sha256>;

/// Trim, lowercase, strip one trailing dot.
pub fn normalize_domain(domain: &str) -> String {
    let trimmed = domain.trim().to_ascii_lowercase();
    trimmed.strip_suffix('.').unwrap_or(&trimmed).to_string()
}

/// `hex(HMAC-SHA256(normalize(domain)))` keyed by the shared secret.
/// Deterministic and normalization-insensitive.
pub fn create_client_id(domain: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(normalize_domain(domain).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a presented client id against the expected one.
pub fn verify_client_id(presented: &str, domain: &str, secret: &str) -> bool {
    let expected = create_client_id(domain, secret);
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Identity key for a user: the bare email under global scope,
/// `"{domain}|{email}"` under per-domain scope. This is what decouples
/// "one identity per email" from "one identity per (domain, email)".
pub fn user_key(scope: UserScope, email: &str, domain: &str) -> String {
    let email = email.trim().to_ascii_lowercase();
    match scope {
        UserScope::Global => email,
        UserScope::PerDomain => format!("{}|{}", normalize_domain(domain), email),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-shared-secret-0123456789abcdef";

    #[test]
    fn client_id_is_deterministic() {
        assert_eq!(
            create_client_id("example.com", SECRET),
            create_client_id("example.com", SECRET)
        );
    }

    #[test]
    fn client_id_is_normalization_insensitive() {
        let canonical = create_client_id("example.com", SECRET);
        assert_eq!(create_client_id(" Example.com ", SECRET), canonical);
        assert_eq!(create_client_id("EXAMPLE.COM.", SECRET), canonical);
        assert_eq!(create_client_id("example.com.", SECRET), canonical);
    }

    #[test]
    fn client_id_distinguishes_domains_and_secrets() {
        assert_ne!(
            create_client_id("example.com", SECRET),
            create_client_id("example.org", SECRET)
        );
        assert_ne!(
            create_client_id("example.com", SECRET),
            create_client_id("example.com", "another-secret")
        );
    }

    #[test]
    fn verify_client_id_accepts_only_the_expected_hash() {
        let id = create_client_id("example.com", SECRET);
        assert!(verify_client_id(&id, "Example.COM", SECRET));
        assert!(!verify_client_id(&id, "example.org", SECRET));
        assert!(!verify_client_id("deadbeef", "example.com", SECRET));
    }

    #[test]
    fn user_key_scoping() {
        assert_eq!(
            user_key(UserScope::Global, " A@Example.com ", "tenant.example"),
            "a@example.com"
        );
        assert_eq!(
            user_key(UserScope::PerDomain, "a@example.com", "Tenant.Example."),
            "tenant.example|a@example.com"
        );
    }
}

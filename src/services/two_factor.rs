//! TOTP-based two-factor authentication.
//!
//! Secret lifecycle: 160 random bits, base32 for authenticator apps,
//! AES-256-GCM at rest under a key derived from the shared secret with
//! HKDF-SHA256 (fixed salt/info, so the key is stable across restarts and
//! isolated from every other use of that secret). Verification implements
//! RFC 6238 directly. The challenge token bridging primary auth and the
//! code prompt is a short-lived signed JWT and is never logged.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::db::AuthStore;
use crate::error::{ErrorCode, ServiceError};
use crate::models::User;
use crate::services::tokens::{sign_claims, verify_claims, PURPOSE_TWO_FA_CHALLENGE};
use crate::utils::encoding::{base32_decode, base32_encode};
use crate::utils::Clock;

/// HKDF inputs. Fixed on purpose: the derived key must be stable across
/// restarts and must never collide with another derivation from the same
/// shared secret.
const KEY_SALT: &[u8] = b"uoa/two-fa/key-salt/v1";
const KEY_INFO: &[u8] = b"uoa/two-fa/secret-encryption";

const CIPHERTEXT_VERSION: &str = "v1";
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

const CHALLENGE_TTL_MINUTES: i64 = 5;

pub const DEFAULT_DIGITS: u32 = 6;
pub const DEFAULT_PERIOD: u64 = 30;
pub const DEFAULT_SKEW: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotpAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl std::fmt::Display for TotpAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TotpAlgorithm::Sha1 => write!(f, "SHA1"),
            TotpAlgorithm::Sha256 => write!(f, "SHA256"),
            TotpAlgorithm::Sha512 => write!(f, "SHA512"),
        }
    }
}

/// Generate a fresh TOTP secret: 160 random bits, base32, no padding.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 20];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base32_encode(&bytes)
}

fn compute_hmac(key: &[u8], data: &[u8], algorithm: TotpAlgorithm) -> Vec<u8> {
    match algorithm {
        TotpAlgorithm::Sha1 => {
            let mut mac =
                <Hmac<Sha1> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        TotpAlgorithm::Sha256 => {
            let mut mac =
                <Hmac<Sha256> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        TotpAlgorithm::Sha512 => {
            let mut mac =
                <Hmac<Sha512> as Mac>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// RFC 6238: HMAC over the 8-byte big-endian step counter, dynamic
/// truncation, zero-padded decimal digits.
pub fn totp_at(
    secret: &[u8],
    unix_seconds: u64,
    algorithm: TotpAlgorithm,
    digits: u32,
    period: u64,
) -> String {
    let counter = unix_seconds / period;
    let hash = compute_hmac(secret, &counter.to_be_bytes(), algorithm);

    let offset = (hash[hash.len() - 1] & 0x0f) as usize;
    let binary = (u32::from(hash[offset] & 0x7f) << 24)
        | (u32::from(hash[offset + 1]) << 16)
        | (u32::from(hash[offset + 2]) << 8)
        | u32::from(hash[offset + 3]);

    let code = binary % 10u32.pow(digits);
    format!("{:0>width$}", code, width = digits as usize)
}

/// Check a code at `unix_seconds`, accepting ± `skew` steps of clock drift.
pub fn verify_totp(
    secret: &[u8],
    code: &str,
    unix_seconds: u64,
    algorithm: TotpAlgorithm,
    digits: u32,
    period: u64,
    skew: u64,
) -> bool {
    let mut matched = false;
    for offset in 0..=skew {
        let ahead = totp_at(secret, unix_seconds + offset * period, algorithm, digits, period);
        matched |= bool::from(ahead.as_bytes().ct_eq(code.as_bytes()));
        if offset > 0 {
            let behind = totp_at(
                secret,
                unix_seconds.saturating_sub(offset * period),
                algorithm,
                digits,
                period,
            );
            matched |= bool::from(behind.as_bytes().ct_eq(code.as_bytes()));
        }
    }
    matched
}

/// Enrollment URI for authenticator apps.
pub fn otpauth_uri(issuer: &str, account: &str, secret: &str) -> String {
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm=SHA1&digits={}&period={}",
        urlencoding::encode(issuer),
        urlencoding::encode(account),
        secret,
        urlencoding::encode(issuer),
        DEFAULT_DIGITS,
        DEFAULT_PERIOD,
    )
}

/// Claims of the signed challenge token issued between primary auth and the
/// code prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwoFaChallengeClaims {
    pub sub: String,
    pub domain: String,
    pub config_url: String,
    pub redirect_url: String,
    pub auth_method: String,
    pub aud: String,
    pub purpose: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TwoFactorService {
    secret: String,
    audience: String,
    issuer: String,
    cipher_key: [u8; 32],
    store: Arc<dyn AuthStore>,
    clock: Arc<dyn Clock>,
}

impl TwoFactorService {
    pub fn new(
        secret: String,
        audience: String,
        issuer: String,
        store: Arc<dyn AuthStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cipher_key = derive_key(&secret);
        Self {
            secret,
            audience,
            issuer,
            cipher_key,
            store,
            clock,
        }
    }

    /// Generate a secret for the user, persist it encrypted (2FA stays off
    /// until [`confirm_enrollment`](Self::confirm_enrollment)) and return
    /// the base32 secret plus the enrollment URI.
    pub async fn start_enrollment(&self, user: &User) -> Result<(String, String), ServiceError> {
        let secret = generate_secret();
        let encrypted = encrypt_secret(&self.cipher_key, &secret)?;
        self.store
            .set_two_fa_secret(user.id, &encrypted, self.clock.now())
            .await?;

        let uri = otpauth_uri(&self.issuer, &user.email, &secret);
        tracing::info!(user_id = %user.id, "two-factor enrollment started");
        Ok((secret, uri))
    }

    /// Verify the first code against the stored secret and switch 2FA on.
    pub async fn confirm_enrollment(&self, user_id: Uuid, code: &str) -> Result<(), ServiceError> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| ServiceError::authentication_failed("unknown user at enrollment"))?;

        let encrypted = user.two_fa_secret.as_deref().ok_or_else(|| {
            ServiceError::authentication_failed("enrollment confirm without a stored secret")
        })?;
        self.check_code(encrypted, code)?;

        self.store
            .set_two_fa_enabled(user_id, true, self.clock.now())
            .await?;
        tracing::info!(user_id = %user_id, "two-factor enabled");
        Ok(())
    }

    /// Login-time code check. Disabled 2FA, missing secret and wrong code
    /// are all the same generic authentication failure.
    pub fn verify_login_code(&self, user: &User, code: &str) -> Result<(), ServiceError> {
        if !user.two_fa_enabled {
            return Err(ServiceError::authentication_failed(
                "2fa code presented but 2fa is not enabled",
            ));
        }
        let encrypted = user
            .two_fa_secret
            .as_deref()
            .ok_or_else(|| ServiceError::authentication_failed("2fa enabled without a secret"))?;
        self.check_code(encrypted, code)
    }

    fn check_code(&self, encrypted_secret: &str, code: &str) -> Result<(), ServiceError> {
        let secret_b32 = decrypt_secret(&self.cipher_key, encrypted_secret)?;
        let secret = base32_decode(&secret_b32).ok_or_else(|| {
            ServiceError::Internal(
                ErrorCode::SecretCorrupted,
                "stored 2fa secret is not base32".to_string(),
            )
        })?;

        let now = self.clock.unix_seconds();
        if verify_totp(
            &secret,
            code,
            now,
            TotpAlgorithm::Sha1,
            DEFAULT_DIGITS,
            DEFAULT_PERIOD,
            DEFAULT_SKEW,
        ) {
            Ok(())
        } else {
            Err(ServiceError::authentication_failed("totp code mismatch"))
        }
    }

    /// Issue the signed challenge token after primary auth succeeded but
    /// before the 2FA code was presented.
    pub fn issue_challenge(
        &self,
        user_id: Uuid,
        domain: &str,
        config_url: &str,
        redirect_url: &str,
        auth_method: &str,
    ) -> Result<String, ServiceError> {
        let now = self.clock.now();
        let claims = TwoFaChallengeClaims {
            sub: user_id.to_string(),
            domain: domain.to_string(),
            config_url: config_url.to_string(),
            redirect_url: redirect_url.to_string(),
            auth_method: auth_method.to_string(),
            aud: self.audience.clone(),
            purpose: PURPOSE_TWO_FA_CHALLENGE.to_string(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::minutes(CHALLENGE_TTL_MINUTES)).timestamp(),
        };
        sign_claims(&self.secret, &claims)
    }

    pub fn verify_challenge(&self, token: &str) -> Result<TwoFaChallengeClaims, ServiceError> {
        let claims: TwoFaChallengeClaims =
            verify_claims(&self.secret, &self.audience, token)?;
        if claims.purpose != PURPOSE_TWO_FA_CHALLENGE {
            return Err(ServiceError::Unauthorized(
                ErrorCode::InvalidToken,
                format!("token purpose {} is not a 2fa challenge", claims.purpose),
            ));
        }
        Ok(claims)
    }
}

/// Derive the at-rest encryption key from the shared secret.
fn derive_key(shared_secret: &str) -> [u8; 32] {
    let hkdf = Hkdf::<Sha256>::new(Some(KEY_SALT), shared_secret.as_bytes());
    let mut key = [0u8; 32];
    hkdf.expand(KEY_INFO, &mut key)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

/// Encrypt a TOTP secret: `v1:<iv_b64>:<ciphertext_b64>:<tag_b64>`.
pub fn encrypt_secret(key: &[u8; 32], plaintext: &str) -> Result<String, ServiceError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut combined = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
        .map_err(|e| {
            ServiceError::Internal(ErrorCode::Internal, format!("2fa secret encryption: {e}"))
        })?;
    let tag = combined.split_off(combined.len() - TAG_LEN);

    Ok(format!(
        "{CIPHERTEXT_VERSION}:{}:{}:{}",
        BASE64.encode(iv),
        BASE64.encode(&combined),
        BASE64.encode(&tag),
    ))
}

/// Decrypt a stored secret. Any version, shape or length mismatch is
/// corruption, never silently accepted.
pub fn decrypt_secret(key: &[u8; 32], stored: &str) -> Result<String, ServiceError> {
    let corrupted =
        |detail: &str| ServiceError::Internal(ErrorCode::SecretCorrupted, detail.to_string());

    let parts: Vec<&str> = stored.split(':').collect();
    let [version, iv_b64, ct_b64, tag_b64] = parts.as_slice() else {
        return Err(corrupted("stored 2fa secret does not have four segments"));
    };
    if *version != CIPHERTEXT_VERSION {
        return Err(corrupted("unknown 2fa ciphertext version"));
    }

    let iv = BASE64
        .decode(iv_b64)
        .map_err(|_| corrupted("2fa ciphertext iv is not base64"))?;
    let ciphertext = BASE64
        .decode(ct_b64)
        .map_err(|_| corrupted("2fa ciphertext body is not base64"))?;
    let tag = BASE64
        .decode(tag_b64)
        .map_err(|_| corrupted("2fa ciphertext tag is not base64"))?;
    if iv.len() != IV_LEN || tag.len() != TAG_LEN {
        return Err(corrupted("2fa ciphertext segment lengths are wrong"));
    }

    let mut combined = ciphertext;
    combined.extend_from_slice(&tag);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), combined.as_slice())
        .map_err(|_| corrupted("2fa ciphertext failed authentication"))?;

    String::from_utf8(plaintext).map_err(|_| corrupted("2fa secret is not utf-8"))
}

//! Password hashing with Argon2id.
//!
//! Parameters are pinned (t=3, 32 MiB, p=1) rather than taken from
//! `Argon2::default()` so hashing cost is stable across crate upgrades.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};

use crate::error::{ErrorCode, ServiceError};

/// Fixed hash verified whenever no real hash exists for the presented
/// identity. The work factor matches real hashes, so a lookup miss takes as
/// long as a genuine mismatch and account existence cannot be timed.
const DUMMY_HASH: &str =
    "$argon2id$v=19$m=32768,t=3,p=1$c29tZXNhbHRzb21lc2FsdA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// Newtype for plaintext passwords to keep them out of logs.
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: String) -> Self {
        Self(password)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

fn hasher() -> Argon2<'static> {
    let params =
        Params::new(32 * 1024, 3, 1, None).expect("pinned argon2 parameters are valid");
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

pub fn hash_password(password: &Password) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher()
        .hash_password(password.as_str().as_bytes(), &salt)
        .map_err(|e| {
            ServiceError::Internal(ErrorCode::Internal, format!("password hashing failed: {e}"))
        })?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &Password, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    hasher()
        .verify_password(password.as_str().as_bytes(), &parsed)
        .is_ok()
}

/// Verify against the stored hash, or against [`DUMMY_HASH`] when the user
/// is absent or has no password. The dummy branch always returns false but
/// burns the same Argon2 work.
pub fn verify_password_or_dummy(password: &Password, stored_hash: Option<&str>) -> bool {
    match stored_hash {
        Some(hash) => verify_password(password, hash),
        None => {
            let _ = verify_password(password, DUMMY_HASH);
            false
        }
    }
}

//! Token generation, peppered hashing and RFC 4648 base32.

use rand::RngCore;
use sha2::{Digest, Sha256};

const BASE32_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Generate a 256-bit random token, hex encoded. Used for one-time tokens
/// and authorization codes; the raw value is transported exactly once and
/// only its peppered hash is persisted.
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `sha256(token ‖ pepper)`, hex encoded. The pepper is the process-wide
/// shared secret, so a database-only leak yields nothing replayable.
pub fn peppered_hash(token: &str, pepper: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(pepper.as_bytes());
    hex::encode(hasher.finalize())
}

/// RFC 4648 base32, no padding. Authenticator apps expect this alphabet.
pub fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u64 = 0;
    let mut bits = 0;

    for &byte in data {
        buffer = (buffer << 8) | u64::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

/// Decode RFC 4648 base32, tolerating lowercase and stray padding.
pub fn base32_decode(encoded: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits = 0;

    for c in encoded.chars() {
        let c = c.to_ascii_uppercase();
        if c == '=' {
            continue;
        }
        let value = BASE32_ALPHABET.iter().position(|&a| a as char == c)? as u64;
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
    }
    Some(out)
}

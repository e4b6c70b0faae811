//! Salted password digests in the `"<salt_hex>$<digest_hex>"` format.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Salt length in bytes before hex encoding.
pub const SALT_BYTES: usize = 16;

const DELIMITER: char = '$';

/// A stored digest that could not be split into its salt and hash parts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DigestError {
    #[error("password digest is malformed")]
    Malformed,
}

/// Hash `plaintext` with a fresh random salt.
///
/// The result is never the same for two calls, even with the same password.
pub fn hash_password(plaintext: &str) -> String {
    let salt = generate_salt();
    let hash = salted_sha256(plaintext, &salt);
    format!("{salt}{DELIMITER}{hash}")
}

/// Check `plaintext` against a stored digest.
///
/// Returns `Ok(false)` for a wrong password and `Err(DigestError::Malformed)`
/// when the digest itself is unusable, so callers can tell the two apart.
pub fn verify_password(plaintext: &str, digest: &str) -> Result<bool, DigestError> {
    let (salt, expected) = split_digest(digest)?;
    let computed = salted_sha256(plaintext, salt);
    Ok(constant_time_eq(computed.as_bytes(), expected.as_bytes()))
}

/// Burn the same amount of work as a real verification.
///
/// Used for unknown usernames so response timing does not reveal whether the
/// account exists.
pub(crate) fn dummy_verify(plaintext: &str) {
    std::hint::black_box(salted_sha256(std::hint::black_box(plaintext), DUMMY_SALT));
}

/// Same length as a generated salt so the dummy hash costs the same.
const DUMMY_SALT: &str = "00000000000000000000000000000000";

fn split_digest(digest: &str) -> Result<(&str, &str), DigestError> {
    match digest.split_once(DELIMITER) {
        Some((salt, hash)) if !salt.is_empty() && !hash.is_empty() => Ok((salt, hash)),
        _ => Err(DigestError::Malformed),
    }
}

fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn salted_sha256(plaintext: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare without exiting early on the first differing byte.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

//! One-time secrets for activation and password-reset links.
//!
//! The plain secret only ever leaves the process inside an email link; the
//! store keeps its SHA-256 digest and lookups re-hash whatever is presented.

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

/// Reset links stop working this long after they are issued.
pub const RESET_TOKEN_TTL: Duration = Duration::minutes(10);

const SECRET_BYTES: usize = 32;

#[derive(Debug)]
pub struct OneTimeSecret {
    pub plain: String,
    pub hash: String,
}

pub fn generate_one_time_secret() -> OneTimeSecret {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let plain = hex::encode(bytes);
    let hash = hash_one_time_secret(&plain);
    OneTimeSecret { plain, hash }
}

pub fn hash_one_time_secret(plain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plain.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn reset_expiry_from(now: OffsetDateTime) -> OffsetDateTime {
    now + RESET_TOKEN_TTL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_secret_is_64_hex_chars() {
        let secret = generate_one_time_secret();
        assert_eq!(secret.plain.len(), 64);
        assert!(secret.plain.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(secret.plain, secret.hash);
    }

    #[test]
    fn hashing_is_deterministic_and_matches_generated_hash() {
        let secret = generate_one_time_secret();
        assert_eq!(hash_one_time_secret(&secret.plain), secret.hash);
        assert_eq!(
            hash_one_time_secret(&secret.plain),
            hash_one_time_secret(&secret.plain)
        );
    }

    #[test]
    fn different_secrets_hash_differently() {
        let a = generate_one_time_secret();
        let b = generate_one_time_secret();
        assert_ne!(a.plain, b.plain);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            hash_one_time_secret("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn reset_window_is_ten_minutes() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(reset_expiry_from(now) - now, Duration::minutes(10));
    }
}

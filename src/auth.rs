//! API key verification against a stored SHA-256 digest.

use crate::error::AuthError;
use sha2::{Digest, Sha256};

/// Hex encoded SHA-256 digest of the service secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedCredential(String);

impl HashedCredential {
    /// Wrap an already computed digest (64 hex characters).
    pub fn from_hex(digest: &str) -> Result<Self, AuthError> {
        let digest = digest.trim();
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AuthError::MalformedHash);
        }
        Ok(Self(digest.to_ascii_lowercase()))
    }

    /// Digest a plaintext secret.
    pub fn from_secret(secret: &str) -> Self {
        Self(hash_secret(secret))
    }

    /// Lowercase hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check a presented secret against this digest.
    pub fn verify(&self, presented: &str) -> bool {
        verify(presented, &self.0)
    }

    /// Same as [`verify`](Self::verify) but shaped for `?` propagation.
    pub fn authorize(&self, presented: Option<&str>) -> Result<(), AuthError> {
        match presented {
            Some(secret) if self.verify(secret) => Ok(()),
            _ => Err(AuthError::InvalidCredential),
        }
    }
}

/// SHA-256 of `secret`, lowercase hex.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Returns true when the digest of `presented` equals `stored_hash`.
///
/// Never fails: an empty secret or a malformed stored hash simply does not
/// match.
pub fn verify(presented: &str, stored_hash: &str) -> bool {
    if presented.is_empty() {
        return false;
    }
    hash_secret(presented).eq_ignore_ascii_case(stored_hash.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_matching_secret_verifies() {
        let stored = hash_secret("mysecretkey");
        assert!(verify("mysecretkey", &stored));
        assert!(verify("mysecretkey", &stored.to_uppercase()));
        assert_eq!(
            stored,
            "2afe16a6d630d94cd07c68d5e35568655bf5f60bef29c4f1321fc857816afec9"
        );
    }

    #[test]
    fn test_single_bit_mutation_fails() {
        let secret = "mysecretkey";
        let stored = hash_secret(secret);

        for (i, _) in secret.bytes().enumerate() {
            for bit in 0..8 {
                let mut bytes = secret.as_bytes().to_vec();
                bytes[i] ^= 1 << bit;
                let mutated = String::from_utf8_lossy(&bytes).into_owned();
                assert!(!verify(&mutated, &stored), "byte {} bit {}", i, bit);
            }
        }
    }

    #[test]
    fn test_empty_and_malformed_inputs() {
        let stored = hash_secret("mysecretkey");
        assert!(!verify("", &stored));
        assert!(!verify("mysecretkey", ""));
        assert!(!verify("mysecretkey", "not-a-hash"));
    }

    #[test]
    fn test_hashed_credential_from_hex() {
        let digest = hash_secret("abc");
        let credential = HashedCredential::from_hex(&digest).unwrap();
        assert!(credential.verify("abc"));
        assert_eq!(credential, HashedCredential::from_secret("abc"));

        assert_eq!(
            HashedCredential::from_hex("xyz"),
            Err(AuthError::MalformedHash)
        );
    }

    #[test]
    fn test_authorize() {
        let credential = HashedCredential::from_secret("abc");
        assert!(credential.authorize(Some("abc")).is_ok());
        assert_eq!(
            credential.authorize(Some("abd")),
            Err(AuthError::InvalidCredential)
        );
        assert_eq!(credential.authorize(None), Err(AuthError::InvalidCredential));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_secret_verifies_against_own_digest(secret in ".{1,64}") {
            let stored = hash_secret(&secret);
            prop_assert!(verify(&secret, &stored));
            prop_assert!(HashedCredential::from_hex(&stored).unwrap().verify(&secret));
        }

        #[test]
        fn prop_any_flipped_bit_is_rejected(secret in ".{1,32}") {
            let stored = hash_secret(&secret);
            let bytes = secret.as_bytes();

            for i in 0..bytes.len() {
                for bit in 0..8 {
                    let mut mutated = bytes.to_vec();
                    mutated[i] ^= 1 << bit;
                    let mutated = String::from_utf8_lossy(&mutated).into_owned();
                    if mutated != secret {
                        prop_assert!(!verify(&mutated, &stored), "byte {} bit {}", i, bit);
                    }
                }
            }
        }
    }
}

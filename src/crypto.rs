//! Password hashing logic.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};

use crate::config::Argon2 as ArgonConfig;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
}

impl From<CryptoError> for crate::error::ServerError {
    fn from(err: CryptoError) -> Self {
        crate::error::ServerError::Internal {
            details: err.to_string(),
        }
    }
}

/// Password manager.
///
/// One-way, salted and memory-hard: a stolen table never yields the
/// original passwords.
pub struct Crypto {
    argon2: Argon2<'static>,
}

impl Crypto {
    /// Create a new [`Crypto`] from optional configuration.
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();
        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hash a password with a fresh random salt, PHC string output.
    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(hash.to_string())
    }

    /// Check a password against a stored PHC hash.
    pub fn verify_password(&self, password: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };

        self.argon2
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap_crypto() -> Crypto {
        // low-cost parameters to keep tests fast.
        Crypto::new(Some(ArgonConfig {
            memory_cost: 1024,
            iterations: 1,
            parallelism: 1,
            hash_length: 32,
        }))
        .unwrap()
    }

    #[test]
    fn test_hash_and_verify() {
        let crypto = cheap_crypto();

        let hash = crypto.hash_password("secret1").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(crypto.verify_password("secret1", &hash));
        assert!(!crypto.verify_password("secret2", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        let crypto = cheap_crypto();

        let first = crypto.hash_password("secret1").unwrap();
        let second = crypto.hash_password("secret1").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_verify_garbage_hash() {
        let crypto = cheap_crypto();
        assert!(!crypto.verify_password("secret1", "not-a-phc-string"));
    }
}

//! # nb-auth-argon
//!
//! Argon2-based implementation of `CredentialProvider`.
//! Handles password hashing and the one-shot activation / reset codes.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use nb_core::error::{AppError, Result};
use nb_core::traits::{CredentialProvider, OneShotCode};
use sha2::{Digest, Sha256};

/// Random bytes behind each one-shot code (hex-encoded to 32 chars).
const CODE_BYTES: usize = 16;
const SALT_BYTES: usize = 16;

#[derive(Default)]
pub struct ArgonCredentials {
    argon: Argon2<'static>,
}

impl ArgonCredentials {
    pub fn new() -> Self {
        Self::default()
    }
}

fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    getrandom::getrandom(&mut buf).map_err(|e| AppError::Internal(format!("rng failure: {e}")))?;
    Ok(buf)
}

impl CredentialProvider for ArgonCredentials {
    fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::encode_b64(&random_bytes::<SALT_BYTES>()?)
            .map_err(|e| AppError::Internal(format!("salt encoding: {e}")))?;
        let hash = self
            .argon
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("password hashing: {e}")))?;
        Ok(hash.to_string())
    }

    /// Verifies if a provided password matches a stored Argon2 hash.
    fn verify_password(&self, password: &str, hash: &str) -> bool {
        let parsed_hash = match PasswordHash::new(hash) {
            Ok(p) => p,
            Err(_) => {
                tracing::debug!("stored password hash is not a PHC string");
                return false;
            }
        };
        self.argon
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok()
    }

    fn issue_code(&self) -> Result<OneShotCode> {
        let code = hex::encode(random_bytes::<CODE_BYTES>()?);
        let digest = self.digest_code(&code);
        Ok(OneShotCode { code, digest })
    }

    /// Codes are high-entropy random tokens, so a plain SHA-256 suffices.
    fn digest_code(&self, code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(code.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let creds = ArgonCredentials::new();
        let hash = creds.hash_password("hunter2").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(creds.verify_password("hunter2", &hash));
        assert!(!creds.verify_password("hunter3", &hash));
    }

    #[test]
    fn test_salts_differ() {
        let creds = ArgonCredentials::new();
        assert_ne!(
            creds.hash_password("same").unwrap(),
            creds.hash_password("same").unwrap()
        );
    }

    #[test]
    fn test_garbage_hash_never_verifies() {
        assert!(!ArgonCredentials::new().verify_password("x", "plaintext"));
    }

    #[test]
    fn test_issued_code_matches_digest() {
        let creds = ArgonCredentials::new();
        let issued = creds.issue_code().unwrap();
        assert_eq!(issued.code.len(), CODE_BYTES * 2);
        assert_eq!(creds.digest_code(&issued.code), issued.digest);
        assert_ne!(issued.code, issued.digest);
        assert_ne!(creds.issue_code().unwrap().code, issued.code);
    }
}

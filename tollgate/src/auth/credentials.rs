//! Credential generation, hashing, and verification.
//!
//! Everything secret-shaped in tollgate flows through here: API-key secrets
//! and OTP codes are hashed with Argon2id into PHC strings (per-record salt
//! and parameters embedded), and verified with the fixed-time comparison the
//! `password_hash` machinery provides. Plaintext is returned to callers
//! exactly once at generation time and never stored.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::{Engine as _, engine::general_purpose};
use rand::prelude::RngExt;
use rand::rng;

use crate::errors::Error;

/// Length of the random prefix before base64url encoding.
const PREFIX_BYTES: usize = 6;
/// Length of the random secret before base64url encoding.
const SECRET_BYTES: usize = 32;

/// Argon2 hashing parameters.
#[derive(Debug, Clone, Copy)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2Params {
    /// Create Argon2 instance with these parameters.
    fn to_argon2(self) -> Result<Argon2<'static>, Error> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None).map_err(|e| Error::Internal {
            operation: format!("create argon2 params: {e}"),
        })?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for Argon2Params {
    /// Secure defaults for production (Argon2id RFC recommendations)
    fn default() -> Self {
        Self {
            memory_kib: 19456, // 19 MB
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Hash a secret using Argon2id.
///
/// Uses the provided parameters or secure defaults if None. The returned PHC
/// string carries salt and parameters, so records hashed under old parameters
/// keep verifying after a config change.
pub fn hash_secret_with_params(input: &[u8], params: Option<Argon2Params>) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = if let Some(p) = params {
        p.to_argon2()?
    } else {
        Argon2Params::default().to_argon2()?
    };

    let hash = argon2.hash_password(input, &salt).map_err(|e| Error::Internal {
        operation: format!("hash secret: {e}"),
    })?;

    Ok(hash.to_string())
}

/// Hash a secret using Argon2id with default secure parameters.
pub fn hash_secret(input: &[u8]) -> Result<String, Error> {
    hash_secret_with_params(input, None)
}

/// Verify a secret against a PHC hash string.
///
/// Verification uses the parameters embedded in the hash itself and compares
/// in fixed time. Returns boolean only; the caller decides what a mismatch
/// means.
pub fn verify_secret(input: &[u8], hash: &str) -> Result<bool, Error> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| Error::Internal {
        operation: format!("parse hash: {e}"),
    })?;

    // Verification always uses params from the hash
    let argon2 = Argon2::default();
    Ok(argon2.verify_password(input, &parsed_hash).is_ok())
}

/// A freshly generated API key, split into its public and secret halves.
#[derive(Debug, Clone)]
pub struct GeneratedApiKey {
    /// Public lookup handle, stored in the clear.
    pub prefix: String,
    /// High-entropy secret, never persisted.
    pub secret: String,
}

impl GeneratedApiKey {
    /// The full key in the `prefix.secret` form callers put in `X-API-Key`.
    pub fn full(&self) -> String {
        format!("{}.{}", self.prefix, self.secret)
    }
}

/// Generate a new API key: an 8-char public prefix and a 43-char secret,
/// both base64url without padding.
pub fn generate_api_key() -> GeneratedApiKey {
    let mut prefix_bytes = [0u8; PREFIX_BYTES];
    rng().fill(&mut prefix_bytes);

    let mut secret_bytes = [0u8; SECRET_BYTES];
    rng().fill(&mut secret_bytes);

    GeneratedApiKey {
        prefix: general_purpose::URL_SAFE_NO_PAD.encode(prefix_bytes),
        secret: general_purpose::URL_SAFE_NO_PAD.encode(secret_bytes),
    }
}

/// Split a raw `prefix.secret` credential into its halves, rejecting
/// malformed input before any storage lookup happens. Minimum lengths are
/// deliberately below what [`generate_api_key`] produces so older, shorter
/// keys keep parsing.
pub fn parse_full_key(raw: &str) -> Option<(&str, &str)> {
    let (prefix, secret) = raw.split_once('.')?;
    if prefix.len() < 4 || secret.len() < 16 {
        return None;
    }
    Some((prefix, secret))
}

/// Generate a 6-digit one-time passcode from a cryptographically secure
/// source. Leading zeros are preserved ("004217" is a valid code).
pub fn generate_otp_code() -> String {
    let n: u32 = rng().random_range(0..1_000_000);
    format!("{n:06}")
}

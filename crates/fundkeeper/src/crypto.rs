//! Password credentials and secret-token hashing.

use std::num::NonZeroU32;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::util::random_bytes;

const OUTPUT_LEN: usize = 32;
const SALT_LEN: usize = 16;
const SCHEME: &str = "pbkdf2_sha256";

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

fn derive(secret: &[u8], salt: &[u8], iterations: NonZeroU32) -> [u8; OUTPUT_LEN] {
    let mut out = [0u8; OUTPUT_LEN];
    pbkdf2_hmac::<Sha256>(secret, salt, iterations.get(), &mut out);
    out
}

pub fn validate_password(password: &str) -> Result<()> {
    let len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(Error::validation(format!(
            "password must be between {MIN_PASSWORD_LEN} and {MAX_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Hash a password into a self-describing credential string:
/// `pbkdf2_sha256$<iterations>$<salt>$<hash>`.
pub fn hash_password(password: &str, iterations: u32) -> Result<String> {
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| Error::internal("password hash iterations must be non-zero"))?;
    let salt = random_bytes(SALT_LEN)?;
    let hash = derive(password.as_bytes(), &salt, iterations);
    Ok(format!(
        "{SCHEME}${}${}${}",
        iterations,
        STANDARD_NO_PAD.encode(&salt),
        STANDARD_NO_PAD.encode(hash)
    ))
}

/// [`hash_password`] on the blocking pool; PBKDF2 is too slow for an async worker.
pub async fn hash_password_blocking(password: &str, iterations: u32) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password(&password, iterations))
        .await
        .map_err(|e| Error::internal(format!("password hashing task failed: {e}")))?
}

pub async fn verify_password_blocking(password: &str, credential: &str) -> Result<bool> {
    let (password, credential) = (password.to_string(), credential.to_string());
    tokio::task::spawn_blocking(move || verify_password(&password, &credential))
        .await
        .map_err(|e| Error::internal(format!("password verification task failed: {e}")))
}

/// Constant-time comparison for short shared secrets such as the admin code.
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    subtle::ConstantTimeEq::ct_eq(presented.as_bytes(), expected.as_bytes()).into()
}

/// Constant-time check of `password` against a credential from [`hash_password`].
/// Malformed credentials never match.
pub fn verify_password(password: &str, credential: &str) -> bool {
    let mut parts = credential.split('$');
    let (Some(SCHEME), Some(iter), Some(salt), Some(expected), None) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let Some(iterations) = iter.parse::<u32>().ok().and_then(NonZeroU32::new) else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (STANDARD_NO_PAD.decode(salt), STANDARD_NO_PAD.decode(expected)) else {
        return false;
    };
    if expected.len() != OUTPUT_LEN {
        return false;
    }

    let out = derive(password.as_bytes(), &salt, iterations);
    subtle::ConstantTimeEq::ct_eq(out.as_ref(), expected.as_slice()).into()
}

/// One-way hash of a secret token, hex-encoded. Only this value is persisted.
pub fn hash_token(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// 256 bits of randomness, hex-encoded.
pub fn generate_token() -> Result<String> {
    Ok(hex::encode(random_bytes(32)?))
}

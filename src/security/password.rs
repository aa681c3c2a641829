//! Password hashing and verification utilities.
//!
//! Centralizes Argon2 handling for protected room passwords. Verification
//! runs the full Argon2 comparison, which is constant-time with respect to
//! the stored digest.

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};

/// Hash a room password using default Argon2 settings.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    Ok(argon2
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Verify a password against a stored Argon2 hash.
///
/// An unparsable stored hash verifies as false rather than erroring; a
/// corrupt row must not read as a password match.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Burn CPU time equivalent to a real verification.
///
/// Used when the target chat has no stored hash, so rejection latency does
/// not reveal whether a protected room exists.
pub fn dummy_verify(password: &str) {
    const DUMMY_HASH: &str =
        "$argon2id$v=19$m=19456,t=2,p=1$cGFsYXZlci1kdW1teQ$Zm9yY2VzLXJlYWwtYXJnb24yLXdvcmsx";

    if let Ok(parsed) = PasswordHash::new(DUMMY_HASH) {
        let _ = Argon2::default().verify_password(password.as_bytes(), &parsed);
    }
}

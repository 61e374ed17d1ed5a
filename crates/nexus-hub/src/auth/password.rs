//! Password hashing
//!
//! PBKDF2-HMAC-SHA512 with a per-record salt and iteration count. The
//! parameters are stored alongside the hash so the work factor can be
//! raised for future records without a migration.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha512;

use nexus_core::secure::constant_time_eq;

/// Iteration count for newly created records
pub const PBKDF2_ITERATIONS: u32 = 210_000;

/// Salt length in bytes
pub const SALT_LEN: usize = 16;

/// Derived key length in bytes
pub const HASH_LEN: usize = 64;

/// A derived password record with its parameters
#[derive(Debug, Clone)]
pub struct PasswordRecord {
    /// Derived key
    pub hash: Vec<u8>,
    /// Random salt
    pub salt: Vec<u8>,
    /// Iteration count used to derive `hash`
    pub iterations: u32,
}

/// Derive a record for a new password
pub fn hash_password(password: &str) -> PasswordRecord {
    let mut salt = vec![0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut hash = vec![0u8; HASH_LEN];
    pbkdf2_hmac::<Sha512>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut hash);

    PasswordRecord {
        hash,
        salt,
        iterations: PBKDF2_ITERATIONS,
    }
}

/// Verify a candidate password against a stored record.
///
/// Derivation uses the record's own iteration count; the final comparison
/// is constant-time.
pub fn verify_password(password: &str, record: &PasswordRecord) -> bool {
    let mut candidate = vec![0u8; record.hash.len().max(1)];
    pbkdf2_hmac::<Sha512>(
        password.as_bytes(),
        &record.salt,
        record.iterations,
        &mut candidate,
    );
    constant_time_eq(&candidate, &record.hash)
}

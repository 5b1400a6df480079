//! Hashing primitives for AcadChain
//!
//! Block hashes, transaction ids and credential fingerprints are all SHA-256.
//! Proof-of-work difficulty is counted in leading zero hex digits of the digest.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// A raw SHA-256 digest.
pub type Sha256Hash = [u8; 32];

/// Length of a transaction id in hex characters.
pub const TRANSACTION_ID_LEN: usize = 16;

/// Hash arbitrary bytes.
pub fn sha256(bytes: &[u8]) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Hash arbitrary bytes and return the lowercase hex digest.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256(bytes))
}

/// Truncated hex digest used as a transaction id.
pub fn short_id(bytes: &[u8]) -> String {
    let mut id = sha256_hex(bytes);
    id.truncate(TRANSACTION_ID_LEN);
    id
}

/// Count how many leading hex digits of `hash` are `0`.
pub fn leading_zero_nibbles(hash: &Sha256Hash) -> u32 {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 2;
            continue;
        }
        if byte >> 4 == 0 {
            count += 1;
        }
        break;
    }
    count
}

/// Whether `hash` carries at least `difficulty` leading zero hex digits.
pub fn meets_difficulty(hash: &Sha256Hash, difficulty: u32) -> bool {
    leading_zero_nibbles(hash) >= difficulty
}

/// Generate a unique, human-readable credential id such as
/// `CRED_20240131120000_1a2b3c4d`.
pub fn generate_credential_id(prefix: &str) -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let mut suffix = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("{}_{}_{}", prefix, timestamp, hex::encode(suffix))
}

/// Feed a length-prefixed string into a running hasher so adjacent fields
/// cannot run together.
pub(crate) fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

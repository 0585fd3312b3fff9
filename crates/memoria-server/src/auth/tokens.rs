//! Token and code generation/hashing. All stored tokens are SHA-256 hashed
//! — raw tokens exist only in the HTTP response and, for the device flow,
//! briefly in the in-memory flow table between approval and the device's
//! next poll.

use rand::RngCore;
use sha2::{Digest, Sha256};

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// A 256-bit random token, hex-encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A 26-char random hex device code (distinct from node ids — device codes
/// are never prefix-resolved, so there's no need to share `id::new_id`'s
/// sortable format).
pub fn generate_device_code() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `ABCD-1234`: 4 uppercase letters, a hyphen, 4 digits — 9 characters,
/// hyphen at index 4. Meant to be read aloud and typed by hand.
pub fn generate_user_code() -> String {
    const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    let letters: String = (0..4)
        .map(|_| LETTERS[(rng.next_u32() as usize) % LETTERS.len()] as char)
        .collect();
    let digits: String = (0..4).map(|_| (rng.next_u32() % 10).to_string()).collect();
    format!("{letters}-{digits}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_hashes_identically() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
    }

    #[test]
    fn distinct_inputs_hash_distinctly() {
        assert_ne!(hash_token("abc"), hash_token("abd"));
    }

    #[test]
    fn user_code_matches_expected_shape() {
        let code = generate_user_code();
        assert_eq!(code.len(), 9);
        assert_eq!(code.as_bytes()[4], b'-');
    }
}

//! Sortable identifiers and rough token accounting.
//!
//! IDs are 26-character strings: a 10-character millisecond timestamp prefix
//! followed by 16 characters of randomness, both encoded in Crockford's
//! base32 alphabet (sortable, no padding, excludes ambiguous characters).
//! Lexicographic order on the string therefore tracks creation order.

use rand::RngCore;

const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const TIMESTAMP_CHARS: usize = 10;
const RANDOM_CHARS: usize = 16;

fn encode_base32(mut value: u128, width: usize) -> String {
    let mut buf = vec![0u8; width];
    for slot in buf.iter_mut().rev() {
        *slot = ALPHABET[(value & 0x1f) as usize];
        value >>= 5;
    }
    String::from_utf8(buf).expect("base32 alphabet is ASCII")
}

/// A new 26-character, time-sortable identifier.
pub fn new_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u128;
    let mut rand_bytes = [0u8; 10];
    rand::thread_rng().fill_bytes(&mut rand_bytes);
    let randomness = rand_bytes.iter().fold(0u128, |acc, b| (acc << 8) | *b as u128);

    let mut id = encode_base32(millis, TIMESTAMP_CHARS);
    id.push_str(&encode_base32(randomness, RANDOM_CHARS));
    id
}

/// A rough token estimate: one token per four characters, rounded down,
/// with a floor of 1 for any non-empty string.
pub fn estimate_tokens(s: &str) -> u32 {
    let len = s.chars().count();
    if len == 0 {
        return 0;
    }
    std::cmp::max(1, (len / 4) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_is_26_chars() {
        let id = new_id();
        assert_eq!(id.chars().count(), 26);
    }

    #[test]
    fn new_id_sorts_with_creation_order() {
        let a = new_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_id();
        assert!(a < b);
    }

    #[test]
    fn estimate_tokens_matches_spec_examples() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("The sky is blue"), 3);
        assert_eq!(estimate_tokens(&"x".repeat(40)), 10);
    }
}

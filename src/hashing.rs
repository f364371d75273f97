//! Stable, restart-safe identity hashing.
//!
//! The hash of a canonical string is the SHA-256 hex digest sampled at every
//! fifth character, read as a base-16 integer. Thirteen hex digits always fit
//! in a `u64`, so the value is identical on every platform.

use sha2::{Digest, Sha256};

/// Width of the zero-padded decimal form used for record file names.
pub const HASH_WIDTH: usize = 16;

/// Computes the stable hash of `canonical`.
#[must_use]
pub fn stable_hash(canonical: &str) -> u64 {
    let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
    let sampled: String = digest.chars().step_by(5).collect();
    // 64 hex chars sampled every 5th gives 13 digits, never more than 52 bits.
    u64::from_str_radix(&sampled, 16).unwrap_or(0)
}

/// Returns the zero-padded decimal file stem for `canonical`.
#[must_use]
pub fn stable_file_stem(canonical: &str) -> String {
    format!("{:0width$}", stable_hash(canonical), width = HASH_WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_value() {
        // sha256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        let digest = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let sampled: String = digest.chars().step_by(5).collect();
        assert_eq!(sampled.len(), 13);
        assert_eq!(
            stable_hash(""),
            u64::from_str_radix(&sampled, 16).unwrap()
        );
    }

    #[test]
    fn test_file_stem_width() {
        let stem = stable_file_stem("Addons/foo_1.0.0.zip");
        assert_eq!(stem.len(), HASH_WIDTH);
        assert!(stem.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_distinct_inputs() {
        assert_ne!(stable_hash("Foo|1.0.0"), stable_hash("Foo|1.0.1"));
    }

    proptest! {
        #[test]
        fn prop_hash_is_deterministic(s in ".*") {
            prop_assert_eq!(stable_hash(&s), stable_hash(&s.clone()));
            prop_assert!(stable_hash(&s) < (1u64 << 52));
        }
    }
}

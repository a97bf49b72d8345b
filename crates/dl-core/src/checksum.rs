//! SHA-256 fingerprint of the configuration a run was executed with.

use sha2::{Digest, Sha256};

/// Compute the hex SHA-256 checksum of a string
pub fn compute_checksum(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable_and_distinct() {
        let a = compute_checksum("name: shop");
        assert_eq!(a, compute_checksum("name: shop"));
        assert_ne!(a, compute_checksum("name: shop2"));
        assert_eq!(a.len(), 64);
    }
}

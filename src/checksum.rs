//! CRC32 and SHA-256 over full file content (spec §4.9).

use sha2::{Digest, Sha256};

/// CRC32 (IEEE polynomial `0xEDB88320`, reflected, XOR-out `0xFFFFFFFF`) as
/// 8 lowercase hex characters.
pub fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(data))
}

/// SHA-256 as 64 lowercase hex characters.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_of_empty_is_zero() {
        assert_eq!(crc32_hex(b""), "00000000");
    }

    #[test]
    fn sha256_of_empty_matches_known_digest() {
        assert_eq!(sha256_hex(b""), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }

    #[test]
    fn crc32_is_deterministic() {
        assert_eq!(crc32_hex(b"hello"), crc32_hex(b"hello"));
        assert_ne!(crc32_hex(b"hello"), crc32_hex(b"world"));
    }
}

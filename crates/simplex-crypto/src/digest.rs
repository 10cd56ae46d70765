//! Thin hashing wrappers. Kept as free functions, mirroring the rest of the
//! stack's hashing module: callers never reach for `Sha256`/`Md5` directly.

use md5::{Digest as Md5Digest, Md5};
use sha2::{Digest as Sha2Digest, Sha256};

/// SHA-256 digest of arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// MD5 hex digest, used only for the cheap state-snapshot equality check
/// exchanged in propose/pre-commit messages. Collision resistance is not
/// relied on here: the full snapshot is covered indirectly by Ed25519
/// signatures over the enclosing `stage-commit` payload.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let digest = sha256(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn md5_is_stable() {
        let a = md5_hex(b"{\"a\":1}");
        let b = md5_hex(b"{\"a\":1}");
        assert_eq!(a, b);
        assert_ne!(a, md5_hex(b"{\"a\":2}"));
    }
}

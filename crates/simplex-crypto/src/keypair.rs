use std::fmt;

use ed25519_dalek::{Signature, Signer as DalekSigner, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use simplex_core::VerKey;

/// An Ed25519 keypair held in memory, standing in for a wallet-backed signer
/// in tests, examples, and the demo node. `SigningKey` zeroizes its secret
/// bytes on drop (the `zeroize` feature is enabled on `ed25519-dalek`), the
/// same hygiene this codebase has always applied to secret material.
pub struct KeyPair {
    signing_key: SigningKey,
    verkey: VerKey,
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verkey = VerKey::from_bytes(signing_key.verifying_key().to_bytes());
        KeyPair { signing_key, verkey }
    }

    /// Derive a keypair deterministically from a 32-byte seed. Intended for
    /// tests and the demo node's static participant table, never for a
    /// production signer.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let verkey = VerKey::from_bytes(signing_key.verifying_key().to_bytes());
        KeyPair { signing_key, verkey }
    }

    pub fn verkey(&self) -> VerKey {
        self.verkey
    }

    /// Sign raw bytes, returning the 64-byte Ed25519 signature.
    pub fn sign_bytes(&self, data: &[u8]) -> [u8; 64] {
        self.signing_key.sign(data).to_bytes()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({})", self.verkey)
    }
}

/// Verify a detached Ed25519 signature over `data` under `verkey`.
pub fn verify_bytes(verkey: &VerKey, data: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(verkey.as_bytes()) else {
        return false;
    };
    let sig = Signature::from_bytes(signature);
    vk.verify(data, &sig).is_ok()
}

//! `Ed25519Signer` (§6): an in-memory keypair-per-DID signer standing in for
//! a wallet-backed production signer, with the same zeroize-on-drop
//! discipline `simplex_crypto::KeyPair` already applies to secret material.

use std::collections::HashMap;

use simplex_core::{ConsensusError, Did, VerKey};
use simplex_crypto::{envelope, KeyPair, SignatureEnvelope};
use simplex_protocol::Signer;

#[derive(Default)]
pub struct Ed25519Signer {
    keys: HashMap<Did, KeyPair>,
}

impl Ed25519Signer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keypair(mut self, did: Did, keypair: KeyPair) -> Self {
        self.keys.insert(did, keypair);
        self
    }

    pub fn verkey_of(&self, did: &Did) -> Option<VerKey> {
        self.keys.get(did).map(|kp| kp.verkey())
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, did: &Did, payload: &[u8], now: i64) -> Result<SignatureEnvelope, ConsensusError> {
        let keypair = self
            .keys
            .get(did)
            .ok_or_else(|| ConsensusError::UnknownParticipant { did: did.to_string() })?;
        Ok(envelope::sign(payload, now, keypair))
    }
}

//! `StaticDidTable` (§6): an in-memory DID resolver for tests, examples, and
//! the demo node, standing in for a real DID ledger lookup. The DID↔verkey
//! binding is assumed stable for a protocol run's lifetime (§3); this table
//! never refreshes an entry once inserted.

use std::collections::HashMap;

use simplex_core::{ConsensusError, Did, VerKey};
use simplex_protocol::DidResolver;

#[derive(Debug, Clone, Default)]
pub struct StaticDidTable {
    verkeys: HashMap<Did, VerKey>,
}

impl StaticDidTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, did: Did, verkey: VerKey) -> &mut Self {
        self.verkeys.insert(did, verkey);
        self
    }

    pub fn with(mut self, did: Did, verkey: VerKey) -> Self {
        self.insert(did, verkey);
        self
    }
}

impl DidResolver for StaticDidTable {
    fn verkey_of(&self, did: &Did) -> Result<VerKey, ConsensusError> {
        self.verkeys
            .get(did)
            .copied()
            .ok_or_else(|| ConsensusError::UnknownParticipant { did: did.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplex_crypto::KeyPair;

    #[test]
    fn resolves_inserted_dids_and_rejects_unknown_ones() {
        let kp = KeyPair::generate();
        let did = Did::new("did:sov:A");
        let table = StaticDidTable::new().with(did.clone(), kp.verkey());
        assert_eq!(table.verkey_of(&did).unwrap(), kp.verkey());
        assert!(table.verkey_of(&Did::new("did:sov:ghost")).is_err());
    }
}

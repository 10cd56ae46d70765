//! The consensus engine (components D and E): the two state machines that
//! carry out Simple Consensus over a fixed participant set, built on the
//! message schema and signer/resolver capabilities from `simplex-protocol`
//! and the persisted log from `simplex-store`.
//!
//! Neither machine owns a transport or a scheduler loop — both are driven by
//! a caller feeding them `Event`s and forwarding their `StepOutput.outbound`
//! messages, matching the library's "engine has no opinion about delivery"
//! split.

pub mod accept_block;
pub mod common;
pub mod initialize;

pub use common::{multicast, Event, StepCtx, StepOutput};
pub use initialize::{ActorInitMachine, ParticipantInitMachine};
pub use accept_block::{ActorAcceptMachine, ParticipantAcceptMachine};

use simplex_core::RootHash;
use simplex_store::Txn;

/// Recompute the Merkle root a genesis transaction list must produce, from
/// scratch (§4.D step 2d: "root_hash recomputes from genesis").
pub fn root_of(txns: &[Txn]) -> Result<RootHash, serde_json::Error> {
    let mut hashes = Vec::with_capacity(txns.len());
    for txn in txns {
        let canon = simplex_crypto::canonicalize(txn)?;
        hashes.push(simplex_store::merkle::leaf_hashes(std::iter::once(canon.as_slice()))[0]);
    }
    Ok(RootHash(simplex_store::merkle::root(&hashes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn root_of_matches_ledger_reset_root() {
        let store = simplex_store::Store::open_temporary().unwrap();
        let mut ledger = store.open_ledger("L").unwrap();
        let txns = vec![
            json!({ "id": 1, "txnMetadata": { "seqNo": 1 } }),
            json!({ "id": 2, "txnMetadata": { "seqNo": 2 } }),
        ];
        ledger.reset(txns.clone(), vec![]).unwrap();
        let snap = ledger.snapshot().unwrap();
        assert_eq!(root_of(&txns).unwrap(), snap.root_hash);
    }
}

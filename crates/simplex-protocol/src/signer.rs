//! The signer/verifier and DID-resolver capabilities consumed by the engine
//! (§6). Both are synchronous traits: signature verification, like Merkle
//! computation, MUST NOT yield (§5), and a verkey lookup is defined to be
//! stable for the duration of a protocol run, so there is nothing to await.

use simplex_core::{ConsensusError, Did, VerKey};
use simplex_crypto::SignatureEnvelope;

/// `sign(payload, did) -> signature envelope` (§6). Production code wires
/// this to a wallet; this crate's consumers (tests, the demo node) use an
/// in-memory Ed25519 keypair instead.
pub trait Signer {
    fn sign(&self, did: &Did, payload: &[u8], now: i64) -> Result<SignatureEnvelope, ConsensusError>;
}

/// `verkey_of(did) -> verkey` (§6), stable for the lifetime of a protocol
/// run per the participant-set invariant (§3).
pub trait DidResolver {
    fn verkey_of(&self, did: &Did) -> Result<VerKey, ConsensusError>;
}

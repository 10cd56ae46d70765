//! Message schema and thread binding (component C): typed envelopes for the
//! six Simple Consensus protocol messages plus `problem_report`, the
//! `~thread`/`@id` decorators that correlate and deduplicate them, and the
//! signer/DID-resolver capabilities the engine consumes to validate and
//! produce them.

pub mod hash;
pub mod message;
pub mod signer;
pub mod validate;

pub use hash::{ledger_hash, LedgerHash};
pub use message::{
    problem_report, Ack, ConsensusMessage, InitializeRequest, InitializeResponse, LedgerGenesis,
    MsgId, ProblemReport, StageCommit, StageCommitPayload, StagePostCommit, StagePreCommit,
    StagePropose, Thread, PROTOCOL_URI,
};
pub use signer::{DidResolver, Signer};
pub use validate::{require_self_in_participants, require_well_formed_participants, Rejection};

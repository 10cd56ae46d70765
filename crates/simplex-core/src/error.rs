use thiserror::Error;

use crate::types::ProblemCode;

/// The crate-wide error taxonomy for the consensus engine and its
/// collaborators. Every variant maps to exactly one wire `problem-code`
/// (see [`ConsensusError::problem_code`]) except the post-commit-fatal
/// variants, which are never turned into an abort message because by
/// definition some peer may already have committed (§7 of the design).
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("ledger '{name}' already exists")]
    LedgerAlreadyExists { name: String },

    #[error("ledger '{name}' not found")]
    LedgerNotFound { name: String },

    #[error("seqNo conflict: expected {expected}, got {got}")]
    SeqNoConflict { expected: u64, got: u64 },

    #[error("invalid genesis: {reason}")]
    InvalidGenesis { reason: String },

    #[error("unknown participant DID: {did}")]
    UnknownParticipant { did: String },

    #[error("signature invalid for signer {did}")]
    SignatureInvalid { did: String },

    #[error("timestamp skew {delta_sec}s exceeds max_skew_sec")]
    TimestampSkew { delta_sec: i64 },

    #[error("recomputed hash does not match message hash")]
    HashMismatch,

    #[error("root_hash does not recompute from genesis transactions")]
    RootHashMismatch,

    #[error("message malformed or missing required field: {0}")]
    MalformedMessage(String),

    #[error("deadline exceeded waiting for {stage}")]
    Timeout { stage: String },

    #[error("peer reported problem: {code} ({explain})")]
    PeerAborted { code: ProblemCode, explain: String },

    #[error("canonicalization failed: {0}")]
    Canonicalization(String),

    #[error("store I/O error: {0}")]
    StoreIo(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ConsensusError {
    /// Map an internal failure onto the stable, externally-visible wire
    /// vocabulary. `None` means this error is fatal-but-local (it must not
    /// trigger a distributed abort — see §7/§9).
    pub fn problem_code(&self) -> Option<ProblemCode> {
        use ConsensusError::*;
        match self {
            LedgerAlreadyExists { .. }
            | UnknownParticipant { .. }
            | MalformedMessage(_) => Some(ProblemCode::RequestNotAccepted),

            SeqNoConflict { .. }
            | InvalidGenesis { .. }
            | HashMismatch
            | RootHashMismatch
            | LedgerNotFound { .. } => Some(ProblemCode::RequestProcessingError),

            SignatureInvalid { .. } | PeerAborted { .. } => {
                Some(ProblemCode::ResponseNotAccepted)
            }

            TimestampSkew { .. } | Timeout { .. } => {
                Some(ProblemCode::ResponseProcessingError)
            }

            // Fatal-but-local: store/transport/encoding failures after the
            // point of no return are reported to the application, not
            // broadcast as an abort (§7).
            Canonicalization(_) | StoreIo(_) | Transport(_) | Serde(_) => None,
        }
    }
}

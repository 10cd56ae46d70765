//! The six protocol messages plus `problem_report`, as a tagged variant
//! discriminated on `@type` (§9: sum-typed messages, composition not
//! inheritance). Every message carries the `@id`/`~thread` decorators this
//! codebase's DIDComm-style messages have always used.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use simplex_core::{Did, ProblemCode, RootHash, Snapshot, ThreadId};
use simplex_crypto::SignatureEnvelope;
use simplex_store::Txn;
use uuid::Uuid;

use crate::LedgerHash;

pub const PROTOCOL_URI: &str = simplex_core::PROTOCOL_URI;

/// A message-local identifier, distinct from the thread id that correlates
/// every message of one protocol run. Used for idempotent-replay detection
/// (§8: replaying an already-processed `(thid, @id)` pair is a no-op).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MsgId(pub Uuid);

impl MsgId {
    pub fn new() -> Self {
        MsgId(Uuid::new_v4())
    }
}

impl Default for MsgId {
    fn default() -> Self {
        Self::new()
    }
}

/// The `~thread` decorator correlating every message of a protocol run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thread {
    pub thid: ThreadId,
}

impl Thread {
    pub fn new(thid: ThreadId) -> Self {
        Thread { thid }
    }
}

/// The genesis block proposed by `initialize-request`: the transactions to
/// install plus the name and root hash they must recompute to.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LedgerGenesis {
    pub genesis: Vec<Txn>,
    pub name: String,
    pub root_hash: RootHash,
    /// Unknown top-level keys an extended actor adds. Preserved across
    /// deserialize → `ledger~hash` recompute → re-sign so a v1.0
    /// participant doesn't silently strip them (§6 forward compatibility).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InitializeRequest {
    #[serde(rename = "@id")]
    pub id: MsgId,
    #[serde(rename = "~thread")]
    pub thread: Thread,
    pub actor: Did,
    pub ledger: LedgerGenesis,
    #[serde(rename = "ledger~hash")]
    pub ledger_hash: LedgerHash,
    pub participants: Vec<Did>,
    pub signatures: Vec<SignatureEnvelope>,
    pub timeout_sec: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InitializeResponse {
    #[serde(rename = "@id")]
    pub id: MsgId,
    #[serde(rename = "~thread")]
    pub thread: Thread,
    pub signatures: Vec<SignatureEnvelope>,
}

/// Actor's ACK that every participant responded and the ledger is
/// committed — modelled on `~please_ack`/`acks@v1` rather than a bespoke
/// message kind, matching the rest of the protocol's decorator style.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Ack {
    #[serde(rename = "@id")]
    pub id: MsgId,
    #[serde(rename = "~thread")]
    pub thread: Thread,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StagePropose {
    #[serde(rename = "@id")]
    pub id: MsgId,
    #[serde(rename = "~thread")]
    pub thread: Thread,
    pub participants: Vec<Did>,
    pub transactions: Vec<Txn>,
    pub state: Snapshot,
    pub hash: String,
    pub timeout_sec: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StagePreCommit {
    #[serde(rename = "@id")]
    pub id: MsgId,
    #[serde(rename = "~thread")]
    pub thread: Thread,
    pub hash: String,
    #[serde(rename = "hash~sig")]
    pub hash_sig: SignatureEnvelope,
}

/// The body of a `stage-commit` message, signed as a whole by the actor and
/// re-signed as a whole by each participant for `stage-post-commit` — the
/// same bytes every signer in the quorum certificate signs over.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StageCommitPayload {
    pub participants: Vec<Did>,
    pub pre_commits: std::collections::BTreeMap<Did, SignatureEnvelope>,
    /// Unknown top-level keys an extended actor adds. Preserved across
    /// deserialize → verify → re-sign so the participant's `stage-post-commit`
    /// signature still covers exactly the bytes the actor signed (§6).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StageCommit {
    #[serde(rename = "@id")]
    pub id: MsgId,
    #[serde(rename = "~thread")]
    pub thread: Thread,
    #[serde(flatten)]
    pub payload: StageCommitPayload,
    pub sig: SignatureEnvelope,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StagePostCommit {
    #[serde(rename = "@id")]
    pub id: MsgId,
    #[serde(rename = "~thread")]
    pub thread: Thread,
    pub sig: SignatureEnvelope,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProblemReport {
    #[serde(rename = "@id")]
    pub id: MsgId,
    #[serde(rename = "~thread")]
    pub thread: Thread,
    #[serde(rename = "problem-code")]
    pub problem_code: ProblemCode,
    pub explain: String,
}

/// Every wire message the consensus protocol exchanges, discriminated on
/// `@type`. The two structures that get canonicalized and re-signed as a
/// whole — [`LedgerGenesis`] and [`StageCommitPayload`] — carry a
/// `#[serde(flatten)] extra` bag so an extended actor's additional
/// top-level keys survive a v1.0 participant's deserialize/verify/re-sign
/// round trip (§6); the remaining message kinds only ever sign individual
/// named fields, so there is nothing to preserve on those.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "@type")]
pub enum ConsensusMessage {
    #[serde(rename = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/simple-consensus/1.0/initialize-request")]
    InitializeRequest(InitializeRequest),
    #[serde(rename = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/simple-consensus/1.0/initialize-response")]
    InitializeResponse(InitializeResponse),
    #[serde(rename = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/simple-consensus/1.0/ack")]
    Ack(Ack),
    #[serde(rename = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/simple-consensus/1.0/stage-propose")]
    StagePropose(StagePropose),
    #[serde(rename = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/simple-consensus/1.0/stage-pre-commit")]
    StagePreCommit(StagePreCommit),
    #[serde(rename = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/simple-consensus/1.0/stage-commit")]
    StageCommit(StageCommit),
    #[serde(rename = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/simple-consensus/1.0/stage-post-commit")]
    StagePostCommit(StagePostCommit),
    #[serde(rename = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/simple-consensus/1.0/problem_report")]
    ProblemReport(ProblemReport),
}

impl ConsensusMessage {
    pub fn thread(&self) -> &Thread {
        match self {
            ConsensusMessage::InitializeRequest(m) => &m.thread,
            ConsensusMessage::InitializeResponse(m) => &m.thread,
            ConsensusMessage::Ack(m) => &m.thread,
            ConsensusMessage::StagePropose(m) => &m.thread,
            ConsensusMessage::StagePreCommit(m) => &m.thread,
            ConsensusMessage::StageCommit(m) => &m.thread,
            ConsensusMessage::StagePostCommit(m) => &m.thread,
            ConsensusMessage::ProblemReport(m) => &m.thread,
        }
    }

    pub fn id(&self) -> MsgId {
        match self {
            ConsensusMessage::InitializeRequest(m) => m.id,
            ConsensusMessage::InitializeResponse(m) => m.id,
            ConsensusMessage::Ack(m) => m.id,
            ConsensusMessage::StagePropose(m) => m.id,
            ConsensusMessage::StagePreCommit(m) => m.id,
            ConsensusMessage::StageCommit(m) => m.id,
            ConsensusMessage::StagePostCommit(m) => m.id,
            ConsensusMessage::ProblemReport(m) => m.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::InitializeRequest(_) => "initialize-request",
            ConsensusMessage::InitializeResponse(_) => "initialize-response",
            ConsensusMessage::Ack(_) => "ack",
            ConsensusMessage::StagePropose(_) => "stage-propose",
            ConsensusMessage::StagePreCommit(_) => "stage-pre-commit",
            ConsensusMessage::StageCommit(_) => "stage-commit",
            ConsensusMessage::StagePostCommit(_) => "stage-post-commit",
            ConsensusMessage::ProblemReport(_) => "problem_report",
        }
    }
}

pub fn problem_report(thid: ThreadId, code: ProblemCode, explain: impl Into<String>) -> ProblemReport {
    ProblemReport {
        id: MsgId::new(),
        thread: Thread::new(thid),
        problem_code: code,
        explain: explain.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_round_trip_preserves_variant() {
        let msg = ConsensusMessage::ProblemReport(problem_report(
            ThreadId::new(),
            ProblemCode::RequestNotAccepted,
            "duplicate name",
        ));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("problem_report"));
        let back: ConsensusMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn thread_accessor_matches_every_variant() {
        let thid = ThreadId::new();
        let msg = ConsensusMessage::Ack(Ack { id: MsgId::new(), thread: Thread::new(thid.clone()) });
        assert_eq!(msg.thread().thid, thid);
    }

    #[test]
    fn ledger_genesis_preserves_unknown_top_level_keys() {
        let json = serde_json::json!({
            "genesis": [],
            "name": "L",
            "root_hash": RootHash::EMPTY,
            "futureField": "from an extended actor",
        });
        let ledger: LedgerGenesis = serde_json::from_value(json).unwrap();
        assert_eq!(ledger.extra.get("futureField").unwrap(), "from an extended actor");
        let reencoded = serde_json::to_value(&ledger).unwrap();
        assert_eq!(reencoded["futureField"], "from an extended actor");
    }

    #[test]
    fn stage_commit_payload_preserves_unknown_top_level_keys() {
        let json = serde_json::json!({
            "participants": [],
            "pre_commits": {},
            "futureField": 42,
        });
        let payload: StageCommitPayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.extra.get("futureField").unwrap(), 42);
        let reencoded = serde_json::to_value(&payload).unwrap();
        assert_eq!(reencoded["futureField"], 42);
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// A decentralized identifier for a microledger participant.
///
/// Resolution to a [`VerKey`] is an external collaborator's responsibility
/// (see the `simplex-protocol` DID resolver trait); this type is just the
/// wire-level identifier.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Did(pub String);

impl Did {
    pub fn new(s: impl Into<String>) -> Self {
        Did(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Did {
    fn from(s: &str) -> Self {
        Did(s.to_string())
    }
}

/// An Ed25519 public key bound to a DID by the external resolver.
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct VerKey(#[serde(with = "hex_bytes_32")] pub [u8; 32]);

impl VerKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        VerKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(VerKey(arr))
    }
}

impl fmt::Debug for VerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerKey({})", self.to_hex())
    }
}

impl fmt::Display for VerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

mod hex_bytes_32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let v = hex::decode(&s).map_err(serde::de::Error::custom)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("verkey must be 32 bytes"))
    }
}

/// A UUID minted by the actor to correlate every message of a single
/// protocol run (genesis or block-commit) across all peers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ThreadId(pub uuid::Uuid);

impl ThreadId {
    pub fn new() -> Self {
        ThreadId(uuid::Uuid::new_v4())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role a state-machine instance plays in a protocol run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Actor,
    Participant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Actor => write!(f, "actor"),
            Role::Participant => write!(f, "participant"),
        }
    }
}

/// Identity of a live state-machine instance: `(role, thread_id)`.
/// Only one instance with a given identity may be alive at a time (§5).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MachineId {
    pub role: Role,
    pub thread_id: ThreadId,
}

impl MachineId {
    pub fn new(role: Role, thread_id: ThreadId) -> Self {
        MachineId { role, thread_id }
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.role, self.thread_id)
    }
}

/// Case-sensitive microledger name.
pub type LedgerName = String;

/// Monotonic, 1-indexed sequence number of a committed transaction.
pub type SeqNo = u64;

/// Unix timestamp, seconds.
pub type Timestamp = i64;

/// A 32-byte SHA-256 Merkle root over canonical-JSON leaves.
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RootHash(#[serde(with = "hex_bytes_32")] pub [u8; 32]);

impl RootHash {
    pub const EMPTY: RootHash = RootHash([0u8; 32]);

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for RootHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootHash({})", self.to_hex())
    }
}

impl fmt::Display for RootHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A microledger's observable state at a point in time. The MD5 hex digest
/// of this struct's canonical JSON is the `hash` field exchanged in
/// propose/pre-commit messages (§3 of the design).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub name: LedgerName,
    pub seq_no: SeqNo,
    pub size: u64,
    pub uncommitted_size: u64,
    pub root_hash: RootHash,
    pub uncommitted_root_hash: RootHash,
}

/// The wire `problem-code` vocabulary (§7 of the protocol design).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProblemCode {
    RequestNotAccepted,
    RequestProcessingError,
    ResponseNotAccepted,
    ResponseProcessingError,
}

impl fmt::Display for ProblemCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProblemCode::RequestNotAccepted => "request_not_accepted",
            ProblemCode::RequestProcessingError => "request_processing_error",
            ProblemCode::ResponseNotAccepted => "response_not_accepted",
            ProblemCode::ResponseProcessingError => "response_processing_error",
        };
        write!(f, "{s}")
    }
}

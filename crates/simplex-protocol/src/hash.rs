//! `ledger~hash`: the base58 SHA-256 digest of a ledger genesis object's
//! canonical encoding (§3, §4.D). Distinct from [`simplex_core::RootHash`]
//! (the Merkle root over committed transactions) — this hash covers the
//! whole `{genesis, name, root_hash}` triple exchanged in
//! `initialize-request`, not the transaction log itself.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::message::LedgerGenesis;

#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct LedgerHash(#[serde(with = "base58_bytes")] pub [u8; 32]);

impl LedgerHash {
    pub fn base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl fmt::Debug for LedgerHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerHash({})", self.base58())
    }
}

mod base58_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&bs58::encode(bytes).into_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let v = bs58::decode(&s).into_vec().map_err(serde::de::Error::custom)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("ledger~hash must decode to 32 bytes"))
    }
}

/// Compute `ledger~hash` from a ledger genesis object: SHA-256 over its
/// canonical-JSON encoding.
pub fn ledger_hash(ledger: &LedgerGenesis) -> Result<LedgerHash, serde_json::Error> {
    let canon = simplex_crypto::canonicalize(ledger)?;
    Ok(LedgerHash(simplex_crypto::sha256(&canon)))
}

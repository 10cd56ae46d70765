//! The Merkle log store: one append-only transaction log per microledger
//! name, with a committed partition persisted in `sled` and an uncommitted
//! (staged) partition held in memory only, per the design's persisted-state
//! requirement. A small `meta` tree alongside the log records the
//! participant set fixed at genesis; the Merkle root is never itself
//! cached there — it is always recomputed from the committed leaves, so
//! there is nothing for a crash to leave torn between the two.

use std::path::Path;

use serde_json::Value;
use simplex_core::{ConsensusError, Did, RootHash, Snapshot};

use crate::merkle;

pub type Txn = Value;

fn committed_tree_name(name: &str) -> String {
    format!("ledger/{name}/committed")
}

fn meta_tree_name(name: &str) -> String {
    format!("ledger/{name}/meta")
}

fn seq_no_of(txn: &Txn) -> Option<u64> {
    txn.get("txnMetadata")?.get("seqNo")?.as_u64()
}

fn io_err(e: impl std::fmt::Display) -> ConsensusError {
    ConsensusError::StoreIo(e.to_string())
}

/// Owns the embedded database directory shared by every microledger this
/// process knows about. One named pair of `sled` trees (`committed`,
/// `meta`) per ledger, mirroring the one-tree-per-concern layout this
/// stack has always used for persisted state.
pub struct Store {
    db: sled::Db,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConsensusError> {
        let db = sled::open(path).map_err(io_err)?;
        Ok(Store { db })
    }

    /// In-memory store for tests and the demo node — no filesystem state.
    pub fn open_temporary() -> Result<Self, ConsensusError> {
        let db = sled::Config::new().temporary(true).open().map_err(io_err)?;
        Ok(Store { db })
    }

    pub fn ledger_exists(&self, name: &str) -> bool {
        self.db
            .tree_names()
            .iter()
            .any(|t| t.as_ref() == committed_tree_name(name).as_bytes())
    }

    /// Open (creating if necessary) the named ledger's handle. Opening does
    /// not itself install genesis state — callers check
    /// [`Store::ledger_exists`] then call [`Ledger::reset`] for that.
    pub fn open_ledger(&self, name: &str) -> Result<Ledger, ConsensusError> {
        let committed = self
            .db
            .open_tree(committed_tree_name(name))
            .map_err(io_err)?;
        let meta = self.db.open_tree(meta_tree_name(name)).map_err(io_err)?;
        Ok(Ledger {
            name: name.to_string(),
            committed,
            meta,
            staged: Vec::new(),
        })
    }

    /// Remove a ledger entirely — used by the initialize-ledger and
    /// accept-block abort paths to undo a locally-created ledger that
    /// never reached peer-wide consensus.
    pub fn delete_ledger(&self, name: &str) -> Result<(), ConsensusError> {
        self.db
            .drop_tree(committed_tree_name(name))
            .map_err(io_err)?;
        self.db.drop_tree(meta_tree_name(name)).map_err(io_err)?;
        Ok(())
    }
}

/// A handle to a single microledger. Per the concurrency model (§5), a
/// `Ledger` is owned by exactly one live state-machine instance at a time;
/// this type does not enforce that itself — the scheduler does.
pub struct Ledger {
    name: String,
    committed: sled::Tree,
    meta: sled::Tree,
    staged: Vec<Txn>,
}

const META_PARTICIPANTS_KEY: &[u8] = b"participants";

impl Ledger {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn committed_size(&self) -> u64 {
        self.committed.len() as u64
    }

    fn committed_leaf_hashes(&self) -> Result<Vec<[u8; 32]>, ConsensusError> {
        let mut out = Vec::with_capacity(self.committed_size() as usize);
        for entry in self.committed.iter() {
            let (_, bytes) = entry.map_err(io_err)?;
            let txn: Txn = bincode::deserialize(&bytes).map_err(io_err)?;
            let canon = simplex_crypto::canonicalize(&txn).map_err(io_err)?;
            out.push(merkle::leaf_hashes(std::iter::once(canon.as_slice()))[0]);
        }
        Ok(out)
    }

    fn store_participants(&self, participants: &[Did]) -> Result<(), ConsensusError> {
        let bytes = bincode::serialize(participants).map_err(io_err)?;
        self.meta.insert(META_PARTICIPANTS_KEY, bytes).map_err(io_err)?;
        Ok(())
    }

    /// The participant set fixed at genesis (§3), as persisted by `reset`.
    /// Accept-block validates an incoming `stage-propose`'s participant
    /// list against this rather than trusting whatever the message claims.
    pub fn participants(&self) -> Result<Vec<Did>, ConsensusError> {
        let bytes = self
            .meta
            .get(META_PARTICIPANTS_KEY)
            .map_err(io_err)?
            .ok_or_else(|| ConsensusError::StoreIo(format!("ledger '{}' has no persisted participant set", self.name)))?;
        bincode::deserialize(&bytes).map_err(io_err)
    }

    /// Append a single transaction directly to the committed partition,
    /// bypassing staging. Used by [`Ledger::reset`] to install genesis
    /// transactions; exposed standalone for callers that need a one-off
    /// committed append outside the stage/commit protocol.
    pub fn append_committed(&mut self, txn: Txn) -> Result<(), ConsensusError> {
        let expected = self.committed_size() + 1;
        let got = seq_no_of(&txn).ok_or_else(|| ConsensusError::MalformedMessage(
            "transaction missing txnMetadata.seqNo".into(),
        ))?;
        if got != expected {
            return Err(ConsensusError::SeqNoConflict { expected, got });
        }
        let bytes = bincode::serialize(&txn).map_err(io_err)?;
        self.committed
            .insert(expected.to_be_bytes(), bytes)
            .map_err(io_err)?;
        self.committed.flush().map_err(io_err)?;
        Ok(())
    }

    /// Stage `txns` for the next commit round. Assigns no new seqNos of its
    /// own — every txn must already carry the seqNo it expects to occupy,
    /// checked here for dense continuation. Never mutates committed state.
    /// Returns the resulting uncommitted root hash.
    pub fn stage(&mut self, txns: Vec<Txn>) -> Result<RootHash, ConsensusError> {
        let mut expected = self.committed_size() + self.staged.len() as u64 + 1;
        for txn in &txns {
            let got = seq_no_of(txn).ok_or_else(|| ConsensusError::MalformedMessage(
                "transaction missing txnMetadata.seqNo".into(),
            ))?;
            if got != expected {
                return Err(ConsensusError::SeqNoConflict { expected, got });
            }
            expected += 1;
        }
        self.staged.extend(txns);
        self.uncommitted_root_hash()
    }

    fn uncommitted_root_hash(&self) -> Result<RootHash, ConsensusError> {
        let mut hashes = self.committed_leaf_hashes()?;
        for txn in &self.staged {
            let canon = simplex_crypto::canonicalize(txn).map_err(io_err)?;
            hashes.push(merkle::leaf_hashes(std::iter::once(canon.as_slice()))[0]);
        }
        Ok(RootHash(merkle::root(&hashes)))
    }

    /// Atomically promote every staged transaction into the committed
    /// partition. A no-op if nothing is staged.
    pub fn commit_staged(&mut self) -> Result<(), ConsensusError> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let mut batch = sled::Batch::default();
        let mut seq = self.committed_size();
        for txn in &self.staged {
            seq += 1;
            let bytes = bincode::serialize(txn).map_err(io_err)?;
            batch.insert(&seq.to_be_bytes(), bytes);
        }
        self.committed.apply_batch(batch).map_err(io_err)?;
        self.committed.flush().map_err(io_err)?;
        self.staged.clear();
        Ok(())
    }

    /// Drop every staged transaction without committing. Called on any
    /// validation failure or abort (§4.F).
    pub fn discard_staged(&mut self) {
        self.staged.clear();
    }

    /// `root_hash` is recomputed from the committed tree's leaves on every
    /// call rather than read from a cached meta value: caching it would
    /// need a second write alongside `commit_staged`'s batch, and a crash
    /// between the two would let `size` and `root_hash` disagree on
    /// restart. Recomputing keeps the two derived from the same read.
    pub fn snapshot(&self) -> Result<Snapshot, ConsensusError> {
        let size = self.committed_size();
        Ok(Snapshot {
            name: self.name.clone(),
            seq_no: size,
            size,
            uncommitted_size: size + self.staged.len() as u64,
            root_hash: RootHash(merkle::root(&self.committed_leaf_hashes()?)),
            uncommitted_root_hash: self.uncommitted_root_hash()?,
        })
    }

    /// Inclusion proof for the committed entry at `seq_no` (1-indexed).
    pub fn audit_path(&self, seq_no: u64) -> Result<Vec<[u8; 32]>, ConsensusError> {
        let size = self.committed_size();
        if seq_no == 0 || seq_no > size {
            return Err(ConsensusError::SeqNoConflict {
                expected: size,
                got: seq_no,
            });
        }
        let hashes = self.committed_leaf_hashes()?;
        Ok(merkle::audit_path(&hashes, (seq_no - 1) as usize))
    }

    /// Install `genesis_txns` as the initial committed set and persist the
    /// participant set fixed for this ledger's lifetime (§3). Only valid on
    /// an empty ledger; the only path that bypasses the dense-continuation
    /// check in favor of validating the whole genesis block at once.
    pub fn reset(&mut self, genesis_txns: Vec<Txn>, participants: Vec<Did>) -> Result<(), ConsensusError> {
        if self.committed_size() != 0 {
            return Err(ConsensusError::LedgerAlreadyExists {
                name: self.name.clone(),
            });
        }
        if genesis_txns.is_empty() {
            return Err(ConsensusError::InvalidGenesis {
                reason: "genesis transaction list is empty".into(),
            });
        }
        for (i, txn) in genesis_txns.iter().enumerate() {
            let expected = (i + 1) as u64;
            match seq_no_of(txn) {
                Some(got) if got == expected => {}
                Some(got) => {
                    return Err(ConsensusError::InvalidGenesis {
                        reason: format!("txnMetadata.seqNo {got} at position {expected}"),
                    })
                }
                None => {
                    return Err(ConsensusError::InvalidGenesis {
                        reason: "transaction missing txnMetadata.seqNo".into(),
                    })
                }
            }
        }
        let mut batch = sled::Batch::default();
        for (i, txn) in genesis_txns.iter().enumerate() {
            let bytes = bincode::serialize(txn).map_err(io_err)?;
            batch.insert(&((i + 1) as u64).to_be_bytes(), bytes);
        }
        self.committed.apply_batch(batch).map_err(io_err)?;
        self.committed.flush().map_err(io_err)?;
        self.store_participants(&participants)?;
        self.staged.clear();
        Ok(())
    }
}

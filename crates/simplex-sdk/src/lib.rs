//! The SDK scheduler: the external application surface named in §6
//! (`initialize_ledger`, `commit_block`, `register_inbound_handler`) plus
//! the in-memory signer and DID resolver this codebase ships in place of a
//! wallet-backed signer and a real DID ledger. The scheduler dispatches
//! inbound messages to the right `simplex-engine` state-machine instance by
//! thread id, enforces the one-live-instance-per-ledger invariant (§5), and
//! is the "uninteresting" collaborator whose contract §1 says is stated,
//! not implemented in depth, elsewhere in this workspace.

pub mod config;
pub mod did_table;
pub mod scheduler;
pub mod signer;

pub use config::ConsensusConfig;
pub use did_table::StaticDidTable;
pub use scheduler::{InboundHandler, Outcome, ParticipantEvent, Scheduler, SchedulerError};
pub use signer::Ed25519Signer;

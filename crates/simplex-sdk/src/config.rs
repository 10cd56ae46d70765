//! `ConsensusConfig` (§11 of the design): the constructor-argument
//! configuration every library crate in this workspace takes, as opposed to
//! reading environment variables or files directly — only the node binary
//! does that.

use simplex_core::{DEFAULT_TIMEOUT_SEC, MAX_SKEW_SEC};

#[derive(Debug, Clone, Copy)]
pub struct ConsensusConfig {
    /// Default deadline for a single protocol stage's receive wait, used
    /// when a caller does not override it per-call.
    pub timeout_sec: u64,
    /// Maximum tolerated clock skew on a signature's timestamp prefix.
    pub max_skew_sec: i64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            timeout_sec: DEFAULT_TIMEOUT_SEC,
            max_skew_sec: MAX_SKEW_SEC,
        }
    }
}

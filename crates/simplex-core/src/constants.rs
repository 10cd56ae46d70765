//! ─── Simple Consensus protocol constants ────────────────────────────────────

/// Protocol URI prefix every message's `@type` is rooted at.
pub const PROTOCOL_URI: &str = "did:sov:BzCbsNYhMrjHiqZDTUASHg;spec/simple-consensus/1.0/";

/// Maximum tolerated clock skew between signer and verifier, in seconds, for
/// the timestamp prefix of a signature's `sig_data`. Exceeding this MAY be
/// reported but is not fatal by itself; the enclosing state machine decides.
pub const MAX_SKEW_SEC: i64 = 300;

/// Default deadline, in seconds, for a single protocol stage's receive wait,
/// used when the caller does not override `timeout_sec`.
pub const DEFAULT_TIMEOUT_SEC: u64 = 30;

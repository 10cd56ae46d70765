//! Shared plumbing for both state machines: the `(state, event) -> (state,
//! outbound)` step shape from §9's design note, and the collaborators each
//! step call is handed.

use simplex_core::Did;
use simplex_protocol::{ConsensusMessage, DidResolver, Signer};
use simplex_store::Store;

/// What a state machine receives at a suspension point: either an inbound
/// protocol message from a named peer, or a synthetic timeout (§5:
/// cancellation from outside is modelled as a synthetic timeout).
#[derive(Debug, Clone)]
pub enum Event {
    Message { from: Did, message: ConsensusMessage },
    Timeout,
}

/// The read-only collaborators and the current instant, threaded through
/// every step call. Borrowed, not owned: the store, signer and resolver
/// outlive any single state-machine instance (§5: read-only shared).
pub struct StepCtx<'a> {
    pub store: &'a Store,
    pub signer: &'a dyn Signer,
    pub resolver: &'a dyn DidResolver,
    pub now: i64,
    pub max_skew_sec: i64,
}

/// The result of one step: messages to dispatch and whether the instance
/// has reached a terminal state (`done`/`committed`, `aborted`, or
/// `timed-out`) and should be torn down by the scheduler (§3).
#[derive(Debug, Default)]
pub struct StepOutput {
    pub outbound: Vec<(Did, ConsensusMessage)>,
    pub finished: bool,
}

impl StepOutput {
    pub fn terminal(outbound: Vec<(Did, ConsensusMessage)>) -> Self {
        StepOutput { outbound, finished: true }
    }

    pub fn pending(outbound: Vec<(Did, ConsensusMessage)>) -> Self {
        StepOutput { outbound, finished: false }
    }
}

/// Multicast `message` to every participant other than `me`.
pub fn multicast(participants: &[Did], me: &Did, message: ConsensusMessage) -> Vec<(Did, ConsensusMessage)> {
    participants
        .iter()
        .filter(|p| *p != me)
        .map(|p| (p.clone(), message.clone()))
        .collect()
}

//! Structural validation of message invariants that can be checked without
//! touching the store or a signature (§9: validation returns an
//! accept/reject decision with a problem-code, never an exception).

use std::collections::HashSet;

use simplex_core::{Did, ProblemCode};

/// A rejected message, carrying the wire problem-code and a human-readable
/// reason for logs. Never used for control flow via panics/exceptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: ProblemCode,
    pub explain: String,
}

impl Rejection {
    pub fn new(code: ProblemCode, explain: impl Into<String>) -> Self {
        Rejection { code, explain: explain.into() }
    }
}

/// The participant set must be non-empty and contain no duplicate DIDs
/// (§3: an ordered *set* of peer DIDs).
pub fn require_well_formed_participants(participants: &[Did]) -> Result<(), Rejection> {
    if participants.is_empty() {
        return Err(Rejection::new(
            ProblemCode::RequestNotAccepted,
            "participant list is empty",
        ));
    }
    let mut seen = HashSet::with_capacity(participants.len());
    for did in participants {
        if !seen.insert(did) {
            return Err(Rejection::new(
                ProblemCode::RequestNotAccepted,
                format!("duplicate participant DID {did}"),
            ));
        }
    }
    Ok(())
}

/// The receiving participant must itself be named in the participant list
/// (§4.D step 2a).
pub fn require_self_in_participants(participants: &[Did], me: &Did) -> Result<(), Rejection> {
    if participants.iter().any(|d| d == me) {
        Ok(())
    } else {
        Err(Rejection::new(
            ProblemCode::RequestNotAccepted,
            format!("{me} is not a named participant"),
        ))
    }
}

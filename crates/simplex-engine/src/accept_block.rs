//! The accept-block state machine (§4.E): the four-stage commit — propose,
//! pre-commit, commit, post-commit — that appends a batch of transactions to
//! an existing microledger. Unlike initialize-ledger, both roles hold a
//! staged `Ledger` handle across the whole round: `Ledger::staged` is
//! in-memory only, so the same instance must live from `stage` through
//! `commit_staged`/`discard_staged`.

use std::collections::BTreeMap;

use simplex_core::{ConsensusError, Did, ProblemCode, ThreadId};
use simplex_crypto::{envelope, SignatureEnvelope};
use simplex_protocol::{
    problem_report, ConsensusMessage, MsgId, StageCommit, StageCommitPayload, StagePostCommit,
    StagePreCommit, StagePropose, Thread,
};
use simplex_store::{Ledger, Txn};

use crate::common::{multicast, Event, StepCtx, StepOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActorState {
    AwaitingPreCommits,
    AwaitingPostCommits,
    Done,
    Aborted,
}

/// Actor side of accept-block. `proposed`/`committing` from §4.E are folded
/// into the surrounding transition, matching §5's "every send is atomic and
/// non-suspending" — there is nothing to wait for between staging and
/// dispatch, or between assembling `stage-commit` and sending it.
pub struct ActorAcceptMachine {
    state: ActorState,
    thid: ThreadId,
    me: Did,
    participants: Vec<Did>,
    ledger: Ledger,
    deadline: i64,
    hash: String,
    pre_commits: BTreeMap<Did, SignatureEnvelope>,
    commit_canon: Vec<u8>,
    post_commits: BTreeMap<Did, SignatureEnvelope>,
}

impl ActorAcceptMachine {
    pub fn thread_id(&self) -> &ThreadId {
        &self.thid
    }

    pub fn deadline(&self) -> i64 {
        self.deadline
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ActorState::Done | ActorState::Aborted)
    }

    /// Whether this round reached `done` (as opposed to `aborted`).
    /// Meaningless while `!is_terminal()`.
    pub fn is_committed(&self) -> bool {
        self.state == ActorState::Done
    }

    /// Stage 1: stage the batch, compute its quick-equality hash, multicast
    /// `stage-propose`.
    pub fn start(
        ctx: &mut StepCtx,
        me: Did,
        name: String,
        txns: Vec<Txn>,
        timeout_sec: u64,
    ) -> Result<(Self, StepOutput), ConsensusError> {
        if !ctx.store.ledger_exists(&name) {
            return Err(ConsensusError::LedgerNotFound { name });
        }
        let mut ledger = ctx.store.open_ledger(&name)?;
        let participants = ledger.participants()?;
        simplex_protocol::require_well_formed_participants(&participants)
            .map_err(|r| ConsensusError::InvalidGenesis { reason: r.explain })?;
        ledger.stage(txns.clone())?;
        let snapshot = ledger.snapshot()?;
        let canon = simplex_crypto::canonicalize(&snapshot).map_err(|e| ConsensusError::Canonicalization(e.to_string()))?;
        let hash = simplex_crypto::md5_hex(&canon);

        let own_sig = ctx.signer.sign(&me, hash.as_bytes(), ctx.now)?;
        let mut pre_commits = BTreeMap::new();
        pre_commits.insert(me.clone(), own_sig);

        let thid = ThreadId::new();
        let propose = StagePropose {
            id: MsgId::new(),
            thread: Thread::new(thid.clone()),
            participants: participants.clone(),
            transactions: txns,
            state: snapshot,
            hash: hash.clone(),
            timeout_sec,
        };
        let outbound = multicast(&participants, &me, ConsensusMessage::StagePropose(propose));
        let machine = ActorAcceptMachine {
            state: ActorState::AwaitingPreCommits,
            thid,
            me,
            participants,
            ledger,
            deadline: ctx.now + timeout_sec as i64,
            hash,
            pre_commits,
            commit_canon: Vec::new(),
            post_commits: BTreeMap::new(),
        };
        Ok((machine, StepOutput::pending(outbound)))
    }

    pub fn on_event(&mut self, ctx: &mut StepCtx, event: Event) -> Result<StepOutput, ConsensusError> {
        match (self.state, event) {
            (ActorState::AwaitingPreCommits, Event::Message { from, message: ConsensusMessage::StagePreCommit(m) }) => {
                self.on_pre_commit(ctx, from, m)
            }
            (ActorState::AwaitingPostCommits, Event::Message { from, message: ConsensusMessage::StagePostCommit(m) }) => {
                self.on_post_commit(ctx, from, m)
            }
            (ActorState::AwaitingPreCommits | ActorState::AwaitingPostCommits, Event::Message { from, message: ConsensusMessage::ProblemReport(pr) }) => {
                tracing::warn!(peer = %from, code = %pr.problem_code, "participant aborted accept-block");
                Ok(self.abort(ProblemCode::ResponseNotAccepted, "participant reported problem"))
            }
            (ActorState::AwaitingPreCommits, Event::Timeout) => {
                Ok(self.abort(ProblemCode::ResponseProcessingError, "timed out awaiting pre-commits"))
            }
            (ActorState::AwaitingPostCommits, Event::Timeout) => {
                // Asymmetry note (§4.E): some participants may already have
                // committed by this point. We still abort locally — a
                // divergent `size` on a later round is the detection path,
                // out-of-band repair is outside this crate's scope.
                Ok(self.abort(ProblemCode::ResponseProcessingError, "timed out awaiting post-commits"))
            }
            _ => Ok(StepOutput::default()),
        }
    }

    fn on_pre_commit(&mut self, ctx: &mut StepCtx, from: Did, msg: StagePreCommit) -> Result<StepOutput, ConsensusError> {
        if !self.participants.contains(&from) || self.pre_commits.contains_key(&from) {
            return Ok(StepOutput::default());
        }
        let verkey = ctx.resolver.verkey_of(&from)?;
        let verified = match envelope::verify(&msg.hash_sig, &verkey, ctx.now) {
            Ok(v) => v,
            Err(_) => return Ok(self.abort(ProblemCode::ResponseProcessingError, "bad pre-commit signature")),
        };
        if verified.payload != msg.hash.as_bytes() || msg.hash != self.hash {
            return Ok(self.abort(ProblemCode::ResponseProcessingError, "pre-commit hash disagrees with actor's"));
        }

        self.pre_commits.insert(from, msg.hash_sig);
        if self.pre_commits.len() == self.participants.len() {
            return self.enter_committing(ctx);
        }
        Ok(StepOutput::default())
    }

    /// Stage 3: build and multicast `stage-commit` once every pre-commit is in.
    fn enter_committing(&mut self, ctx: &mut StepCtx) -> Result<StepOutput, ConsensusError> {
        let payload = StageCommitPayload {
            participants: self.participants.clone(),
            pre_commits: self.pre_commits.clone(),
            extra: Default::default(),
        };
        let canon = simplex_crypto::canonicalize(&payload).map_err(|e| ConsensusError::Canonicalization(e.to_string()))?;
        let sig = ctx.signer.sign(&self.me, &canon, ctx.now)?;
        self.commit_canon = canon;

        let commit = StageCommit { id: MsgId::new(), thread: Thread::new(self.thid.clone()), payload, sig };
        let outbound = multicast(&self.participants, &self.me, ConsensusMessage::StageCommit(commit));
        self.state = ActorState::AwaitingPostCommits;
        Ok(StepOutput::pending(outbound))
    }

    fn on_post_commit(&mut self, ctx: &mut StepCtx, from: Did, msg: StagePostCommit) -> Result<StepOutput, ConsensusError> {
        if !self.participants.contains(&from) || self.post_commits.contains_key(&from) {
            return Ok(StepOutput::default());
        }
        let verkey = ctx.resolver.verkey_of(&from)?;
        let verified = match envelope::verify(&msg.sig, &verkey, ctx.now) {
            Ok(v) => v,
            Err(_) => return Ok(self.abort(ProblemCode::ResponseNotAccepted, "bad post-commit signature")),
        };
        if verified.payload != self.commit_canon {
            return Ok(self.abort(ProblemCode::ResponseNotAccepted, "post-commit does not cover the stage-commit payload"));
        }

        self.post_commits.insert(from, msg.sig);
        if self.post_commits.len() == self.participants.len() {
            self.ledger.commit_staged()?;
            self.state = ActorState::Done;
            return Ok(StepOutput::terminal(vec![]));
        }
        Ok(StepOutput::default())
    }

    fn abort(&mut self, code: ProblemCode, explain: &str) -> StepOutput {
        self.state = ActorState::Aborted;
        self.ledger.discard_staged();
        let report = problem_report(self.thid.clone(), code, explain.to_string());
        let outbound = multicast(&self.participants, &self.me, ConsensusMessage::ProblemReport(report));
        StepOutput::terminal(outbound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParticipantState {
    AwaitingCommit,
    Done,
    Aborted,
}

/// Participant side of accept-block. `ledger` is `None` only for a machine
/// that aborted before a handle to an existing ledger could be opened
/// (unknown ledger name, not a named participant) — there is nothing to
/// discard in that case.
pub struct ParticipantAcceptMachine {
    state: ParticipantState,
    thid: ThreadId,
    me: Did,
    actor: Did,
    participants: Vec<Did>,
    ledger: Option<Ledger>,
    deadline: i64,
    hash: String,
    /// The `stage-pre-commit` sent back for this round, if any was produced.
    /// Resent verbatim on a duplicate `stage-propose` (§8 scenario 6) instead
    /// of re-signing, since the actor may already hold a quorum counting it.
    last_pre_commit: Option<StagePreCommit>,
}

impl ParticipantAcceptMachine {
    pub fn thread_id(&self) -> &ThreadId {
        &self.thid
    }

    pub fn deadline(&self) -> i64 {
        self.deadline
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ParticipantState::Done | ParticipantState::Aborted)
    }

    /// Whether this round reached `done` (as opposed to `aborted`).
    /// Meaningless while `!is_terminal()`.
    pub fn is_committed(&self) -> bool {
        self.state == ParticipantState::Done
    }

    /// Stage 1/2: validate `stage-propose`, stage locally, sign the
    /// recomputed hash.
    pub fn on_stage_propose(
        ctx: &mut StepCtx,
        me: Did,
        from: Did,
        msg: StagePropose,
    ) -> Result<(Self, StepOutput), ConsensusError> {
        let thid = msg.thread.thid.clone();
        let name = msg.state.name.clone();

        if let Err(r) = simplex_protocol::require_well_formed_participants(&msg.participants) {
            return Ok(Self::reject_unopened(thid, me, from, msg.participants, r.code, &r.explain));
        }
        if !msg.participants.contains(&me) {
            return Ok(Self::reject_unopened(thid, me, from, msg.participants, ProblemCode::RequestNotAccepted, "not a named participant"));
        }
        if !ctx.store.ledger_exists(&name) {
            return Ok(Self::reject_unopened(thid, me, from, msg.participants, ProblemCode::RequestNotAccepted, "unknown ledger"));
        }

        let mut ledger = ctx.store.open_ledger(&name)?;
        let genesis_participants = ledger.participants()?;
        if !sets_match(&genesis_participants, &msg.participants) {
            return Ok(Self::reject_unopened(thid, me, from, msg.participants, ProblemCode::RequestProcessingError, "participant set does not match the ledger's genesis participants"));
        }
        if !genesis_participants.contains(&from) {
            return Ok(Self::reject_unopened(thid, me, from, msg.participants, ProblemCode::RequestNotAccepted, "sender is not a genesis participant"));
        }
        if let Err(e) = ledger.stage(msg.transactions.clone()) {
            let code = e.problem_code().unwrap_or(ProblemCode::RequestProcessingError);
            let explain = e.to_string();
            let report = problem_report(thid.clone(), code, explain);
            let machine = ParticipantAcceptMachine {
                state: ParticipantState::Aborted,
                thid,
                me,
                actor: from.clone(),
                participants: msg.participants,
                ledger: Some(ledger),
                deadline: i64::MAX,
                hash: String::new(),
                last_pre_commit: None,
            };
            return Ok((machine, StepOutput::terminal(vec![(from, ConsensusMessage::ProblemReport(report))])));
        }

        let snapshot = ledger.snapshot()?;
        let canon = simplex_crypto::canonicalize(&snapshot).map_err(|e| ConsensusError::Canonicalization(e.to_string()))?;
        let hash = simplex_crypto::md5_hex(&canon);

        if hash != msg.hash {
            ledger.discard_staged();
            let report = problem_report(thid.clone(), ProblemCode::RequestProcessingError, "recomputed hash disagrees with proposal".to_string());
            let machine = ParticipantAcceptMachine {
                state: ParticipantState::Aborted,
                thid,
                me,
                actor: from.clone(),
                participants: msg.participants,
                ledger: Some(ledger),
                deadline: i64::MAX,
                hash,
                last_pre_commit: None,
            };
            return Ok((machine, StepOutput::terminal(vec![(from, ConsensusMessage::ProblemReport(report))])));
        }

        let own_sig = ctx.signer.sign(&me, hash.as_bytes(), ctx.now)?;
        let pre_commit = StagePreCommit { id: MsgId::new(), thread: Thread::new(thid.clone()), hash: hash.clone(), hash_sig: own_sig };

        let machine = ParticipantAcceptMachine {
            state: ParticipantState::AwaitingCommit,
            thid,
            me,
            actor: from.clone(),
            participants: msg.participants,
            ledger: Some(ledger),
            deadline: ctx.now + msg.timeout_sec as i64,
            hash,
            last_pre_commit: Some(pre_commit.clone()),
        };
        let outbound = vec![(from, ConsensusMessage::StagePreCommit(pre_commit))];
        Ok((machine, StepOutput::pending(outbound)))
    }

    pub fn on_event(&mut self, ctx: &mut StepCtx, event: Event) -> Result<StepOutput, ConsensusError> {
        if self.state != ParticipantState::AwaitingCommit {
            return Ok(StepOutput::default());
        }
        match event {
            Event::Message { from, message: ConsensusMessage::StageCommit(m) } if from == self.actor => self.on_stage_commit(ctx, m),
            Event::Message { from, message: ConsensusMessage::StagePropose(m) } if from == self.actor && m.thread.thid == self.thid => {
                // Duplicate thid replay (§8 scenario 6): resend the stored pre-commit.
                let pre_commit = self.last_pre_commit.clone().expect("pre-commit was sent to reach AwaitingCommit");
                Ok(StepOutput::pending(vec![(self.actor.clone(), ConsensusMessage::StagePreCommit(pre_commit))]))
            }
            Event::Message { message: ConsensusMessage::ProblemReport(_), .. } => Ok(self.abort(ProblemCode::ResponseNotAccepted, "actor reported problem")),
            Event::Timeout => Ok(self.abort(ProblemCode::ResponseProcessingError, "timed out awaiting stage-commit")),
            Event::Message { .. } => Ok(StepOutput::default()),
        }
    }

    /// Stage 3: verify the actor's commit bundle, promote staged to
    /// committed, re-sign the payload for `stage-post-commit`.
    fn on_stage_commit(&mut self, ctx: &mut StepCtx, msg: StageCommit) -> Result<StepOutput, ConsensusError> {
        let actor_verkey = ctx.resolver.verkey_of(&self.actor)?;
        let canon = simplex_crypto::canonicalize(&msg.payload).map_err(|e| ConsensusError::Canonicalization(e.to_string()))?;
        let verified = match envelope::verify(&msg.sig, &actor_verkey, ctx.now) {
            Ok(v) => v,
            Err(_) => return Ok(self.abort(ProblemCode::ResponseNotAccepted, "bad actor signature on stage-commit")),
        };
        if verified.payload != canon {
            return Ok(self.abort(ProblemCode::ResponseNotAccepted, "stage-commit signature does not cover its own payload"));
        }
        if !msg.payload.pre_commits.contains_key(&self.me) || !msg.payload.pre_commits.contains_key(&self.actor) {
            return Ok(self.abort(ProblemCode::ResponseNotAccepted, "stage-commit omits actor's or my own pre-commit"));
        }
        for (did, sig) in &msg.payload.pre_commits {
            let verkey = match ctx.resolver.verkey_of(did) {
                Ok(vk) => vk,
                Err(_) => return Ok(self.abort(ProblemCode::ResponseNotAccepted, "stage-commit names an unresolvable participant")),
            };
            let verified = match envelope::verify(sig, &verkey, ctx.now) {
                Ok(v) => v,
                Err(_) => return Ok(self.abort(ProblemCode::ResponseNotAccepted, "stage-commit carries an invalid enclosed pre-commit")),
            };
            if verified.payload != self.hash.as_bytes() {
                return Ok(self.abort(ProblemCode::ResponseNotAccepted, "enclosed pre-commit does not cover the agreed hash"));
            }
        }

        self.ledger.as_mut().expect("ledger is open by the time stage-commit can arrive").commit_staged()?;
        let post_sig = ctx.signer.sign(&self.me, &canon, ctx.now)?;
        let post_commit = StagePostCommit { id: MsgId::new(), thread: Thread::new(self.thid.clone()), sig: post_sig };
        self.state = ParticipantState::Done;
        Ok(StepOutput::terminal(vec![(self.actor.clone(), ConsensusMessage::StagePostCommit(post_commit))]))
    }

    fn abort(&mut self, code: ProblemCode, explain: &str) -> StepOutput {
        self.state = ParticipantState::Aborted;
        if let Some(ledger) = self.ledger.as_mut() {
            ledger.discard_staged();
        }
        let report = problem_report(self.thid.clone(), code, explain.to_string());
        StepOutput::terminal(vec![(self.actor.clone(), ConsensusMessage::ProblemReport(report))])
    }

    /// Build an already-terminal machine plus the `problem_report` to send
    /// back, for validation failures that never reach `stage` (unknown
    /// ledger, not a named participant, participant set mismatch) — nothing
    /// to discard even when a `Ledger` handle was opened to check.
    fn reject_unopened(
        thid: ThreadId,
        me: Did,
        from: Did,
        participants: Vec<Did>,
        code: ProblemCode,
        explain: &str,
    ) -> (ParticipantAcceptMachine, StepOutput) {
        let report = problem_report(thid.clone(), code, explain.to_string());
        let machine = ParticipantAcceptMachine {
            state: ParticipantState::Aborted,
            thid,
            me,
            actor: from.clone(),
            participants,
            ledger: None,
            deadline: i64::MAX,
            hash: String::new(),
            last_pre_commit: None,
        };
        (machine, StepOutput::terminal(vec![(from, ConsensusMessage::ProblemReport(report))]))
    }
}

/// Order-insensitive equality for a proposed participant set against the
/// one persisted at genesis (§3: membership is fixed for the ledger's
/// lifetime, independent of the order either side lists it in).
fn sets_match(genesis: &[Did], proposed: &[Did]) -> bool {
    let mut a: Vec<&Did> = genesis.iter().collect();
    let mut b: Vec<&Did> = proposed.iter().collect();
    a.sort();
    b.sort();
    a == b
}

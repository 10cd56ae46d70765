//! The initialize-ledger state machine (§4.D): agreeing on the genesis of a
//! fresh microledger. Genesis transactions are installed directly via
//! `reset` (there is no staging concept for a brand-new log), so an abort
//! here means deleting the whole locally-created ledger rather than
//! discarding a staging area.

use std::collections::BTreeMap;

use simplex_core::{ConsensusError, Did, ProblemCode, ThreadId};
use simplex_crypto::{envelope, SignatureEnvelope};
use simplex_protocol::{
    ledger_hash, problem_report, Ack, ConsensusMessage, InitializeRequest, InitializeResponse,
    LedgerGenesis, LedgerHash, MsgId, Thread,
};
use simplex_store::Txn;

use crate::common::{multicast, Event, StepCtx, StepOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActorState {
    AwaitingResponses,
    Committed,
    Aborted,
}

/// Actor side: `idle → proposed → awaiting-responses → verifying →
/// committed | aborted`. `proposed`/`verifying` are folded into the single
/// synchronous transition either side of a receive wait, matching §5's
/// "every send is atomic and non-suspending".
pub struct ActorInitMachine {
    state: ActorState,
    thid: ThreadId,
    me: Did,
    ledger_name: String,
    participants: Vec<Did>,
    deadline: i64,
    responses: BTreeMap<Did, SignatureEnvelope>,
    ledger_hash: LedgerHash,
}

impl ActorInitMachine {
    pub fn thread_id(&self) -> &ThreadId {
        &self.thid
    }

    pub fn deadline(&self) -> i64 {
        self.deadline
    }

    pub fn is_terminal(&self) -> bool {
        self.state != ActorState::AwaitingResponses
    }

    /// Whether this run reached `committed` (as opposed to `aborted`).
    /// Meaningless while `!is_terminal()`.
    pub fn is_committed(&self) -> bool {
        self.state == ActorState::Committed
    }

    /// Step 1: open and install the genesis locally, dispatch
    /// `initialize-request` to every other participant.
    pub fn start(
        ctx: &mut StepCtx,
        me: Did,
        participants: Vec<Did>,
        name: String,
        genesis_txns: Vec<Txn>,
        timeout_sec: u64,
    ) -> Result<(Self, StepOutput), ConsensusError> {
        simplex_protocol::require_well_formed_participants(&participants)
            .map_err(|r| ConsensusError::InvalidGenesis { reason: r.explain })?;
        if ctx.store.ledger_exists(&name) {
            return Err(ConsensusError::LedgerAlreadyExists { name });
        }
        let mut ledger = ctx.store.open_ledger(&name)?;
        ledger.reset(genesis_txns.clone(), participants.clone())?;
        let snapshot = ledger.snapshot()?;

        let ledger_obj = LedgerGenesis {
            genesis: genesis_txns,
            name: name.clone(),
            root_hash: snapshot.root_hash,
            extra: Default::default(),
        };
        let lhash = ledger_hash(&ledger_obj).map_err(|e| ConsensusError::Canonicalization(e.to_string()))?;
        let sig = ctx.signer.sign(&me, &lhash.0, ctx.now)?;

        let thid = ThreadId::new();
        let req = InitializeRequest {
            id: MsgId::new(),
            thread: Thread::new(thid.clone()),
            actor: me.clone(),
            ledger: ledger_obj,
            ledger_hash: lhash,
            participants: participants.clone(),
            signatures: vec![sig.clone()],
            timeout_sec,
        };

        let mut responses = BTreeMap::new();
        responses.insert(me.clone(), sig);

        let outbound = multicast(&participants, &me, ConsensusMessage::InitializeRequest(req));
        let machine = ActorInitMachine {
            state: ActorState::AwaitingResponses,
            thid,
            me,
            ledger_name: name,
            participants,
            deadline: ctx.now + timeout_sec as i64,
            responses,
            ledger_hash: lhash,
        };
        Ok((machine, StepOutput::pending(outbound)))
    }

    pub fn on_event(&mut self, ctx: &mut StepCtx, event: Event) -> Result<StepOutput, ConsensusError> {
        if self.state != ActorState::AwaitingResponses {
            return Ok(StepOutput::default());
        }
        match event {
            Event::Message { from, message: ConsensusMessage::InitializeResponse(resp) } => {
                self.on_response(ctx, from, resp)
            }
            Event::Message { from, message: ConsensusMessage::ProblemReport(pr) } => {
                tracing::warn!(peer = %from, code = %pr.problem_code, "participant aborted initialize-ledger");
                Ok(self.abort(ctx, ProblemCode::ResponseNotAccepted, "participant reported problem"))
            }
            Event::Timeout => Ok(self.abort(ctx, ProblemCode::ResponseProcessingError, "timed out awaiting responses")),
            Event::Message { .. } => Ok(StepOutput::default()),
        }
    }

    fn on_response(
        &mut self,
        ctx: &mut StepCtx,
        from: Did,
        resp: InitializeResponse,
    ) -> Result<StepOutput, ConsensusError> {
        if !self.participants.contains(&from) || self.responses.contains_key(&from) {
            return Ok(StepOutput::default());
        }
        let Some(env) = resp.signatures.last() else {
            return Ok(self.abort(ctx, ProblemCode::ResponseNotAccepted, "empty signature list"));
        };
        let verkey = ctx.resolver.verkey_of(&from)?;
        let verified = match envelope::verify(env, &verkey, ctx.now) {
            Ok(v) => v,
            Err(_) => return Ok(self.abort(ctx, ProblemCode::ResponseNotAccepted, "bad participant signature")),
        };
        if verified.payload != self.ledger_hash.0 {
            return Ok(self.abort(ctx, ProblemCode::ResponseProcessingError, "signature covers wrong ledger~hash"));
        }

        self.responses.insert(from, env.clone());
        if self.responses.len() == self.participants.len() {
            self.state = ActorState::Committed;
            let ack = Ack { id: MsgId::new(), thread: Thread::new(self.thid.clone()) };
            let outbound = multicast(&self.participants, &self.me, ConsensusMessage::Ack(ack));
            return Ok(StepOutput::terminal(outbound));
        }
        Ok(StepOutput::default())
    }

    fn abort(&mut self, ctx: &mut StepCtx, code: ProblemCode, explain: &str) -> StepOutput {
        self.state = ActorState::Aborted;
        if let Err(e) = ctx.store.delete_ledger(&self.ledger_name) {
            tracing::error!(error = %e, ledger = %self.ledger_name, "failed to delete uncommitted ledger on abort");
        }
        let report = problem_report(self.thid.clone(), code, explain.to_string());
        let outbound = multicast(&self.participants, &self.me, ConsensusMessage::ProblemReport(report));
        StepOutput::terminal(outbound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParticipantState {
    AwaitingAck,
    Committed,
    Aborted,
}

/// Participant side: `idle → received-propose → verifying → responded →
/// awaiting-ack → committed | aborted`.
pub struct ParticipantInitMachine {
    state: ParticipantState,
    thid: ThreadId,
    me: Did,
    actor: Did,
    ledger_name: String,
    deadline: i64,
    last_response: InitializeResponse,
}

impl ParticipantInitMachine {
    pub fn thread_id(&self) -> &ThreadId {
        &self.thid
    }

    pub fn deadline(&self) -> i64 {
        self.deadline
    }

    pub fn is_terminal(&self) -> bool {
        self.state != ParticipantState::AwaitingAck
    }

    /// Whether this run reached `committed` (as opposed to `aborted`).
    /// Meaningless while `!is_terminal()`.
    pub fn is_committed(&self) -> bool {
        self.state == ParticipantState::Committed
    }

    /// §4.D step 2. Always returns a machine (possibly already terminal)
    /// plus the single outbound message to send back to the actor.
    pub fn on_initialize_request(
        ctx: &mut StepCtx,
        me: Did,
        from: Did,
        req: InitializeRequest,
    ) -> Result<(Self, StepOutput), ConsensusError> {
        let thid = req.thread.thid.clone();

        if let Err(r) = simplex_protocol::require_well_formed_participants(&req.participants) {
            return Ok(reject(thid, me, from, req.ledger.name, r.code, &r.explain));
        }
        if let Err(r) = simplex_protocol::require_self_in_participants(&req.participants, &me) {
            return Ok(reject(thid, me, from, req.ledger.name, r.code, &r.explain));
        }
        if ctx.store.ledger_exists(&req.ledger.name) {
            return Ok(reject(thid, me, from, req.ledger.name, ProblemCode::RequestNotAccepted, "ledger name already exists locally"));
        }
        let verkey = match ctx.resolver.verkey_of(&req.actor) {
            Ok(vk) => vk,
            Err(_) => return Ok(reject(thid, me, from, req.ledger.name, ProblemCode::RequestNotAccepted, "actor DID does not resolve")),
        };
        let Some(actor_env) = req.signatures.last() else {
            return Ok(reject(thid, me, from, req.ledger.name, ProblemCode::RequestNotAccepted, "empty signature list"));
        };
        let verified = match envelope::verify(actor_env, &verkey, ctx.now) {
            Ok(v) => v,
            Err(_) => return Ok(reject(thid, me, from, req.ledger.name, ProblemCode::RequestNotAccepted, "actor signature invalid")),
        };
        let recomputed_hash = match ledger_hash(&req.ledger) {
            Ok(h) => h,
            Err(e) => {
                let explain = e.to_string();
                return Ok(reject(thid, me, from, req.ledger.name, ProblemCode::RequestProcessingError, &explain));
            }
        };
        if verified.payload != recomputed_hash.0 || recomputed_hash.0 != req.ledger_hash.0 {
            return Ok(reject(thid, me, from, req.ledger.name, ProblemCode::RequestProcessingError, "ledger~hash does not recompute"));
        }
        let recomputed_root = crate::root_of(&req.ledger.genesis)
            .map_err(|e| ConsensusError::Canonicalization(e.to_string()))?;
        if recomputed_root != req.ledger.root_hash {
            return Ok(reject(thid, me, from, req.ledger.name, ProblemCode::RequestProcessingError, "root_hash does not recompute from genesis"));
        }

        let mut ledger = ctx.store.open_ledger(&req.ledger.name)?;
        if let Err(e) = ledger.reset(req.ledger.genesis.clone(), req.participants.clone()) {
            let code = e.problem_code().unwrap_or(ProblemCode::RequestProcessingError);
            let _ = ctx.store.delete_ledger(&req.ledger.name);
            let explain = e.to_string();
            return Ok(reject(thid, me, from, req.ledger.name, code, &explain));
        }

        let own_sig = ctx.signer.sign(&me, &req.ledger_hash.0, ctx.now)?;
        let mut signatures = req.signatures.clone();
        signatures.push(own_sig);
        let response = InitializeResponse { id: MsgId::new(), thread: Thread::new(thid.clone()), signatures };

        let machine = ParticipantInitMachine {
            state: ParticipantState::AwaitingAck,
            thid: thid.clone(),
            me,
            actor: from.clone(),
            ledger_name: req.ledger.name.clone(),
            deadline: ctx.now + req.timeout_sec as i64,
            last_response: response.clone(),
        };
        let outbound = vec![(from, ConsensusMessage::InitializeResponse(response))];
        Ok((machine, StepOutput::pending(outbound)))
    }

    pub fn on_event(&mut self, ctx: &mut StepCtx, event: Event) -> Result<StepOutput, ConsensusError> {
        if self.state != ParticipantState::AwaitingAck {
            return Ok(StepOutput::default());
        }
        match event {
            Event::Message { message: ConsensusMessage::Ack(_), .. } => {
                self.state = ParticipantState::Committed;
                Ok(StepOutput::terminal(vec![]))
            }
            Event::Message { message: ConsensusMessage::ProblemReport(_), .. } => {
                Ok(self.abort(ctx, ProblemCode::ResponseNotAccepted))
            }
            Event::Message { message: ConsensusMessage::InitializeRequest(_), .. } => {
                // Duplicate thid replay (§4.D tie-breaks): resend the stored response.
                Ok(StepOutput::pending(vec![(self.actor.clone(), ConsensusMessage::InitializeResponse(self.last_response.clone()))]))
            }
            Event::Timeout => Ok(self.abort(ctx, ProblemCode::ResponseProcessingError)),
            Event::Message { .. } => Ok(StepOutput::default()),
        }
    }

    fn abort(&mut self, ctx: &mut StepCtx, code: ProblemCode) -> StepOutput {
        self.state = ParticipantState::Aborted;
        if let Err(e) = ctx.store.delete_ledger(&self.ledger_name) {
            tracing::error!(error = %e, ledger = %self.ledger_name, "failed to delete uncommitted ledger on abort");
        }
        let report = problem_report(self.thid.clone(), code, "abandoning unacknowledged genesis".to_string());
        StepOutput::terminal(vec![(self.actor.clone(), ConsensusMessage::ProblemReport(report))])
    }
}

/// Build an already-terminal `ParticipantInitMachine` plus the
/// `problem_report` to send back to the actor. Used for every validation
/// failure in §4.D step 2 — all share the same shape, only the
/// problem-code and explanation differ.
fn reject(
    thid: ThreadId,
    me: Did,
    from: Did,
    ledger_name: String,
    code: ProblemCode,
    explain: &str,
) -> (ParticipantInitMachine, StepOutput) {
    let report = problem_report(thid.clone(), code, explain.to_string());
    let machine = ParticipantInitMachine {
        state: ParticipantState::Aborted,
        thid: thid.clone(),
        me,
        actor: from.clone(),
        ledger_name,
        // Never scheduled for a timeout — already terminal.
        deadline: i64::MAX,
        last_response: InitializeResponse { id: MsgId::new(), thread: Thread::new(thid), signatures: vec![] },
    };
    (machine, StepOutput::terminal(vec![(from, ConsensusMessage::ProblemReport(report))]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplex_crypto::KeyPair;
    use simplex_protocol::DidResolver;
    use simplex_store::Store;
    use std::collections::HashMap;

    struct TestSigner(HashMap<Did, KeyPair>);
    impl simplex_protocol::Signer for TestSigner {
        fn sign(&self, did: &Did, payload: &[u8], now: i64) -> Result<SignatureEnvelope, ConsensusError> {
            let kp = self.0.get(did).expect("unknown signer did");
            Ok(envelope::sign(payload, now, kp))
        }
    }

    struct TestResolver(HashMap<Did, simplex_core::VerKey>);
    impl DidResolver for TestResolver {
        fn verkey_of(&self, did: &Did) -> Result<simplex_core::VerKey, ConsensusError> {
            self.0.get(did).copied().ok_or_else(|| ConsensusError::UnknownParticipant { did: did.to_string() })
        }
    }

    fn fixture() -> (Did, Did, TestSigner, TestResolver) {
        let a = Did::new("did:sov:A");
        let b = Did::new("did:sov:B");
        let kp_a = KeyPair::generate();
        let kp_b = KeyPair::generate();
        let mut verkeys = HashMap::new();
        verkeys.insert(a.clone(), kp_a.verkey());
        verkeys.insert(b.clone(), kp_b.verkey());
        let mut signers = HashMap::new();
        signers.insert(a.clone(), kp_a);
        signers.insert(b.clone(), kp_b);
        (a, b, TestSigner(signers), TestResolver(verkeys))
    }

    fn txn(seq_no: u64) -> Txn {
        serde_json::json!({ "id": seq_no, "txnMetadata": { "seqNo": seq_no } })
    }

    #[test]
    fn happy_genesis_two_participants() {
        let (a, b, signer, resolver) = fixture();
        let store = Store::open_temporary().unwrap();
        let mut ctx = StepCtx { store: &store, signer: &signer, resolver: &resolver, now: 1000, max_skew_sec: 300 };

        let (mut actor, out) = ActorInitMachine::start(&mut ctx, a.clone(), vec![a.clone(), b.clone()], "L".into(), vec![txn(1)], 30).unwrap();
        let (to, msg) = out.outbound.into_iter().next().unwrap();
        assert_eq!(to, b);
        let ConsensusMessage::InitializeRequest(req) = msg else { panic!("wrong kind") };

        let (mut participant, presp) = ParticipantInitMachine::on_initialize_request(&mut ctx, b.clone(), a.clone(), req).unwrap();
        assert!(!participant.is_terminal());
        let (to, resp_msg) = presp.outbound.into_iter().next().unwrap();
        assert_eq!(to, a);

        let out2 = actor.on_event(&mut ctx, Event::Message { from: b.clone(), message: resp_msg }).unwrap();
        assert!(out2.finished);
        let (_, ack_msg) = out2.outbound.into_iter().next().unwrap();

        let out3 = participant.on_event(&mut ctx, Event::Message { from: a.clone(), message: ack_msg }).unwrap();
        assert!(out3.finished);
        assert!(participant.is_terminal());

        assert!(store.ledger_exists("L"));
    }

    #[test]
    fn divergent_root_hash_is_rejected_by_participant() {
        let (a, b, signer, resolver) = fixture();
        let store = Store::open_temporary().unwrap();
        let mut ctx = StepCtx { store: &store, signer: &signer, resolver: &resolver, now: 1000, max_skew_sec: 300 };

        let (_actor, out) = ActorInitMachine::start(&mut ctx, a.clone(), vec![a.clone(), b.clone()], "L".into(), vec![txn(1)], 30).unwrap();
        let (_, msg) = out.outbound.into_iter().next().unwrap();
        let ConsensusMessage::InitializeRequest(mut req) = msg else { panic!() };
        req.ledger.root_hash.0[0] ^= 0xFF;

        let (participant, presp) = ParticipantInitMachine::on_initialize_request(&mut ctx, b.clone(), a.clone(), req).unwrap();
        assert!(participant.is_terminal());
        let (_, rejection) = presp.outbound.into_iter().next().unwrap();
        assert!(matches!(rejection, ConsensusMessage::ProblemReport(_)));
        assert!(!store.ledger_exists("L"));
    }

    #[test]
    fn actor_timeout_deletes_local_ledger() {
        let (a, b, signer, resolver) = fixture();
        let store = Store::open_temporary().unwrap();
        let mut ctx = StepCtx { store: &store, signer: &signer, resolver: &resolver, now: 1000, max_skew_sec: 300 };
        let (mut actor, _out) = ActorInitMachine::start(&mut ctx, a.clone(), vec![a.clone(), b.clone()], "L".into(), vec![txn(1)], 30).unwrap();
        assert!(store.ledger_exists("L"));
        let out = actor.on_event(&mut ctx, Event::Timeout).unwrap();
        assert!(out.finished);
        assert!(!store.ledger_exists("L"));
    }
}

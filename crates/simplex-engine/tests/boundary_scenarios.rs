//! Integration-style test harness for the three-participant boundary
//! scenarios named in the design's testable-properties section: each test
//! drives `ActorInitMachine`/`ParticipantInitMachine` or
//! `ActorAcceptMachine`/`ParticipantAcceptMachine` directly through their
//! `(state, event) -> (state, outbound)` step functions, with no transport
//! and no real clock — a deterministic simulator over three named peers
//! (A the actor, B and C the other participants).

use std::collections::HashMap;

use simplex_core::{ConsensusError, Did, VerKey};
use simplex_crypto::{envelope, KeyPair, SignatureEnvelope};
use simplex_engine::accept_block::{ActorAcceptMachine, ParticipantAcceptMachine};
use simplex_engine::initialize::{ActorInitMachine, ParticipantInitMachine};
use simplex_engine::{Event, StepCtx};
use simplex_protocol::{ConsensusMessage, DidResolver, Signer};
use simplex_store::{Store, Txn};

struct ThreePartyFixture {
    a: Did,
    b: Did,
    c: Did,
    signer: TestSigner,
    resolver: TestResolver,
    store_a: Store,
    store_b: Store,
    store_c: Store,
}

struct TestSigner(HashMap<Did, KeyPair>);
impl Signer for TestSigner {
    fn sign(&self, did: &Did, payload: &[u8], now: i64) -> Result<SignatureEnvelope, ConsensusError> {
        let kp = self.0.get(did).expect("unknown signer did");
        Ok(envelope::sign(payload, now, kp))
    }
}

struct TestResolver(HashMap<Did, VerKey>);
impl DidResolver for TestResolver {
    fn verkey_of(&self, did: &Did) -> Result<VerKey, ConsensusError> {
        self.0
            .get(did)
            .copied()
            .ok_or_else(|| ConsensusError::UnknownParticipant { did: did.to_string() })
    }
}

fn fixture() -> ThreePartyFixture {
    let a = Did::new("did:sov:A");
    let b = Did::new("did:sov:B");
    let c = Did::new("did:sov:C");
    let kp_a = KeyPair::generate();
    let kp_b = KeyPair::generate();
    let kp_c = KeyPair::generate();

    let mut verkeys = HashMap::new();
    verkeys.insert(a.clone(), kp_a.verkey());
    verkeys.insert(b.clone(), kp_b.verkey());
    verkeys.insert(c.clone(), kp_c.verkey());
    let mut signers = HashMap::new();
    signers.insert(a.clone(), kp_a);
    signers.insert(b.clone(), kp_b);
    signers.insert(c.clone(), kp_c);

    ThreePartyFixture {
        a,
        b,
        c,
        signer: TestSigner(signers),
        resolver: TestResolver(verkeys),
        store_a: Store::open_temporary().unwrap(),
        store_b: Store::open_temporary().unwrap(),
        store_c: Store::open_temporary().unwrap(),
    }
}

fn txn(seq_no: u64) -> Txn {
    serde_json::json!({ "id": seq_no, "txnMetadata": { "seqNo": seq_no } })
}

fn ctx<'a>(fx: &'a ThreePartyFixture, store: &'a Store, now: i64) -> StepCtx<'a> {
    StepCtx { store, signer: &fx.signer, resolver: &fx.resolver, now, max_skew_sec: 300 }
}

fn first_to(outbound: &[(Did, ConsensusMessage)], to: &Did) -> ConsensusMessage {
    outbound
        .iter()
        .find(|(peer, _)| peer == to)
        .map(|(_, m)| m.clone())
        .expect("no outbound message addressed to the expected peer")
}

/// Scenario 1 (§8.1): happy genesis, 3 participants.
#[test]
fn happy_genesis_three_participants() {
    let fx = fixture();
    let participants = vec![fx.a.clone(), fx.b.clone(), fx.c.clone()];

    let mut ctx_a = ctx(&fx, &fx.store_a, 1_000);
    let (mut actor, out) = ActorInitMachine::start(&mut ctx_a, fx.a.clone(), participants.clone(), "L".into(), vec![txn(1)], 30).unwrap();

    let mut ctx_b = ctx(&fx, &fx.store_b, 1_000);
    let req_to_b = first_to(&out.outbound, &fx.b);
    let ConsensusMessage::InitializeRequest(req_b) = req_to_b else { panic!() };
    let (mut participant_b, pout_b) = ParticipantInitMachine::on_initialize_request(&mut ctx_b, fx.b.clone(), fx.a.clone(), req_b).unwrap();
    assert!(!participant_b.is_terminal());

    let mut ctx_c = ctx(&fx, &fx.store_c, 1_000);
    let req_to_c = first_to(&out.outbound, &fx.c);
    let ConsensusMessage::InitializeRequest(req_c) = req_to_c else { panic!() };
    let (mut participant_c, pout_c) = ParticipantInitMachine::on_initialize_request(&mut ctx_c, fx.c.clone(), fx.a.clone(), req_c).unwrap();
    assert!(!participant_c.is_terminal());

    let resp_b = pout_b.outbound.into_iter().next().unwrap().1;
    let out2 = actor.on_event(&mut ctx_a, Event::Message { from: fx.b.clone(), message: resp_b }).unwrap();
    assert!(!out2.finished, "actor must not finish before every participant has responded");

    let resp_c = pout_c.outbound.into_iter().next().unwrap().1;
    let out3 = actor.on_event(&mut ctx_a, Event::Message { from: fx.c.clone(), message: resp_c }).unwrap();
    assert!(out3.finished);
    assert!(actor.is_committed());

    let ack_b = first_to(&out3.outbound, &fx.b);
    let ack_c = first_to(&out3.outbound, &fx.c);
    let out_b = participant_b.on_event(&mut ctx_b, Event::Message { from: fx.a.clone(), message: ack_b }).unwrap();
    let out_c = participant_c.on_event(&mut ctx_c, Event::Message { from: fx.a.clone(), message: ack_c }).unwrap();
    assert!(out_b.finished && participant_b.is_committed());
    assert!(out_c.finished && participant_c.is_committed());

    for store in [&fx.store_a, &fx.store_b, &fx.store_c] {
        let ledger = store.open_ledger("L").unwrap();
        let snap = ledger.snapshot().unwrap();
        assert_eq!(snap.size, 1);
        let canon = simplex_crypto::canonicalize(&txn(1)).unwrap();
        let expected_leaf = simplex_store::merkle::leaf_hashes(std::iter::once(canon.as_slice()))[0];
        assert_eq!(snap.root_hash.0, expected_leaf);
    }
}

/// Scenario 2 (§8.2): the actor's stated `root_hash` is wrong by one byte —
/// every participant rejects, the actor aborts, and no peer retains "L".
#[test]
fn divergent_genesis_root_hash_aborts_everywhere() {
    let fx = fixture();
    let participants = vec![fx.a.clone(), fx.b.clone(), fx.c.clone()];

    let mut ctx_a = ctx(&fx, &fx.store_a, 1_000);
    let (mut actor, out) = ActorInitMachine::start(&mut ctx_a, fx.a.clone(), participants, "L".into(), vec![txn(1)], 30).unwrap();

    let mut ctx_b = ctx(&fx, &fx.store_b, 1_000);
    let ConsensusMessage::InitializeRequest(mut req_b) = first_to(&out.outbound, &fx.b) else { panic!() };
    req_b.ledger.root_hash.0[0] ^= 0xFF;
    let (participant_b, pout_b) = ParticipantInitMachine::on_initialize_request(&mut ctx_b, fx.b.clone(), fx.a.clone(), req_b).unwrap();
    assert!(participant_b.is_terminal() && !participant_b.is_committed());
    assert!(matches!(pout_b.outbound[0].1, ConsensusMessage::ProblemReport(_)));

    let mut ctx_c = ctx(&fx, &fx.store_c, 1_000);
    let ConsensusMessage::InitializeRequest(mut req_c) = first_to(&out.outbound, &fx.c) else { panic!() };
    req_c.ledger.root_hash.0[0] ^= 0xFF;
    let (participant_c, pout_c) = ParticipantInitMachine::on_initialize_request(&mut ctx_c, fx.c.clone(), fx.a.clone(), req_c).unwrap();
    assert!(participant_c.is_terminal() && !participant_c.is_committed());

    let report_from_b = pout_b.outbound.into_iter().next().unwrap().1;
    let out_abort = actor.on_event(&mut ctx_a, Event::Message { from: fx.b.clone(), message: report_from_b }).unwrap();
    assert!(out_abort.finished);
    assert!(!actor.is_committed());

    assert!(!fx.store_a.ledger_exists("L"));
    assert!(!fx.store_b.ledger_exists("L"));
    assert!(!fx.store_c.ledger_exists("L"));
    let _ = pout_c;
}

fn run_happy_genesis(fx: &ThreePartyFixture) {
    let participants = vec![fx.a.clone(), fx.b.clone(), fx.c.clone()];
    let mut ctx_a = ctx(fx, &fx.store_a, 1_000);
    let (_actor, out) = ActorInitMachine::start(&mut ctx_a, fx.a.clone(), participants, "L".into(), vec![txn(1)], 30).unwrap();

    let mut ctx_b = ctx(fx, &fx.store_b, 1_000);
    let ConsensusMessage::InitializeRequest(req_b) = first_to(&out.outbound, &fx.b) else { panic!() };
    ParticipantInitMachine::on_initialize_request(&mut ctx_b, fx.b.clone(), fx.a.clone(), req_b).unwrap();

    let mut ctx_c = ctx(fx, &fx.store_c, 1_000);
    let ConsensusMessage::InitializeRequest(req_c) = first_to(&out.outbound, &fx.c) else { panic!() };
    ParticipantInitMachine::on_initialize_request(&mut ctx_c, fx.c.clone(), fx.a.clone(), req_c).unwrap();
}

/// Scenario 3 (§8.3): happy batch, 3 participants, size 0 -> 3.
#[test]
fn happy_batch_three_participants_advances_every_peer_in_lockstep() {
    let fx = fixture();
    run_happy_genesis(&fx);

    let mut ctx_a = ctx(&fx, &fx.store_a, 2_000);
    let (mut actor, out) = ActorAcceptMachine::start(&mut ctx_a, fx.a.clone(), "L".into(), vec![txn(2), txn(3), txn(4)], 30).unwrap();

    let mut ctx_b = ctx(&fx, &fx.store_b, 2_000);
    let ConsensusMessage::StagePropose(propose_b) = first_to(&out.outbound, &fx.b) else { panic!() };
    let (mut participant_b, pout_b) = ParticipantAcceptMachine::on_stage_propose(&mut ctx_b, fx.b.clone(), fx.a.clone(), propose_b).unwrap();

    let mut ctx_c = ctx(&fx, &fx.store_c, 2_000);
    let ConsensusMessage::StagePropose(propose_c) = first_to(&out.outbound, &fx.c) else { panic!() };
    let (mut participant_c, pout_c) = ParticipantAcceptMachine::on_stage_propose(&mut ctx_c, fx.c.clone(), fx.a.clone(), propose_c).unwrap();

    let pre_commit_b = pout_b.outbound.into_iter().next().unwrap().1;
    let out2 = actor.on_event(&mut ctx_a, Event::Message { from: fx.b.clone(), message: pre_commit_b }).unwrap();
    assert!(!out2.finished, "actor must await every pre-commit before committing");

    let pre_commit_c = pout_c.outbound.into_iter().next().unwrap().1;
    let out3 = actor.on_event(&mut ctx_a, Event::Message { from: fx.c.clone(), message: pre_commit_c }).unwrap();
    assert!(!out3.finished);

    let commit_b = first_to(&out3.outbound, &fx.b);
    let commit_c = first_to(&out3.outbound, &fx.c);
    let post_b = participant_b.on_event(&mut ctx_b, Event::Message { from: fx.a.clone(), message: commit_b }).unwrap();
    let post_c = participant_c.on_event(&mut ctx_c, Event::Message { from: fx.a.clone(), message: commit_c }).unwrap();
    assert!(post_b.finished && participant_b.is_committed());
    assert!(post_c.finished && participant_c.is_committed());

    let post_commit_b = post_b.outbound.into_iter().next().unwrap().1;
    let final_a = actor.on_event(&mut ctx_a, Event::Message { from: fx.b.clone(), message: post_commit_b }).unwrap();
    assert!(!final_a.finished, "actor must await every post-commit");

    let post_commit_c = post_c.outbound.into_iter().next().unwrap().1;
    let final_a2 = actor.on_event(&mut ctx_a, Event::Message { from: fx.c.clone(), message: post_commit_c }).unwrap();
    assert!(final_a2.finished);
    assert!(actor.is_committed());

    for store in [&fx.store_a, &fx.store_b, &fx.store_c] {
        let ledger = store.open_ledger("L").unwrap();
        let snap = ledger.snapshot().unwrap();
        assert_eq!(snap.size, 4);
        assert_eq!(snap.uncommitted_size, 4);
        assert_eq!(snap.seq_no, 4);
    }
    let root_a = fx.store_a.open_ledger("L").unwrap().snapshot().unwrap().root_hash;
    let root_b = fx.store_b.open_ledger("L").unwrap().snapshot().unwrap().root_hash;
    let root_c = fx.store_c.open_ledger("L").unwrap().snapshot().unwrap().root_hash;
    assert_eq!(root_a, root_b);
    assert_eq!(root_b, root_c);
}

/// Scenario 5 (§8.5): `stage-commit` is dropped en route to C. A and B
/// commit; C never receives the message, times out, discards its staged
/// batch, and a later proposal from A surfaces the resulting size mismatch.
#[test]
fn stage_commit_dropped_to_one_peer_leaves_it_behind_and_next_round_detects_it() {
    let fx = fixture();
    run_happy_genesis(&fx);

    let mut ctx_a = ctx(&fx, &fx.store_a, 2_000);
    let (mut actor, out) = ActorAcceptMachine::start(&mut ctx_a, fx.a.clone(), "L".into(), vec![txn(2), txn(3)], 30).unwrap();

    let mut ctx_b = ctx(&fx, &fx.store_b, 2_000);
    let ConsensusMessage::StagePropose(propose_b) = first_to(&out.outbound, &fx.b) else { panic!() };
    let (mut participant_b, pout_b) = ParticipantAcceptMachine::on_stage_propose(&mut ctx_b, fx.b.clone(), fx.a.clone(), propose_b).unwrap();

    let mut ctx_c = ctx(&fx, &fx.store_c, 2_000);
    let ConsensusMessage::StagePropose(propose_c) = first_to(&out.outbound, &fx.c) else { panic!() };
    let (mut participant_c, _pout_c) = ParticipantAcceptMachine::on_stage_propose(&mut ctx_c, fx.c.clone(), fx.a.clone(), propose_c).unwrap();

    let pre_commit_b = pout_b.outbound.into_iter().next().unwrap().1;
    actor.on_event(&mut ctx_a, Event::Message { from: fx.b.clone(), message: pre_commit_b }).unwrap();
    let pre_commit_c = _pout_c.outbound.into_iter().next().unwrap().1;
    let out_commit = actor.on_event(&mut ctx_a, Event::Message { from: fx.c.clone(), message: pre_commit_c }).unwrap();

    // "stage-commit" reaches B but is dropped before reaching C.
    let commit_b = first_to(&out_commit.outbound, &fx.b);
    let post_b = participant_b.on_event(&mut ctx_b, Event::Message { from: fx.a.clone(), message: commit_b }).unwrap();
    assert!(post_b.finished && participant_b.is_committed());
    let post_commit_b = post_b.outbound.into_iter().next().unwrap().1;
    let out_after_b = actor.on_event(&mut ctx_a, Event::Message { from: fx.b.clone(), message: post_commit_b }).unwrap();
    assert!(!out_after_b.finished, "actor must still await C's post-commit");

    // C never sees stage-commit; its deadline fires instead.
    let out_c_timeout = participant_c.on_event(&mut ctx_c, Event::Timeout).unwrap();
    assert!(out_c_timeout.finished);
    assert!(!participant_c.is_committed());

    // A also times out waiting on C's post-commit. Per §4.F the abort path
    // unconditionally discards staged state, so the actor's own ledger
    // reverts too — it never reached its own `commit_staged` call (that
    // only happens once every post-commit is in). This is the asymmetry
    // the design calls out: B, which already promoted staged -> committed
    // before the drop, stays committed; A and C do not.
    let out_a_timeout = actor.on_event(&mut ctx_a, Event::Timeout).unwrap();
    assert!(out_a_timeout.finished);
    assert!(!actor.is_committed(), "actor abandons the round once C cannot be confirmed, even though B already committed");

    assert_eq!(fx.store_a.open_ledger("L").unwrap().snapshot().unwrap().size, 1, "actor's own staged batch is discarded on its own timeout");
    assert_eq!(fx.store_b.open_ledger("L").unwrap().snapshot().unwrap().size, 3, "B already promoted staged to committed before the drop");
    assert_eq!(fx.store_c.open_ledger("L").unwrap().snapshot().unwrap().size, 1, "C discarded its staged batch on timeout");

    // A's next proposal continues from *its own* view of the ledger (size
    // 1, so the next batch carries seqNo 2) — A and C agree on that
    // continuation, but B silently raced ahead to size 3 during the dropped
    // round. B's `stage` rejects the gap rather than silently re-diverging:
    // the mismatch surfaces as a `request_processing_error`, exactly the
    // out-of-band repair signal the design calls for instead of a second
    // silent commit.
    let mut ctx_a2 = ctx(&fx, &fx.store_a, 3_000);
    let (_actor2, out2) = ActorAcceptMachine::start(&mut ctx_a2, fx.a.clone(), "L".into(), vec![txn(2)], 30).unwrap();
    let mut ctx_b2 = ctx(&fx, &fx.store_b, 3_000);
    let ConsensusMessage::StagePropose(propose_b2) = first_to(&out2.outbound, &fx.b) else { panic!() };
    let (participant_b2, pout_b2) = ParticipantAcceptMachine::on_stage_propose(&mut ctx_b2, fx.b.clone(), fx.a.clone(), propose_b2).unwrap();
    assert!(participant_b2.is_terminal() && !participant_b2.is_committed());
    assert!(matches!(pout_b2.outbound[0].1, ConsensusMessage::ProblemReport(_)));
}

/// Scenario 6 (§8.6): replaying `initialize-request` on the same thid after
/// B has already responded is idempotent — B resends its stored response,
/// no second `reset` happens, and the round still ends identically to the
/// happy path.
#[test]
fn duplicate_initialize_request_replay_is_idempotent() {
    let fx = fixture();
    let participants = vec![fx.a.clone(), fx.b.clone(), fx.c.clone()];

    let mut ctx_a = ctx(&fx, &fx.store_a, 1_000);
    let (_actor, out) = ActorInitMachine::start(&mut ctx_a, fx.a.clone(), participants, "L".into(), vec![txn(1)], 30).unwrap();

    let mut ctx_b = ctx(&fx, &fx.store_b, 1_000);
    let ConsensusMessage::InitializeRequest(req_b) = first_to(&out.outbound, &fx.b) else { panic!() };
    let (mut participant_b, pout_b) = ParticipantInitMachine::on_initialize_request(&mut ctx_b, fx.b.clone(), fx.a.clone(), req_b.clone()).unwrap();
    let first_response = pout_b.outbound.into_iter().next().unwrap().1;

    // The actor's request is replayed verbatim on the same thid.
    let replay = participant_b
        .on_event(&mut ctx_b, Event::Message { from: fx.a.clone(), message: ConsensusMessage::InitializeRequest(req_b) })
        .unwrap();
    assert!(!replay.finished, "a duplicate propose must not itself terminate the machine");
    let resent = replay.outbound.into_iter().next().unwrap().1;
    assert_eq!(resent, first_response, "the resent response must be byte-identical to the original");

    // Only one ledger "L" was ever installed locally — replay did not reset it twice.
    let ledger = fx.store_b.open_ledger("L").unwrap();
    assert_eq!(ledger.snapshot().unwrap().size, 1);
}

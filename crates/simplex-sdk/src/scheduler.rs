//! The scheduler: routes inbound messages to the right state-machine
//! instance by thread id (§3, §6), owns the single [`Transport`] handle and
//! the shared [`Store`]/signer/resolver, and enforces that a microledger's
//! store is owned by exactly one live instance at a time (§5).
//!
//! Cooperative concurrency (§9's design note) falls out of the engine's
//! value-typed `(state, event) -> (state, outbound)` step shape: the
//! scheduler just needs to know, at any moment, which thread id's deadline
//! is soonest and which inbound message belongs to which instance. `pump`
//! answers exactly one of those two questions per call; `run_forever` loops
//! it for a long-lived node process, and the blocking entry points
//! (`initialize_ledger`, `commit_block`) loop it until their own thread id
//! resolves.

use std::collections::{HashMap, HashSet};

use simplex_core::{ConsensusError, Did, MachineId, ProblemCode, Role, ThreadId};
use simplex_engine::accept_block::{ActorAcceptMachine, ParticipantAcceptMachine};
use simplex_engine::initialize::{ActorInitMachine, ParticipantInitMachine};
use simplex_engine::{Event, StepCtx, StepOutput};
use simplex_protocol::{ConsensusMessage, DidResolver, Signer};
use simplex_store::{Store, Txn};
use simplex_transport::{Transport, TransportError};
use thiserror::Error;

use crate::config::ConsensusConfig;

/// Scheduler-level failures, distinct from the wire `problem-code`
/// vocabulary (§12: one error type per crate boundary). `LedgerBusy` is the
/// scheduler's own invariant (§5), never surfaced by the engine itself.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("ledger '{0}' already has a live state-machine instance")]
    LedgerBusy(String),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
}

/// The outcome of one finished protocol run, reported to
/// [`InboundHandler`]s registered via
/// [`Scheduler::register_inbound_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Committed,
    Aborted,
}

/// A completed run, handed to every matching registered handler.
#[derive(Debug, Clone)]
pub struct ParticipantEvent {
    pub ledger_name: String,
    pub role: Role,
    pub thread_id: ThreadId,
    pub outcome: Outcome,
}

pub type InboundHandler = Box<dyn Fn(&ParticipantEvent) + Send + Sync>;

enum Instance {
    ActorInit(ActorInitMachine),
    ParticipantInit(ParticipantInitMachine),
    ActorAccept(ActorAcceptMachine),
    ParticipantAccept(ParticipantAcceptMachine),
}

impl Instance {
    fn deadline(&self) -> i64 {
        match self {
            Instance::ActorInit(m) => m.deadline(),
            Instance::ParticipantInit(m) => m.deadline(),
            Instance::ActorAccept(m) => m.deadline(),
            Instance::ParticipantAccept(m) => m.deadline(),
        }
    }

    fn is_terminal(&self) -> bool {
        match self {
            Instance::ActorInit(m) => m.is_terminal(),
            Instance::ParticipantInit(m) => m.is_terminal(),
            Instance::ActorAccept(m) => m.is_terminal(),
            Instance::ParticipantAccept(m) => m.is_terminal(),
        }
    }

    fn is_committed(&self) -> bool {
        match self {
            Instance::ActorInit(m) => m.is_committed(),
            Instance::ParticipantInit(m) => m.is_committed(),
            Instance::ActorAccept(m) => m.is_committed(),
            Instance::ParticipantAccept(m) => m.is_committed(),
        }
    }

    fn role(&self) -> Role {
        match self {
            Instance::ActorInit(_) | Instance::ActorAccept(_) => Role::Actor,
            Instance::ParticipantInit(_) | Instance::ParticipantAccept(_) => Role::Participant,
        }
    }

    fn on_event(&mut self, ctx: &mut StepCtx, event: Event) -> Result<StepOutput, ConsensusError> {
        match self {
            Instance::ActorInit(m) => m.on_event(ctx, event),
            Instance::ParticipantInit(m) => m.on_event(ctx, event),
            Instance::ActorAccept(m) => m.on_event(ctx, event),
            Instance::ParticipantAccept(m) => m.on_event(ctx, event),
        }
    }
}

struct RunningInstance {
    instance: Instance,
    ledger_name: String,
    id: MachineId,
}

impl RunningInstance {
    fn new(instance: Instance, ledger_name: String, thread_id: ThreadId) -> Self {
        let id = MachineId::new(instance.role(), thread_id);
        RunningInstance { instance, ledger_name, id }
    }
}

/// Extract the problem-code/explanation this scheduler itself just sent (or
/// was handed) on an abort, for the benefit of a blocked `initialize_ledger`
/// / `commit_block` caller. Falls back to a generic reason if the abort
/// path produced no outbound `problem_report` (e.g. a bare timeout with no
/// remaining peers to notify).
fn abort_reason(outbound: &[(Did, ConsensusMessage)]) -> ConsensusError {
    for (_, message) in outbound {
        if let ConsensusMessage::ProblemReport(pr) = message {
            return ConsensusError::PeerAborted {
                code: pr.problem_code,
                explain: pr.explain.clone(),
            };
        }
    }
    ConsensusError::PeerAborted {
        code: ProblemCode::ResponseProcessingError,
        explain: "consensus round aborted".to_string(),
    }
}

pub struct Scheduler<T: Transport> {
    me: Did,
    store: Store,
    signer: Box<dyn Signer + Send + Sync>,
    resolver: Box<dyn DidResolver + Send + Sync>,
    transport: T,
    config: ConsensusConfig,
    instances: HashMap<ThreadId, RunningInstance>,
    active_ledgers: HashSet<String>,
    last_outcome: HashMap<ThreadId, Result<(), ConsensusError>>,
    handlers: Vec<(Option<String>, InboundHandler)>,
}

impl<T: Transport> Scheduler<T> {
    pub fn new(
        me: Did,
        store: Store,
        signer: impl Signer + Send + Sync + 'static,
        resolver: impl DidResolver + Send + Sync + 'static,
        transport: T,
        config: ConsensusConfig,
    ) -> Self {
        Scheduler {
            me,
            store,
            signer: Box::new(signer),
            resolver: Box::new(resolver),
            transport,
            config,
            instances: HashMap::new(),
            active_ledgers: HashSet::new(),
            last_outcome: HashMap::new(),
            handlers: Vec::new(),
        }
    }

    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// This scheduler's own persisted store, for callers that need to
    /// inspect ledger state directly (e.g. to print a final snapshot).
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Subscribe to the final outcome of every protocol run this peer
    /// participates in as a non-initiating participant, optionally filtered
    /// to one ledger name (§6: "participants subscribe; the SDK routes
    /// inbound protocol messages to a new participant state machine on the
    /// matching thid").
    pub fn register_inbound_handler(&mut self, ledger_name: Option<String>, handler: InboundHandler) {
        self.handlers.push((ledger_name, handler));
    }

    fn notify(&self, ledger_name: &str, role: Role, thread_id: ThreadId, outcome: Outcome) {
        let event = ParticipantEvent {
            ledger_name: ledger_name.to_string(),
            role,
            thread_id,
            outcome,
        };
        for (filter, handler) in &self.handlers {
            match filter {
                Some(name) if name == ledger_name => handler(&event),
                None => handler(&event),
                _ => {}
            }
        }
    }

    /// Actor entry point (§6): agree on the genesis of a fresh microledger
    /// with `participants`, blocking until the run commits or aborts.
    pub async fn initialize_ledger(
        &mut self,
        name: String,
        participants: Vec<Did>,
        genesis_txns: Vec<Txn>,
        timeout_sec: u64,
    ) -> Result<(), SchedulerError> {
        if self.active_ledgers.contains(&name) {
            return Err(SchedulerError::LedgerBusy(name));
        }
        self.active_ledgers.insert(name.clone());

        let span = tracing::info_span!("consensus_round", role = %Role::Actor, ledger = %name);
        let _guard = span.enter();

        let now = self.now();
        let mut ctx = StepCtx {
            store: &self.store,
            signer: self.signer.as_ref(),
            resolver: self.resolver.as_ref(),
            now,
            max_skew_sec: self.config.max_skew_sec,
        };
        let started = ActorInitMachine::start(&mut ctx, self.me.clone(), participants, name.clone(), genesis_txns, timeout_sec);
        drop(ctx);
        drop(_guard);

        let (machine, out) = match started {
            Ok(v) => v,
            Err(e) => {
                self.active_ledgers.remove(&name);
                return Err(e.into());
            }
        };
        let thid = machine.thread_id().clone();
        self.dispatch(out.outbound).await;
        self.instances.insert(
            thid.clone(),
            RunningInstance::new(Instance::ActorInit(machine), name, thid.clone()),
        );
        self.await_completion(thid).await
    }

    /// Actor entry point (§6): append `txns` to an existing microledger via
    /// the four-stage commit, blocking until the round commits or aborts.
    pub async fn commit_block(
        &mut self,
        name: String,
        txns: Vec<Txn>,
        timeout_sec: u64,
    ) -> Result<(), SchedulerError> {
        if self.active_ledgers.contains(&name) {
            return Err(SchedulerError::LedgerBusy(name));
        }
        self.active_ledgers.insert(name.clone());

        let span = tracing::info_span!("consensus_round", role = %Role::Actor, ledger = %name);
        let _guard = span.enter();

        let now = self.now();
        let mut ctx = StepCtx {
            store: &self.store,
            signer: self.signer.as_ref(),
            resolver: self.resolver.as_ref(),
            now,
            max_skew_sec: self.config.max_skew_sec,
        };
        let started = ActorAcceptMachine::start(&mut ctx, self.me.clone(), name.clone(), txns, timeout_sec);
        drop(ctx);
        drop(_guard);

        let (machine, out) = match started {
            Ok(v) => v,
            Err(e) => {
                self.active_ledgers.remove(&name);
                return Err(e.into());
            }
        };
        let thid = machine.thread_id().clone();
        self.dispatch(out.outbound).await;
        self.instances.insert(
            thid.clone(),
            RunningInstance::new(Instance::ActorAccept(machine), name, thid.clone()),
        );
        self.await_completion(thid).await
    }

    async fn await_completion(&mut self, thid: ThreadId) -> Result<(), SchedulerError> {
        loop {
            if let Some(result) = self.last_outcome.remove(&thid) {
                return result.map_err(SchedulerError::from);
            }
            self.pump().await?;
        }
    }

    /// Process exactly one event: either the next inbound message or the
    /// earliest deadline among live instances, whichever comes first. A
    /// long-lived node calls this in a loop via [`Scheduler::run_forever`];
    /// the blocking entry points call it via [`Scheduler::await_completion`]
    /// until their own thread id resolves.
    pub async fn pump(&mut self) -> Result<(), SchedulerError> {
        let deadline = self.instances.values().map(|r| r.instance.deadline()).min();

        let received = match deadline {
            Some(deadline) => {
                let wait = (deadline - self.now()).max(0) as u64;
                tokio::select! {
                    biased;
                    msg = self.transport.recv() => Some(msg),
                    _ = tokio::time::sleep(std::time::Duration::from_secs(wait)) => None,
                }
            }
            None => Some(self.transport.recv().await),
        };

        match received {
            Some(Some((from, message))) => self.handle_message(from, message).await,
            Some(None) => {
                tracing::warn!("transport closed with no inbound messages pending");
                Ok(())
            }
            None => self.fire_expired_timeouts().await,
        }
    }

    /// Run forever, servicing every live and future instance. Intended for
    /// the node binary's participant-side main loop.
    pub async fn run_forever(&mut self) -> Result<(), SchedulerError> {
        loop {
            self.pump().await?;
        }
    }

    async fn fire_expired_timeouts(&mut self) -> Result<(), SchedulerError> {
        let now = self.now();
        let expired: Vec<ThreadId> = self
            .instances
            .iter()
            .filter(|(_, r)| r.instance.deadline() <= now)
            .map(|(thid, _)| thid.clone())
            .collect();
        for thid in expired {
            self.step(thid, Event::Timeout).await?;
        }
        Ok(())
    }

    async fn handle_message(&mut self, from: Did, message: ConsensusMessage) -> Result<(), SchedulerError> {
        let thid = message.thread().thid.clone();
        if self.instances.contains_key(&thid) {
            return self.step(thid, Event::Message { from, message }).await;
        }
        match message {
            ConsensusMessage::InitializeRequest(req) => self.spawn_participant_init(from, req).await,
            ConsensusMessage::StagePropose(msg) => self.spawn_participant_accept(from, msg).await,
            other => {
                tracing::debug!(
                    thid = %thid,
                    kind = other.kind(),
                    "dropping message for an unknown or already-finished thread id"
                );
                Ok(())
            }
        }
    }

    async fn step(&mut self, thid: ThreadId, event: Event) -> Result<(), SchedulerError> {
        let now = self.now();
        let Some(running) = self.instances.get_mut(&thid) else {
            return Ok(());
        };
        // §10: every state-machine instance logs under a span keyed by
        // (role, thread_id, ledger_name) for the lifetime of its run.
        let span = tracing::info_span!(
            "consensus_round",
            role = %running.id.role,
            thread_id = %thid,
            ledger = %running.ledger_name,
        );
        let _guard = span.enter();

        let mut ctx = StepCtx {
            store: &self.store,
            signer: self.signer.as_ref(),
            resolver: self.resolver.as_ref(),
            now,
            max_skew_sec: self.config.max_skew_sec,
        };
        let out = running.instance.on_event(&mut ctx, event)?;
        let ledger_name = running.ledger_name.clone();
        let terminal = running.instance.is_terminal();
        let committed = running.instance.is_committed();
        drop(ctx);

        let reason = if terminal && !committed { Some(abort_reason(&out.outbound)) } else { None };
        if terminal {
            tracing::debug!(committed, "consensus round reached a terminal state");
        }
        drop(_guard);

        self.dispatch(out.outbound).await;
        if terminal {
            self.finish(thid, ledger_name, committed, reason);
        }
        Ok(())
    }

    async fn spawn_participant_init(
        &mut self,
        from: Did,
        req: simplex_protocol::InitializeRequest,
    ) -> Result<(), SchedulerError> {
        let ledger_name = req.ledger.name.clone();
        if self.active_ledgers.contains(&ledger_name) {
            tracing::warn!(ledger = %ledger_name, "ignoring initialize-request: ledger busy with a live local instance");
            return Ok(());
        }
        self.active_ledgers.insert(ledger_name.clone());

        let span = tracing::info_span!(
            "consensus_round",
            role = %Role::Participant,
            thread_id = %req.thread.thid,
            ledger = %ledger_name,
        );
        let _guard = span.enter();

        let now = self.now();
        let mut ctx = StepCtx {
            store: &self.store,
            signer: self.signer.as_ref(),
            resolver: self.resolver.as_ref(),
            now,
            max_skew_sec: self.config.max_skew_sec,
        };
        let (machine, out) = ParticipantInitMachine::on_initialize_request(&mut ctx, self.me.clone(), from, req)?;
        drop(ctx);
        drop(_guard);

        let thid = machine.thread_id().clone();
        let terminal = machine.is_terminal();
        let committed = machine.is_committed();
        self.dispatch(out.outbound).await;
        if terminal {
            self.finish(thid, ledger_name, committed, None);
        } else {
            self.instances.insert(
                thid.clone(),
                RunningInstance::new(Instance::ParticipantInit(machine), ledger_name, thid),
            );
        }
        Ok(())
    }

    async fn spawn_participant_accept(
        &mut self,
        from: Did,
        msg: simplex_protocol::StagePropose,
    ) -> Result<(), SchedulerError> {
        let ledger_name = msg.state.name.clone();
        if self.active_ledgers.contains(&ledger_name) {
            tracing::warn!(ledger = %ledger_name, "ignoring stage-propose: ledger busy with a live local instance");
            return Ok(());
        }
        self.active_ledgers.insert(ledger_name.clone());

        let span = tracing::info_span!(
            "consensus_round",
            role = %Role::Participant,
            thread_id = %msg.thread.thid,
            ledger = %ledger_name,
        );
        let _guard = span.enter();

        let now = self.now();
        let mut ctx = StepCtx {
            store: &self.store,
            signer: self.signer.as_ref(),
            resolver: self.resolver.as_ref(),
            now,
            max_skew_sec: self.config.max_skew_sec,
        };
        let (machine, out) = ParticipantAcceptMachine::on_stage_propose(&mut ctx, self.me.clone(), from, msg)?;
        drop(ctx);
        drop(_guard);

        let thid = machine.thread_id().clone();
        let terminal = machine.is_terminal();
        let committed = machine.is_committed();
        self.dispatch(out.outbound).await;
        if terminal {
            self.finish(thid, ledger_name, committed, None);
        } else {
            self.instances.insert(
                thid.clone(),
                RunningInstance::new(Instance::ParticipantAccept(machine), ledger_name, thid),
            );
        }
        Ok(())
    }

    fn finish(&mut self, thid: ThreadId, ledger_name: String, committed: bool, reason: Option<ConsensusError>) {
        let Some(running) = self.instances.remove(&thid) else {
            return;
        };
        self.active_ledgers.remove(&ledger_name);
        let role = running.id.role;
        let outcome = if committed { Outcome::Committed } else { Outcome::Aborted };
        if role == Role::Actor {
            let result = if committed {
                Ok(())
            } else {
                Err(reason.unwrap_or(ConsensusError::PeerAborted {
                    code: ProblemCode::ResponseProcessingError,
                    explain: "consensus round aborted".to_string(),
                }))
            };
            self.last_outcome.insert(thid.clone(), result);
        }
        self.notify(&ledger_name, role, thid, outcome);
    }

    /// Best-effort dispatch (§4.F, §9's open question): a dropped
    /// `problem_report` or any other outbound message is logged, never
    /// retried or allowed to fail the round — timeouts are the
    /// authoritative abort signal peers fall back on.
    async fn dispatch(&self, outbound: Vec<(Did, ConsensusMessage)>) {
        for (to, message) in outbound {
            if let Err(e) = self.transport.send(&to, message).await {
                self.log_send_failure(&to, e);
            }
        }
    }

    fn log_send_failure(&self, to: &Did, error: TransportError) {
        tracing::warn!(peer = %to, error = %error, "best-effort send failed");
    }
}

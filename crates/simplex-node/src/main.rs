//! simplex-node — a demo full-node binary for the Simple Consensus engine.
//!
//! There is no real peer-to-peer transport in this workspace (§6: the
//! pairwise messaging fabric is an external collaborator), so this binary
//! simulates an entire microledger's peer set in one process: every named
//! participant gets its own persisted store and its own `Scheduler`, all
//! registered on one shared in-memory `LoopbackNetwork`. The first
//! participant in the table drives `initialize-ledger` and `accept-block` as
//! the actor; every other participant just runs its scheduler's receive loop
//! until the actor's round finishes.
//!
//! Startup sequence:
//!   1. Load the static participant/DID table
//!   2. Open one persisted store per participant under `--data-dir`
//!   3. Wire every participant onto a shared loopback network
//!   4. Run participant schedulers in the background; drive the actor's
//!      initialize-ledger, then accept-block, to completion
//!   5. Print the committed ledger snapshot and exit

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};

use simplex_core::Did;
use simplex_crypto::KeyPair;
use simplex_sdk::{ConsensusConfig, Ed25519Signer, Scheduler, StaticDidTable};
use simplex_store::{Store, Txn};
use simplex_transport::{LoopbackNetwork, LoopbackTransport, TransportConfig};

#[derive(Parser, Debug)]
#[command(
    name = "simplex-node",
    version,
    about = "Simple Consensus demo node — runs a whole microledger's peer set in one process"
)]
struct Args {
    /// Directory for each participant's persisted store (one subdirectory per DID).
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Path to a JSON array of `{ "did": "...", "seed": "<64 hex chars>" }`
    /// entries — the demo DID-to-verkey/keypair table. The first entry acts;
    /// the rest run as participants.
    #[arg(long)]
    participants: PathBuf,

    /// Name of the microledger to create.
    #[arg(long, default_value = "demo-ledger")]
    ledger_name: String,

    /// Optional path to a JSON array of genesis transactions. Defaults to a
    /// single synthetic transaction with `txnMetadata.seqNo == 1`.
    #[arg(long)]
    genesis_file: Option<PathBuf>,

    /// Optional path to a JSON array of transactions committed as a second
    /// block after genesis. If omitted, only `initialize-ledger` runs.
    #[arg(long)]
    block_file: Option<PathBuf>,

    /// Per-stage receive timeout, in seconds.
    #[arg(long, default_value_t = simplex_core::DEFAULT_TIMEOUT_SEC)]
    timeout_sec: u64,

    /// Override for `RUST_LOG`-style filter directives.
    #[arg(long)]
    log_filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ParticipantSpec {
    did: String,
    /// 64 hex characters — an Ed25519 signing-key seed. Deterministic only
    /// for demo convenience; never use a file-committed seed in production.
    seed: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            args.log_filter
                .as_deref()
                .map(|f| f.to_string())
                .or_else(|| std::env::var("RUST_LOG").ok())
                .map(tracing_subscriber::EnvFilter::new)
                .unwrap_or_else(|| tracing_subscriber::EnvFilter::new("info,simplex=debug")),
        )
        .init();

    info!("simplex-node starting");

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("creating data dir {}", args.data_dir.display()))?;

    let specs = load_participants(&args.participants)
        .with_context(|| format!("loading participant table from {}", args.participants.display()))?;
    if specs.len() < 2 {
        anyhow::bail!("need at least two participants to run a consensus round");
    }

    let mut keypairs = HashMap::new();
    let mut resolver = StaticDidTable::new();
    for spec in &specs {
        let did = Did::new(spec.did.clone());
        let kp = keypair_from_seed(&spec.seed)
            .with_context(|| format!("decoding seed for participant {}", spec.did))?;
        resolver.insert(did.clone(), kp.verkey());
        keypairs.insert(did, kp);
    }

    let genesis_txns = match &args.genesis_file {
        Some(path) => load_txns(path).with_context(|| format!("loading genesis transactions from {}", path.display()))?,
        None => vec![demo_txn(1)],
    };
    let block_txns = match &args.block_file {
        Some(path) => Some(load_txns(path).with_context(|| format!("loading block transactions from {}", path.display()))?),
        None => None,
    };

    let network = Arc::new(LoopbackNetwork::new(TransportConfig::default()));
    let config = ConsensusConfig {
        timeout_sec: args.timeout_sec,
        ..ConsensusConfig::default()
    };

    let participants: Vec<Did> = specs.iter().map(|s| Did::new(s.did.clone())).collect();
    let actor_did = participants[0].clone();

    let mut actor_scheduler = None;
    let mut follower_handles = Vec::new();

    for spec in &specs {
        let did = Did::new(spec.did.clone());
        let store_dir = args.data_dir.join(sanitize_did(&spec.did));
        let store = Store::open(&store_dir)
            .with_context(|| format!("opening store for {} at {}", spec.did, store_dir.display()))?;
        let signer = Ed25519Signer::new().with_keypair(did.clone(), keypairs.remove(&did).expect("seeded above"));
        let transport: LoopbackTransport = network.register(did.clone());
        let scheduler = Scheduler::new(did.clone(), store, signer, resolver.clone(), transport, config);

        if did == actor_did {
            actor_scheduler = Some(scheduler);
        } else {
            follower_handles.push(spawn_follower(did, scheduler));
        }
    }
    let mut actor_scheduler = actor_scheduler.expect("actor is the first participant");

    info!(ledger = %args.ledger_name, actor = %actor_did, "initializing microledger");
    actor_scheduler
        .initialize_ledger(args.ledger_name.clone(), participants, genesis_txns, args.timeout_sec)
        .await
        .context("initialize-ledger round failed")?;
    info!(ledger = %args.ledger_name, "genesis committed by every participant");

    if let Some(txns) = block_txns {
        info!(ledger = %args.ledger_name, count = txns.len(), "committing a block");
        actor_scheduler
            .commit_block(args.ledger_name.clone(), txns, args.timeout_sec)
            .await
            .context("accept-block round failed")?;
        info!(ledger = %args.ledger_name, "block committed by every participant");
    }

    for handle in follower_handles {
        handle.abort();
    }

    let ledger = actor_scheduler.store().open_ledger(&args.ledger_name).context("reopening ledger for summary")?;
    let snapshot = ledger.snapshot().context("reading final snapshot")?;
    info!(
        ledger = %snapshot.name,
        size = snapshot.size,
        root_hash = %snapshot.root_hash,
        "final ledger state"
    );

    Ok(())
}

fn spawn_follower(did: Did, mut scheduler: Scheduler<LoopbackTransport>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = scheduler.run_forever().await {
            warn!(peer = %did, error = %e, "participant scheduler stopped");
        }
    })
}

fn keypair_from_seed(seed_hex: &str) -> anyhow::Result<KeyPair> {
    let bytes = hex::decode(seed_hex).context("seed is not valid hex")?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("seed must be exactly 32 bytes (64 hex characters)"))?;
    Ok(KeyPair::from_seed(seed))
}

fn load_participants(path: &Path) -> anyhow::Result<Vec<ParticipantSpec>> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

fn load_txns(path: &Path) -> anyhow::Result<Vec<Txn>> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

fn demo_txn(seq_no: u64) -> Txn {
    serde_json::json!({
        "id": format!("demo-{seq_no}"),
        "txnMetadata": { "seqNo": seq_no },
    })
}

fn sanitize_did(did: &str) -> String {
    did.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

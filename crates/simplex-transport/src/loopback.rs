//! The in-memory loopback transport: a registry of per-DID inboxes standing
//! in for the pairwise routing hub, plus the `Transport` trait a production
//! adapter would implement in its place.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use simplex_core::Did;
use simplex_protocol::ConsensusMessage;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::TransportConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer '{0}' is not registered on this loopback network")]
    UnknownPeer(String),
    #[error("peer '{0}' has disconnected")]
    Disconnected(String),
}

/// `send(to_did, envelope)` plus an inbound stream of `(from_did, envelope)`
/// (§6) — the contract any production WebSocket-to-routing-hub adapter
/// must satisfy in its place.
#[async_trait]
pub trait Transport: Send {
    async fn send(&self, to: &Did, message: ConsensusMessage) -> Result<(), TransportError>;
    async fn recv(&mut self) -> Option<(Did, ConsensusMessage)>;
}

/// Shared registry backing every [`LoopbackTransport`] handle. Stands in for
/// the pairwise routing hub in tests, examples, and the demo node — nothing
/// here models real network partitions beyond what a test deliberately
/// injects by dropping a message before calling `send`.
pub struct LoopbackNetwork {
    config: TransportConfig,
    inboxes: Mutex<HashMap<Did, mpsc::Sender<(Did, ConsensusMessage)>>>,
}

impl LoopbackNetwork {
    pub fn new(config: TransportConfig) -> Self {
        LoopbackNetwork {
            config,
            inboxes: Mutex::new(HashMap::new()),
        }
    }

    /// Register `did` on the network and return its transport handle.
    /// Registering the same DID twice replaces the previous handle's
    /// inbox — the old handle silently stops receiving.
    pub fn register(self: &Arc<Self>, did: Did) -> LoopbackTransport {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        self.inboxes
            .lock()
            .expect("loopback network mutex poisoned")
            .insert(did.clone(), tx);
        LoopbackTransport {
            me: did,
            network: Arc::clone(self),
            inbox: rx,
        }
    }
}

/// One DID's handle onto a [`LoopbackNetwork`]. Sends are fan-out writes
/// into the recipient's channel; receives drain this handle's own channel
/// in FIFO order, matching the transport's per-`(peer, thid)` ordering
/// guarantee (§5) whenever a single sender only ever targets one recipient.
pub struct LoopbackTransport {
    me: Did,
    network: Arc<LoopbackNetwork>,
    inbox: mpsc::Receiver<(Did, ConsensusMessage)>,
}

impl LoopbackTransport {
    pub fn did(&self) -> &Did {
        &self.me
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, to: &Did, message: ConsensusMessage) -> Result<(), TransportError> {
        let sender = {
            let inboxes = self.network.inboxes.lock().expect("loopback network mutex poisoned");
            inboxes.get(to).cloned()
        };
        let sender = sender.ok_or_else(|| TransportError::UnknownPeer(to.to_string()))?;
        sender
            .send((self.me.clone(), message))
            .await
            .map_err(|_| TransportError::Disconnected(to.to_string()))
    }

    async fn recv(&mut self) -> Option<(Did, ConsensusMessage)> {
        self.inbox.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplex_core::{ProblemCode, ThreadId};
    use simplex_protocol::problem_report;

    fn msg() -> ConsensusMessage {
        ConsensusMessage::ProblemReport(problem_report(
            ThreadId::new(),
            ProblemCode::RequestNotAccepted,
            "test",
        ))
    }

    #[tokio::test]
    async fn delivers_between_registered_peers() {
        let network = Arc::new(LoopbackNetwork::new(TransportConfig::default()));
        let a = Did::new("did:sov:A");
        let b = Did::new("did:sov:B");
        let transport_a = network.register(a.clone());
        let mut transport_b = network.register(b.clone());

        transport_a.send(&b, msg()).await.unwrap();
        let (from, _) = transport_b.recv().await.unwrap();
        assert_eq!(from, a);
    }

    #[tokio::test]
    async fn send_to_unknown_peer_errors() {
        let network = Arc::new(LoopbackNetwork::new(TransportConfig::default()));
        let a = Did::new("did:sov:A");
        let transport_a = network.register(a);
        let err = transport_a
            .send(&Did::new("did:sov:ghost"), msg())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn re_registering_a_did_replaces_its_inbox() {
        let network = Arc::new(LoopbackNetwork::new(TransportConfig::default()));
        let a = Did::new("did:sov:A");
        let b = Did::new("did:sov:B");
        let transport_a = network.register(a.clone());
        let mut first = network.register(b.clone());
        let mut second = network.register(b.clone());

        transport_a.send(&b, msg()).await.unwrap();
        assert!(second.recv().await.is_some());
        assert_eq!(
            first.inbox.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        );
    }
}

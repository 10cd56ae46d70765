//! Pairwise message transport (external collaborator, §6 of the design).
//!
//! Production code wires the consensus engine to a real Aries mediator over
//! WebSocket/HTTP; this crate ships exactly one concrete implementation for
//! local wiring, tests, and the demo node: an in-memory, `tokio::sync::mpsc`
//! -backed loopback network connecting DIDs registered in the same process.
//! It satisfies the same [`Transport`] trait a production adapter would.

pub mod config;
pub mod loopback;

pub use config::TransportConfig;
pub use loopback::{LoopbackNetwork, LoopbackTransport, Transport, TransportError};

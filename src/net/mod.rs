//! Peer networking for the certificate ledger.
//!
//! Gated behind the `net` Cargo feature: a transport abstraction with a
//! JSON-over-HTTP implementation, and a [`Node`] that shares one ledger
//! between request handlers, the sealer and reconciliation.

#![cfg(feature = "net")]

/// Lock-guarded ledger node with off-thread sealing and peer fan-out.
pub mod node;
/// Peer transport trait and its HTTP implementation.
pub mod transport;

pub use node::{Node, NodeConfig, NodeError, SealHandle, DEFAULT_PEER_TIMEOUT_MS};
pub use transport::{HttpPeerTransport, PeerError, PeerTransport};

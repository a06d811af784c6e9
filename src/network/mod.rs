//! Peer networking over raw TCP
//!
//! - [`Peer`]: one remote node over a single owned connection
//! - [`LinkNode`]: listener, handshake admission and node-level queries

pub mod addr;
pub mod node;
pub mod peer;

pub use addr::{Addr, AddrParseError, Transport};
pub use node::{LinkNode, NodeConfig, NodeError, NodeRequest};
pub use peer::{CallbackError, Peer, PeerError, PeerOptions, RecvCallback};

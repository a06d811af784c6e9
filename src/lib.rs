//! nodelink - peer linking layer for a content-distribution network
//!
//! Nodes discover each other, talk a small binary request/response
//! protocol over raw TCP, and keep a locally persisted view of:
//! - known peers and the addresses they are reachable at
//! - content hashes and which peer advertised them
//!
//! Persistence uses sled; background work runs on a bounded dispatcher.

pub mod dispatcher;
pub mod network;
pub mod protocol;
pub mod registry;
pub mod storage;

pub use dispatcher::{CallContext, Dispatcher};
pub use network::{Addr, LinkNode, NodeConfig, NodeError, NodeRequest, Peer, PeerError, PeerOptions};
pub use protocol::{Exchange, ExchangeType, ProtocolError, RequestQueue, Status, Version};
pub use registry::{Registry, RegistryConfig, RegistryError, RegistryStats};
pub use storage::{AddrInfo, Cacher, ContentHash, HashCache, HashRecord, SledCacher, StorageError};

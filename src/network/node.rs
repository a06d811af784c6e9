//! Node wiring: listener, admission and node-level requests

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::addr::Addr;
use super::peer::{CallbackError, Peer, PeerError, PeerOptions, RecvCallback};
use crate::registry::{Registry, RegistryConfig, RegistryError};
use crate::storage::{AddrInfo, HashRecord, StorageError};

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Bind error: {0}")]
    Bind(std::io::Error),
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Malformed reply: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
}

/// Node-level requests carried in the payload of a peer `Call`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeRequest {
    /// Content hashes the remote can serve
    Hashes,
    /// Peer addresses the remote knows about
    Addrs,
    /// Opaque application payload
    Data { payload: Vec<u8> },
}

/// Node configuration
#[derive(Clone)]
pub struct NodeConfig {
    /// Node id; a random one is generated when empty
    pub id: String,
    /// Port to listen on (0 for random)
    pub listen_port: u16,
    /// Addresses to advertise; defaults to the wildcard listen address,
    /// which remotes resolve against the address they observe
    pub advertise: Vec<String>,
    /// Peers dialled at startup
    pub bootstrap_peers: Vec<SocketAddr>,
    /// Dial outbound connections from the listen port
    pub port_reuse: bool,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Inbound connections must complete the handshake within this window
    pub handshake_timeout: Duration,
    pub registry: RegistryConfig,
    /// Handler for [`NodeRequest::Data`]
    pub handler: Option<RecvCallback>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let peer = PeerOptions::default();
        Self {
            id: String::new(),
            listen_port: 0,
            advertise: vec![],
            bootstrap_peers: vec![],
            port_reuse: true,
            connect_timeout: peer.connect_timeout,
            request_timeout: peer.request_timeout,
            handshake_timeout: Duration::from_secs(5),
            registry: RegistryConfig::default(),
            handler: None,
        }
    }
}

pub struct LinkNode {
    id: String,
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    options: PeerOptions,
    handshake_timeout: Duration,
    shutdown: watch::Sender<bool>,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl LinkNode {
    /// Open the registry, bind the listener, restore persisted peers and
    /// dial the bootstrap list.
    pub async fn start(config: NodeConfig) -> Result<Arc<LinkNode>, NodeError> {
        let id = if config.id.is_empty() {
            hex::encode(rand::random::<[u8; 16]>())
        } else {
            config.id.clone()
        };

        let registry = Registry::open(config.registry.clone())?;
        let listener = bind(config.listen_port).map_err(NodeError::Bind)?;
        let local_addr = listener.local_addr().map_err(NodeError::Bind)?;

        let advertise = if config.advertise.is_empty() {
            vec![Addr::tcp((Ipv4Addr::UNSPECIFIED, local_addr.port()).into()).to_string()]
        } else {
            config.advertise.clone()
        };

        let options = PeerOptions {
            local: AddrInfo::new(id.clone(), advertise),
            local_port: if config.port_reuse { local_addr.port() } else { 0 },
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
            callback: Some(serve_callback(Arc::downgrade(&registry), config.handler.clone())),
            ..Default::default()
        };
        registry.set_dial_options(options.clone());

        let (shutdown, _) = watch::channel(false);
        let node = Arc::new(LinkNode {
            id,
            local_addr,
            registry: Arc::clone(&registry),
            options,
            handshake_timeout: config.handshake_timeout,
            shutdown,
            accept_task: parking_lot::Mutex::new(None),
        });

        info!("Node {} listening on {}", node.id, node.local_addr);

        let accept = tokio::spawn(Arc::clone(&node).accept_loop(listener));
        *node.accept_task.lock() = Some(accept);

        let restored = match node.restore().await {
            Ok(restored) => restored,
            Err(e) => {
                warn!("Node {} failed to start: {}", node.id, e);
                let _ = node.shutdown().await;
                return Err(e.into());
            }
        };
        debug!("Restored {} peers", restored);

        for addr in config.bootstrap_peers {
            let node_ref = Arc::clone(&node);
            registry.dispatcher().add_call(move |_| async move {
                if let Err(e) = node_ref.dial(addr).await {
                    warn!("Bootstrap dial {} failed: {}", addr, e);
                }
            });
        }

        Ok(node)
    }

    /// Start the registry loop and reconnect to persisted peers
    async fn restore(&self) -> Result<usize, RegistryError> {
        self.registry.start()?;
        let restored = self.registry.load().await?;
        for peer in self.registry.snapshot() {
            self.watch(peer);
        }
        Ok(restored)
    }

    pub fn local_id(&self) -> &str {
        &self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Connect, handshake and admit a peer
    pub async fn dial(&self, addr: SocketAddr) -> Result<Arc<Peer>, NodeError> {
        let peer = Peer::connect(addr, self.options.clone()).await?;
        if let Err(e) = peer.handshake().await {
            let _ = peer.close();
            return Err(e.into());
        }
        self.admit(Arc::clone(&peer));
        Ok(peer)
    }

    /// Ask `id` for its content hashes and cache them with `id` as provider
    pub async fn query_hashes(&self, id: &str) -> Result<Vec<HashRecord>, NodeError> {
        let peer = self.connected(id)?;
        let reply = peer.request(&serde_json::to_vec(&NodeRequest::Hashes)?).await?;
        let mut records: Vec<HashRecord> = serde_json::from_slice(&reply)?;

        let provider = peer.addr_info();
        for record in &mut records {
            record.provider = provider.clone();
            if let Err(e) = self.registry.hash_cache().put(record) {
                warn!("Failed to cache hash {}: {}", record.hash, e);
            }
        }
        debug!("Cached {} hashes from {}", records.len(), id);
        Ok(records)
    }

    /// Ask `id` for the peers it knows and dial the ones we do not
    pub async fn query_addrs(self: &Arc<Self>, id: &str) -> Result<Vec<AddrInfo>, NodeError> {
        let peer = self.connected(id)?;
        let reply = peer.request(&serde_json::to_vec(&NodeRequest::Addrs)?).await?;
        let infos: Vec<AddrInfo> = serde_json::from_slice(&reply)?;

        for info in &infos {
            if info.id.is_empty() || info.id == self.id || self.registry.get(&info.id).is_some() {
                continue;
            }
            let addrs: Vec<SocketAddr> = info
                .addrs
                .iter()
                .filter_map(|raw| raw.parse::<Addr>().ok())
                .filter(Addr::is_dialable)
                .map(|addr| addr.socket_addr())
                .collect();

            let node = Arc::clone(self);
            let target = info.id.clone();
            self.registry.dispatcher().add_call(move |ctx| async move {
                for addr in addrs {
                    if ctx.is_cancelled() || node.registry.get(&target).is_some() {
                        return;
                    }
                    match node.dial(addr).await {
                        Ok(_) => return,
                        Err(e) => debug!("Discovery dial {} for {} failed: {}", addr, target, e),
                    }
                }
            });
        }
        Ok(infos)
    }

    /// Send an application payload to `id`'s data handler
    pub async fn send_data(&self, id: &str, payload: Vec<u8>) -> Result<Vec<u8>, NodeError> {
        let peer = self.connected(id)?;
        let body = serde_json::to_vec(&NodeRequest::Data { payload })?;
        Ok(peer.request(&body).await?)
    }

    /// Stop accepting, flush and close the registry, then drop every
    /// connection
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        if self.shutdown.send_replace(true) {
            return Ok(());
        }

        let accept = self.accept_task.lock().take();
        if let Some(accept) = accept {
            let _ = accept.await;
        }

        let peers = self.registry.snapshot();
        let result = self.registry.close();
        self.registry.dispatcher().shutdown().await;
        for peer in peers {
            let _ = peer.close();
        }

        info!("Node {} shut down", self.id);
        Ok(result?)
    }

    fn connected(&self, id: &str) -> Result<Arc<Peer>, NodeError> {
        self.registry
            .get(id)
            .ok_or_else(|| NodeError::UnknownPeer(id.to_string()))
    }

    fn admit(&self, peer: Arc<Peer>) {
        if self.registry.push(Arc::clone(&peer)) {
            self.watch(peer);
        } else {
            let _ = peer.close();
        }
    }

    /// Evict `peer` from the registry once its connection drops
    fn watch(&self, peer: Arc<Peer>) {
        let registry: Weak<Registry> = Arc::downgrade(&self.registry);
        tokio::spawn(async move {
            peer.closed().await;
            if let Some(registry) = registry.upgrade() {
                registry.evict(&peer);
            }
        });
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.wait_for(|stopped| *stopped) => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, remote)) => {
                    let node = Arc::clone(&self);
                    tokio::spawn(async move { node.admit_inbound(stream, remote).await });
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        debug!("Accept loop for {} exited", self.local_addr);
    }

    async fn admit_inbound(&self, stream: TcpStream, remote: SocketAddr) {
        let peer = Peer::accept(stream, remote, self.options.clone());
        match peer.wait_identified(self.handshake_timeout).await {
            Ok(id) => {
                debug!("Inbound peer {} identified from {}", id, remote);
                self.admit(peer);
            }
            Err(e) => {
                debug!("Dropping inbound connection from {}: {}", remote, e);
                let _ = peer.close();
            }
        }
    }
}

fn bind(port: u16) -> std::io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind((Ipv4Addr::UNSPECIFIED, port).into())?;
    socket.listen(1024)
}

/// Recv callback serving [`NodeRequest`]s. Holds the registry weakly so the
/// registry's own dial options do not keep it alive.
fn serve_callback(registry: Weak<Registry>, handler: Option<RecvCallback>) -> RecvCallback {
    Arc::new(move |from: &str, payload: Vec<u8>| -> Result<Vec<u8>, CallbackError> {
        let registry = registry.upgrade().ok_or("node is shutting down")?;
        match serde_json::from_slice::<NodeRequest>(&payload)? {
            NodeRequest::Hashes => Ok(serde_json::to_vec(&registry.local_hashes())?),
            NodeRequest::Addrs => Ok(serde_json::to_vec(&registry.local_addrs())?),
            NodeRequest::Data { payload } => match &handler {
                Some(handler) => handler(from, payload),
                None => Err("no data handler installed".into()),
            },
        }
    })
}

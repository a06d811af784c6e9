//! A single remote peer and the TCP connection it owns
//!
//! Each peer runs two tasks: a reader that decodes frames, resolves
//! responses by session and hands requests to a per-request task, and a
//! writer that drains the outbound queue. Both exit when the peer is
//! closed or the connection fails; dropping their socket halves releases
//! the connection.
//!
//! Request payloads start with a one-byte command tag:
//!
//! | tag | command | body |
//! |-----|---------|------|
//! | 0   | Ping    | empty |
//! | 1   | Hello   | JSON [`AddrInfo`] of the sender |
//! | 2   | Call    | application bytes for the recv callback |

use parking_lot::RwLock;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use super::addr::Addr;
use crate::protocol::{
    Exchange, FrameError, ProtocolError, QueueOptions, RequestQueue, SessionTable, Status,
};
use crate::storage::AddrInfo;

/// Error type returned by a recv callback
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Handler for inbound application requests: `(peer id, payload) -> reply`
pub type RecvCallback = Arc<dyn Fn(&str, Vec<u8>) -> Result<Vec<u8>, CallbackError> + Send + Sync>;

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Connection error: {0}")]
    Connection(#[from] io::Error),
    #[error("Request timed out")]
    Timeout,
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Peer connection closed")]
    Closed,
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Settings shared by every peer a node creates
#[derive(Clone)]
pub struct PeerOptions {
    /// Our own id and advertised addresses, sent in the handshake
    pub local: AddrInfo,
    /// Port outbound dials are bound to; 0 picks an ephemeral port
    pub local_port: u16,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Capacity of the outbound frame queue
    pub outbound_capacity: usize,
    pub callback: Option<RecvCallback>,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            local: AddrInfo::default(),
            local_port: 0,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            outbound_capacity: 64,
            callback: None,
        }
    }
}

impl std::fmt::Debug for PeerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerOptions")
            .field("local", &self.local)
            .field("local_port", &self.local_port)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Ping,
    Hello,
    Call,
}

impl Command {
    fn tag(self) -> u8 {
        match self {
            Command::Ping => 0,
            Command::Hello => 1,
            Command::Call => 2,
        }
    }

    fn frame(self, body: &[u8]) -> Vec<u8> {
        let mut data = Vec::with_capacity(body.len() + 1);
        data.push(self.tag());
        data.extend_from_slice(body);
        data
    }

    fn split(data: &[u8]) -> Option<(Command, &[u8])> {
        let (&tag, body) = data.split_first()?;
        let command = match tag {
            0 => Command::Ping,
            1 => Command::Hello,
            2 => Command::Call,
            _ => return None,
        };
        Some((command, body))
    }
}

pub struct Peer {
    id: watch::Sender<String>,
    addrs: RwLock<Vec<Addr>>,
    remote: SocketAddr,
    local: AddrInfo,
    request_timeout: Duration,
    callback: RwLock<Option<RecvCallback>>,
    outbound: mpsc::Sender<Arc<RequestQueue>>,
    sessions: SessionTable,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Peer {
    /// Dial `addr`. When `options.local_port` is set the socket is bound to
    /// that port with address reuse, so the dial leaves from the same port
    /// the node listens on.
    pub async fn connect(addr: SocketAddr, options: PeerOptions) -> Result<Arc<Peer>, PeerError> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        #[cfg(unix)]
        socket.set_reuseport(true)?;

        if options.local_port != 0 {
            let local: SocketAddr = if addr.is_ipv4() {
                (Ipv4Addr::UNSPECIFIED, options.local_port).into()
            } else {
                (Ipv6Addr::UNSPECIFIED, options.local_port).into()
            };
            socket.bind(local)?;
        }

        let stream = match tokio::time::timeout(options.connect_timeout, socket.connect(addr)).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(PeerError::Connection(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("dial {} timed out", addr),
                )))
            }
        };

        debug!("Dialed {}", addr);
        Ok(Self::spawn(stream, addr, options))
    }

    /// Wrap an accepted connection
    pub fn accept(stream: TcpStream, remote: SocketAddr, options: PeerOptions) -> Arc<Peer> {
        debug!("Accepted connection from {}", remote);
        Self::spawn(stream, remote, options)
    }

    fn spawn(stream: TcpStream, remote: SocketAddr, options: PeerOptions) -> Arc<Peer> {
        if let Err(e) = stream.set_nodelay(true) {
            trace!("set_nodelay on {} failed: {}", remote, e);
        }
        let (reader, writer) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::channel(options.outbound_capacity.max(1));
        let (id, _) = watch::channel(String::new());
        let (shutdown, _) = watch::channel(false);

        let peer = Arc::new(Peer {
            id,
            addrs: RwLock::new(vec![Addr::tcp(remote)]),
            remote,
            local: options.local,
            request_timeout: options.request_timeout,
            callback: RwLock::new(options.callback),
            outbound,
            sessions: SessionTable::new(),
            closed: AtomicBool::new(false),
            shutdown,
        });

        tokio::spawn(Arc::clone(&peer).read_loop(reader));
        tokio::spawn(Arc::clone(&peer).write_loop(writer, outbound_rx));
        peer
    }

    /// Remote node id; empty until the handshake completes
    pub fn id(&self) -> String {
        self.id.borrow().clone()
    }

    pub fn is_identified(&self) -> bool {
        !self.id.borrow().is_empty()
    }

    pub fn addrs(&self) -> Vec<Addr> {
        self.addrs.read().clone()
    }

    /// Socket address of the other end of the connection
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// What the registry persists for this peer
    pub fn addr_info(&self) -> AddrInfo {
        AddrInfo::new(
            self.id(),
            self.addrs().iter().filter(|a| a.is_dialable()).map(|a| a.to_string()),
        )
    }

    pub fn set_recv_callback(&self, callback: RecvCallback) {
        *self.callback.write() = Some(callback);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the peer has been closed, locally or by the remote
    pub async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Release the connection. Later calls are no-ops.
    pub fn close(&self) -> Result<(), PeerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown.send_replace(true);
        self.sessions.clear();
        info!("Closed connection to {} ({})", self.id(), self.remote);
        Ok(())
    }

    /// Round-trip a liveness ping
    pub async fn ping(&self) -> Result<Duration, PeerError> {
        let started = Instant::now();
        let response = self.call(Command::Ping, &[]).await?;
        if !response.is_ok() {
            return Err(PeerError::Remote(String::from_utf8_lossy(&response.data).into_owned()));
        }
        Ok(started.elapsed())
    }

    /// Send an application request to the remote recv callback
    pub async fn request(&self, payload: &[u8]) -> Result<Vec<u8>, PeerError> {
        let response = self.call(Command::Call, payload).await?;
        match response.status {
            Status::Ok => Ok(response.data),
            Status::Failed => Err(PeerError::Remote(
                String::from_utf8_lossy(&response.data).into_owned(),
            )),
        }
    }

    /// Exchange node info with the remote. On success the remote id is
    /// assigned and its advertised addresses are merged.
    pub async fn handshake(&self) -> Result<String, PeerError> {
        let body = serde_json::to_vec(&self.local).map_err(|e| PeerError::Handshake(e.to_string()))?;
        let response = self.call(Command::Hello, &body).await?;
        if !response.is_ok() {
            return Err(PeerError::Handshake(
                String::from_utf8_lossy(&response.data).into_owned(),
            ));
        }

        let info: AddrInfo = serde_json::from_slice(&response.data)
            .map_err(|e| PeerError::Handshake(e.to_string()))?;
        self.apply_hello(&info)?;
        Ok(info.id)
    }

    /// Wait for the remote's handshake on an accepted connection
    pub async fn wait_identified(&self, timeout: Duration) -> Result<String, PeerError> {
        let mut rx = self.id.subscribe();
        let identified = async {
            match rx.wait_for(|id| !id.is_empty()).await {
                Ok(id) => Ok((*id).clone()),
                Err(_) => Err(PeerError::Closed),
            }
        };

        tokio::select! {
            result = tokio::time::timeout(timeout, identified) => {
                result.unwrap_or(Err(PeerError::Timeout))
            }
            _ = self.closed() => Err(PeerError::Closed),
        }
    }

    /// Send a request and wait for its response. The whole call, queueing
    /// included, is bounded by the request timeout.
    async fn call(&self, command: Command, body: &[u8]) -> Result<Exchange, PeerError> {
        if self.is_closed() {
            return Err(PeerError::Closed);
        }

        let queue = RequestQueue::new(
            Exchange::request(command.frame(body)),
            QueueOptions {
                callback: true,
                timeout: self.request_timeout,
            },
        );
        let deadline = tokio::time::Instant::now() + self.request_timeout;

        let exchange = async {
            if !queue.send(&self.outbound).await {
                return Err(if self.is_closed() {
                    PeerError::Closed
                } else {
                    PeerError::Timeout
                });
            }
            tokio::select! {
                response = queue.wait_callback() => response.ok_or(PeerError::Timeout),
                _ = self.closed() => Err(PeerError::Closed),
            }
        };

        let result = tokio::time::timeout_at(deadline, exchange)
            .await
            .unwrap_or(Err(PeerError::Timeout));
        if matches!(result, Err(PeerError::Timeout)) {
            queue.cancel();
            self.sessions.release(&queue);
        }
        result
    }

    fn apply_hello(&self, info: &AddrInfo) -> Result<(), PeerError> {
        if info.id.is_empty() {
            return Err(PeerError::Handshake("remote sent an empty id".into()));
        }
        if info.id == self.local.id {
            return Err(PeerError::Handshake("connected to self".into()));
        }

        let current = self.id();
        if current.is_empty() {
            self.id.send_replace(info.id.clone());
        } else if current != info.id {
            warn!("Peer {} re-announced as {}, keeping first id", current, info.id);
        }

        let mut addrs = self.addrs.write();
        for raw in &info.addrs {
            let mut addr: Addr = match raw.parse() {
                Ok(addr) => addr,
                Err(e) => {
                    debug!("Ignoring advertised address from {}: {}", info.id, e);
                    continue;
                }
            };
            // A wildcard listen address is reachable at the observed IP
            if addr.ip.is_unspecified() {
                addr.ip = self.remote.ip();
            }
            if addr.is_dialable() && !addrs.contains(&addr) {
                addrs.push(addr);
            }
        }
        Ok(())
    }

    fn handle_request(&self, request: &Exchange) -> Exchange {
        let session = request.session;
        let failed = |msg: String| Exchange::response(session, Status::Failed, msg.into_bytes());

        match Command::split(&request.data) {
            Some((Command::Ping, _)) => Exchange::response(session, Status::Ok, Vec::new()),
            Some((Command::Hello, body)) => {
                let info: AddrInfo = match serde_json::from_slice(body) {
                    Ok(info) => info,
                    Err(e) => return failed(format!("malformed hello: {}", e)),
                };
                if let Err(e) = self.apply_hello(&info) {
                    return failed(e.to_string());
                }
                match serde_json::to_vec(&self.local) {
                    Ok(body) => Exchange::response(session, Status::Ok, body),
                    Err(e) => failed(e.to_string()),
                }
            }
            Some((Command::Call, body)) => {
                let callback = self.callback.read().clone();
                match callback {
                    Some(callback) => match callback(&self.id(), body.to_vec()) {
                        Ok(reply) => Exchange::response(session, Status::Ok, reply),
                        Err(e) => failed(e.to_string()),
                    },
                    None => failed("no request handler installed".into()),
                }
            }
            None => failed("unknown command".into()),
        }
    }

    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let frame = tokio::select! {
                _ = shutdown.wait_for(|closed| *closed) => break,
                frame = Exchange::read_from(&mut reader) => frame,
            };

            match frame {
                Ok(exchange) if exchange.is_request() => {
                    let peer = Arc::clone(&self);
                    tokio::spawn(async move {
                        let response = peer.handle_request(&exchange);
                        let queue = RequestQueue::new(
                            response,
                            QueueOptions::fire_and_forget(peer.request_timeout),
                        );
                        if !queue.send(&peer.outbound).await {
                            warn!("Dropped response {} to {}", exchange.session, peer.remote);
                        }
                    });
                }
                Ok(exchange) => {
                    let session = exchange.session;
                    if !self.sessions.resolve(exchange).await {
                        trace!("Unmatched response {} from {}", session, self.remote);
                    }
                }
                Err(FrameError::Protocol(e)) => {
                    error!("Protocol error from {}: {}", self.remote, e);
                    break;
                }
                Err(FrameError::Io(e)) => {
                    if e.kind() == io::ErrorKind::UnexpectedEof {
                        debug!("Connection to {} closed by remote", self.remote);
                    } else {
                        warn!("Read from {} failed: {}", self.remote, e);
                    }
                    break;
                }
            }
        }

        let _ = self.close();
    }

    async fn write_loop(
        self: Arc<Self>,
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::Receiver<Arc<RequestQueue>>,
    ) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            let queue = tokio::select! {
                _ = shutdown.wait_for(|closed| *closed) => break,
                queue = outbound.recv() => match queue {
                    Some(queue) => queue,
                    None => break,
                },
            };

            let is_request = queue.exchange().is_request();
            if is_request {
                if queue.is_cancelled() {
                    trace!("Skipping abandoned request to {}", self.remote);
                    continue;
                }
                if self.sessions.register(&queue).is_none() {
                    warn!("No free session towards {}, dropping request", self.remote);
                    continue;
                }
                // The caller may have given up between the check and registering
                if queue.is_cancelled() {
                    self.sessions.release(&queue);
                    continue;
                }
            }

            let result = queue.exchange().write_to(&mut writer).await;
            if is_request && (!queue.wants_callback() || result.is_err()) {
                self.sessions.release(&queue);
            }

            match result {
                Ok(()) => {}
                Err(FrameError::Protocol(e)) => {
                    warn!("Refusing to send frame to {}: {}", self.remote, e);
                }
                Err(FrameError::Io(e)) => {
                    warn!("Write to {} failed: {}", self.remote, e);
                    break;
                }
            }
        }

        let _ = writer.shutdown().await;
        let _ = self.close();
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id())
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn options(id: &str) -> PeerOptions {
        PeerOptions {
            local: AddrInfo::new(id, Vec::<String>::new()),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    async fn pair(client: PeerOptions, server: PeerOptions) -> (Arc<Peer>, Arc<Peer>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dialed, accepted) = tokio::join!(Peer::connect(addr, client), listener.accept());
        let (stream, remote) = accepted.unwrap();
        (dialed.unwrap(), Peer::accept(stream, remote, server))
    }

    #[tokio::test]
    async fn test_ping_roundtrip() {
        let (client, server) = pair(options("a"), options("b")).await;
        assert!(client.ping().await.is_ok());
        assert!(server.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_handshake_assigns_ids() {
        let mut server_opts = options("b");
        server_opts.local.addrs.insert("/ip4/0.0.0.0/tcp/4555".into());
        let (client, server) = pair(options("a"), server_opts).await;

        assert_eq!(client.id(), "");
        assert_eq!(client.handshake().await.unwrap(), "b");
        assert_eq!(client.id(), "b");
        assert_eq!(server.wait_identified(Duration::from_secs(1)).await.unwrap(), "a");

        // wildcard advertisement resolved against the observed address
        let advertised: Addr = "/ip4/127.0.0.1/tcp/4555".parse().unwrap();
        assert!(client.addrs().contains(&advertised));
    }

    #[tokio::test]
    async fn test_handshake_with_self_fails() {
        let (client, _server) = pair(options("same"), options("same")).await;
        assert!(matches!(client.handshake().await, Err(PeerError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_request_reaches_callback() {
        let mut server_opts = options("b");
        server_opts.callback = Some(Arc::new(|from: &str, payload: Vec<u8>| {
            let mut reply = format!("{}:", from).into_bytes();
            reply.extend(payload);
            Ok(reply)
        }));
        let (client, _server) = pair(options("a"), server_opts).await;
        client.handshake().await.unwrap();

        assert_eq!(client.request(b"hi").await.unwrap(), b"a:hi");
    }

    #[tokio::test]
    async fn test_callback_error_is_remote_error() {
        let mut server_opts = options("b");
        server_opts.callback = Some(Arc::new(|_: &str, _: Vec<u8>| Err("nope".into())));
        let (client, _server) = pair(options("a"), server_opts).await;

        match client.request(b"x").await {
            Err(PeerError::Remote(msg)) => assert_eq!(msg, "nope"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_callback_is_remote_error() {
        let (client, _server) = pair(options("a"), options("b")).await;
        assert!(matches!(client.request(b"x").await, Err(PeerError::Remote(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, server) = pair(options("a"), options("b")).await;

        assert!(client.close().is_ok());
        assert!(client.close().is_ok());
        assert!(client.is_closed());
        assert!(matches!(client.ping().await, Err(PeerError::Closed)));

        tokio::time::timeout(Duration::from_secs(2), server.closed())
            .await
            .expect("remote side should observe the close");
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn test_ping_times_out_on_silent_remote() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut opts = options("a");
        opts.request_timeout = Duration::from_millis(50);

        let (client, accepted) = tokio::join!(Peer::connect(addr, opts), listener.accept());
        let (_silent, _) = accepted.unwrap();
        let client = client.unwrap();

        assert!(matches!(client.ping().await, Err(PeerError::Timeout)));
        assert!(!client.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_request_abandoned_while_queued_is_never_sent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut opts = options("a");
        opts.request_timeout = Duration::from_millis(100);
        opts.outbound_capacity = 1;

        let (client, accepted) = tokio::join!(Peer::connect(addr, opts), listener.accept());
        let (mut remote, _) = accepted.unwrap();
        let client = client.unwrap();

        // Larger than the socket buffers, so the writer stalls on it while
        // the remote is not reading
        let bulky = vec![7u8; 15 * 1024 * 1024];
        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request(&bulky).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = Instant::now();
        assert!(matches!(client.request(b"queued").await, Err(PeerError::Timeout)));
        assert!(started.elapsed() < Duration::from_millis(190), "took {:?}", started.elapsed());
        assert!(matches!(first.await.unwrap(), Err(PeerError::Timeout)));

        let received = Exchange::read_from(&mut remote).await.unwrap();
        assert_eq!(received.data.len(), 15 * 1024 * 1024 + 1);
        let next = tokio::time::timeout(
            Duration::from_millis(200),
            Exchange::read_from(&mut remote),
        )
        .await;
        assert!(next.is_err(), "abandoned request reached the wire");
        assert!(client.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let first = Exchange::read_from(&mut stream).await.unwrap();
            let second = Exchange::read_from(&mut stream).await.unwrap();
            for request in [second, first] {
                let mut reply = b"re:".to_vec();
                reply.extend_from_slice(&request.data[1..]);
                Exchange::response(request.session, Status::Ok, reply)
                    .write_to(&mut stream)
                    .await
                    .unwrap();
            }
            stream
        });

        let client = Peer::connect(addr, options("a")).await.unwrap();
        let (a, b) = tokio::join!(client.request(b"a"), client.request(b"b"));
        assert_eq!(a.unwrap(), b"re:a");
        assert_eq!(b.unwrap(), b"re:b");
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_protocol_error_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (client, accepted) = tokio::join!(Peer::connect(addr, options("a")), listener.accept());
        let (mut raw, _) = accepted.unwrap();
        let client = client.unwrap();

        let mut bogus = Exchange::response(1, Status::Ok, vec![]).encode().unwrap();
        bogus[0] = b'7';
        raw.write_all(&bogus).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), client.closed())
            .await
            .expect("client should close on an unsupported version");
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(matches!(
            Peer::connect(addr, options("a")).await,
            Err(PeerError::Connection(_))
        ));
    }

    #[test]
    fn test_command_tags() {
        let framed = Command::Call.frame(b"xyz");
        assert_eq!(framed[0], 2);
        assert_eq!(Command::split(&framed), Some((Command::Call, &b"xyz"[..])));
        assert_eq!(Command::split(&[9]), None);
        assert_eq!(Command::split(&[]), None);
    }
}

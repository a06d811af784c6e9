//! Node registry
//!
//! The authoritative in-memory view of known peers, split into a
//! `connected` and a `faulted` partition. A peer id lives in at most one of
//! them; an id in neither is unknown. The connected set is persisted to the
//! peer store by a background loop whenever it changed since the last flush.
//!
//! ```text
//! Unknown --push--> Connected --fault--> Faulted --recovery_fault--> Connected
//!    ^                  |                   |
//!    +-----remove-------+-------remove------+
//! ```

pub mod fault;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::dispatcher::{CallContext, Dispatcher, DEFAULT_MAX_LIMIT};
use crate::network::{Addr, Peer, PeerError, PeerOptions};
use crate::storage::{load_record, AddrInfo, Cacher, HashCache, HashRecord, SledCacher, StorageError};

pub use fault::FaultRecord;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Registry is closed")]
    NotRunning,
}

/// Supplies the content hashes this node can serve
pub type LdRequestFn = Arc<dyn Fn() -> Vec<HashRecord> + Send + Sync>;

/// Supplies the peer addresses this node is willing to share
pub type AddrRequestFn = Arc<dyn Fn() -> Vec<AddrInfo> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Root directory; peer and hash stores live in `peers/` and `hashes/`
    pub data_dir: PathBuf,
    /// How often the connected set is flushed if it changed
    pub flush_interval: Duration,
    /// How often faulted peers past their cooldown are pinged
    pub recover_interval: Duration,
    /// Cooldown after a fault before recovery is attempted
    pub fault_limit: Duration,
    /// Worker count of the background dispatcher
    pub max_dispatch: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("nodelink"),
            flush_interval: Duration::from_secs(30),
            recover_interval: Duration::from_secs(60),
            fault_limit: Duration::from_secs(300),
            max_dispatch: DEFAULT_MAX_LIMIT,
        }
    }
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub connected: i64,
    pub faulted: usize,
    pub flushes: u64,
    pub revision: u64,
}

pub struct Registry {
    config: RegistryConfig,
    connected: DashMap<String, Arc<Peer>>,
    faulted: DashMap<String, FaultRecord>,
    size: AtomicI64,
    /// Bumped on every change to `connected`
    revision: AtomicU64,
    /// Revision captured by the last successful flush
    flushed: AtomicU64,
    flushes: AtomicU64,
    peers: Arc<dyn Cacher>,
    hashes: HashCache,
    dispatcher: Arc<Dispatcher>,
    dial_options: RwLock<PeerOptions>,
    ld_request: RwLock<Option<LdRequestFn>>,
    addr_request: RwLock<Option<AddrRequestFn>>,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Registry {
    /// Open both stores under `config.data_dir`. Failing to open either is
    /// fatal to the registry.
    pub fn open(config: RegistryConfig) -> Result<Arc<Self>, RegistryError> {
        let peers = SledCacher::open(config.data_dir.join("peers"), "peers")?;
        let hashes = SledCacher::open(config.data_dir.join("hashes"), "hashes")?;
        let (stop, _) = watch::channel(false);

        info!("Registry opened at {:?}", config.data_dir);

        Ok(Arc::new(Self {
            dispatcher: Arc::new(Dispatcher::new(config.max_dispatch)),
            config,
            connected: DashMap::new(),
            faulted: DashMap::new(),
            size: AtomicI64::new(0),
            revision: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            peers: Arc::new(peers),
            hashes: HashCache::new(Arc::new(hashes)),
            dial_options: RwLock::new(PeerOptions::default()),
            ld_request: RwLock::new(None),
            addr_request: RwLock::new(None),
            stop,
            task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn hash_cache(&self) -> &HashCache {
        &self.hashes
    }

    /// Options used for peers dialled by [`Registry::load`]
    pub fn set_dial_options(&self, options: PeerOptions) {
        *self.dial_options.write() = options;
    }

    pub fn dial_options(&self) -> PeerOptions {
        self.dial_options.read().clone()
    }

    fn touch(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    /// Admit a peer to the connected set. A previous instance under the
    /// same id is replaced and closed. Unidentified peers are refused.
    pub fn push(&self, peer: Arc<Peer>) -> bool {
        let id = peer.id();
        if id.is_empty() {
            warn!("Refusing unidentified peer {}", peer.remote_addr());
            return false;
        }

        // The faulted entry stays locked until the peer is connected, so a
        // concurrent fault_with cannot land between the two maps.
        let slot = self.faulted.entry(id.clone());
        let previous = self.connected.insert(id.clone(), Arc::clone(&peer));
        if let Entry::Occupied(record) = slot {
            record.remove();
        }

        match previous {
            Some(previous) if !Arc::ptr_eq(&previous, &peer) => {
                debug!("Replacing connection to {}", id);
                let _ = previous.close();
            }
            Some(_) => {}
            None => {
                self.size.fetch_add(1, Ordering::AcqRel);
            }
        }
        self.touch();
        info!("Peer {} connected via {}", id, peer.remote_addr());
        true
    }

    /// Forget `id` in whichever partition holds it
    pub fn remove(&self, id: &str) -> Option<Arc<Peer>> {
        if let Some((_, peer)) = self.connected.remove(id) {
            self.size.fetch_sub(1, Ordering::AcqRel);
            self.touch();
            debug!("Peer {} removed", id);
            return Some(peer);
        }
        self.faulted.remove(id).map(|(_, record)| record.peer)
    }

    /// Remove `peer` only if it is the instance currently registered
    pub fn evict(&self, peer: &Arc<Peer>) -> bool {
        let id = peer.id();
        if self
            .connected
            .remove_if(&id, |_, current| Arc::ptr_eq(current, peer))
            .is_some()
        {
            self.size.fetch_sub(1, Ordering::AcqRel);
            self.touch();
            info!("Peer {} disconnected", id);
            return true;
        }
        self.faulted
            .remove_if(&id, |_, record| Arc::ptr_eq(&record.peer, peer))
            .is_some()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Peer>> {
        self.connected.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Visit connected peers until `f` returns false. Iterates a snapshot,
    /// so `f` may mutate the registry.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Peer>) -> bool,
    {
        for peer in self.snapshot() {
            if !f(&peer) {
                break;
            }
        }
    }

    /// Connected peers at this instant
    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.connected
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of connected peers; eventually consistent with [`Registry::range`]
    pub fn length(&self) -> i64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_faulted(&self, id: &str) -> bool {
        self.faulted.contains_key(id)
    }

    /// Fault the connected peer `id` unless `predicate` accepts it.
    /// Returns whether the peer is connected and passed.
    pub fn validate<P>(&self, id: &str, predicate: P) -> bool
    where
        P: FnOnce(&Peer) -> bool,
    {
        let Some(peer) = self.get(id) else {
            return false;
        };
        if predicate(&peer) {
            return true;
        }
        self.fault(&peer);
        false
    }

    pub fn fault(&self, peer: &Arc<Peer>) -> bool {
        self.fault_with(peer, |_| {})
    }

    /// Move `peer` to the faulted partition. `on_fault` runs after the peer
    /// left `connected` and before the fault record is inserted. Returns
    /// false if a different instance now holds the id.
    pub fn fault_with<F>(&self, peer: &Arc<Peer>, on_fault: F) -> bool
    where
        F: FnOnce(&Arc<Peer>),
    {
        let id = peer.id();
        if id.is_empty() {
            return false;
        }

        match self.connected.remove_if(&id, |_, current| Arc::ptr_eq(current, peer)) {
            Some(_) => {
                self.size.fetch_sub(1, Ordering::AcqRel);
                self.touch();
            }
            None if self.connected.contains_key(&id) => {
                debug!("Stale instance of {} not faulted", id);
                return false;
            }
            None => {}
        }

        on_fault(peer);

        // Lock order matches push: faulted entry first, then connected
        let slot = self.faulted.entry(id.clone());
        if self.connected.contains_key(&id) {
            debug!("Peer {} reconnected while faulting", id);
            return false;
        }
        slot.insert(FaultRecord::new(Arc::clone(peer)));
        warn!("Peer {} faulted", id);
        true
    }

    pub fn recovery_fault(&self, id: &str) -> Option<Arc<Peer>> {
        self.recovery_fault_with(id, |_| {})
    }

    /// Move a faulted peer back to `connected`. `on_recover` runs before the
    /// peer is re-admitted.
    pub fn recovery_fault_with<F>(&self, id: &str, on_recover: F) -> Option<Arc<Peer>>
    where
        F: FnOnce(&Arc<Peer>),
    {
        let (_, record) = self.faulted.remove(id)?;
        on_recover(&record.peer);
        self.push(Arc::clone(&record.peer));
        info!("Peer {} recovered", id);
        Some(record.peer)
    }

    /// `(eligible, remaining)` for a faulted peer, `None` if `id` is not faulted
    pub fn fault_time_check(&self, id: &str, limit: Duration) -> Option<(bool, Duration)> {
        self.faulted
            .get(id)
            .map(|record| record.check(Instant::now(), limit))
    }

    /// Register the provider of locally held content hashes
    pub fn register_ld_request(&self, f: LdRequestFn) {
        *self.ld_request.write() = Some(f);
    }

    /// Register the provider of shareable peer addresses
    pub fn register_addr_request(&self, f: AddrRequestFn) {
        *self.addr_request.write() = Some(f);
    }

    pub fn local_hashes(&self) -> Vec<HashRecord> {
        let hook = self.ld_request.read().clone();
        hook.map(|f| f()).unwrap_or_default()
    }

    pub fn local_addrs(&self) -> Vec<AddrInfo> {
        let hook = self.addr_request.read().clone();
        match hook {
            Some(f) => f(),
            None => self
                .snapshot()
                .iter()
                .map(|peer| peer.addr_info())
                .filter(AddrInfo::has_addrs)
                .collect(),
        }
    }

    /// Persist the `AddrInfo` of every connected peer under its id. A failed
    /// record does not stop the rest; the last error is returned.
    pub fn store(&self) -> Result<(), RegistryError> {
        let mut last_error = None;
        let mut written = 0;

        for peer in self.snapshot() {
            let info = peer.addr_info();
            if info.id.is_empty() || !info.has_addrs() {
                continue;
            }
            match self.peers.store(&info.id, &info) {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!("Failed to persist peer {}: {}", info.id, e);
                    last_error = Some(e);
                }
            }
        }

        debug!("Persisted {} peers", written);
        match last_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Flush if anything changed since the last successful flush
    pub fn flush_if_dirty(&self) -> bool {
        let revision = self.revision.load(Ordering::Acquire);
        if revision == self.flushed.load(Ordering::Acquire) {
            return false;
        }

        match self.store() {
            Ok(()) => {
                self.flushed.store(revision, Ordering::Release);
                self.flushes.fetch_add(1, Ordering::AcqRel);
                true
            }
            Err(e) => {
                warn!("Registry flush failed: {}", e);
                false
            }
        }
    }

    /// Reconnect to every persisted peer through the dispatcher. Each entry
    /// is dialled at its addresses in order until one connects and answers
    /// the handshake with the expected id; entries that never do are logged
    /// and dropped. Returns the number of peers admitted.
    pub async fn load(&self) -> Result<usize, RegistryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RegistryError::NotRunning);
        }

        let options = self.dial_options();
        let keys = self.peers.keys()?;
        self.dispatcher.run();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut queued = 0usize;

        for key in keys {
            let info: AddrInfo = match load_record(self.peers.as_ref(), &key) {
                Ok(info) => info,
                Err(e) => {
                    warn!("Skipping unreadable peer record {}: {}", key, e);
                    continue;
                }
            };
            if info.id == options.local.id || self.connected.contains_key(&info.id) {
                continue;
            }

            let addrs: Vec<SocketAddr> = info
                .addrs
                .iter()
                .filter_map(|raw| raw.parse::<Addr>().ok())
                .filter(Addr::is_dialable)
                .map(|addr| addr.socket_addr())
                .collect();
            if addrs.is_empty() {
                warn!("Peer record {} has no dialable address", info.id);
                continue;
            }

            let tx = tx.clone();
            let options = options.clone();
            let queued_call = self.dispatcher.add_call(move |ctx| async move {
                let result = dial_first(&info.id, &addrs, options, ctx).await;
                let _ = tx.send((info.id, result));
            });
            if queued_call {
                queued += 1;
            }
        }
        drop(tx);

        let mut restored = 0;
        while let Some((id, result)) = rx.recv().await {
            match result {
                Ok(peer) => {
                    if self.push(peer) {
                        restored += 1;
                    }
                }
                Err(e) => warn!("Dropping unreachable peer {}: {}", id, e),
            }
        }

        info!("Restored {} of {} persisted peers", restored, queued);
        Ok(restored)
    }

    /// Spawn the background flush and recovery loop
    pub fn start(self: &Arc<Self>) -> Result<(), RegistryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RegistryError::NotRunning);
        }

        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }
        self.dispatcher.run();
        *task = Some(tokio::spawn(Arc::clone(self).run_loop(self.stop.subscribe())));
        Ok(())
    }

    async fn run_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut flush = tokio::time::interval(self.config.flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut recover = tokio::time::interval(self.config.recover_interval);
        recover.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.wait_for(|stopped| *stopped) => break,
                _ = flush.tick() => {
                    self.flush_if_dirty();
                }
                _ = recover.tick() => {
                    self.prune_closed();
                    self.recover_faulted();
                }
            }
        }
        debug!("Registry loop exited");
    }

    /// Drop closed connections from both partitions
    pub fn prune_closed(&self) {
        for peer in self.snapshot() {
            if peer.is_closed() {
                self.evict(&peer);
            }
        }
        self.faulted.retain(|id, record| {
            let keep = !record.peer.is_closed();
            if !keep {
                debug!("Purged closed faulted peer {}", id);
            }
            keep
        });
    }

    /// Ping faulted peers whose cooldown expired and re-admit the ones that
    /// answer. A failed ping restarts the cooldown.
    pub fn recover_faulted(self: &Arc<Self>) {
        let now = Instant::now();
        let limit = self.config.fault_limit;
        let eligible: Vec<Arc<Peer>> = self
            .faulted
            .iter()
            .filter(|record| record.check(now, limit).0)
            .map(|record| Arc::clone(&record.peer))
            .collect();

        for peer in eligible {
            let registry = Arc::clone(self);
            self.dispatcher.add_call(move |ctx| async move {
                if ctx.is_cancelled() {
                    return;
                }
                let id = peer.id();
                match peer.ping().await {
                    Ok(rtt) => {
                        let same = registry
                            .faulted
                            .get(&id)
                            .is_some_and(|record| Arc::ptr_eq(&record.peer, &peer));
                        if same {
                            registry.recovery_fault(&id);
                            debug!("Peer {} answered in {:?}", id, rtt);
                        }
                    }
                    Err(e) => {
                        debug!("Faulted peer {} still unreachable: {}", id, e);
                        if let Some(mut record) = registry.faulted.get_mut(&id) {
                            record.refresh();
                        }
                    }
                }
            });
        }
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connected: self.length(),
            faulted: self.faulted.len(),
            flushes: self.flushes.load(Ordering::Acquire),
            revision: self.revision.load(Ordering::Acquire),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the background loop and dispatcher, flush pending changes and
    /// close both stores. Safe before [`Registry::start`] and idempotent.
    pub fn close(&self) -> Result<(), RegistryError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.stop.send_replace(true);
        self.dispatcher.stop();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.flush_if_dirty();

        let peers = self.peers.close();
        let hashes = self.hashes.close();
        info!("Registry closed");
        peers?;
        hashes?;
        Ok(())
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Registry close on drop failed: {}", e);
        }
    }
}

async fn dial_first(
    expected: &str,
    addrs: &[SocketAddr],
    options: PeerOptions,
    ctx: CallContext,
) -> Result<Arc<Peer>, PeerError> {
    let mut last_error = PeerError::Closed;

    for &addr in addrs {
        if ctx.is_cancelled() {
            return Err(PeerError::Closed);
        }

        let peer = match Peer::connect(addr, options.clone()).await {
            Ok(peer) => peer,
            Err(e) => {
                debug!("Dial {} for {} failed: {}", addr, expected, e);
                last_error = e;
                continue;
            }
        };

        match peer.handshake().await {
            Ok(id) if id == expected => return Ok(peer),
            Ok(id) => {
                last_error = PeerError::Handshake(format!("expected {}, found {}", expected, id));
            }
            Err(e) => last_error = e,
        }
        let _ = peer.close();
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::net::TcpListener;

    fn config(dir: &std::path::Path) -> RegistryConfig {
        RegistryConfig {
            data_dir: dir.to_path_buf(),
            flush_interval: Duration::from_millis(20),
            recover_interval: Duration::from_secs(3600),
            fault_limit: Duration::from_secs(1),
            max_dispatch: 4,
        }
    }

    fn local(id: &str) -> PeerOptions {
        PeerOptions {
            local: AddrInfo::new(id, Vec::<String>::new()),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    /// Accepts connections forever, answering as `id`
    async fn responder(id: &str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let options = local(id);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, remote)) = listener.accept().await {
                held.push(Peer::accept(stream, remote, options.clone()));
            }
        });
        addr
    }

    async fn identified(id: &str) -> (Arc<Peer>, SocketAddr) {
        let addr = responder(id).await;
        let peer = Peer::connect(addr, local("self")).await.unwrap();
        assert_eq!(peer.handshake().await.unwrap(), id);
        (peer, addr)
    }

    #[tokio::test]
    async fn test_push_get_remove() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(config(dir.path())).unwrap();
        let (peer, _) = identified("n1").await;

        assert!(registry.push(Arc::clone(&peer)));
        assert_eq!(registry.length(), 1);
        assert!(registry.get("n1").is_some());

        // pushing the same instance again does not double count
        assert!(registry.push(Arc::clone(&peer)));
        assert_eq!(registry.length(), 1);

        assert!(registry.remove("n1").is_some());
        assert!(registry.remove("n1").is_none());
        assert_eq!(registry.length(), 0);
        registry.close().unwrap();
    }

    #[tokio::test]
    async fn test_unidentified_peer_refused() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(config(dir.path())).unwrap();
        let addr = responder("n1").await;
        let peer = Peer::connect(addr, local("self")).await.unwrap();

        assert!(!registry.push(peer));
        assert_eq!(registry.length(), 0);
    }

    #[tokio::test]
    async fn test_fault_cooldown_and_recovery() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(config(dir.path())).unwrap();
        let (peer, _) = identified("n1").await;
        registry.push(Arc::clone(&peer));

        let mut seen = None;
        assert!(registry.fault_with(&peer, |p| seen = Some(p.id())));
        assert_eq!(seen.as_deref(), Some("n1"));
        assert_eq!(registry.length(), 0);
        assert!(registry.get("n1").is_none());
        assert!(registry.is_faulted("n1"));

        let limit = Duration::from_millis(200);
        let (eligible, remaining) = registry.fault_time_check("n1", limit).unwrap();
        assert!(!eligible);
        assert!(remaining > Duration::ZERO);

        tokio::time::sleep(limit).await;
        assert_eq!(
            registry.fault_time_check("n1", limit),
            Some((true, Duration::ZERO))
        );

        assert!(registry.recovery_fault("n1").is_some());
        assert!(!registry.is_faulted("n1"));
        assert_eq!(registry.length(), 1);
        assert!(registry.fault_time_check("n1", limit).is_none());
    }

    #[tokio::test]
    async fn test_validate_faults_on_rejection() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(config(dir.path())).unwrap();
        let (peer, _) = identified("n1").await;
        registry.push(peer);

        assert!(registry.validate("n1", |p| !p.is_closed()));
        assert!(!registry.validate("n1", |_| false));
        assert!(registry.is_faulted("n1"));
        assert!(!registry.validate("missing", |_| true));
    }

    #[tokio::test]
    async fn test_evict_ignores_replaced_instance() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(config(dir.path())).unwrap();
        let addr = responder("n1").await;

        let first = Peer::connect(addr, local("self")).await.unwrap();
        first.handshake().await.unwrap();
        let second = Peer::connect(addr, local("self")).await.unwrap();
        second.handshake().await.unwrap();

        registry.push(Arc::clone(&first));
        registry.push(Arc::clone(&second));
        assert!(first.is_closed());

        assert!(!registry.evict(&first));
        assert_eq!(registry.length(), 1);
        assert!(registry.evict(&second));
        assert_eq!(registry.length(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_push_remove_consistency() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(config(dir.path())).unwrap();

        let mut peers = Vec::new();
        for i in 0..8 {
            peers.push(identified(&format!("n{}", i)).await.0);
        }

        let mut tasks = Vec::new();
        for worker in 0..8usize {
            let registry = Arc::clone(&registry);
            let peers = peers.clone();
            tasks.push(tokio::spawn(async move {
                for round in 0..200usize {
                    let peer = &peers[(worker + round) % peers.len()];
                    if (worker + round) % 3 == 0 {
                        registry.remove(&peer.id());
                    } else {
                        registry.push(Arc::clone(peer));
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut counted = 0;
        registry.range(|_| {
            counted += 1;
            true
        });
        assert_eq!(registry.length(), counted);
    }

    #[tokio::test]
    async fn test_range_stops_early() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(config(dir.path())).unwrap();
        for i in 0..3 {
            registry.push(identified(&format!("n{}", i)).await.0);
        }

        let mut visited = 0;
        registry.range(|_| {
            visited += 1;
            false
        });
        assert_eq!(visited, 1);
    }

    #[tokio::test]
    async fn test_store_and_load_restores_peers() {
        let dir = tempdir().unwrap();
        let mut expected = Vec::new();
        {
            let registry = Registry::open(config(dir.path())).unwrap();
            for i in 0..3 {
                let id = format!("n{}", i);
                let (peer, addr) = identified(&id).await;
                registry.push(peer);
                expected.push((id, addr));
            }
            registry.store().unwrap();
            registry.close().unwrap();
        }

        let registry = Registry::open(config(dir.path())).unwrap();
        registry.set_dial_options(local("self"));
        assert_eq!(registry.load().await.unwrap(), 3);
        assert_eq!(registry.length(), 3);

        for (id, addr) in expected {
            let peer = registry.get(&id).unwrap();
            assert_eq!(peer.remote_addr(), addr);
            assert!(peer.ping().await.is_ok());
        }
        registry.close().unwrap();
    }

    #[tokio::test]
    async fn test_load_drops_unreachable_entries() {
        let dir = tempdir().unwrap();
        {
            let registry = Registry::open(config(dir.path())).unwrap();
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let dead = Addr::tcp(listener.local_addr().unwrap()).to_string();
            drop(listener);
            registry
                .peers
                .store("gone", &AddrInfo::new("gone", [dead]))
                .unwrap();
            registry.close().unwrap();
        }

        let registry = Registry::open(config(dir.path())).unwrap();
        assert_eq!(registry.load().await.unwrap(), 0);
        assert_eq!(registry.length(), 0);
    }

    #[tokio::test]
    async fn test_close_interrupts_load() {
        let dir = tempdir().unwrap();
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = Addr::tcp(silent.local_addr().unwrap()).to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = silent.accept().await {
                held.push(stream);
            }
        });

        {
            let registry = Registry::open(config(dir.path())).unwrap();
            for id in ["s1", "s2", "s3"] {
                registry
                    .peers
                    .store(id, &AddrInfo::new(id, [silent_addr.clone()]))
                    .unwrap();
            }
            registry.close().unwrap();
        }

        let registry = Registry::open(RegistryConfig {
            max_dispatch: 1,
            ..config(dir.path())
        })
        .unwrap();
        registry.set_dial_options(PeerOptions {
            request_timeout: Duration::from_millis(300),
            ..local("self")
        });

        let loading = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.load().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        registry.close().unwrap();

        let restored = tokio::time::timeout(Duration::from_secs(5), loading)
            .await
            .expect("load returns after close")
            .unwrap()
            .unwrap();
        assert_eq!(restored, 0);
        assert_eq!(registry.dispatcher().pending(), 0);
    }

    #[tokio::test]
    async fn test_push_during_fault_keeps_partitions_disjoint() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(config(dir.path())).unwrap();
        let (peer, _) = identified("n1").await;
        registry.push(Arc::clone(&peer));

        let faulted = registry.fault_with(&peer, |p| {
            registry.push(Arc::clone(p));
        });

        assert!(!faulted);
        assert!(registry.get("n1").is_some());
        assert!(!registry.is_faulted("n1"));
        assert_eq!(registry.length(), 1);
        registry.close().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fault_and_push_never_overlap() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(config(dir.path())).unwrap();
        let (peer, _) = identified("n1").await;
        registry.push(Arc::clone(&peer));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let registry = Arc::clone(&registry);
            let peer = Arc::clone(&peer);
            tasks.push(tokio::spawn(async move {
                for _ in 0..200 {
                    if i % 2 == 0 {
                        registry.fault(&peer);
                    } else {
                        registry.push(Arc::clone(&peer));
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let connected = registry.get("n1").is_some();
        assert_ne!(connected, registry.is_faulted("n1"));
        assert_eq!(registry.length(), connected as i64);
        registry.close().unwrap();
    }

    #[tokio::test]
    async fn test_loop_skips_flush_when_unchanged() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(config(dir.path())).unwrap();
        registry.start().unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(registry.stats().flushes, 0);

        let (peer, _) = identified("n1").await;
        registry.push(peer);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(registry.stats().flushes, 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.stats().flushes, 1);
        registry.close().unwrap();
    }

    #[tokio::test]
    async fn test_close_before_start() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(config(dir.path())).unwrap();
        assert!(registry.close().is_ok());
        assert!(registry.close().is_ok());
        assert!(matches!(registry.start(), Err(RegistryError::NotRunning)));
        assert!(matches!(registry.load().await, Err(RegistryError::NotRunning)));
    }

    #[tokio::test]
    async fn test_hook_defaults() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(config(dir.path())).unwrap();
        let (peer, addr) = identified("n1").await;
        registry.push(peer);

        assert!(registry.local_hashes().is_empty());
        let addrs = registry.local_addrs();
        assert_eq!(addrs.len(), 1);
        assert!(addrs[0].addrs.contains(&Addr::tcp(addr).to_string()));

        registry.register_addr_request(Arc::new(Vec::<AddrInfo>::new));
        assert!(registry.local_addrs().is_empty());
    }
}

//! Request/response correlation
//!
//! A [`RequestQueue`] wraps one outgoing exchange. When the caller expects a
//! reply, the link's writer registers it in a [`SessionTable`] under a fresh
//! session id, and the link's reader hands the matching response back through
//! [`RequestQueue::callback`]. Every channel operation is bounded by the
//! queue's timeout so a dead peer can block neither side.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

use super::exchange::Exchange;

/// Default bound on every queue wait
pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    /// Whether the sender waits for a response
    pub callback: bool,
    /// Bound on sending, delivery and waiting
    pub timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            callback: true,
            timeout: DEFAULT_QUEUE_TIMEOUT,
        }
    }
}

impl QueueOptions {
    /// Options for a frame that expects no reply
    pub fn fire_and_forget(timeout: Duration) -> Self {
        Self {
            callback: false,
            timeout,
        }
    }
}

/// One in-flight exchange and the single slot its response lands in
pub struct RequestQueue {
    exchange: Mutex<Exchange>,
    options: QueueOptions,
    slot_tx: mpsc::Sender<Exchange>,
    slot_rx: tokio::sync::Mutex<mpsc::Receiver<Exchange>>,
    cancelled: AtomicBool,
}

impl RequestQueue {
    pub fn new(exchange: Exchange, options: QueueOptions) -> Arc<Self> {
        let (slot_tx, slot_rx) = mpsc::channel(1);
        Arc::new(Self {
            exchange: Mutex::new(exchange),
            options,
            slot_tx,
            slot_rx: tokio::sync::Mutex::new(slot_rx),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Assign the correlation id; must happen before transmission
    pub fn set_session(&self, session: u16) {
        self.exchange.lock().session = session;
    }

    pub fn session(&self) -> u16 {
        self.exchange.lock().session
    }

    /// Snapshot of the exchange as it will go on the wire
    pub fn exchange(&self) -> Exchange {
        self.exchange.lock().clone()
    }

    pub fn wants_callback(&self) -> bool {
        self.options.callback
    }

    pub fn timeout(&self) -> Duration {
        self.options.timeout
    }

    /// Mark the request abandoned by its caller. A writer that has not yet
    /// transmitted it skips it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Deliver a response. Returns false if the slot stayed full for the
    /// whole timeout, in which case the response is dropped.
    pub async fn callback(&self, response: Exchange) -> bool {
        match self.slot_tx.send_timeout(response, self.options.timeout).await {
            Ok(()) => true,
            Err(_) => {
                trace!(session = self.session(), "response dropped, nobody waiting");
                false
            }
        }
    }

    /// Wait for the response. `None` means the wait timed out or the queue
    /// was created without a callback.
    pub async fn wait_callback(&self) -> Option<Exchange> {
        if !self.options.callback {
            return None;
        }

        let wait = async {
            let mut rx = self.slot_rx.lock().await;
            rx.recv().await
        };
        tokio::time::timeout(self.options.timeout, wait)
            .await
            .ok()
            .flatten()
    }

    /// Offer this entry to an outbound channel. Returns false when the
    /// channel could not take it in time (backpressure) or is closed.
    pub async fn send(self: &Arc<Self>, out: &mpsc::Sender<Arc<RequestQueue>>) -> bool {
        out.send_timeout(Arc::clone(self), self.options.timeout)
            .await
            .is_ok()
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("session", &self.session())
            .field("options", &self.options)
            .finish()
    }
}

/// Outstanding requests of one connection, keyed by session id
#[derive(Default)]
pub struct SessionTable {
    pending: DashMap<u16, Arc<RequestQueue>>,
    next: AtomicU16,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick a session id that is not outstanding, stamp it on the queue and
    /// register the queue. Ids wrap; an id becomes reusable once its entry
    /// has been resolved or cancelled.
    pub fn register(&self, queue: &Arc<RequestQueue>) -> Option<u16> {
        for _ in 0..=u16::MAX as u32 {
            let session = self.next.fetch_add(1, Ordering::Relaxed);
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.pending.entry(session) {
                queue.set_session(session);
                slot.insert(Arc::clone(queue));
                return Some(session);
            }
        }
        None
    }

    /// Hand a response to whoever registered its session. Returns false for
    /// unknown sessions (late or unsolicited responses).
    pub async fn resolve(&self, response: Exchange) -> bool {
        let Some((_, queue)) = self.pending.remove(&response.session) else {
            return false;
        };
        queue.callback(response).await
    }

    pub fn cancel(&self, session: u16) {
        self.pending.remove(&session);
    }

    /// Drop the entry for `queue` if it is still the one registered under
    /// its session. Used after a timed-out wait.
    pub fn release(&self, queue: &Arc<RequestQueue>) {
        self.pending
            .remove_if(&queue.session(), |_, registered| Arc::ptr_eq(registered, queue));
    }

    pub fn clear(&self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

//! Bounded worker pool for background calls
//!
//! Calls are queued with [`Dispatcher::add_call`] and executed by at most
//! `max_limit` workers at a time. Reconnect storms, recovery pings and
//! discovery dials all go through here instead of spawning a task each.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default number of concurrent workers
pub const DEFAULT_MAX_LIMIT: usize = 16;

type Call = Box<dyn FnOnce(CallContext) -> BoxFuture<'static, ()> + Send>;

/// Handed to every call; reports when the pool is stopping
#[derive(Clone)]
pub struct CallContext {
    stop: watch::Receiver<bool>,
}

impl CallContext {
    pub fn is_cancelled(&self) -> bool {
        *self.stop.borrow()
    }

    /// Resolves once the dispatcher has been stopped
    pub async fn cancelled(&mut self) {
        let _ = self.stop.wait_for(|stopped| *stopped).await;
    }
}

pub struct Dispatcher {
    max_limit: usize,
    calls_tx: mpsc::UnboundedSender<Call>,
    calls_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Call>>>,
    running: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
    started: AtomicBool,
    stop_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(max_limit: usize) -> Self {
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        let (stop_tx, _) = watch::channel(false);

        Self {
            max_limit: max_limit.max(1),
            calls_tx,
            calls_rx: Arc::new(tokio::sync::Mutex::new(calls_rx)),
            running: Arc::new(AtomicUsize::new(0)),
            pending: Arc::new(AtomicUsize::new(0)),
            started: AtomicBool::new(false),
            stop_tx,
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    /// Calls currently executing
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Calls queued but not yet picked up
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.is_stopped()
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Queue a call. Returns false once the dispatcher has been stopped.
    pub fn add_call<F, Fut>(&self, f: F) -> bool
    where
        F: FnOnce(CallContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            return false;
        }

        let call: Call = Box::new(move |ctx| Box::pin(f(ctx)) as BoxFuture<'static, ()>);
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.calls_tx.send(call).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Spawn the workers. Calling it again is a no-op. Must be called from
    /// within a tokio runtime.
    pub fn run(&self) {
        if self.is_stopped() || self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut workers = self.workers.lock();
        for index in 0..self.max_limit {
            workers.push(tokio::spawn(worker_loop(
                index,
                Arc::clone(&self.calls_rx),
                Arc::clone(&self.running),
                Arc::clone(&self.pending),
                self.stop_tx.subscribe(),
            )));
        }
        info!("Dispatcher started with {} workers", self.max_limit);
    }

    /// Ask every worker to exit. Calls already executing run to completion;
    /// queued calls are dropped along with everything they captured.
    pub fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            info!("Dispatcher stopping");
        }
        // A worker holding the queue drains it on its way out
        if let Ok(mut calls) = self.calls_rx.try_lock() {
            drain(&mut calls, &self.pending);
        }
    }

    /// Block until the dispatcher has been stopped
    pub async fn waiting(&self) {
        let mut rx = self.stop_tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Stop and wait for every worker to exit
    pub async fn shutdown(&self) {
        self.stop();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LIMIT)
    }
}

async fn worker_loop(
    index: usize,
    calls: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Call>>>,
    running: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let call = tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => break,
            call = async { calls.lock().await.recv().await } => match call {
                Some(call) => call,
                None => break,
            },
        };

        pending.fetch_sub(1, Ordering::AcqRel);
        running.fetch_add(1, Ordering::AcqRel);
        call(CallContext { stop: stop.clone() }).await;
        running.fetch_sub(1, Ordering::AcqRel);
    }

    drain(&mut *calls.lock().await, &pending);
    debug!("Dispatcher worker {} exited", index);
}

/// Close the queue and drop every call still in it
fn drain(calls: &mut mpsc::UnboundedReceiver<Call>, pending: &AtomicUsize) {
    calls.close();
    let mut dropped = 0;
    while calls.try_recv().is_ok() {
        pending.fetch_sub(1, Ordering::AcqRel);
        dropped += 1;
    }
    if dropped > 0 {
        debug!("Dropped {} queued calls", dropped);
    }
}

//! Bounded asynchronous execution engine.
//!
//! Calls flagged async are handed here as already-resolved
//! [`DeferredCall`]s; the calling task returns immediately and the
//! eventual response travels back through the item's [`ResultSink`].
//! Admission is bounded, execution is at-most-once, and a failing handler
//! never takes a worker down with it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tether_rpc::dispatch::DeferredCall;
use tether_rpc::errors::EXECUTION_FAILED;
use tether_rpc::protocol::CallResponse;

/// Where an async call's eventual response goes. Implemented by the
/// WebSocket connection; tests substitute their own.
pub trait ResultSink: Send + Sync {
    /// Whether the originating connection/request is already gone.
    fn is_closed(&self) -> bool;

    /// Deliver the response. Returns `false` if the sink refused it.
    fn deliver(&self, response: CallResponse) -> bool;
}

/// One deferred unit of work: the resolved call plus its result sink.
pub struct AsyncWorkItem {
    /// The resolved, validated call.
    pub call: DeferredCall,
    /// Sink bound to the originating connection.
    pub sink: Arc<dyn ResultSink>,
}

/// Engine tuning knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    /// Worker count. Must be at least 1.
    pub max_parallel: usize,
    /// Admission bound: accepted-but-unfinished items. 0 means unbounded.
    pub max_queue_depth: usize,
    /// Per-item execution cap in seconds. 0 disables the cap and leaves
    /// timeouts to the underlying connection.
    pub item_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            max_queue_depth: 64,
            item_timeout_secs: 0,
        }
    }
}

/// Startup-fatal engine misconfiguration.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The pool cannot run without workers.
    #[error("async engine needs at least one worker (max_parallel = 0)")]
    NoWorkers,
}

/// A fixed pool of workers draining a shared queue.
///
/// The backlog counts accepted items that have not yet finished, so the
/// admission bound covers queued and in-flight work together — the
/// (N+1)-th concurrent submit against a bound of N is refused no matter
/// how the workers are scheduled.
#[derive(Debug)]
pub struct AsyncExecutionEngine {
    tx: mpsc::UnboundedSender<AsyncWorkItem>,
    backlog: Arc<AtomicUsize>,
    max_queue_depth: usize,
    item_timeout: Option<Duration>,
    cancel: CancellationToken,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl AsyncExecutionEngine {
    /// Start the worker pool. Fails fast on a configuration the pool
    /// cannot run with; per-call failures later never reach this level.
    pub fn start(config: &EngineConfig) -> Result<Self, EngineError> {
        if config.max_parallel == 0 {
            return Err(EngineError::NoWorkers);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let backlog = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let item_timeout =
            (config.item_timeout_secs > 0).then(|| Duration::from_secs(config.item_timeout_secs));

        let mut workers = Vec::with_capacity(config.max_parallel);
        for worker in 0..config.max_parallel {
            workers.push(tokio::spawn(worker_loop(
                worker,
                rx.clone(),
                backlog.clone(),
                cancel.clone(),
                item_timeout,
            )));
        }

        info!(
            workers = config.max_parallel,
            queue_depth = config.max_queue_depth,
            "async engine started"
        );

        Ok(Self {
            tx,
            backlog,
            max_queue_depth: config.max_queue_depth,
            item_timeout,
            cancel,
            workers: parking_lot::Mutex::new(workers),
        })
    }

    /// Attempt admission. Returns `false` iff the engine is shut down or
    /// the backlog bound is reached; an accepted item executes at most
    /// once, in best-effort FIFO order.
    pub fn submit(&self, item: AsyncWorkItem) -> bool {
        if self.cancel.is_cancelled() {
            debug!(txn = item.call.txn, "submit refused: engine shut down");
            return false;
        }
        if self.max_queue_depth > 0 && self.backlog.load(Ordering::Acquire) >= self.max_queue_depth
        {
            counter!("bridge_async_rejected_total").increment(1);
            debug!(txn = item.call.txn, "submit refused: backlog full");
            return false;
        }

        let _ = self.backlog.fetch_add(1, Ordering::AcqRel);
        gauge!("bridge_async_backlog").increment(1.0);

        if item.call.uses_dedicated_worker() {
            let backlog = self.backlog.clone();
            let item_timeout = self.item_timeout;
            let _: JoinHandle<()> = tokio::spawn(async move {
                run_item(item, &backlog, item_timeout).await;
            });
        } else if self.tx.send(item).is_err() {
            // Workers already gone; treat like a post-shutdown submit.
            let _ = self.backlog.fetch_sub(1, Ordering::AcqRel);
            gauge!("bridge_async_backlog").decrement(1.0);
            return false;
        }

        counter!("bridge_async_submitted_total").increment(1);
        true
    }

    /// Accepted items that have not yet finished.
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop accepting new items. Pending-but-unstarted items are
    /// discarded, not completed. Idempotent.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!(backlog = self.backlog(), "async engine shutting down");
        }
        self.cancel.cancel();
    }

    /// Shut down and wait up to `timeout` for the workers to stop.
    pub async fn shutdown_and_join(&self, timeout: Duration) {
        self.shutdown();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("async workers did not stop within {timeout:?}");
        }
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<AsyncWorkItem>>>,
    backlog: Arc<AtomicUsize>,
    cancel: CancellationToken,
    item_timeout: Option<Duration>,
) {
    loop {
        let next = {
            let mut guard = rx.lock().await;
            tokio::select! {
                () = cancel.cancelled() => None,
                item = guard.recv() => item,
            }
        };
        let Some(item) = next else { break };
        run_item(item, &backlog, item_timeout).await;
    }
    debug!(worker, "async worker stopped");
}

/// Run one accepted item: skip it if the caller is gone, contain handler
/// failure, deliver the response, settle the backlog.
async fn run_item(item: AsyncWorkItem, backlog: &AtomicUsize, item_timeout: Option<Duration>) {
    let txn = item.call.txn.clone();
    let method = item.call.method().to_owned();

    if item.sink.is_closed() {
        debug!(method, txn, "caller gone before execution, skipping");
        counter!("bridge_async_skipped_total").increment(1);
        finish_item(backlog);
        return;
    }

    let work = AssertUnwindSafe(item.call.run()).catch_unwind();
    let outcome = match item_timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                warn!(method, txn, "async item exceeded {limit:?}");
                Ok(CallResponse::error(
                    txn.as_str(),
                    EXECUTION_FAILED,
                    "Handler timed out",
                ))
            }
        },
        None => work.await,
    };

    let response = match outcome {
        Ok(response) => response,
        Err(_panic) => {
            error!(method, txn, "handler panicked");
            CallResponse::error(txn.as_str(), EXECUTION_FAILED, "Internal handler error")
        }
    };

    if !item.sink.deliver(response) {
        debug!(method, txn, "async response could not be delivered");
    }
    finish_item(backlog);
}

fn finish_item(backlog: &AtomicUsize) {
    let _ = backlog.fetch_sub(1, Ordering::AcqRel);
    gauge!("bridge_async_backlog").decrement(1.0);
}

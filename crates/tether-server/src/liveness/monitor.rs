//! The liveness monitor: periodic probing and eviction.
//!
//! A fixed-period tick sweeps every registered connection and dispatches
//! one probe task per connection, so one slow transport never stalls the
//! sweep. `register`/`deregister` and the traffic observers are safe to
//! call concurrently with a running tick.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::record::ConnectionLiveness;

/// What the monitor needs from a long-lived connection's transport.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// Whether the transport still reports itself open.
    fn is_open(&self) -> bool;

    /// Send a liveness probe. Returns `false` if the send failed.
    async fn send_ping(&self) -> bool;

    /// Close with a normal-closure code and a diagnostic reason. Returns
    /// `false` if the close itself failed (already-closed transport);
    /// either way the connection is considered gone.
    async fn close(&self, reason: &str) -> bool;
}

/// Monitor tuning knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct LivenessConfig {
    /// Seconds between probe sweeps.
    pub ping_interval_secs: u64,
    /// A connection silent longer than this is evicted outright,
    /// regardless of its retry budget.
    pub idle_timeout_secs: u64,
    /// Retry budget restored by every piece of liveness evidence.
    pub max_retries: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            idle_timeout_secs: 600,
            max_retries: 3,
        }
    }
}

impl LivenessConfig {
    /// Idle timeout in milliseconds, as advertised in the `welco` frame.
    pub fn idle_timeout_ms(&self) -> u64 {
        self.idle_timeout_secs * 1000
    }
}

struct Watched {
    record: Arc<ConnectionLiveness>,
    transport: Arc<dyn ProbeTransport>,
}

type WatchMap = Arc<DashMap<String, Watched>>;

/// Probes registered connections and evicts the unresponsive.
pub struct LivenessMonitor {
    config: LivenessConfig,
    watched: WatchMap,
    cancel: CancellationToken,
}

impl LivenessMonitor {
    /// Create a monitor. Call [`LivenessMonitor::spawn`] to start ticking.
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            config,
            watched: Arc::new(DashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// The monitor's configuration.
    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Start watching a connection. Called by the transport layer when a
    /// long-lived connection opens.
    pub fn register(
        &self,
        id: impl Into<String>,
        transport: Arc<dyn ProbeTransport>,
    ) -> Arc<ConnectionLiveness> {
        let id = id.into();
        let record = Arc::new(ConnectionLiveness::new(id.clone(), self.config.max_retries));
        debug!(connection = id, "liveness watch started");
        let _ = self.watched.insert(
            id,
            Watched {
                record: record.clone(),
                transport,
            },
        );
        record
    }

    /// Stop watching a connection. Returns whether it was being watched.
    pub fn deregister(&self, id: &str) -> bool {
        let removed = self.watched.remove(id).is_some();
        if removed {
            debug!(connection = id, "liveness watch stopped");
        }
        removed
    }

    /// Record inbound traffic of any kind for a connection.
    pub fn observe_traffic(&self, id: &str) {
        if let Some(watched) = self.watched.get(id) {
            watched.record.observe_inbound();
        }
    }

    /// Record a pong for a connection.
    pub fn observe_pong(&self, id: &str) {
        if let Some(watched) = self.watched.get(id) {
            watched.record.observe_pong();
        }
    }

    /// Number of connections currently watched.
    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    /// Remaining retry budget of a watched connection.
    pub fn retries_remaining(&self, id: &str) -> Option<u32> {
        self.watched.get(id).map(|w| w.record.retries_remaining())
    }

    /// Run one probe sweep over every watched connection.
    pub async fn tick(&self) {
        sweep(&self.config, &self.watched).await;
    }

    /// Start the periodic tick loop. Stops when [`LivenessMonitor::stop`]
    /// is called.
    pub fn spawn(&self) -> JoinHandle<()> {
        let config = self.config.clone();
        let watched = self.watched.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(config.ping_interval_secs));
            // Skip the immediate first tick
            let _ = interval.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => sweep(&config, &watched).await,
                }
            }
            info!("liveness monitor stopped");
        })
    }

    /// Stop the tick loop. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// One sweep: snapshot the watch map, then probe every connection on its
/// own task so a slow transport cannot stall the others. A connection
/// that deregisters mid-sweep is simply skipped by its probe.
async fn sweep(config: &LivenessConfig, watched: &WatchMap) {
    let snapshot: Vec<(String, Arc<ConnectionLiveness>, Arc<dyn ProbeTransport>)> = watched
        .iter()
        .map(|entry| {
            (
                entry.key().clone(),
                entry.value().record.clone(),
                entry.value().transport.clone(),
            )
        })
        .collect();

    let idle_timeout = Duration::from_secs(config.idle_timeout_secs);
    let probes: Vec<JoinHandle<()>> = snapshot
        .into_iter()
        .map(|(id, record, transport)| {
            let watched = watched.clone();
            tokio::spawn(async move {
                probe(&watched, idle_timeout, &id, &record, transport.as_ref()).await;
            })
        })
        .collect();

    for handle in probes {
        if handle.await.is_err() {
            warn!("probe task failed");
        }
    }
}

/// Probe one connection, in order: the idle-timeout backstop, the
/// exhausted retry budget, then the probe itself. A dispatched ping
/// optimistically restores the budget; the pong (or any other inbound
/// traffic) is the true confirmation.
async fn probe(
    watched: &DashMap<String, Watched>,
    idle_timeout: Duration,
    id: &str,
    record: &ConnectionLiveness,
    transport: &dyn ProbeTransport,
) {
    let idle = record.idle_for();
    if idle >= idle_timeout {
        evict(watched, id, &format!("idle for {}s", idle.as_secs())).await;
        return;
    }

    if record.retries_remaining() == 0 {
        evict(watched, id, "unresponsive, retry budget exhausted").await;
        return;
    }

    if transport.is_open() {
        if transport.send_ping().await {
            record.record_ping();
            record.reset_retries();
            counter!("bridge_liveness_pings_total").increment(1);
        } else {
            let remaining = record.decrement_retries();
            debug!(connection = id, remaining, "ping send failed");
        }
    } else {
        let remaining = record.decrement_retries();
        debug!(connection = id, remaining, "transport closed, no ping sent");
    }
}

/// Remove and close a connection. The close is allowed to fail (the
/// transport may already be gone) without disturbing anything else.
async fn evict(watched: &DashMap<String, Watched>, id: &str, why: &str) {
    let Some((_, entry)) = watched.remove(id) else {
        // Deregistered between snapshot and probe.
        return;
    };
    let reason = format!("connection {id} evicted: {why}");
    warn!(connection = id, why, "evicting connection");
    if !entry.transport.close(&reason).await {
        debug!(connection = id, "close failed on eviction (already gone)");
    }
    counter!("bridge_liveness_evictions_total").increment(1);
}

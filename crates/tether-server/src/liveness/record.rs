//! Per-connection responsiveness state.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Responsiveness record for one long-lived connection.
///
/// The retry counter only decreases on the probe path and only resets on
/// observed liveness evidence; it never goes below zero. Reaching zero is
/// the eviction trigger.
pub struct ConnectionLiveness {
    id: String,
    max_retries: u32,
    retries_remaining: AtomicU32,
    last_ping_at: Mutex<Option<Instant>>,
    last_pong_at: Mutex<Option<Instant>>,
    last_inbound_at: Mutex<Instant>,
}

impl ConnectionLiveness {
    /// Create a fresh record with a full retry budget.
    pub fn new(id: impl Into<String>, max_retries: u32) -> Self {
        Self {
            id: id.into(),
            max_retries,
            retries_remaining: AtomicU32::new(max_retries),
            last_ping_at: Mutex::new(None),
            last_pong_at: Mutex::new(None),
            last_inbound_at: Mutex::new(Instant::now()),
        }
    }

    /// The connection this record belongs to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remaining retry budget.
    pub fn retries_remaining(&self) -> u32 {
        self.retries_remaining.load(Ordering::Acquire)
    }

    /// Reset the retry budget to the configured maximum.
    pub fn reset_retries(&self) {
        self.retries_remaining.store(self.max_retries, Ordering::Release);
    }

    /// Burn one retry, saturating at zero. Returns the remaining budget.
    pub fn decrement_retries(&self) -> u32 {
        self.retries_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1))
            .map_or(0, |previous| previous - 1)
    }

    /// Record inbound traffic of any kind: resets the retry budget and the
    /// idle clock. This is the only path out of an eviction trajectory.
    pub fn observe_inbound(&self) {
        self.reset_retries();
        *self.last_inbound_at.lock() = Instant::now();
    }

    /// Record a pong (also counts as inbound traffic).
    pub fn observe_pong(&self) {
        self.observe_inbound();
        *self.last_pong_at.lock() = Some(Instant::now());
    }

    /// Record that a probe ping was sent.
    pub fn record_ping(&self) {
        *self.last_ping_at.lock() = Some(Instant::now());
    }

    /// Time since the last inbound traffic (or registration).
    pub fn idle_for(&self) -> Duration {
        self.last_inbound_at.lock().elapsed()
    }

    /// When the last probe ping was sent, if any.
    pub fn last_ping_at(&self) -> Option<Instant> {
        *self.last_ping_at.lock()
    }

    /// When the last pong arrived, if any.
    pub fn last_pong_at(&self) -> Option<Instant> {
        *self.last_pong_at.lock()
    }
}

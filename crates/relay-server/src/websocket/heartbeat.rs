//! Connection liveness tracking.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Activity marker shared between a socket's reader and its heartbeat task.
#[derive(Debug)]
pub struct Liveness {
    alive: AtomicBool,
    last_seen: Mutex<Instant>,
}

impl Liveness {
    /// Start out alive.
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Record inbound activity (any frame, including pongs).
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Whether there was activity since the last check; resets the flag.
    pub fn check_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The peer stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Watch a connection's liveness.
///
/// At each `interval` tick the alive flag is checked. After
/// `timeout / interval` consecutive silent ticks (at least one) the
/// connection is reported dead.
pub async fn run_heartbeat(
    liveness: Arc<Liveness>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    // Skip the immediate first tick
    let _ = check_interval.tick().await;
    let max_missed = (timeout.as_millis() / interval.as_millis().max(1)).max(1);
    let mut missed: u128 = 0;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if liveness.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }
    }
}

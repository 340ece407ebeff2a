// SPDX-License-Identifier: MIT OR Apache-2.0
//! The per-request harakiri watchdog.
//!
//! A worker handles one request at a time. The watchdog task checks the
//! in-flight marker twice a second; once a single request has been
//! processing for longer than the configured timeout, it logs what was
//! running and exits the process with [`EXIT_HARAKIRI`] so the
//! supervisor (or the orchestrator) respawns a fresh worker. A handler
//! stuck in a blocking call cannot be unwound safely from the outside,
//! so process death is the recovery mechanism.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;

/// Exit code distinguishing a harakiri death from a crash.
pub const EXIT_HARAKIRI: i32 = 70;

struct WatchdogState {
    /// Epoch milliseconds when the current request began; 0 when idle.
    busy_since_ms: AtomicU64,
    request_id: AtomicU64,
}

/// Handle to the running watchdog. Dropping it stops the watchdog task.
pub struct Harakiri {
    state: Arc<WatchdogState>,
    task: JoinHandle<()>,
}

impl Harakiri {
    /// Start the watchdog. Returns `None` when `timeout` is zero (the
    /// watchdog is disabled).
    #[must_use]
    pub fn start(timeout: Duration) -> Option<Self> {
        if timeout.is_zero() {
            return None;
        }
        let state = Arc::new(WatchdogState {
            busy_since_ms: AtomicU64::new(0),
            request_id: AtomicU64::new(0),
        });
        let watched = Arc::clone(&state);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(500));
            loop {
                ticker.tick().await;
                let busy_since = watched.busy_since_ms.load(Ordering::Acquire);
                if busy_since == 0 {
                    continue;
                }
                let elapsed_ms = now_ms().saturating_sub(busy_since);
                if elapsed_ms > timeout.as_millis() as u64 {
                    tracing::error!(
                        target: "courier.server",
                        request_id = watched.request_id.load(Ordering::Acquire),
                        elapsed_ms,
                        timeout_s = timeout.as_secs(),
                        "harakiri: request exceeded the processing timeout, worker exiting"
                    );
                    std::process::exit(EXIT_HARAKIRI);
                }
            }
        });
        Some(Self { state, task })
    }

    /// Mark a request as in flight.
    pub fn begin(&self, request_id: u64) {
        self.state.request_id.store(request_id, Ordering::Release);
        self.state
            .busy_since_ms
            .store(now_ms().max(1), Ordering::Release);
    }

    /// Mark the worker idle again.
    pub fn end(&self) {
        self.state.busy_since_ms.store(0, Ordering::Release);
    }
}

impl Drop for Harakiri {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! The forking supervisor: spawn N workers, respawn crashes within a
//! budget, forward signals, escalate on a stuck shutdown.
//!
//! Workers are re-executions of the current binary with the fork index
//! in [`FORK_ID_ENV`]; a child process that sees the variable runs the
//! worker path regardless of `--fork`. The crash budget terminates the
//! whole group when workers die faster than at most 3 crashes in any
//! 15-second window or 8 in any 60-second window.

#![allow(unsafe_code)] // one libc::kill call to forward SIGTERM to children

use std::collections::VecDeque;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::Instant;

/// Environment variable carrying a worker's fork index (1-based).
pub const FORK_ID_ENV: &str = "COURIER_FORK_ID";

/// Exit code when the crash budget is exceeded.
pub const EXIT_CRASH_BUDGET: i32 = 1;

const CRASH_WINDOW_SHORT: Duration = Duration::from_secs(15);
const CRASH_WINDOW_LONG: Duration = Duration::from_secs(60);
const CRASH_LIMIT_SHORT: usize = 3;
const CRASH_LIMIT_LONG: usize = 8;

/// The fork index this process was spawned with, if any.
#[must_use]
pub fn fork_id_from_env() -> Option<u32> {
    std::env::var(FORK_ID_ENV).ok()?.parse().ok()
}

/// Supervisor behavior knobs.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Number of workers to fork.
    pub fork_count: u32,
    /// Respawn crashed workers (subject to the crash budget).
    pub respawn: bool,
    /// Seconds to wait for graceful worker exit before SIGKILL.
    pub shutdown_grace: u64,
}

struct Worker {
    fork_id: u32,
    child: Child,
}

struct CrashBudget {
    crashes: VecDeque<Instant>,
}

impl CrashBudget {
    fn new() -> Self {
        Self {
            crashes: VecDeque::new(),
        }
    }

    /// Record a crash; returns `true` when the budget is exceeded.
    fn record(&mut self, now: Instant) -> bool {
        self.crashes.push_back(now);
        while let Some(&front) = self.crashes.front() {
            if now.duration_since(front) > CRASH_WINDOW_LONG {
                self.crashes.pop_front();
            } else {
                break;
            }
        }
        let recent = self
            .crashes
            .iter()
            .filter(|&&t| now.duration_since(t) <= CRASH_WINDOW_SHORT)
            .count();
        recent > CRASH_LIMIT_SHORT || self.crashes.len() > CRASH_LIMIT_LONG
    }
}

fn spawn_worker(fork_id: u32) -> std::io::Result<Worker> {
    let exe = std::env::current_exe()?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let child = Command::new(exe)
        .args(&args)
        .env(FORK_ID_ENV, fork_id.to_string())
        .spawn()?;
    tracing::info!(
        target: "courier.server",
        fork_id,
        pid = child.id(),
        "worker spawned"
    );
    Ok(Worker { fork_id, child })
}

fn forward_sigterm(worker: &Worker) {
    if let Some(pid) = worker.child.id() {
        // SAFETY: kill(2) with a valid pid and signal has no memory
        // safety implications.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            tracing::debug!(
                target: "courier.server",
                fork_id = worker.fork_id,
                pid,
                "SIGTERM forward failed (worker likely already gone)"
            );
        }
    }
}

/// Run the supervisor until every worker has exited. Returns the
/// process exit code.
///
/// # Errors
///
/// Returns the underlying I/O error when the initial workers cannot be
/// spawned or the signal handlers cannot be installed.
pub async fn run_supervisor(options: SupervisorOptions) -> std::io::Result<i32> {
    let mut workers = Vec::with_capacity(options.fork_count as usize);
    for fork_id in 1..=options.fork_count {
        workers.push(spawn_worker(fork_id)?);
    }
    tracing::info!(
        target: "courier.server",
        count = workers.len(),
        respawn = options.respawn,
        "supervisor running"
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut budget = CrashBudget::new();
    let mut shutdown_at: Option<Instant> = None;
    let mut budget_exceeded = false;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                shutdown_at.get_or_insert_with(Instant::now);
                tracing::info!(target: "courier.server", "forwarding SIGTERM to workers");
                for w in &workers {
                    forward_sigterm(w);
                }
            }
            _ = sigint.recv() => {
                shutdown_at.get_or_insert_with(Instant::now);
                tracing::info!(target: "courier.server", "forwarding SIGINT as SIGTERM to workers");
                for w in &workers {
                    forward_sigterm(w);
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                let shutting_down = shutdown_at.is_some();
                let mut still_running = Vec::new();
                for mut worker in workers.drain(..) {
                    match worker.child.try_wait() {
                        Ok(None) => still_running.push(worker),
                        Ok(Some(status)) => {
                            let clean = status.success();
                            tracing::info!(
                                target: "courier.server",
                                fork_id = worker.fork_id,
                                code = status.code(),
                                "worker exited"
                            );
                            if shutting_down || !options.respawn {
                                continue;
                            }
                            // Abnormal exits draw on the crash budget;
                            // clean exits (e.g. a file-watcher restart)
                            // respawn freely.
                            if !clean && budget.record(Instant::now()) {
                                tracing::error!(
                                    target: "courier.server",
                                    "crash budget exceeded, terminating the server group"
                                );
                                budget_exceeded = true;
                                shutdown_at = Some(Instant::now());
                                continue;
                            }
                            match spawn_worker(worker.fork_id) {
                                Ok(w) => still_running.push(w),
                                Err(e) => {
                                    tracing::error!(
                                        target: "courier.server",
                                        fork_id = worker.fork_id,
                                        error = %e,
                                        "failed to respawn worker"
                                    );
                                }
                            }
                        }
                        Err(e) => {
                            tracing::error!(
                                target: "courier.server",
                                fork_id = worker.fork_id,
                                error = %e,
                                "failed to poll worker"
                            );
                            still_running.push(worker);
                        }
                    }
                }
                workers = still_running;

                if budget_exceeded {
                    for w in &workers {
                        forward_sigterm(w);
                    }
                }
                if let Some(since) = shutdown_at {
                    if workers.is_empty() {
                        return Ok(if budget_exceeded { EXIT_CRASH_BUDGET } else { 0 });
                    }
                    if since.elapsed() > Duration::from_secs(options.shutdown_grace) {
                        tracing::warn!(
                            target: "courier.server",
                            remaining = workers.len(),
                            "shutdown grace expired, killing remaining workers"
                        );
                        for w in &mut workers {
                            let _ = w.child.start_kill();
                        }
                    }
                } else if workers.is_empty() {
                    // All workers exited cleanly on their own.
                    return Ok(0);
                }
            }
        }
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Auto-reload: poll watched paths for changes and trigger a graceful
//! shutdown so the supervisor respawns the worker with fresh code.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use walkdir::WalkDir;

use crate::ShutdownHandle;

fn scan(paths: &[PathBuf]) -> BTreeMap<PathBuf, SystemTime> {
    let mut seen = BTreeMap::new();
    for root in paths {
        for entry in WalkDir::new(root).follow_links(false).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if let Ok(mtime) = meta.modified() {
                    seen.insert(entry.into_path(), mtime);
                }
            }
        }
    }
    seen
}

/// Watch `paths` (files or directory trees), comparing modification
/// times every `interval`. The first observed change requests a
/// graceful shutdown and the watcher stops.
pub fn spawn_watcher(
    paths: Vec<PathBuf>,
    interval: Duration,
    shutdown: ShutdownHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let baseline = scan(&paths);
        tracing::info!(
            target: "courier.server",
            files = baseline.len(),
            paths = ?paths,
            "file watcher running"
        );
        loop {
            tokio::time::sleep(interval).await;
            if shutdown.is_shutting_down() {
                return;
            }
            let current = scan(&paths);
            if current != baseline {
                tracing::info!(
                    target: "courier.server",
                    "watched files changed, requesting restart"
                );
                shutdown.request();
                return;
            }
        }
    })
}

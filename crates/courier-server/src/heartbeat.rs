// SPDX-License-Identifier: MIT OR Apache-2.0
//! The worker liveness file.
//!
//! The file holds an ASCII decimal epoch, rewritten after every handled
//! request and every idle period. The path template may reference
//! `{pid}` and `{fid}` (the fork index) so each worker in a group gets
//! its own file. Created on start, deleted on clean exit.

use std::io;
use std::path::PathBuf;

use courier_core::transport::unix_now;

/// A created heartbeat file.
#[derive(Debug)]
pub struct Heartbeat {
    path: PathBuf,
}

/// Expand `{pid}` and `{fid}` in a heartbeat path template. A worker
/// with no fork index expands `{fid}` to `0`.
#[must_use]
pub fn resolve_heartbeat_path(template: &str, fork_id: Option<u32>) -> PathBuf {
    let expanded = template
        .replace("{pid}", &std::process::id().to_string())
        .replace("{fid}", &fork_id.unwrap_or(0).to_string());
    PathBuf::from(expanded)
}

impl Heartbeat {
    /// Create the file and write the first beat.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the file cannot be written.
    pub fn create(template: &str, fork_id: Option<u32>) -> io::Result<Self> {
        let path = resolve_heartbeat_path(template, fork_id);
        std::fs::write(&path, unix_now().to_string())?;
        tracing::debug!(
            target: "courier.server",
            path = %path.display(),
            "heartbeat file created"
        );
        Ok(Self { path })
    }

    /// The resolved file path.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Rewrite the epoch. Failures are logged, not fatal; a missing
    /// heartbeat is the orchestrator's signal, not the worker's.
    pub fn tick(&self) {
        if let Err(e) = std::fs::write(&self.path, unix_now().to_string()) {
            tracing::warn!(
                target: "courier.server",
                path = %self.path.display(),
                error = %e,
                "failed to update heartbeat file"
            );
        }
    }

    /// Delete the file on clean shutdown.
    pub fn remove(self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(
                target: "courier.server",
                path = %self.path.display(),
                error = %e,
                "failed to remove heartbeat file"
            );
        }
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! The server command-line surface, reusable by service binaries.
//!
//! A service binary parses [`ServerArgs`], registers its actions, and
//! hands both to [`run_from_args`], which loads settings, decides
//! between supervisor and worker mode, installs signal handling and the
//! optional file watcher, and runs the worker loop to completion.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use courier_config::{load_server_config, resolve_settings_path, ServerConfig};
use tokio::signal::unix::{signal, SignalKind};

use crate::action::ActionRecord;
use crate::middleware::ServerMiddleware;
use crate::supervisor::{self, SupervisorOptions};
use crate::watcher;
use crate::{Server, ServerHooks, ShutdownHandle};

/// Exit code for unusable settings.
pub const EXIT_BAD_SETTINGS: i32 = 78;

/// Command-line arguments for a Courier service worker.
#[derive(Parser, Debug)]
#[command(name = "courier-server", version, about = "Run a Courier service worker")]
pub struct ServerArgs {
    /// Path to the TOML settings file; defaults to $COURIER_SETTINGS.
    #[arg(long, env = "COURIER_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Number of worker processes.
    #[arg(long, default_value_t = 1)]
    pub fork: u32,

    /// Disable crash respawn of forked workers.
    #[arg(long)]
    pub no_respawn: bool,

    /// Watch these paths and restart the worker when they change.
    #[arg(long = "use-file-watcher", value_name = "PATH", num_args = 1..)]
    pub use_file_watcher: Vec<PathBuf>,
}

/// Load settings, pick supervisor or worker mode, and run to exit.
/// Returns the process exit code.
pub async fn run_from_args(
    args: ServerArgs,
    actions: Vec<ActionRecord>,
    middleware: Vec<Arc<dyn ServerMiddleware>>,
    hooks: Option<Arc<dyn ServerHooks>>,
) -> i32 {
    let path = match resolve_settings_path(args.settings.as_deref()) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(target: "courier.server", error = %e, "no usable settings");
            return EXIT_BAD_SETTINGS;
        }
    };
    let config = match load_server_config(&path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(
                target: "courier.server",
                path = %path.display(),
                error = %e,
                "failed to load settings"
            );
            return EXIT_BAD_SETTINGS;
        }
    };

    let fork_id = supervisor::fork_id_from_env();
    if fork_id.is_none() && args.fork > 1 {
        if let Some(hooks) = &hooks {
            hooks.pre_fork();
        }
        let options = SupervisorOptions {
            fork_count: args.fork,
            respawn: !args.no_respawn,
            shutdown_grace: config.server.harakiri.shutdown_grace,
        };
        return match supervisor::run_supervisor(options).await {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(target: "courier.server", error = %e, "supervisor failed");
                1
            }
        };
    }

    run_worker(config, fork_id, args.use_file_watcher, actions, middleware, hooks).await
}

async fn run_worker(
    config: ServerConfig,
    fork_id: Option<u32>,
    watch_paths: Vec<PathBuf>,
    actions: Vec<ActionRecord>,
    middleware: Vec<Arc<dyn ServerMiddleware>>,
    hooks: Option<Arc<dyn ServerHooks>>,
) -> i32 {
    let transport = match config
        .transport
        .build_server_transport(&config.service_name)
        .await
    {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(
                target: "courier.server",
                service = %config.service_name,
                error = %e,
                "failed to connect transport"
            );
            return 1;
        }
    };

    let mut server = Server::new(config.service_name.as_str(), config.server.clone(), transport);
    server.set_fork_id(fork_id);
    for record in actions {
        server.register_action(record);
    }
    server.add_middleware(Arc::new(
        crate::middleware::RequestLoggingMiddleware::new(config.server.sensitive_fields.clone()),
    ));
    for m in middleware {
        server.add_middleware(m);
    }
    if let Some(hooks) = hooks {
        server.set_hooks(hooks);
    }
    if let Some(client_config) = &config.client {
        server.set_client(client_config.build_client(Vec::new()));
    }

    let shutdown = server.shutdown_handle();
    spawn_signal_listener(shutdown.clone());
    if !watch_paths.is_empty() {
        watcher::spawn_watcher(
            watch_paths,
            Duration::from_secs(config.server.watcher_poll_interval.max(1)),
            shutdown,
        );
    }

    match server.run().await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(target: "courier.server", error = %e, "server failed");
            1
        }
    }
}

/// Install SIGTERM/SIGINT handling: the first signal requests graceful
/// shutdown, a second exits immediately. The underlying flag swap makes
/// the handler idempotent under concurrent delivery.
pub fn spawn_signal_listener(shutdown: ShutdownHandle) {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(target: "courier.server", error = %e, "cannot install SIGTERM handler");
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(target: "courier.server", error = %e, "cannot install SIGINT handler");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = sigint.recv() => {}
            }
            if shutdown.request() {
                tracing::info!(
                    target: "courier.server",
                    "shutdown requested, finishing current work"
                );
            } else {
                tracing::warn!(
                    target: "courier.server",
                    "second signal received, exiting immediately"
                );
                std::process::exit(1);
            }
        }
    });
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lifecycle tests: heartbeat file, shutdown flag, hooks, and the file
//! watcher.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_config::ServerRuntimeSettings;
use courier_core::transport::{MessageMeta, ReceivedRequest, ServerTransport};
use courier_core::{JobResponse, ReceiveError, SendError};
use courier_server::heartbeat::{resolve_heartbeat_path, Heartbeat};
use courier_server::watcher::spawn_watcher;
use courier_server::{Server, ServerHooks, ShutdownHandle};

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

#[test]
fn heartbeat_path_expands_pid_and_fid() {
    let path = resolve_heartbeat_path("/tmp/worker-{pid}-{fid}.heartbeat", Some(3));
    let s = path.to_string_lossy();
    assert!(s.contains(&std::process::id().to_string()));
    assert!(s.ends_with("-3.heartbeat"));

    let solo = resolve_heartbeat_path("/tmp/worker-{fid}.heartbeat", None);
    assert!(solo.to_string_lossy().ends_with("worker-0.heartbeat"));
}

#[test]
fn heartbeat_writes_ascii_epoch_and_removes_on_drop() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("beat-{pid}.txt");
    let hb = Heartbeat::create(template.to_str().unwrap(), None).unwrap();
    let path = hb.path().to_owned();

    let first: u64 = std::fs::read_to_string(&path).unwrap().parse().unwrap();
    assert!(first > 1_600_000_000, "content must be an epoch timestamp");
    hb.tick();
    let second: u64 = std::fs::read_to_string(&path).unwrap().parse().unwrap();
    assert!(second >= first);

    hb.remove();
    assert!(!path.exists());
}

// ---------------------------------------------------------------------------
// Shutdown flag
// ---------------------------------------------------------------------------

#[test]
fn first_shutdown_request_wins_subsequent_ones_report_in_progress() {
    let handle = ShutdownHandle::default();
    assert!(!handle.is_shutting_down());
    assert!(handle.request(), "first request returns true");
    assert!(!handle.request(), "second request returns false");
    assert!(handle.is_shutting_down());
}

// ---------------------------------------------------------------------------
// Hooks around the run loop
// ---------------------------------------------------------------------------

struct CountingHooks {
    setup: AtomicUsize,
    teardown: AtomicUsize,
    idle: AtomicUsize,
    pre: AtomicUsize,
    post: AtomicUsize,
}

impl CountingHooks {
    fn new() -> Self {
        Self {
            setup: AtomicUsize::new(0),
            teardown: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            pre: AtomicUsize::new(0),
            post: AtomicUsize::new(0),
        }
    }
}

impl ServerHooks for CountingHooks {
    fn setup(&self) {
        self.setup.fetch_add(1, Ordering::SeqCst);
    }
    fn teardown(&self) {
        self.teardown.fetch_add(1, Ordering::SeqCst);
    }
    fn perform_idle_actions(&self) {
        self.idle.fetch_add(1, Ordering::SeqCst);
    }
    fn perform_pre_request_actions(&self) {
        self.pre.fetch_add(1, Ordering::SeqCst);
    }
    fn perform_post_request_actions(&self) {
        self.post.fetch_add(1, Ordering::SeqCst);
    }
}

/// Yields one idle receive, then one request, then requests shutdown.
struct OneShotTransport {
    step: AtomicUsize,
    shutdown: std::sync::Mutex<Option<ShutdownHandle>>,
}

#[async_trait]
impl ServerTransport for OneShotTransport {
    async fn receive_request_message(
        &self,
        _timeout: Duration,
    ) -> Result<Option<ReceivedRequest>, ReceiveError> {
        match self.step.fetch_add(1, Ordering::SeqCst) {
            0 => Ok(None),
            1 => {
                let mut job = courier_core::JobRequest::new(vec![
                    courier_core::ActionRequest::new("status"),
                ]);
                job.context = courier_core::Context::new("corr");
                Ok(Some(ReceivedRequest {
                    request_id: 1,
                    meta: MessageMeta {
                        reply_to: Some("service:example.t!".into()),
                        ..MessageMeta::default()
                    },
                    body: job.to_value(),
                }))
            }
            _ => {
                if let Some(handle) = self.shutdown.lock().unwrap().as_ref() {
                    handle.request();
                }
                Ok(None)
            }
        }
    }

    async fn send_response_message(
        &self,
        _request_id: u64,
        _meta: &MessageMeta,
        _body: &JobResponse,
    ) -> Result<(), SendError> {
        Ok(())
    }
}

#[tokio::test]
async fn hooks_fire_around_idle_and_request_handling() {
    let transport = Arc::new(OneShotTransport {
        step: AtomicUsize::new(0),
        shutdown: std::sync::Mutex::new(None),
    });
    let hooks = Arc::new(CountingHooks::new());

    let mut server = Server::new(
        "example",
        ServerRuntimeSettings {
            receive_timeout: 1,
            harakiri: courier_config::HarakiriSettings {
                timeout: 0,
                shutdown_grace: 1,
            },
            ..ServerRuntimeSettings::default()
        },
        Arc::clone(&transport) as Arc<dyn ServerTransport>,
    );
    server.set_hooks(Arc::clone(&hooks) as Arc<dyn ServerHooks>);
    *transport.shutdown.lock().unwrap() = Some(server.shutdown_handle());

    server.run().await.unwrap();

    assert_eq!(hooks.setup.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.teardown.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.pre.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.post.load(Ordering::SeqCst), 1);
    assert!(hooks.idle.load(Ordering::SeqCst) >= 1);
}

// ---------------------------------------------------------------------------
// File watcher
// ---------------------------------------------------------------------------

#[tokio::test]
async fn watcher_requests_shutdown_when_a_file_changes() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("module.rs");
    std::fs::write(&file, "fn main() {}").unwrap();

    let shutdown = ShutdownHandle::default();
    let task = spawn_watcher(
        vec![dir.path().to_owned()],
        Duration::from_millis(20),
        shutdown.clone(),
    );

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(!shutdown.is_shutting_down());

    std::fs::write(&file, "fn main() { /* changed */ }").unwrap();
    task.await.unwrap();
    assert!(shutdown.is_shutting_down());
}

#[tokio::test]
async fn watcher_stays_quiet_when_nothing_changes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("module.rs"), "fn main() {}").unwrap();

    let shutdown = ShutdownHandle::default();
    let _task = spawn_watcher(
        vec![dir.path().to_owned()],
        Duration::from_millis(10),
        shutdown.clone(),
    );
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!shutdown.is_shutting_down());
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Queue-discipline tests for the Redis Gateway transport, run against
//! an in-process mock of the list primitives so no broker is required.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_core::model::{ActionRequest, ActionResponse, JobRequest, JobResponse};
use courier_core::transport::MessageMeta;
use courier_core::value::{Map, Value};
use courier_core::{ClientTransport, SendError, ServerTransport};
use courier_protocol::Envelope;
use courier_redis::{
    ingress_key, ListOps, RedisClientTransport, RedisOpError, RedisServerTransport,
    RedisTransportSettings,
};
use courier_serde::{MsgpackSerializer, Serializer};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Mock backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockBackend {
    lists: std::sync::Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    rpush_count: AtomicUsize,
    llen_count: AtomicUsize,
}

impl MockBackend {
    fn push_raw(&self, key: &str, value: Vec<u8>) {
        self.lists
            .lock()
            .unwrap()
            .entry(key.to_owned())
            .or_default()
            .push_back(value);
    }

    fn peek_raw(&self, key: &str) -> Vec<Vec<u8>> {
        self.lists
            .lock()
            .unwrap()
            .get(key)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ListOps for MockBackend {
    async fn rpush(&self, key: &str, value: Vec<u8>) -> Result<(), RedisOpError> {
        self.rpush_count.fetch_add(1, Ordering::SeqCst);
        self.push_raw(key, value);
        Ok(())
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>, RedisOpError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(v) = self
                .lists
                .lock()
                .unwrap()
                .get_mut(key)
                .and_then(VecDeque::pop_front)
            {
                return Ok(Some(v));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    async fn llen(&self, key: &str) -> Result<usize, RedisOpError> {
        self.llen_count.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lists
            .lock()
            .unwrap()
            .get(key)
            .map_or(0, VecDeque::len))
    }

    async fn expire(&self, _key: &str, _seconds: u64) -> Result<(), RedisOpError> {
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RedisOpError> {
        self.lists.lock().unwrap().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn square_job(n: i64) -> JobRequest {
    let mut body = Map::new();
    body.insert("number".into(), Value::Int(n));
    JobRequest::new(vec![ActionRequest::with_body("square", Value::Map(body))])
}

fn square_response(n: i64) -> JobResponse {
    let mut body = Map::new();
    body.insert("square".into(), Value::Int(n * n));
    JobResponse {
        actions: vec![ActionResponse::new("square", Value::Map(body))],
        context: Map::new(),
        errors: vec![],
    }
}

fn pair(
    backend: &Arc<MockBackend>,
    client_settings: RedisTransportSettings,
    server_settings: RedisTransportSettings,
) -> (RedisClientTransport, RedisServerTransport) {
    let client = RedisClientTransport::new(
        "example",
        Arc::clone(backend) as Arc<dyn ListOps>,
        client_settings,
    )
    .unwrap();
    let server = RedisServerTransport::new(
        "example",
        Arc::clone(backend) as Arc<dyn ListOps>,
        server_settings,
    )
    .unwrap();
    (client, server)
}

// ---------------------------------------------------------------------------
// Round trip
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_response_round_trip() {
    let backend = Arc::new(MockBackend::default());
    let (client, server) = pair(
        &backend,
        RedisTransportSettings::default(),
        RedisTransportSettings::for_server(),
    );

    client
        .send_request_message(7, MessageMeta::default(), &square_job(7))
        .await
        .unwrap();

    let received = server
        .receive_request_message(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("server should see the request");
    assert_eq!(received.request_id, 7);
    assert_eq!(received.meta.protocol_version, Some(3));
    let job = JobRequest::from_value(received.body).unwrap();
    assert_eq!(job.actions[0].action, "square");

    server
        .send_response_message(7, &received.meta, &square_response(7))
        .await
        .unwrap();

    let response = client
        .receive_response_message(Duration::from_secs(1))
        .await
        .unwrap()
        .expect("client should see the response");
    assert_eq!(response.request_id, 7);
    assert_eq!(
        response.body.actions[0]
            .body
            .as_ref()
            .and_then(|b| b.get("square"))
            .and_then(Value::as_i64),
        Some(49)
    );
    // Response envelopes never name a reply-to queue.
    assert_eq!(response.meta.reply_to, None);
}

#[tokio::test]
async fn empty_queue_receive_returns_none() {
    let backend = Arc::new(MockBackend::default());
    let (_client, server) = pair(
        &backend,
        RedisTransportSettings::default(),
        RedisTransportSettings::for_server(),
    );
    let got = server
        .receive_request_message(Duration::from_millis(50))
        .await
        .unwrap();
    assert!(got.is_none());
}

// ---------------------------------------------------------------------------
// Queue capacity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queue_full_retries_then_fails() {
    let backend = Arc::new(MockBackend::default());
    backend.push_raw(&ingress_key("example"), b"occupied".to_vec());

    let settings = RedisTransportSettings {
        queue_capacity: 1,
        queue_full_retries: 2,
        ..RedisTransportSettings::default()
    };
    let (client, _server) = pair(&backend, settings, RedisTransportSettings::for_server());

    let err = client
        .send_request_message(1, MessageMeta::default(), &square_job(1))
        .await
        .unwrap_err();
    match err {
        SendError::QueueFull { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected QueueFull, got {other}"),
    }
    // Three capacity checks, no request ever pushed.
    assert_eq!(backend.llen_count.load(Ordering::SeqCst), 3);
    assert_eq!(backend.rpush_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn queue_drains_between_retries_and_send_succeeds() {
    let backend = Arc::new(MockBackend::default());
    backend.push_raw(&ingress_key("example"), b"occupied".to_vec());

    let settings = RedisTransportSettings {
        queue_capacity: 1,
        queue_full_retries: 5,
        ..RedisTransportSettings::default()
    };
    let (client, _server) = pair(&backend, settings, RedisTransportSettings::for_server());

    let drainer = {
        let backend = Arc::clone(&backend);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            backend
                .lists
                .lock()
                .unwrap()
                .get_mut(&ingress_key("example"))
                .unwrap()
                .clear();
        })
    };

    client
        .send_request_message(1, MessageMeta::default(), &square_job(1))
        .await
        .unwrap();
    drainer.await.unwrap();
    assert_eq!(backend.rpush_count.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Sizes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_request_fails_before_any_broker_call() {
    let backend = Arc::new(MockBackend::default());
    let settings = RedisTransportSettings {
        maximum_message_size_in_bytes: 64,
        ..RedisTransportSettings::default()
    };
    let (client, _server) = pair(&backend, settings, RedisTransportSettings::for_server());

    let mut body = Map::new();
    body.insert("blob".into(), Value::from("x".repeat(500)));
    let job = JobRequest::new(vec![ActionRequest::with_body("store", Value::Map(body))]);

    let err = client
        .send_request_message(1, MessageMeta::default(), &job)
        .await
        .unwrap_err();
    assert!(matches!(err, SendError::TooLarge { .. }));
    assert_eq!(backend.llen_count.load(Ordering::SeqCst), 0);
    assert_eq!(backend.rpush_count.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Expiry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_request_is_discarded_silently() {
    let backend = Arc::new(MockBackend::default());
    let (_client, server) = pair(
        &backend,
        RedisTransportSettings::default(),
        RedisTransportSettings::for_server(),
    );

    let expired = Envelope::new(
        9,
        MessageMeta {
            reply_to: Some("service:example.dead!".into()),
            expiry: Some(1),
            ..MessageMeta::default()
        },
        square_job(3).to_value(),
    );
    let bytes = MsgpackSerializer.encode(&expired.to_value()).unwrap();
    backend.push_raw(&ingress_key("example"), bytes);

    let got = server
        .receive_request_message(Duration::from_millis(100))
        .await
        .unwrap();
    assert!(got.is_none(), "expired message must never surface");
    assert!(backend.peek_raw(&ingress_key("example")).is_empty());
}

// ---------------------------------------------------------------------------
// Suppressed responses
// ---------------------------------------------------------------------------

#[tokio::test]
async fn suppressed_response_never_names_a_reply_queue() {
    let backend = Arc::new(MockBackend::default());
    let (client, server) = pair(
        &backend,
        RedisTransportSettings::default(),
        RedisTransportSettings::for_server(),
    );

    let mut job = square_job(2);
    job.control.suppress_response = true;
    client
        .send_request_message(3, MessageMeta::default(), &job)
        .await
        .unwrap();

    let received = server
        .receive_request_message(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.meta.reply_to, None);

    // Answering anyway is a hard error, not a silent misroute.
    let err = server
        .send_response_message(3, &received.meta, &square_response(2))
        .await
        .unwrap_err();
    assert!(matches!(err, SendError::Other(_)));
}

// ---------------------------------------------------------------------------
// Chunked responses
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_response_is_chunked_for_v3_and_reassembled() {
    let backend = Arc::new(MockBackend::default());
    let server_settings = RedisTransportSettings {
        chunk_messages_larger_than_bytes: Some(128),
        ..RedisTransportSettings::for_server()
    };
    let (client, server) = pair(&backend, RedisTransportSettings::default(), server_settings);

    client
        .send_request_message(11, MessageMeta::default(), &square_job(1))
        .await
        .unwrap();
    let received = server
        .receive_request_message(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();

    let mut big_body = Map::new();
    big_body.insert("blob".into(), Value::from("z".repeat(1500)));
    let big = JobResponse {
        actions: vec![ActionResponse::new("square", Value::Map(big_body))],
        context: Map::new(),
        errors: vec![],
    };
    let pushes_before = backend.rpush_count.load(Ordering::SeqCst);
    server
        .send_response_message(11, &received.meta, &big)
        .await
        .unwrap();
    let chunk_pushes = backend.rpush_count.load(Ordering::SeqCst) - pushes_before;
    assert!(chunk_pushes > 1, "response should have been chunked");

    let response = client
        .receive_response_message(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.request_id, 11);
    assert_eq!(response.body, big);
}

#[tokio::test]
async fn v2_peer_gets_too_large_instead_of_chunks() {
    let backend = Arc::new(MockBackend::default());
    let client_settings = RedisTransportSettings {
        protocol_version: 2,
        ..RedisTransportSettings::default()
    };
    let server_settings = RedisTransportSettings {
        chunk_messages_larger_than_bytes: Some(128),
        maximum_message_size_in_bytes: 256,
        ..RedisTransportSettings::for_server()
    };
    let (client, server) = pair(&backend, client_settings, server_settings);

    client
        .send_request_message(5, MessageMeta::default(), &square_job(1))
        .await
        .unwrap();
    let received = server
        .receive_request_message(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.meta.protocol_version, Some(2));

    let mut big_body = Map::new();
    big_body.insert("blob".into(), Value::from("z".repeat(1500)));
    let big = JobResponse {
        actions: vec![ActionResponse::new("square", Value::Map(big_body))],
        context: Map::new(),
        errors: vec![],
    };
    let err = server
        .send_response_message(5, &received.meta, &big)
        .await
        .unwrap_err();
    assert!(matches!(err, SendError::TooLarge { .. }));
}

// ---------------------------------------------------------------------------
// Protocol version 1
// ---------------------------------------------------------------------------

#[tokio::test]
async fn v1_peer_speaks_bare_frames_both_ways() {
    let backend = Arc::new(MockBackend::default());
    let client_settings = RedisTransportSettings {
        protocol_version: 1,
        ..RedisTransportSettings::default()
    };
    let (client, server) = pair(&backend, client_settings, RedisTransportSettings::for_server());

    client
        .send_request_message(21, MessageMeta::default(), &square_job(4))
        .await
        .unwrap();
    let raw = backend.peek_raw(&ingress_key("example"));
    assert!(!raw[0].starts_with(b"pysoa-redis/"), "v1 frames are bare");

    let received = server
        .receive_request_message(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.meta.protocol_version, Some(1));

    server
        .send_response_message(21, &received.meta, &square_response(4))
        .await
        .unwrap();
    let reply_raw = backend.peek_raw(client.reply_queue());
    assert!(!reply_raw[0].starts_with(b"pysoa-redis/"));

    let response = client
        .receive_response_message(Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.request_id, 21);
}

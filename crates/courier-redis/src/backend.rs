// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pluggable connection backends for the Redis Gateway.
//!
//! The gateway is written against [`ListOps`] — the five list
//! primitives the queue protocol needs — so the queue discipline can be
//! exercised against an in-process fake, and production deployments can
//! pick between a standalone endpoint, a master/replica pair, or a
//! Sentinel-managed master without touching the gateway.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::sentinel::{SentinelClient, SentinelServerType};
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::Mutex;

/// Failures from the broker connection layer.
#[derive(Debug, Error)]
pub enum RedisOpError {
    /// The connection could not be established or dropped mid-command.
    #[error("redis connection failure: {0}")]
    Connection(String),

    /// The broker answered with something the operation cannot use.
    #[error("unexpected redis response: {0}")]
    Response(String),
}

impl From<redis::RedisError> for RedisOpError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
            RedisOpError::Connection(e.to_string())
        } else {
            RedisOpError::Response(e.to_string())
        }
    }
}

/// The list primitives the queue protocol is built on.
#[async_trait]
pub trait ListOps: Send + Sync {
    /// Append a value to the tail of a list.
    async fn rpush(&self, key: &str, value: Vec<u8>) -> Result<(), RedisOpError>;

    /// Pop the head of a list, blocking up to `timeout`. `None` means
    /// the wait elapsed with the list still empty.
    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>, RedisOpError>;

    /// Current length of a list.
    async fn llen(&self, key: &str) -> Result<usize, RedisOpError>;

    /// Set a time-to-live on a key so a crashed consumer cannot leak
    /// state forever.
    async fn expire(&self, key: &str, seconds: u64) -> Result<(), RedisOpError>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> Result<(), RedisOpError>;
}

// ---------------------------------------------------------------------------
// Standalone
// ---------------------------------------------------------------------------

/// A single Redis endpoint behind an auto-reconnecting connection manager.
pub struct StandaloneBackend {
    manager: ConnectionManager,
}

impl StandaloneBackend {
    /// Connect to the endpoint named by `url`.
    ///
    /// # Errors
    ///
    /// Returns [`RedisOpError::Connection`] when the URL is invalid or
    /// the endpoint is unreachable.
    pub async fn connect(url: &str) -> Result<Self, RedisOpError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl ListOps for StandaloneBackend {
    async fn rpush(&self, key: &str, value: Vec<u8>) -> Result<(), RedisOpError> {
        let mut conn = self.manager.clone();
        conn.rpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>, RedisOpError> {
        let mut conn = self.manager.clone();
        let popped: Option<(String, Vec<u8>)> =
            conn.blpop(key, timeout.as_secs_f64()).await?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn llen(&self, key: &str) -> Result<usize, RedisOpError> {
        let mut conn = self.manager.clone();
        Ok(conn.llen(key).await?)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), RedisOpError> {
        let mut conn = self.manager.clone();
        conn.expire::<_, ()>(key, seconds as i64).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RedisOpError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Master + replicas
// ---------------------------------------------------------------------------

/// One master for every mutation and blocking pop; replicas serve only
/// list-inspection reads (`LLEN`), round-robined.
pub struct MasterReplicaBackend {
    master: ConnectionManager,
    replicas: Vec<ConnectionManager>,
    cursor: AtomicUsize,
}

impl MasterReplicaBackend {
    /// Connect the master and every replica.
    ///
    /// # Errors
    ///
    /// Returns [`RedisOpError::Connection`] if any endpoint is
    /// unreachable.
    pub async fn connect(master_url: &str, replica_urls: &[String]) -> Result<Self, RedisOpError> {
        let master = ConnectionManager::new(redis::Client::open(master_url)?).await?;
        let mut replicas = Vec::with_capacity(replica_urls.len());
        for url in replica_urls {
            replicas.push(ConnectionManager::new(redis::Client::open(url.as_str())?).await?);
        }
        Ok(Self {
            master,
            replicas,
            cursor: AtomicUsize::new(0),
        })
    }

    fn next_read_connection(&self) -> ConnectionManager {
        if self.replicas.is_empty() {
            return self.master.clone();
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.replicas.len();
        self.replicas[i].clone()
    }
}

#[async_trait]
impl ListOps for MasterReplicaBackend {
    async fn rpush(&self, key: &str, value: Vec<u8>) -> Result<(), RedisOpError> {
        let mut conn = self.master.clone();
        conn.rpush::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>, RedisOpError> {
        let mut conn = self.master.clone();
        let popped: Option<(String, Vec<u8>)> =
            conn.blpop(key, timeout.as_secs_f64()).await?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn llen(&self, key: &str) -> Result<usize, RedisOpError> {
        let mut conn = self.next_read_connection();
        Ok(conn.llen(key).await?)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), RedisOpError> {
        let mut conn = self.master.clone();
        conn.expire::<_, ()>(key, seconds as i64).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RedisOpError> {
        let mut conn = self.master.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sentinel
// ---------------------------------------------------------------------------

/// A Sentinel-managed master. The master connection is cached; on a
/// connection failure it is re-resolved through the Sentinels up to
/// `failover_retries` times with bounded backoff.
pub struct SentinelBackend {
    client: Mutex<SentinelClient>,
    cached: Mutex<Option<MultiplexedConnection>>,
    failover_retries: u32,
}

impl SentinelBackend {
    /// Build a Sentinel client for the named master.
    ///
    /// # Errors
    ///
    /// Returns [`RedisOpError::Connection`] when no Sentinel URL parses.
    pub fn connect(
        sentinel_urls: &[String],
        master_name: &str,
        failover_retries: u32,
    ) -> Result<Self, RedisOpError> {
        let client = SentinelClient::build(
            sentinel_urls.to_vec(),
            master_name.to_owned(),
            None,
            SentinelServerType::Master,
        )?;
        Ok(Self {
            client: Mutex::new(client),
            cached: Mutex::new(None),
            failover_retries,
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, RedisOpError> {
        if let Some(conn) = self.cached.lock().await.clone() {
            return Ok(conn);
        }
        self.refresh_master().await
    }

    async fn refresh_master(&self) -> Result<MultiplexedConnection, RedisOpError> {
        let mut last: Option<RedisOpError> = None;
        for attempt in 0..=self.failover_retries {
            match self.client.lock().await.get_async_connection().await {
                Ok(conn) => {
                    *self.cached.lock().await = Some(conn.clone());
                    return Ok(conn);
                }
                Err(e) => {
                    tracing::warn!(
                        target: "courier.transport",
                        attempt,
                        error = %e,
                        "sentinel master resolution failed"
                    );
                    last = Some(e.into());
                    tokio::time::sleep(failover_backoff(attempt)).await;
                }
            }
        }
        Err(last.unwrap_or_else(|| {
            RedisOpError::Connection("sentinel master resolution failed".into())
        }))
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn run<T, F, Fut>(&self, op: F) -> Result<T, RedisOpError>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = Result<T, redis::RedisError>>,
    {
        let conn = self.connection().await?;
        match op(conn).await {
            Ok(v) => Ok(v),
            Err(e) if e.is_io_error() || e.is_connection_dropped() => {
                self.invalidate().await;
                let conn = self.connection().await?;
                Ok(op(conn).await?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn failover_backoff(attempt: u32) -> Duration {
    Duration::from_millis(100 * u64::from(1u32 << attempt.min(4)))
}

#[async_trait]
impl ListOps for SentinelBackend {
    async fn rpush(&self, key: &str, value: Vec<u8>) -> Result<(), RedisOpError> {
        let key = key.to_owned();
        self.run(move |mut conn| {
            let key = key.clone();
            let value = value.clone();
            async move { conn.rpush::<_, _, ()>(key, value).await }
        })
        .await
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<Vec<u8>>, RedisOpError> {
        let key = key.to_owned();
        let popped: Option<(String, Vec<u8>)> = self
            .run(move |mut conn| {
                let key = key.clone();
                async move { conn.blpop(key, timeout.as_secs_f64()).await }
            })
            .await?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn llen(&self, key: &str) -> Result<usize, RedisOpError> {
        let key = key.to_owned();
        self.run(move |mut conn| {
            let key = key.clone();
            async move { conn.llen(key).await }
        })
        .await
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), RedisOpError> {
        let key = key.to_owned();
        self.run(move |mut conn| {
            let key = key.clone();
            async move { conn.expire::<_, ()>(key, seconds as i64).await }
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), RedisOpError> {
        let key = key.to_owned();
        self.run(move |mut conn| {
            let key = key.clone();
            async move { conn.del::<_, ()>(key).await }
        })
        .await
    }
}

/// RPUSH followed by EXPIRE, the send-side write pair.
///
/// # Errors
///
/// Propagates the first failing operation.
pub async fn push_with_expiry(
    backend: &dyn ListOps,
    key: &str,
    value: Vec<u8>,
    expiry_seconds: u64,
) -> Result<(), RedisOpError> {
    backend.rpush(key, value).await?;
    backend.expire(key, expiry_seconds).await
}

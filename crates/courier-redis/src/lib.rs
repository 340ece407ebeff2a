// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod client;
pub mod gateway;
pub mod server;
pub mod settings;

pub use backend::{ListOps, MasterReplicaBackend, RedisOpError, SentinelBackend, StandaloneBackend};
pub use client::RedisClientTransport;
pub use gateway::{ingress_key, reply_key, RedisGateway};
pub use server::RedisServerTransport;
pub use settings::{RedisBackendSettings, RedisTransportSettings};

use std::sync::Arc;

/// Build the configured backend and connect it.
///
/// # Errors
///
/// Returns [`RedisOpError`] when the initial connection cannot be
/// established.
pub async fn connect_backend(
    settings: &RedisBackendSettings,
) -> Result<Arc<dyn ListOps>, RedisOpError> {
    match settings {
        RedisBackendSettings::Standalone { url } => {
            Ok(Arc::new(StandaloneBackend::connect(url).await?))
        }
        RedisBackendSettings::MasterReplica {
            master_url,
            replica_urls,
        } => Ok(Arc::new(
            MasterReplicaBackend::connect(master_url, replica_urls).await?,
        )),
        RedisBackendSettings::Sentinel {
            sentinel_urls,
            master_name,
            failover_retries,
        } => Ok(Arc::new(SentinelBackend::connect(
            sentinel_urls,
            master_name,
            *failover_retries,
        )?)),
    }
}

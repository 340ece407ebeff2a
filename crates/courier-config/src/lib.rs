// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use courier_client::{Client, ClientSettings, ExpansionSettings, TransportFactory};
use courier_core::middleware::ClientMiddleware;
use courier_core::transport::{ClientTransport, ServerTransport};
use courier_redis::{RedisClientTransport, RedisServerTransport, RedisTransportSettings};
use serde::{Deserialize, Serialize};

/// Environment variable naming the settings file when no explicit
/// argument is given.
pub const SETTINGS_ENV: &str = "COURIER_SETTINGS";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from loading or applying configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No settings path was given and [`SETTINGS_ENV`] is unset.
    #[error("no settings file given and {SETTINGS_ENV} is not set")]
    NoSettings,

    /// The settings file does not exist or could not be read.
    #[error("cannot read settings file '{path}': {reason}")]
    Unreadable {
        /// Path that was requested.
        path: String,
        /// The underlying I/O failure.
        reason: String,
    },

    /// The file could not be parsed as TOML in the expected shape.
    #[error("failed to parse settings: {reason}")]
    Parse {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed.
    #[error("invalid settings: {reasons:?}")]
    Invalid {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },

    /// A configured component could not be constructed.
    #[error("failed to build '{component}': {reason}")]
    Build {
        /// Which component failed.
        component: String,
        /// Why construction failed.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Transport registry
// ---------------------------------------------------------------------------

/// A named transport implementation with its construction parameters.
///
/// The `type` tag is the registry name; the build's registry is the set
/// of enum variants, so configuration can never name code that was not
/// compiled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// The Redis Gateway transport.
    Redis(RedisTransportSettings),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Redis(RedisTransportSettings::default())
    }
}

impl TransportConfig {
    /// Connect a client-side transport for `service`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Build`] when the connection fails.
    pub async fn build_client_transport(
        &self,
        service: &str,
    ) -> Result<Arc<dyn ClientTransport>, ConfigError> {
        match self {
            TransportConfig::Redis(settings) => {
                let transport = RedisClientTransport::connect(service, settings.clone())
                    .await
                    .map_err(|e| ConfigError::Build {
                        component: format!("redis client transport for '{service}'"),
                        reason: e.to_string(),
                    })?;
                Ok(Arc::new(transport))
            }
        }
    }

    /// Connect a server-side transport for `service`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Build`] when the connection fails.
    pub async fn build_server_transport(
        &self,
        service: &str,
    ) -> Result<Arc<dyn ServerTransport>, ConfigError> {
        match self {
            TransportConfig::Redis(settings) => {
                let transport = RedisServerTransport::connect(service, settings.clone())
                    .await
                    .map_err(|e| ConfigError::Build {
                        component: format!("redis server transport for '{service}'"),
                        reason: e.to_string(),
                    })?;
                Ok(Arc::new(transport))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// Full client-side configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Engine settings (timeouts).
    pub settings: ClientSettings,
    /// Transport used for services without a dedicated entry.
    pub default_transport: TransportConfig,
    /// Per-service transport overrides.
    pub transports: BTreeMap<String, TransportConfig>,
    /// Expansion routes.
    pub expansions: ExpansionSettings,
}

impl ClientConfig {
    /// A lazy per-service transport factory backed by this configuration.
    #[must_use]
    pub fn transport_factory(&self) -> TransportFactory {
        let default_transport = self.default_transport.clone();
        let overrides = self.transports.clone();
        Arc::new(move |service: &str| {
            let config = overrides.get(service).cloned().unwrap_or_else(|| {
                default_transport.clone()
            });
            let service = service.to_owned();
            Box::pin(async move {
                config
                    .build_client_transport(&service)
                    .await
                    .map_err(|e| courier_core::SendError::Connection(e.to_string()))
            })
        })
    }

    /// Build a [`Client`] from this configuration.
    #[must_use]
    pub fn build_client(&self, middleware: Vec<Arc<dyn ClientMiddleware>>) -> Client {
        Client::new(
            self.settings.clone(),
            self.transport_factory(),
            middleware,
            self.expansions.clone(),
        )
    }
}

// ---------------------------------------------------------------------------
// Server configuration
// ---------------------------------------------------------------------------

/// Harakiri watchdog settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarakiriSettings {
    /// Seconds one request may process before the worker kills itself;
    /// 0 disables the watchdog.
    pub timeout: u64,
    /// Seconds a supervisor waits for graceful worker exit before
    /// escalating to SIGKILL.
    pub shutdown_grace: u64,
}

impl Default for HarakiriSettings {
    fn default() -> Self {
        Self {
            timeout: 300,
            shutdown_grace: 30,
        }
    }
}

/// Runtime settings for the server engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerRuntimeSettings {
    /// Seconds each receive waits before the loop runs its idle hook.
    pub receive_timeout: u64,
    /// Watchdog settings.
    pub harakiri: HarakiriSettings,
    /// Heartbeat file path template; `{pid}` and `{fid}` are expanded.
    pub heartbeat_file: Option<String>,
    /// Field names redacted from any logged request or response content.
    pub sensitive_fields: Vec<String>,
    /// Seconds between file-watcher scans when auto-reload is enabled.
    pub watcher_poll_interval: u64,
}

impl Default for ServerRuntimeSettings {
    fn default() -> Self {
        Self {
            receive_timeout: 5,
            harakiri: HarakiriSettings::default(),
            heartbeat_file: None,
            sensitive_fields: courier_core::redact::DEFAULT_SENSITIVE_FIELDS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            watcher_poll_interval: 2,
        }
    }
}

/// Full server-side configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// The service this server handles. Required.
    pub service_name: String,
    /// Ingress transport.
    pub transport: TransportConfig,
    /// Engine runtime settings.
    pub server: ServerRuntimeSettings,
    /// Outbound client configuration, for handlers that make nested
    /// calls to other services.
    pub client: Option<ClientConfig>,
}

impl ServerConfig {
    /// Validate semantic constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] listing every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut reasons = Vec::new();
        if self.service_name.trim().is_empty() {
            reasons.push("service_name must not be empty".to_owned());
        }
        if let TransportConfig::Redis(settings) = &self.transport {
            if settings.queue_capacity == 0 {
                reasons.push("transport queue_capacity must be at least 1".to_owned());
            }
            if settings.maximum_message_size_in_bytes == 0 {
                reasons.push("transport maximum_message_size_in_bytes must be at least 1".to_owned());
            }
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { reasons })
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Resolve the settings path: the explicit argument if given, else
/// [`SETTINGS_ENV`].
///
/// # Errors
///
/// Returns [`ConfigError::NoSettings`] when neither is present.
pub fn resolve_settings_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(p) = explicit {
        return Ok(p.to_owned());
    }
    std::env::var_os(SETTINGS_ENV)
        .map(PathBuf::from)
        .ok_or(ConfigError::NoSettings)
}

/// Load and validate a server configuration from a TOML file.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file is unreadable, unparseable, or
/// semantically invalid.
pub fn load_server_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

/// Load a client configuration from a TOML file.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file is unreadable or unparseable.
pub fn load_client_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    load_toml(path)
}

fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    toml::from_str(&text).map_err(|e| ConfigError::Parse {
        reason: e.to_string(),
    })
}

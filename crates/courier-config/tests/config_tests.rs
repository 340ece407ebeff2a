// SPDX-License-Identifier: MIT OR Apache-2.0
//! Settings parsing and validation tests.

use std::io::Write;

use courier_config::{
    load_server_config, resolve_settings_path, ConfigError, ServerConfig, TransportConfig,
};
use courier_redis::RedisBackendSettings;

fn write_settings(contents: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    f
}

#[test]
fn minimal_server_config_parses_with_defaults() {
    let f = write_settings(
        r#"
service_name = "example"
"#,
    );
    let config = load_server_config(f.path()).unwrap();
    assert_eq!(config.service_name, "example");
    let TransportConfig::Redis(redis) = &config.transport;
    assert_eq!(redis.queue_capacity, 10_000);
    assert_eq!(config.server.receive_timeout, 5);
    assert_eq!(config.server.harakiri.timeout, 300);
    assert!(config.client.is_none());
}

#[test]
fn full_server_config_parses() {
    let f = write_settings(
        r#"
service_name = "geo"

[transport]
type = "redis"
queue_capacity = 500
chunk_messages_larger_than_bytes = 102400
content_type = "application/json"

[transport.backend]
type = "sentinel"
sentinel_urls = ["redis://s1:26379", "redis://s2:26379"]
master_name = "mymaster"
failover_retries = 5

[server]
receive_timeout = 2
heartbeat_file = "/var/run/geo-{pid}-{fid}.heartbeat"

[server.harakiri]
timeout = 60
shutdown_grace = 10

[client]
[client.settings]
default_timeout = 3

[client.default_transport]
type = "redis"

[[client.expansions.routes]]
type_name = "point"
name = "region"
source_field = "region_id"
destination_field = "region"
service = "geo"
action = "get_regions"
request_field = "ids"
response_field = "regions"
"#,
    );
    let config = load_server_config(f.path()).unwrap();
    let TransportConfig::Redis(redis) = &config.transport;
    assert_eq!(redis.queue_capacity, 500);
    assert_eq!(redis.chunk_messages_larger_than_bytes, Some(102_400));
    assert!(matches!(
        redis.backend,
        RedisBackendSettings::Sentinel { ref master_name, failover_retries: 5, .. }
            if master_name == "mymaster"
    ));
    assert_eq!(config.server.harakiri.timeout, 60);
    let client = config.client.unwrap();
    assert_eq!(client.settings.default_timeout, 3);
    assert_eq!(client.expansions.routes.len(), 1);
    assert_eq!(client.expansions.routes[0].type_name, "point");
}

#[test]
fn empty_service_name_is_invalid() {
    let f = write_settings("service_name = \"\"\n");
    let err = load_server_config(f.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }));
}

#[test]
fn unparseable_settings_are_a_parse_error() {
    let f = write_settings("service_name = [not toml");
    let err = load_server_config(f.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn unknown_transport_type_is_rejected() {
    let f = write_settings(
        r#"
service_name = "example"

[transport]
type = "carrier_pigeon"
"#,
    );
    assert!(load_server_config(f.path()).is_err());
}

#[test]
fn missing_file_is_unreadable() {
    let err = load_server_config(std::path::Path::new("/nonexistent/settings.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Unreadable { .. }));
}

#[test]
fn explicit_path_wins_over_environment() {
    let resolved =
        resolve_settings_path(Some(std::path::Path::new("/etc/courier/geo.toml"))).unwrap();
    assert_eq!(resolved, std::path::PathBuf::from("/etc/courier/geo.toml"));
}

#[test]
fn default_server_config_fails_validation_without_a_name() {
    assert!(ServerConfig::default().validate().is_err());
}

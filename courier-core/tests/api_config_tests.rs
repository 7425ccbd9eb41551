// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for api::config
//! Defaults, JSON loading and validation.

use std::path::PathBuf;
use std::time::Duration;

use courier_core::api::{CourierConfig, MessagingConfig, RelayConfig};
use courier_core::CourierError;
use tempfile::TempDir;

#[test]
fn test_defaults_are_valid() {
    let config = CourierConfig::default();
    config.validate().unwrap();

    assert_eq!(config.relay.reconnect_base_delay(), Duration::from_secs(1));
    assert_eq!(config.relay.reconnect_max_delay(), Duration::from_secs(60));
    assert_eq!(config.relay.ping_interval(), Some(Duration::from_secs(30)));
    assert_eq!(config.messaging.event_channel_capacity, 256);
}

#[test]
fn test_messenger_options_follow_config() {
    let messaging = MessagingConfig {
        self_message_delay_ms: 5,
        event_channel_capacity: 8,
    };
    let options = messaging.messenger_options();
    assert_eq!(options.self_message_delay, Duration::from_millis(5));
    assert_eq!(options.event_capacity, 8);
}

#[test]
fn test_partial_json_keeps_defaults() {
    let config = CourierConfig::from_json_str(
        r#"{ "relay": { "server_url": "wss://relay.test" }, "messaging": { "self_message_delay_ms": 0 } }"#,
    )
    .unwrap();

    assert_eq!(config.relay.server_url, "wss://relay.test");
    assert_eq!(config.relay.connect_timeout_ms, RelayConfig::default().connect_timeout_ms);
    assert_eq!(config.messaging.self_message_delay_ms, 0);
    assert_eq!(config.storage_path, CourierConfig::default().storage_path);
}

#[test]
fn test_load_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("courier.json");
    let expected = CourierConfig::default()
        .with_storage_path(temp_dir.path().join("db.sqlite"))
        .with_relay_url("ws://localhost:9000");
    std::fs::write(&path, serde_json::to_string_pretty(&expected).unwrap()).unwrap();

    assert_eq!(CourierConfig::from_json_file(&path).unwrap(), expected);
}

#[test]
fn test_missing_file_is_a_configuration_error() {
    let result = CourierConfig::from_json_file(PathBuf::from("/nonexistent/courier.json"));
    assert!(matches!(result, Err(CourierError::Configuration(_))));
}

#[test]
fn test_malformed_json_is_rejected() {
    let result = CourierConfig::from_json_str("{ relay: ");
    assert!(matches!(result, Err(CourierError::Configuration(_))));
}

#[test]
fn test_validation_errors() {
    let empty_url = CourierConfig::default().with_relay_url("  ");
    assert!(matches!(
        empty_url.validate(),
        Err(CourierError::Configuration(_))
    ));

    let mut inverted = CourierConfig::default();
    inverted.relay.reconnect_base_delay_ms = 10_000;
    inverted.relay.reconnect_max_delay_ms = 1_000;
    assert!(inverted.validate().is_err());

    let mut no_capacity = CourierConfig::default();
    no_capacity.messaging.event_channel_capacity = 0;
    assert!(no_capacity.validate().is_err());

    let result = CourierConfig::from_json_str(r#"{ "messaging": { "event_channel_capacity": 0 } }"#);
    assert!(result.is_err());
}

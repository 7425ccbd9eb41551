// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Courier configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{CourierError, CourierResult};
use crate::messaging::MessengerOptions;

/// Relay connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// WebSocket URL of the relay server.
    pub server_url: String,
    pub connect_timeout_ms: u64,
    /// First reconnect delay; doubles with each failed attempt.
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Keep-alive ping period while online. Zero disables pings.
    pub ping_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            server_url: "wss://relay.courier.app".to_string(),
            connect_timeout_ms: 10_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 60_000,
            ping_interval_ms: 30_000,
        }
    }
}

impl RelayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }
}

/// Delivery pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Delay before a message sent to our own account shows up as received.
    pub self_message_delay_ms: u64,
    /// Capacity of every event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        MessagingConfig {
            self_message_delay_ms: 30,
            event_channel_capacity: 256,
        }
    }
}

impl MessagingConfig {
    pub fn messenger_options(&self) -> MessengerOptions {
        MessengerOptions {
            self_message_delay: Duration::from_millis(self.self_message_delay_ms),
            event_capacity: self.event_channel_capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// SQLite database file.
    pub storage_path: PathBuf,
    pub relay: RelayConfig,
    pub messaging: MessagingConfig,
}

impl Default for CourierConfig {
    fn default() -> Self {
        CourierConfig {
            storage_path: PathBuf::from("./courier_data/courier.db"),
            relay: RelayConfig::default(),
            messaging: MessagingConfig::default(),
        }
    }
}

impl CourierConfig {
    /// Loads a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> CourierResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CourierError::Configuration(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(json: &str) -> CourierResult<Self> {
        let config: CourierConfig = serde_json::from_str(json)
            .map_err(|e| CourierError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay.server_url = url.into();
        self
    }

    pub fn validate(&self) -> CourierResult<()> {
        if self.relay.server_url.trim().is_empty() {
            return Err(CourierError::Configuration(
                "relay server url is empty".to_string(),
            ));
        }
        if self.relay.reconnect_max_delay_ms < self.relay.reconnect_base_delay_ms {
            return Err(CourierError::Configuration(
                "reconnect max delay is below the base delay".to_string(),
            ));
        }
        if self.messaging.event_channel_capacity == 0 {
            return Err(CourierError::Configuration(
                "event channel capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

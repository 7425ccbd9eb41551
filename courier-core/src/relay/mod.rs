// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Module
//!
//! Connection to the relay server: the client contract, the manager that
//! tracks online status and connection tags, reconnection backoff, and the
//! WebSocket transport.

mod client;
mod error;
mod manager;
mod mock;
mod protocol;
mod reconnect;
#[cfg(feature = "network")]
mod websocket;

pub use client::{RelayClient, RelayClientFactory, RelayConnection};
pub use error::RelayError;
pub use manager::{RelayClientManager, RelayStatus};
pub use mock::{MockRelayClientFactory, SentRelayMessage};
pub use protocol::{ClientFrame, RelayClientEvent, ServerFrame};
pub use reconnect::ReconnectionTimer;
#[cfg(feature = "network")]
pub use websocket::{WebSocketRelayClient, WebSocketRelayClientFactory};

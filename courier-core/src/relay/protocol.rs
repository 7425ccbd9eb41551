// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Relay Protocol
//!
//! Client events surfaced to the rest of the pipeline, and the JSON frames
//! exchanged with the relay server.

use serde::{Deserialize, Serialize};

use crate::types::{DeviceAddress, UserCredentials, UserId};
use crate::wire::{DeviceMismatchContent, RelayMessageBundle};

/// Events emitted by a relay client over its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayClientEvent {
    ConnectionEstablished,
    AuthenticationSuccessful,
    AuthenticationFailure,
    ConnectionLost {
        was_requested: bool,
    },
    ConnectionFailure(String),
    /// The relay accepted a message for delivery.
    ServerReceivedMessage {
        to: UserId,
        message_id: String,
        timestamp: u64,
    },
    /// The recipient's device list differs from the one the message was
    /// encrypted for.
    DeviceMismatch {
        to: UserId,
        message_id: String,
        info: DeviceMismatchContent,
    },
    /// The recipient account no longer exists.
    InactiveUser {
        to: UserId,
        message_id: String,
    },
    /// A message pushed by the relay. `content` is a serialized
    /// `EncryptedPackagePayload`.
    ReceivedMessage {
        from: DeviceAddress,
        message_id: String,
        content: String,
    },
}

/// Frames sent to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Authenticate {
        user_id: UserId,
        device_id: u32,
        auth_token: String,
    },
    SendMessage {
        to: UserId,
        message_id: String,
        bundle: RelayMessageBundle,
    },
    MessageReceivedAck {
        message_id: String,
    },
    Ping,
}

impl ClientFrame {
    pub fn authenticate(credentials: &UserCredentials) -> Self {
        ClientFrame::Authenticate {
            user_id: credentials.address.user_id,
            device_id: credentials.address.device_id,
            auth_token: credentials.auth_token.clone(),
        }
    }
}

/// Frames received from the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthOk,
    AuthFailed {
        reason: String,
    },
    ServerReceived {
        to: UserId,
        message_id: String,
        timestamp: u64,
    },
    DeviceMismatch {
        to: UserId,
        message_id: String,
        #[serde(flatten)]
        info: DeviceMismatchContent,
    },
    InactiveUser {
        to: UserId,
        message_id: String,
    },
    Message {
        from_user: UserId,
        from_device: u32,
        message_id: String,
        content: String,
    },
    Pong,
}

impl ServerFrame {
    /// Maps a frame to the client event it represents, if any.
    pub fn into_event(self) -> Option<RelayClientEvent> {
        match self {
            ServerFrame::AuthOk => Some(RelayClientEvent::AuthenticationSuccessful),
            ServerFrame::AuthFailed { .. } => Some(RelayClientEvent::AuthenticationFailure),
            ServerFrame::ServerReceived {
                to,
                message_id,
                timestamp,
            } => Some(RelayClientEvent::ServerReceivedMessage {
                to,
                message_id,
                timestamp,
            }),
            ServerFrame::DeviceMismatch {
                to,
                message_id,
                info,
            } => Some(RelayClientEvent::DeviceMismatch {
                to,
                message_id,
                info,
            }),
            ServerFrame::InactiveUser { to, message_id } => {
                Some(RelayClientEvent::InactiveUser { to, message_id })
            }
            ServerFrame::Message {
                from_user,
                from_device,
                message_id,
                content,
            } => Some(RelayClientEvent::ReceivedMessage {
                from: DeviceAddress::new(from_user, from_device),
                message_id,
                content,
            }),
            ServerFrame::Pong => None,
        }
    }
}

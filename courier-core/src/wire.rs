// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire Formats
//!
//! The plaintext message envelope exchanged between clients, and the
//! encrypted payload shapes carried by the relay.
//!
//! Envelope format: `{"t": <type>, "m": <content>}` where type is one of
//! `"t"` (text), `"g"` (group event), `"s"` (sync), `"c"` (control).
//! Group events are themselves tagged by a nested `"t"` field.

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::types::UserId;

/// Wire format errors.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The plaintext envelope carried inside every encrypted payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "m")]
pub enum WireMessage {
    #[serde(rename = "t")]
    Text(TextMessage),
    #[serde(rename = "g")]
    GroupEvent(GroupEventMessage),
    /// Multi-device sync. Recognised but not handled by this client.
    #[serde(rename = "s")]
    Sync(serde_json::Value),
    /// Contact control messages. Recognised but not handled by this client.
    #[serde(rename = "c")]
    Control(serde_json::Value),
}

impl WireMessage {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Text(_) => "text",
            WireMessage::GroupEvent(_) => "group-event",
            WireMessage::Sync(_) => "sync",
            WireMessage::Control(_) => "control",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub timestamp: u64,
    pub message: String,
    #[serde(rename = "groupId")]
    pub group_id: Option<String>,
}

impl TextMessage {
    pub fn new(timestamp: u64, message: impl Into<String>, group_id: Option<String>) -> Self {
        TextMessage {
            timestamp,
            message: message.into(),
            group_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum GroupEventMessage {
    /// Members joined a group. Sent by a current member.
    #[serde(rename = "j")]
    Join { id: String, joined: BTreeSet<UserId> },
    /// The sender left the group.
    #[serde(rename = "p")]
    Part { id: String },
    /// Invitation to a new group. The sender is an implicit member.
    #[serde(rename = "i")]
    Invitation {
        id: String,
        name: String,
        members: BTreeSet<UserId>,
    },
}

impl GroupEventMessage {
    pub fn group_id(&self) -> &str {
        match self {
            GroupEventMessage::Join { id, .. }
            | GroupEventMessage::Part { id }
            | GroupEventMessage::Invitation { id, .. } => id,
        }
    }
}

/// Serializes an envelope to JSON bytes.
pub fn serialize_message(message: &WireMessage) -> Result<Vec<u8>, WireError> {
    Ok(serde_json::to_vec(message)?)
}

/// Parses an envelope from decrypted bytes.
pub fn deserialize_message(bytes: &[u8]) -> Result<WireMessage, WireError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// One encrypted message for a single recipient device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPackagePayload {
    /// Set when the payload establishes a new session.
    #[serde(rename = "isPreKeyWhisper")]
    pub is_pre_key: bool,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl EncryptedPackagePayload {
    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Encrypted payload addressed to one recipient device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    #[serde(rename = "deviceId")]
    pub device_id: u32,
    #[serde(rename = "registrationId")]
    pub registration_id: u32,
    pub payload: EncryptedPackagePayload,
}

/// Everything the relay needs to fan a message out to a user's devices.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelayMessageBundle {
    pub messages: Vec<MessageData>,
}

/// Devices the relay reported as stale, missing, or removed for a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceMismatchContent {
    pub stale: Vec<u32>,
    pub missing: Vec<u32>,
    pub removed: Vec<u32>,
}

mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(s).map_err(serde::de::Error::custom)
    }
}

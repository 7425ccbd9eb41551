// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Core Value Types
//!
//! Identifiers and records shared by the delivery pipeline, storage, and the
//! contact sync machinery.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Returns the current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Account identifier assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl UserId {
    pub fn new(id: u64) -> Self {
        UserId(id)
    }

    pub fn long(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single device belonging to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub user_id: UserId,
    pub device_id: u32,
}

impl DeviceAddress {
    pub fn new(user_id: UserId, device_id: u32) -> Self {
        DeviceAddress { user_id, device_id }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.device_id)
    }
}

/// Error returned when parsing a `user:device` address string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid device address: {0}")]
pub struct AddressParseError(pub String);

impl FromStr for DeviceAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user, device) = s
            .split_once(':')
            .ok_or_else(|| AddressParseError(s.to_string()))?;
        let user_id = user
            .parse::<u64>()
            .map_err(|_| AddressParseError(s.to_string()))?;
        let device_id = device
            .parse::<u32>()
            .map_err(|_| AddressParseError(s.to_string()))?;
        Ok(DeviceAddress::new(UserId(user_id), device_id))
    }
}

/// Identifies one relay connection lifetime.
///
/// A fresh tag is drawn every time the relay goes online. Work started under
/// an older tag must never be transmitted on the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionTag(pub u32);

impl ConnectionTag {
    /// Draws a random non-negative tag.
    pub fn random() -> Self {
        ConnectionTag(rand::thread_rng().gen_range(0..=i32::MAX as u32))
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Credentials used to authenticate against the relay and the contact APIs.
#[derive(Clone, PartialEq, Eq)]
pub struct UserCredentials {
    pub address: DeviceAddress,
    pub auth_token: String,
}

impl UserCredentials {
    pub fn new(address: DeviceAddress, auth_token: impl Into<String>) -> Self {
        UserCredentials {
            address,
            auth_token: auth_token.into(),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.address.user_id
    }
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("address", &self.address)
            .field("auth_token", &"[REDACTED]")
            .finish()
    }
}

/// A stored conversation message, either sent or received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    pub message: String,
    /// Creation time in milliseconds.
    pub timestamp: u64,
    /// Local receive time; zero for sent messages.
    pub received_timestamp: u64,
    pub is_sent: bool,
    pub is_delivered: bool,
    pub ttl: u64,
}

impl MessageInfo {
    /// A new outgoing message, pending delivery.
    pub fn new_sent(message: impl Into<String>, ttl: u64) -> Self {
        MessageInfo {
            id: uuid::Uuid::new_v4().to_string(),
            message: message.into(),
            timestamp: now_millis(),
            received_timestamp: 0,
            is_sent: true,
            is_delivered: false,
            ttl,
        }
    }

    /// A message addressed to our own account. Never touches the network,
    /// so it is delivered as soon as it is written.
    pub fn new_self_sent(message: impl Into<String>, ttl: u64) -> Self {
        MessageInfo {
            is_delivered: true,
            ..Self::new_sent(message, ttl)
        }
    }

    pub fn new_received(
        id: impl Into<String>,
        message: impl Into<String>,
        timestamp: u64,
        received_timestamp: u64,
        ttl: u64,
    ) -> Self {
        MessageInfo {
            id: id.into(),
            message: message.into(),
            timestamp,
            received_timestamp,
            is_sent: false,
            is_delivered: true,
            ttl,
        }
    }
}

/// Messages belonging to one conversation partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBundle {
    pub user_id: UserId,
    pub messages: Vec<MessageInfo>,
}

impl MessageBundle {
    pub fn new(user_id: UserId, messages: Vec<MessageInfo>) -> Self {
        MessageBundle { user_id, messages }
    }
}

/// Identifies a received package: the sending device plus the message id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageId {
    pub address: DeviceAddress,
    pub message_id: String,
}

impl PackageId {
    pub fn new(address: DeviceAddress, message_id: impl Into<String>) -> Self {
        PackageId {
            address,
            message_id: message_id.into(),
        }
    }
}

/// An encrypted message as received from the relay, before decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub id: PackageId,
    pub timestamp: u64,
    /// Serialized `EncryptedPackagePayload` (JSON).
    pub payload: String,
}

impl Package {
    pub fn new(id: PackageId, timestamp: u64, payload: impl Into<String>) -> Self {
        Package {
            id,
            timestamp,
            payload: payload.into(),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.id.address.user_id
    }
}

/// Per-contact trust tier gating incoming messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllowedMessageLevel {
    All,
    GroupOnly,
    Blocked,
}

impl AllowedMessageLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllowedMessageLevel::All => "ALL",
            AllowedMessageLevel::GroupOnly => "GROUP_ONLY",
            AllowedMessageLevel::Blocked => "BLOCKED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ALL" => Some(AllowedMessageLevel::All),
            "GROUP_ONLY" => Some(AllowedMessageLevel::GroupOnly),
            "BLOCKED" => Some(AllowedMessageLevel::Blocked),
            _ => None,
        }
    }
}

/// A contact as known to the local address book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub allowed_message_level: AllowedMessageLevel,
    pub phone_number: Option<String>,
    pub public_key: String,
}

impl ContactInfo {
    pub fn new(
        id: UserId,
        email: impl Into<String>,
        name: impl Into<String>,
        allowed_message_level: AllowedMessageLevel,
        phone_number: Option<String>,
        public_key: impl Into<String>,
    ) -> Self {
        ContactInfo {
            id,
            email: email.into(),
            name: name.into(),
            allowed_message_level,
            phone_number,
            public_key: public_key.into(),
        }
    }

    /// Returns a copy with a different message level.
    pub fn with_message_level(&self, level: AllowedMessageLevel) -> Self {
        ContactInfo {
            allowed_message_level: level,
            ..self.clone()
        }
    }
}

/// An entry from the device's own address book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformContact {
    pub name: String,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
}

/// One entry of the remote address book diff.
///
/// A `None` level means the contact was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBookUpdate {
    pub user_id: UserId,
    pub allowed_message_level: Option<AllowedMessageLevel>,
}

impl AddressBookUpdate {
    pub fn level(user_id: UserId, level: AllowedMessageLevel) -> Self {
        AddressBookUpdate {
            user_id,
            allowed_message_level: Some(level),
        }
    }

    pub fn removed(user_id: UserId) -> Self {
        AddressBookUpdate {
            user_id,
            allowed_message_level: None,
        }
    }
}

// INLINE_TEST_REQUIRED: Exercises FromStr parsing edge cases on private format
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_tag_is_non_negative_int() {
        for _ in 0..1000 {
            assert!(ConnectionTag::random().value() <= i32::MAX as u32);
        }
    }

    #[test]
    fn test_device_address_parse() {
        let addr: DeviceAddress = "42:3".parse().unwrap();
        assert_eq!(addr, DeviceAddress::new(UserId(42), 3));
        assert_eq!(addr.to_string(), "42:3");
        assert!("42".parse::<DeviceAddress>().is_err());
        assert!("a:1".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn test_self_sent_is_delivered() {
        let m = MessageInfo::new_self_sent("hi", 0);
        assert!(m.is_sent);
        assert!(m.is_delivered);
    }

    #[test]
    fn test_credentials_debug_redacts_token() {
        let creds = UserCredentials::new(DeviceAddress::new(UserId(1), 1), "secret");
        assert!(!format!("{:?}", creds).contains("secret"));
    }
}

// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Test Fixtures
//!
//! Builders for storage, contacts and packages used across test files.

use std::sync::Arc;

use courier_core::crypto::MockCipherService;
use courier_core::storage::Storage;
use courier_core::types::{
    AllowedMessageLevel, ContactInfo, DeviceAddress, Package, PackageId, UserId,
};
use courier_core::wire::{serialize_message, GroupEventMessage, TextMessage, WireMessage};
use courier_core::SymmetricKey;

pub const ALICE: UserId = UserId(1001);
pub const BOB: UserId = UserId(1002);
pub const CAROL: UserId = UserId(1003);
pub const MALLORY: UserId = UserId(6666);

/// In-memory storage with a fresh key.
pub fn test_storage() -> Arc<Storage> {
    let key = SymmetricKey::generate().unwrap();
    Arc::new(Storage::in_memory(key).unwrap())
}

pub fn address(user_id: UserId, device_id: u32) -> DeviceAddress {
    DeviceAddress::new(user_id, device_id)
}

pub fn contact(user_id: UserId, level: AllowedMessageLevel) -> ContactInfo {
    ContactInfo::new(
        user_id,
        format!("user{}@example.com", user_id.long()),
        format!("User {}", user_id.long()),
        level,
        Some(format!("+4179{:07}", user_id.long())),
        format!("pk-{}", user_id.long()),
    )
}

/// Serialized text message as it travels inside an encrypted payload.
pub fn text_bytes(message: &str, timestamp: u64) -> Vec<u8> {
    serialize_message(&WireMessage::Text(TextMessage::new(timestamp, message, None))).unwrap()
}

/// Package payload that [`MockCipherService::loopback`] decrypts to `plaintext`.
pub fn loopback_payload(plaintext: &[u8]) -> String {
    MockCipherService::loopback_payload(plaintext)
        .to_json()
        .unwrap()
}

/// A received text package from `from`, decryptable by the loopback cipher.
pub fn text_package(from: DeviceAddress, message_id: &str, timestamp: u64, message: &str) -> Package {
    Package::new(
        PackageId::new(from, message_id),
        timestamp,
        loopback_payload(&text_bytes(message, timestamp)),
    )
}

/// A received group event package.
pub fn group_event_package(
    from: DeviceAddress,
    message_id: &str,
    timestamp: u64,
    event: GroupEventMessage,
) -> Package {
    let bytes = serialize_message(&WireMessage::GroupEvent(event)).unwrap();
    Package::new(
        PackageId::new(from, message_id),
        timestamp,
        loopback_payload(&bytes),
    )
}

/// A package whose payload is not an encrypted package at all.
pub fn malformed_package(from: DeviceAddress, message_id: &str, timestamp: u64) -> Package {
    Package::new(PackageId::new(from, message_id), timestamp, "not json")
}

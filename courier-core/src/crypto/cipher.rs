// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Cipher Service Contract
//!
//! Encryption and decryption are fire-and-observe: a request returns
//! immediately and its result is published later on a broadcast stream.
//! Results carry their correlation keys (recipient, sender address,
//! connection tag) so a consumer can tell whether a result still applies
//! after unrelated state changes such as a relay reconnect.

use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::{ConnectionTag, DeviceAddress, UserId};
use crate::wire::{DeviceMismatchContent, EncryptedPackagePayload, MessageData};

/// Cipher service errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("no key data available for user {0}")]
    NoKeyData(UserId),
    #[error("no session for {0}")]
    NoSession(DeviceAddress),
    #[error("no pre-key bundle for {0}")]
    MissingBundle(DeviceAddress),
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error("key directory failure: {0}")]
    Directory(String),
}

/// One encrypted message within a decryption batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessageInfo {
    pub message_id: String,
    pub payload: EncryptedPackagePayload,
}

/// Outcome of an encryption request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionOutcome {
    /// One payload per recipient device. Empty when the recipient has no
    /// devices besides the sending one.
    Ok(Vec<MessageData>),
    /// The recipient has published no key material; the account is
    /// considered inactive.
    NoKeyData,
    UnknownFailure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionResult {
    pub user_id: UserId,
    pub connection_tag: ConnectionTag,
    pub outcome: EncryptionOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub message_id: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionFailure {
    pub message_id: String,
    pub cause: String,
}

/// Results for one decryption batch from a single sender device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionResult {
    pub address: DeviceAddress,
    pub succeeded: Vec<DecryptedMessage>,
    pub failed: Vec<DecryptionFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceUpdateResult {
    pub user_id: UserId,
    /// Set when the device list could not be refreshed.
    pub error: Option<String>,
}

/// Asynchronous message encryption service.
pub trait CipherService: Send + Sync {
    fn encrypt(&self, user_id: UserId, plaintext: Vec<u8>, connection_tag: ConnectionTag);

    fn decrypt(&self, address: DeviceAddress, messages: Vec<EncryptedMessageInfo>);

    /// Refreshes device sessions after the relay reported a mismatch.
    fn update_devices(&self, user_id: UserId, info: DeviceMismatchContent);

    /// Forgets every device session with a user. Publishes no result; the
    /// next encryption for the user starts from the key directory again.
    fn clear_devices(&self, user_id: UserId);

    fn encrypted_messages(&self) -> broadcast::Receiver<EncryptionResult>;

    fn decrypted_messages(&self) -> broadcast::Receiver<DecryptionResult>;

    fn device_updates(&self) -> broadcast::Receiver<DeviceUpdateResult>;
}

/// The three result streams shared by cipher service implementations.
#[derive(Debug, Clone)]
pub struct CipherChannels {
    pub encrypted: broadcast::Sender<EncryptionResult>,
    pub decrypted: broadcast::Sender<DecryptionResult>,
    pub device_updates: broadcast::Sender<DeviceUpdateResult>,
}

impl CipherChannels {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        CipherChannels {
            encrypted: broadcast::channel(capacity).0,
            decrypted: broadcast::channel(capacity).0,
            device_updates: broadcast::channel(capacity).0,
        }
    }

    /// Publishing with no subscriber is not an error; the result is dropped.
    pub fn publish_encryption(&self, result: EncryptionResult) {
        if self.encrypted.send(result).is_err() {
            tracing::debug!("No subscribers for encryption result");
        }
    }

    pub fn publish_decryption(&self, result: DecryptionResult) {
        if self.decrypted.send(result).is_err() {
            tracing::debug!("No subscribers for decryption result");
        }
    }

    pub fn publish_device_update(&self, result: DeviceUpdateResult) {
        if self.device_updates.send(result).is_err() {
            tracing::debug!("No subscribers for device update result");
        }
    }
}

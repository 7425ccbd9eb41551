// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Mock cipher service for testing.
//!
//! Records every request. In manual mode results are published only when a
//! test calls one of the `publish_*` methods; in loopback mode encryption and
//! decryption succeed immediately with the plaintext passed through unchanged.

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::cipher::{
    CipherChannels, CipherService, DecryptedMessage, DecryptionResult, DeviceUpdateResult,
    EncryptedMessageInfo, EncryptionOutcome, EncryptionResult,
};
use crate::types::{ConnectionTag, DeviceAddress, UserId};
use crate::wire::{DeviceMismatchContent, EncryptedPackagePayload, MessageData};

/// A request observed by [`MockCipherService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CipherCall {
    Encrypt {
        user_id: UserId,
        plaintext: Vec<u8>,
        connection_tag: ConnectionTag,
    },
    Decrypt {
        address: DeviceAddress,
        messages: Vec<EncryptedMessageInfo>,
    },
    UpdateDevices {
        user_id: UserId,
        info: DeviceMismatchContent,
    },
    ClearDevices {
        user_id: UserId,
    },
}

/// Mock cipher service.
pub struct MockCipherService {
    channels: CipherChannels,
    calls: Mutex<Vec<CipherCall>>,
    loopback: bool,
}

impl Default for MockCipherService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCipherService {
    /// Results are published manually.
    pub fn new() -> Self {
        MockCipherService {
            channels: CipherChannels::new(256),
            calls: Mutex::new(Vec::new()),
            loopback: false,
        }
    }

    /// Every request succeeds immediately.
    pub fn loopback() -> Self {
        MockCipherService {
            loopback: true,
            ..Self::new()
        }
    }

    /// Wraps a plaintext the way loopback encryption does.
    pub fn loopback_payload(plaintext: &[u8]) -> EncryptedPackagePayload {
        EncryptedPackagePayload {
            is_pre_key: false,
            payload: plaintext.to_vec(),
        }
    }

    pub fn calls(&self) -> Vec<CipherCall> {
        self.calls.lock().clone()
    }

    pub fn encrypt_calls(&self) -> Vec<(UserId, Vec<u8>, ConnectionTag)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                CipherCall::Encrypt {
                    user_id,
                    plaintext,
                    connection_tag,
                } => Some((*user_id, plaintext.clone(), *connection_tag)),
                _ => None,
            })
            .collect()
    }

    pub fn decrypt_calls(&self) -> Vec<(DeviceAddress, Vec<EncryptedMessageInfo>)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                CipherCall::Decrypt { address, messages } => Some((*address, messages.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn update_device_calls(&self) -> Vec<UserId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                CipherCall::UpdateDevices { user_id, .. } => Some(*user_id),
                _ => None,
            })
            .collect()
    }

    pub fn clear_devices_calls(&self) -> Vec<UserId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                CipherCall::ClearDevices { user_id } => Some(*user_id),
                _ => None,
            })
            .collect()
    }

    pub fn publish_encryption(&self, result: EncryptionResult) {
        self.channels.publish_encryption(result);
    }

    pub fn publish_decryption(&self, result: DecryptionResult) {
        self.channels.publish_decryption(result);
    }

    pub fn publish_device_update(&self, result: DeviceUpdateResult) {
        self.channels.publish_device_update(result);
    }
}

impl CipherService for MockCipherService {
    fn encrypt(&self, user_id: UserId, plaintext: Vec<u8>, connection_tag: ConnectionTag) {
        self.calls.lock().push(CipherCall::Encrypt {
            user_id,
            plaintext: plaintext.clone(),
            connection_tag,
        });
        if self.loopback {
            self.channels.publish_encryption(EncryptionResult {
                user_id,
                connection_tag,
                outcome: EncryptionOutcome::Ok(vec![MessageData {
                    device_id: 1,
                    registration_id: 1,
                    payload: Self::loopback_payload(&plaintext),
                }]),
            });
        }
    }

    fn decrypt(&self, address: DeviceAddress, messages: Vec<EncryptedMessageInfo>) {
        self.calls.lock().push(CipherCall::Decrypt {
            address,
            messages: messages.clone(),
        });
        if self.loopback {
            self.channels.publish_decryption(DecryptionResult {
                address,
                succeeded: messages
                    .into_iter()
                    .map(|m| DecryptedMessage {
                        message_id: m.message_id,
                        data: m.payload.payload,
                    })
                    .collect(),
                failed: Vec::new(),
            });
        }
    }

    fn update_devices(&self, user_id: UserId, info: DeviceMismatchContent) {
        self.calls
            .lock()
            .push(CipherCall::UpdateDevices { user_id, info });
        if self.loopback {
            self.channels.publish_device_update(DeviceUpdateResult {
                user_id,
                error: None,
            });
        }
    }

    fn clear_devices(&self, user_id: UserId) {
        self.calls.lock().push(CipherCall::ClearDevices { user_id });
    }

    fn encrypted_messages(&self) -> broadcast::Receiver<EncryptionResult> {
        self.channels.encrypted.subscribe()
    }

    fn decrypted_messages(&self) -> broadcast::Receiver<DecryptionResult> {
        self.channels.decrypted.subscribe()
    }

    fn device_updates(&self) -> broadcast::Receiver<DeviceUpdateResult> {
        self.channels.device_updates.subscribe()
    }
}

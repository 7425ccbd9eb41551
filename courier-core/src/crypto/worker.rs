// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Session-based cipher service.
//!
//! Requests are queued to a single worker task and processed strictly in
//! submission order; results are published on the [`CipherChannels`].

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::cipher::{
    CipherChannels, CipherError, CipherService, DecryptedMessage, DecryptionFailure,
    DecryptionResult, DeviceUpdateResult, EncryptedMessageInfo, EncryptionOutcome,
    EncryptionResult,
};
use super::encryption::{self, SymmetricKey};
use super::session::{DeviceIdentity, PreKeyDirectory, Session, SessionStore};
use crate::types::{ConnectionTag, DeviceAddress, UserId};
use crate::wire::{DeviceMismatchContent, EncryptedPackagePayload, MessageData};

enum CipherWork {
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

/// [`CipherService`] backed by a worker task.
pub struct SessionCipherService {
    work: mpsc::UnboundedSender<CipherWork>,
    channels: CipherChannels,
}

impl SessionCipherService {
    /// Starts the worker. Must be called from within a Tokio runtime.
    ///
    /// `local` is this device's identity. Only its public bundle is expected
    /// in `directory`.
    pub fn spawn(
        local: DeviceIdentity,
        sessions: Arc<dyn SessionStore>,
        directory: Arc<dyn PreKeyDirectory>,
        channel_capacity: usize,
    ) -> Self {
        let (work, rx) = mpsc::unbounded_channel();
        let channels = CipherChannels::new(channel_capacity);
        let worker = CipherWorker {
            local,
            sessions,
            directory,
            channels: channels.clone(),
        };
        tokio::spawn(worker.run(rx));
        SessionCipherService { work, channels }
    }

    fn submit(&self, work: CipherWork) {
        if self.work.send(work).is_err() {
            warn!("Cipher worker has stopped; dropping request");
        }
    }
}

impl CipherService for SessionCipherService {
    fn encrypt(&self, user_id: UserId, plaintext: Vec<u8>, connection_tag: ConnectionTag) {
        self.submit(CipherWork::Encrypt {
            user_id,
            plaintext,
            connection_tag,
        });
    }

    fn decrypt(&self, address: DeviceAddress, messages: Vec<EncryptedMessageInfo>) {
        self.submit(CipherWork::Decrypt { address, messages });
    }

    fn update_devices(&self, user_id: UserId, info: DeviceMismatchContent) {
        self.submit(CipherWork::UpdateDevices { user_id, info });
    }

    fn clear_devices(&self, user_id: UserId) {
        self.submit(CipherWork::ClearDevices { user_id });
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

struct CipherWorker {
    local: DeviceIdentity,
    sessions: Arc<dyn SessionStore>,
    directory: Arc<dyn PreKeyDirectory>,
    channels: CipherChannels,
}

impl CipherWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<CipherWork>) {
        while let Some(work) = rx.recv().await {
            match work {
                CipherWork::Encrypt {
                    user_id,
                    plaintext,
                    connection_tag,
                } => {
                    let outcome = self.encrypt(user_id, &plaintext).await;
                    self.channels.publish_encryption(EncryptionResult {
                        user_id,
                        connection_tag,
                        outcome,
                    });
                }
                CipherWork::Decrypt { address, messages } => {
                    let result = self.decrypt(address, messages).await;
                    self.channels.publish_decryption(result);
                }
                CipherWork::UpdateDevices { user_id, info } => {
                    let error = self
                        .update_devices(user_id, &info)
                        .await
                        .err()
                        .map(|e| e.to_string());
                    self.channels
                        .publish_device_update(DeviceUpdateResult { user_id, error });
                }
                CipherWork::ClearDevices { user_id } => {
                    self.sessions.delete_user_sessions(user_id);
                    debug!(user = %user_id, "Device sessions cleared");
                }
            }
        }
        debug!("Cipher worker stopped");
    }

    async fn establish_sessions(&self, user_id: UserId) -> Result<usize, CipherError> {
        let bundles = self.directory.fetch_bundles(user_id).await?;
        let mut count = 0;
        for bundle in bundles.iter().filter(|b| b.address != self.local.address()) {
            self.sessions
                .save_session(bundle.address, Session::establish(&self.local, bundle)?);
            count += 1;
        }
        Ok(count)
    }

    async fn encrypt(&self, user_id: UserId, plaintext: &[u8]) -> EncryptionOutcome {
        if self.sessions.device_ids(user_id).is_empty() {
            match self.establish_sessions(user_id).await {
                Ok(0) if user_id == self.local.address().user_id => {
                    return EncryptionOutcome::Ok(Vec::new())
                }
                Ok(0) => return EncryptionOutcome::NoKeyData,
                Ok(_) => {}
                Err(e) => return EncryptionOutcome::UnknownFailure(e.to_string()),
            }
        }

        let mut messages = Vec::new();
        for device_id in self.sessions.device_ids(user_id) {
            let address = DeviceAddress::new(user_id, device_id);
            let Some(session) = self.sessions.session(address) else {
                continue;
            };
            let payload = match encryption::encrypt(&session.key, plaintext) {
                Ok(p) => p,
                Err(e) => return EncryptionOutcome::UnknownFailure(e.to_string()),
            };
            messages.push(MessageData {
                device_id,
                registration_id: session.registration_id,
                payload: EncryptedPackagePayload {
                    is_pre_key: session.fresh,
                    payload,
                },
            });
        }
        EncryptionOutcome::Ok(messages)
    }

    /// Key shared with a sending device: the outbound session key when one
    /// exists, otherwise derived from the sender's published bundle.
    async fn inbound_key(&self, address: DeviceAddress) -> Result<SymmetricKey, CipherError> {
        if let Some(session) = self.sessions.session(address) {
            return Ok(session.key);
        }
        let bundle = self
            .directory
            .fetch_bundle(address)
            .await?
            .ok_or(CipherError::MissingBundle(address))?;
        self.local.session_key(&bundle)
    }

    async fn decrypt(
        &self,
        address: DeviceAddress,
        messages: Vec<EncryptedMessageInfo>,
    ) -> DecryptionResult {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        let key = match self.inbound_key(address).await {
            Ok(key) => key,
            Err(e) => {
                let cause = e.to_string();
                return DecryptionResult {
                    address,
                    succeeded,
                    failed: messages
                        .into_iter()
                        .map(|m| DecryptionFailure {
                            message_id: m.message_id,
                            cause: cause.clone(),
                        })
                        .collect(),
                };
            }
        };

        for message in messages {
            if !message.payload.is_pre_key && !self.sessions.is_known_sender(address) {
                failed.push(DecryptionFailure {
                    message_id: message.message_id,
                    cause: CipherError::NoSession(address).to_string(),
                });
                continue;
            }

            match encryption::decrypt(&key, &message.payload.payload) {
                Ok(data) => {
                    if message.payload.is_pre_key {
                        self.sessions.add_known_sender(address);
                    }
                    succeeded.push(DecryptedMessage {
                        message_id: message.message_id,
                        data,
                    });
                }
                Err(e) => failed.push(DecryptionFailure {
                    message_id: message.message_id,
                    cause: e.to_string(),
                }),
            }
        }

        // The peer answered, so it holds our session; stop flagging pre-key.
        if !succeeded.is_empty() {
            if let Some(mut session) = self.sessions.session(address).filter(|s| s.fresh) {
                session.fresh = false;
                self.sessions.save_session(address, session);
            }
        }

        DecryptionResult {
            address,
            succeeded,
            failed,
        }
    }

    async fn update_devices(
        &self,
        user_id: UserId,
        info: &DeviceMismatchContent,
    ) -> Result<(), CipherError> {
        for device_id in &info.removed {
            self.sessions
                .delete_session(DeviceAddress::new(user_id, *device_id));
        }

        for device_id in info.stale.iter().chain(info.missing.iter()) {
            let address = DeviceAddress::new(user_id, *device_id);
            self.sessions.delete_session(address);
            let bundle = self
                .directory
                .fetch_bundle(address)
                .await?
                .ok_or(CipherError::MissingBundle(address))?;
            self.sessions
                .save_session(address, Session::establish(&self.local, &bundle)?);
        }

        debug!(user = %user_id, "Device sessions refreshed");
        Ok(())
    }
}

// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Sender
//!
//! Outbound messages are persisted to the send queue, then handed to the
//! cipher service one at a time in FIFO order. The encrypted bundle goes to
//! the relay under the connection tag the message was admitted with, and the
//! message is only marked delivered once the relay acknowledges its id.
//!
//! All queue state is owned by a single task. Relay status, relay events and
//! cipher results are observed on their channels; persistence runs on
//! separate tasks that post their completion back.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::error::MessagingError;
use super::events::{DeliveryFailure, MessageUpdateEvent};
use crate::crypto::{CipherService, DeviceUpdateResult, EncryptionOutcome, EncryptionResult};
use crate::relay::{RelayClientEvent, RelayClientManager, RelayStatus};
use crate::storage::{MessageStore, SendQueueEntry, SendQueueStore};
use crate::types::{ConnectionTag, MessageBundle, UserId};
use crate::wire::{DeviceMismatchContent, RelayMessageBundle};

/// A message admitted to the in-memory send queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedSendMessage {
    pub user_id: UserId,
    pub message_id: String,
    pub payload: Vec<u8>,
    pub connection_tag: ConnectionTag,
}

impl QueuedSendMessage {
    fn from_entry(entry: SendQueueEntry, connection_tag: ConnectionTag) -> Self {
        QueuedSendMessage {
            user_id: entry.user_id,
            message_id: entry.message_id,
            payload: entry.payload,
            connection_tag,
        }
    }

    fn is(&self, user_id: UserId, message_id: &str) -> bool {
        self.user_id == user_id && self.message_id == message_id
    }
}

/// Point-in-time view of the sender's queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderSnapshot {
    pub online: bool,
    pub queued: Vec<(UserId, String)>,
    pub in_flight: Option<(UserId, String)>,
    pub awaiting_device_update: bool,
    pub replaying: bool,
}

enum SenderCommand {
    Admit(SendQueueEntry),
    Replay {
        connection_tag: ConnectionTag,
        entries: Result<Vec<SendQueueEntry>, String>,
    },
    RemoveQueued {
        user_id: UserId,
        message_ids: Option<Vec<String>>,
    },
    Inspect(oneshot::Sender<SenderSnapshot>),
    Shutdown,
}

/// Durable side effects, applied in order by a dedicated task.
enum DeliveryWrite {
    Delivered { user_id: UserId, message_id: String },
    Failed { user_id: UserId, message_id: String },
}

/// Handle to the sender task.
#[derive(Clone)]
pub struct MessageSender {
    commands: mpsc::UnboundedSender<SenderCommand>,
    queue_store: Arc<dyn SendQueueStore>,
    updates: broadcast::Sender<MessageUpdateEvent>,
}

impl MessageSender {
    /// Starts the sender task. Must be called within a Tokio runtime.
    pub fn spawn(
        cipher: Arc<dyn CipherService>,
        relay: RelayClientManager,
        queue_store: Arc<dyn SendQueueStore>,
        message_store: Arc<dyn MessageStore>,
        event_capacity: usize,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(event_capacity.max(1));
        let (writes, write_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_delivery_writer(
            write_rx,
            queue_store.clone(),
            message_store,
            updates.clone(),
        ));

        let status = relay.status();
        let relay_events = relay.events();
        let encrypted = cipher.encrypted_messages();
        let device_updates = cipher.device_updates();

        let actor = SenderActor {
            cipher,
            relay,
            queue_store: queue_store.clone(),
            commands: commands.downgrade(),
            writes,
            status: RelayStatus::offline(),
            queue: VecDeque::new(),
            current: None,
            awaiting_device_update: false,
            replaying: false,
        };
        tokio::spawn(actor.run(command_rx, status, relay_events, encrypted, device_updates));

        MessageSender {
            commands,
            queue_store,
            updates,
        }
    }

    /// Persists a message and admits it to the queue.
    ///
    /// Resolves once the message is durable, not once it is delivered. While
    /// the relay is offline the message is only persisted; it is replayed on
    /// the next online transition.
    pub async fn enqueue(
        &self,
        user_id: UserId,
        message_id: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<(), MessagingError> {
        let entry = SendQueueEntry::new(user_id, message_id, payload);
        self.queue_store.add(entry.clone()).await?;
        self.post(SenderCommand::Admit(entry))
    }

    /// Drops messages from the durable and in-memory queues.
    pub async fn remove_queued(
        &self,
        user_id: UserId,
        message_ids: &[String],
    ) -> Result<(), MessagingError> {
        self.queue_store.remove_all(user_id, message_ids).await?;
        self.post(SenderCommand::RemoveQueued {
            user_id,
            message_ids: Some(message_ids.to_vec()),
        })
    }

    /// Drops every queued message for `user_id`.
    pub async fn remove_all_queued(&self, user_id: UserId) -> Result<(), MessagingError> {
        self.queue_store.remove_all_for_user(user_id).await?;
        self.post(SenderCommand::RemoveQueued {
            user_id,
            message_ids: None,
        })
    }

    pub fn updates(&self) -> broadcast::Receiver<MessageUpdateEvent> {
        self.updates.subscribe()
    }

    pub async fn inspect(&self) -> Result<SenderSnapshot, MessagingError> {
        let (tx, rx) = oneshot::channel();
        self.post(SenderCommand::Inspect(tx))?;
        rx.await.map_err(|_| MessagingError::Stopped("message sender"))
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(SenderCommand::Shutdown);
    }

    fn post(&self, command: SenderCommand) -> Result<(), MessagingError> {
        self.commands
            .send(command)
            .map_err(|_| MessagingError::Stopped("message sender"))
    }
}

struct SenderActor {
    cipher: Arc<dyn CipherService>,
    relay: RelayClientManager,
    queue_store: Arc<dyn SendQueueStore>,
    commands: mpsc::WeakUnboundedSender<SenderCommand>,
    writes: mpsc::UnboundedSender<DeliveryWrite>,
    /// Last status observed on the watch channel.
    status: RelayStatus,
    queue: VecDeque<QueuedSendMessage>,
    current: Option<QueuedSendMessage>,
    awaiting_device_update: bool,
    /// Undelivered messages are being loaded for the current connection.
    replaying: bool,
}

impl SenderActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SenderCommand>,
        mut status: watch::Receiver<RelayStatus>,
        mut relay_events: broadcast::Receiver<RelayClientEvent>,
        mut encrypted: broadcast::Receiver<EncryptionResult>,
        mut device_updates: broadcast::Receiver<DeviceUpdateResult>,
    ) {
        let initial = *status.borrow_and_update();
        self.on_status(initial);

        let mut status_open = true;
        let mut events_open = true;
        let mut encrypted_open = true;
        let mut device_updates_open = true;

        loop {
            tokio::select! {
                biased;

                event = relay_events.recv(), if events_open => match event {
                    Ok(event) => self.on_relay_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Sender lagged behind relay events");
                    }
                    Err(broadcast::error::RecvError::Closed) => events_open = false,
                },
                changed = status.changed(), if status_open => match changed {
                    Ok(()) => {
                        let current = *status.borrow_and_update();
                        self.on_status(current);
                    }
                    Err(_) => status_open = false,
                },
                result = encrypted.recv(), if encrypted_open => match result {
                    Ok(result) => self.on_encryption_result(result),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Sender lagged behind encryption results");
                    }
                    Err(broadcast::error::RecvError::Closed) => encrypted_open = false,
                },
                result = device_updates.recv(), if device_updates_open => match result {
                    Ok(result) => self.on_device_update(result),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Sender lagged behind device updates");
                    }
                    Err(broadcast::error::RecvError::Closed) => device_updates_open = false,
                },
                command = commands.recv() => match command {
                    Some(SenderCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
            }
        }
        debug!("Message sender stopped");
    }

    fn on_command(&mut self, command: SenderCommand) {
        match command {
            SenderCommand::Admit(entry) => self.admit(entry),
            SenderCommand::Replay {
                connection_tag,
                entries,
            } => self.on_replay(connection_tag, entries),
            SenderCommand::RemoveQueued {
                user_id,
                message_ids,
            } => {
                self.queue.retain(|queued| {
                    queued.user_id != user_id
                        || message_ids
                            .as_ref()
                            .is_some_and(|ids| !ids.contains(&queued.message_id))
                });
            }
            SenderCommand::Inspect(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SenderCommand::Shutdown => {}
        }
    }

    fn on_status(&mut self, status: RelayStatus) {
        let previous = self.status;
        self.status = status;

        if !status.online {
            if previous.online {
                info!("Relay offline, clearing send queue");
                self.clear();
            }
            return;
        }

        if previous.online && previous.connection_tag == status.connection_tag {
            return;
        }
        if previous.online {
            info!(
                old = %previous.connection_tag,
                new = %status.connection_tag,
                "Relay connection replaced, clearing send queue"
            );
        }
        self.clear();
        self.start_replay(status.connection_tag);
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.current = None;
        self.awaiting_device_update = false;
        self.replaying = false;
    }

    fn start_replay(&mut self, connection_tag: ConnectionTag) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        self.replaying = true;
        let store = self.queue_store.clone();
        tokio::spawn(async move {
            let entries = store.get_undelivered().await.map_err(|e| e.to_string());
            let _ = commands.send(SenderCommand::Replay {
                connection_tag,
                entries,
            });
        });
    }

    fn on_replay(&mut self, connection_tag: ConnectionTag, entries: Result<Vec<SendQueueEntry>, String>) {
        if !self.status.online || self.status.connection_tag != connection_tag {
            debug!(tag = %connection_tag, "Discarding replay for previous connection");
            return;
        }
        self.replaying = false;

        match entries {
            Ok(entries) => {
                info!(count = entries.len(), tag = %connection_tag, "Replaying undelivered messages");
                let admitted = std::mem::take(&mut self.queue);
                for entry in entries {
                    if !self.contains(entry.user_id, &entry.message_id) {
                        self.queue
                            .push_back(QueuedSendMessage::from_entry(entry, connection_tag));
                    }
                }
                for queued in admitted {
                    if !self.contains(queued.user_id, &queued.message_id) {
                        self.queue.push_back(queued);
                    }
                }
            }
            Err(e) => error!(error = %e, "Unable to load undelivered messages"),
        }
        self.process();
    }

    fn admit(&mut self, entry: SendQueueEntry) {
        if !self.status.online {
            debug!(message_id = %entry.message_id, "Relay offline, message will be replayed");
            return;
        }
        if self.contains(entry.user_id, &entry.message_id) {
            debug!(message_id = %entry.message_id, "Message already queued");
            return;
        }
        let tag = self.status.connection_tag;
        self.queue.push_back(QueuedSendMessage::from_entry(entry, tag));
        self.process();
    }

    fn contains(&self, user_id: UserId, message_id: &str) -> bool {
        self.current
            .as_ref()
            .is_some_and(|current| current.is(user_id, message_id))
            || self.queue.iter().any(|queued| queued.is(user_id, message_id))
    }

    /// Submits the head of the queue to the cipher service.
    fn process(&mut self) {
        loop {
            let live = self.relay.current_status();
            if !live.online || self.current.is_some() || self.replaying {
                return;
            }
            let Some(next) = self.queue.pop_front() else {
                debug!("No more messages to send");
                return;
            };
            if next.connection_tag != live.connection_tag {
                debug!(
                    message_id = %next.message_id,
                    tag = %next.connection_tag,
                    current = %live.connection_tag,
                    "Dropping message queued for previous connection"
                );
                continue;
            }

            debug!(message_id = %next.message_id, to = %next.user_id, "Encrypting message");
            self.cipher
                .encrypt(next.user_id, next.payload.clone(), next.connection_tag);
            self.current = Some(next);
            return;
        }
    }

    fn advance(&mut self) {
        self.current = None;
        self.awaiting_device_update = false;
        self.process();
    }

    fn on_encryption_result(&mut self, result: EncryptionResult) {
        let Some(current) = self.current.as_ref() else {
            debug!(to = %result.user_id, "Encryption result with no message in flight");
            return;
        };
        if current.user_id != result.user_id || current.connection_tag != result.connection_tag {
            debug!(
                to = %result.user_id,
                tag = %result.connection_tag,
                "Ignoring encryption result for another message"
            );
            return;
        }

        match result.outcome {
            EncryptionOutcome::Ok(messages) if messages.is_empty() => {
                debug!(message_id = %current.message_id, "No remote devices, message delivered");
                self.write(DeliveryWrite::Delivered {
                    user_id: current.user_id,
                    message_id: current.message_id.clone(),
                });
                self.advance();
            }
            EncryptionOutcome::Ok(messages) => {
                self.relay.send_message(
                    current.connection_tag,
                    current.user_id,
                    RelayMessageBundle { messages },
                    &current.message_id,
                );
            }
            EncryptionOutcome::NoKeyData => {
                warn!(
                    message_id = %current.message_id,
                    to = %current.user_id,
                    "No key data for recipient, dropping message"
                );
                self.cipher.clear_devices(current.user_id);
                self.write(DeliveryWrite::Failed {
                    user_id: current.user_id,
                    message_id: current.message_id.clone(),
                });
                self.advance();
            }
            EncryptionOutcome::UnknownFailure(cause) => {
                error!(
                    message_id = %current.message_id,
                    to = %current.user_id,
                    %cause,
                    "Encryption failed"
                );
                self.advance();
            }
        }
    }

    fn on_relay_event(&mut self, event: RelayClientEvent) {
        match event {
            RelayClientEvent::ServerReceivedMessage { to, message_id, .. } => {
                self.on_server_received(to, message_id)
            }
            RelayClientEvent::DeviceMismatch {
                to,
                message_id,
                info,
            } => self.on_device_mismatch(to, message_id, info),
            RelayClientEvent::InactiveUser { to, message_id } => {
                self.on_inactive_user(to, message_id)
            }
            _ => {}
        }
    }

    fn on_server_received(&mut self, to: UserId, message_id: String) {
        let Some(current) = self.current.take() else {
            error!(%message_id, "Relay acknowledged a message that is not in flight");
            self.advance();
            return;
        };
        if current.message_id != message_id {
            error!(
                expected = %current.message_id,
                received = %message_id,
                "Acknowledged message id does not match message in flight"
            );
        } else {
            debug!(%message_id, %to, "Message received by relay");
            self.write(DeliveryWrite::Delivered {
                user_id: current.user_id,
                message_id,
            });
        }
        self.advance();
    }

    fn on_device_mismatch(&mut self, to: UserId, message_id: String, info: DeviceMismatchContent) {
        match self.current.as_ref() {
            Some(current) if current.message_id == message_id => {
                info!(%message_id, %to, "Device mismatch, updating devices");
                self.awaiting_device_update = true;
                self.cipher.update_devices(to, info);
            }
            Some(current) => {
                error!(
                    expected = %current.message_id,
                    received = %message_id,
                    "Device mismatch for message that is not in flight"
                );
                self.advance();
            }
            None => {
                error!(%message_id, "Device mismatch with no message in flight");
                self.process();
            }
        }
    }

    fn on_inactive_user(&mut self, to: UserId, message_id: String) {
        match self.current.as_ref() {
            Some(current) if current.message_id == message_id => {
                warn!(%message_id, %to, "Recipient is inactive, dropping message");
                self.cipher.clear_devices(current.user_id);
                self.write(DeliveryWrite::Failed {
                    user_id: current.user_id,
                    message_id,
                });
                self.advance();
            }
            _ => debug!(%message_id, "Inactive user report for message not in flight"),
        }
    }

    fn on_device_update(&mut self, result: DeviceUpdateResult) {
        if !self.awaiting_device_update {
            debug!(user = %result.user_id, "Unexpected device update result");
            return;
        }
        let Some(current) = self.current.take() else {
            return;
        };
        if current.user_id != result.user_id {
            debug!(user = %result.user_id, "Device update for another recipient");
            self.current = Some(current);
            return;
        }
        self.awaiting_device_update = false;

        match result.error {
            None => {
                info!(message_id = %current.message_id, "Devices updated, retrying message");
                self.queue.push_front(current);
                self.process();
            }
            Some(e) => {
                error!(
                    message_id = %current.message_id,
                    error = %e,
                    "Unable to update devices"
                );
                self.advance();
            }
        }
    }

    fn write(&self, write: DeliveryWrite) {
        if self.writes.send(write).is_err() {
            error!("Delivery writer stopped");
        }
    }

    fn snapshot(&self) -> SenderSnapshot {
        SenderSnapshot {
            online: self.status.online,
            queued: self
                .queue
                .iter()
                .map(|queued| (queued.user_id, queued.message_id.clone()))
                .collect(),
            in_flight: self
                .current
                .as_ref()
                .map(|current| (current.user_id, current.message_id.clone())),
            awaiting_device_update: self.awaiting_device_update,
            replaying: self.replaying,
        }
    }
}

async fn run_delivery_writer(
    mut writes: mpsc::UnboundedReceiver<DeliveryWrite>,
    queue_store: Arc<dyn SendQueueStore>,
    message_store: Arc<dyn MessageStore>,
    updates: broadcast::Sender<MessageUpdateEvent>,
) {
    while let Some(write) = writes.recv().await {
        match write {
            DeliveryWrite::Delivered {
                user_id,
                message_id,
            } => {
                if let Err(e) = queue_store.remove(user_id, &message_id).await {
                    error!(%message_id, error = %e, "Unable to remove delivered message from queue");
                }
                match message_store.mark_delivered(user_id, &message_id).await {
                    Ok(info) => {
                        let _ = updates.send(MessageUpdateEvent::Delivered(MessageBundle::new(
                            user_id,
                            vec![info],
                        )));
                    }
                    Err(e) => {
                        warn!(%message_id, error = %e, "Unable to mark message delivered");
                    }
                }
            }
            DeliveryWrite::Failed {
                user_id,
                message_id,
            } => {
                if let Err(e) = queue_store.remove(user_id, &message_id).await {
                    error!(%message_id, error = %e, "Unable to remove failed message from queue");
                }
                let _ = updates.send(MessageUpdateEvent::Failed {
                    user_id,
                    message_id,
                    reason: DeliveryFailure::InactiveUser,
                });
            }
        }
    }
}

// INLINE_TEST_REQUIRED: Tests private QueuedSendMessage identity matching used for admission dedupe
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queued_message_identity() {
        let message = QueuedSendMessage::from_entry(
            SendQueueEntry::new(UserId(7), "m1", b"hi".to_vec()),
            ConnectionTag(3),
        );
        assert!(message.is(UserId(7), "m1"));
        assert!(!message.is(UserId(8), "m1"));
        assert!(!message.is(UserId(7), "m2"));
        assert_eq!(message.connection_tag, ConnectionTag(3));
    }
}

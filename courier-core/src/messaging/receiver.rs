// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Receiver
//!
//! Incoming packages are written to the package queue before they are
//! admitted for processing, so a crash never loses a package the relay was
//! told we have. Admitted packages are sorted by timestamp and adjacent
//! packages from the same device form one decryption batch. Exactly one batch
//! is decrypted and stored at a time.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::error::MessagingError;
use super::events::ReceivedGroupEvent;
use crate::crypto::{CipherService, DecryptionResult, EncryptedMessageInfo};
use crate::storage::{MessageStore, PackageQueueStore};
use crate::types::{now_millis, DeviceAddress, MessageBundle, MessageInfo, Package, PackageId};
use crate::wire::{deserialize_message, EncryptedPackagePayload, WireMessage};

/// A decryption batch: consecutive packages from one sender device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedReceivedMessage {
    pub address: DeviceAddress,
    pub messages: Vec<EncryptedMessageInfo>,
}

impl QueuedReceivedMessage {
    fn package_ids(&self) -> impl Iterator<Item = PackageId> + '_ {
        self.messages
            .iter()
            .map(|m| PackageId::new(self.address, m.message_id.clone()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverSnapshot {
    pub queued: Vec<QueuedReceivedMessage>,
    pub in_flight: Option<DeviceAddress>,
}

enum ReceiverCommand {
    Admit(Vec<Package>),
    Stored(DeviceAddress),
    Inspect(oneshot::Sender<ReceiverSnapshot>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Decrypting,
    Storing,
}

/// Handle to the receiver task.
#[derive(Clone)]
pub struct MessageReceiver {
    commands: mpsc::UnboundedSender<ReceiverCommand>,
    package_store: Arc<dyn PackageQueueStore>,
    new_messages: broadcast::Sender<MessageBundle>,
    group_events: broadcast::Sender<ReceivedGroupEvent>,
}

impl MessageReceiver {
    /// Starts the receiver task. Stored text messages are published on
    /// `new_messages`.
    pub fn spawn(
        cipher: Arc<dyn CipherService>,
        package_store: Arc<dyn PackageQueueStore>,
        message_store: Arc<dyn MessageStore>,
        new_messages: broadcast::Sender<MessageBundle>,
        event_capacity: usize,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (group_events, _) = broadcast::channel(event_capacity.max(1));
        let decrypted = cipher.decrypted_messages();

        let actor = ReceiverActor {
            cipher,
            package_store: package_store.clone(),
            message_store,
            new_messages: new_messages.clone(),
            group_events: group_events.clone(),
            commands: commands.downgrade(),
            queue: VecDeque::new(),
            admitted: HashSet::new(),
            current: None,
            phase: Phase::Idle,
        };
        tokio::spawn(actor.run(command_rx, decrypted));

        MessageReceiver {
            commands,
            package_store,
            new_messages,
            group_events,
        }
    }

    /// Persists packages to the package queue, then admits them.
    ///
    /// Only a failure of the durable write is reported; per-package failures
    /// during processing are logged.
    pub async fn process_packages(&self, packages: Vec<Package>) -> Result<(), MessagingError> {
        if packages.is_empty() {
            return Ok(());
        }
        self.package_store.add_packages(&packages).await?;
        self.post(ReceiverCommand::Admit(packages))
    }

    /// Admits packages left in the package queue by a previous run.
    pub async fn init(&self) -> Result<(), MessagingError> {
        let packages = self.package_store.get_queued().await?;
        if !packages.is_empty() {
            info!(count = packages.len(), "Recovering queued packages");
            self.post(ReceiverCommand::Admit(packages))?;
        }
        Ok(())
    }

    pub fn new_messages(&self) -> broadcast::Receiver<MessageBundle> {
        self.new_messages.subscribe()
    }

    pub fn group_events(&self) -> broadcast::Receiver<ReceivedGroupEvent> {
        self.group_events.subscribe()
    }

    pub async fn inspect(&self) -> Result<ReceiverSnapshot, MessagingError> {
        let (tx, rx) = oneshot::channel();
        self.post(ReceiverCommand::Inspect(tx))?;
        rx.await.map_err(|_| MessagingError::Stopped("message receiver"))
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(ReceiverCommand::Shutdown);
    }

    fn post(&self, command: ReceiverCommand) -> Result<(), MessagingError> {
        self.commands
            .send(command)
            .map_err(|_| MessagingError::Stopped("message receiver"))
    }
}

struct ReceiverActor {
    cipher: Arc<dyn CipherService>,
    package_store: Arc<dyn PackageQueueStore>,
    message_store: Arc<dyn MessageStore>,
    new_messages: broadcast::Sender<MessageBundle>,
    group_events: broadcast::Sender<ReceivedGroupEvent>,
    commands: mpsc::WeakUnboundedSender<ReceiverCommand>,
    queue: VecDeque<QueuedReceivedMessage>,
    /// Packages queued or in flight.
    admitted: HashSet<PackageId>,
    current: Option<QueuedReceivedMessage>,
    phase: Phase,
}

/// Outcome of one decrypted batch, written by a separate task.
struct BatchOutcome {
    address: DeviceAddress,
    texts: Vec<MessageInfo>,
    text_ids: Vec<PackageId>,
    group_events: Vec<ReceivedGroupEvent>,
    discarded: Vec<PackageId>,
}

impl ReceiverActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ReceiverCommand>,
        mut decrypted: broadcast::Receiver<DecryptionResult>,
    ) {
        let mut decrypted_open = true;
        loop {
            tokio::select! {
                biased;

                result = decrypted.recv(), if decrypted_open => match result {
                    Ok(result) => self.on_decrypted(result),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Receiver lagged behind decryption results");
                    }
                    Err(broadcast::error::RecvError::Closed) => decrypted_open = false,
                },
                command = commands.recv() => match command {
                    Some(ReceiverCommand::Shutdown) | None => break,
                    Some(ReceiverCommand::Admit(packages)) => self.admit(packages),
                    Some(ReceiverCommand::Stored(address)) => self.on_stored(address),
                    Some(ReceiverCommand::Inspect(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                },
            }
        }
        debug!("Message receiver stopped");
    }

    fn admit(&mut self, mut packages: Vec<Package>) {
        packages.retain(|p| !self.admitted.contains(&p.id));
        packages.sort_by_key(|p| p.timestamp);

        let mut malformed = Vec::new();
        for package in packages {
            let payload = match EncryptedPackagePayload::from_json(&package.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(
                        from = %package.id.address,
                        message_id = %package.id.message_id,
                        error = %e,
                        "Discarding malformed package"
                    );
                    malformed.push(package.id);
                    continue;
                }
            };
            if !self.admitted.insert(package.id.clone()) {
                continue;
            }

            let message = EncryptedMessageInfo {
                message_id: package.id.message_id,
                payload,
            };
            match self.queue.back_mut() {
                Some(last) if last.address == package.id.address => last.messages.push(message),
                _ => self.queue.push_back(QueuedReceivedMessage {
                    address: package.id.address,
                    messages: vec![message],
                }),
            }
        }

        if !malformed.is_empty() {
            let store = self.package_store.clone();
            tokio::spawn(async move {
                if let Err(e) = store.remove_packages(&malformed).await {
                    error!(error = %e, "Unable to remove malformed packages");
                }
            });
        }
        self.process();
    }

    fn process(&mut self) {
        if self.phase != Phase::Idle {
            return;
        }
        let Some(batch) = self.queue.pop_front() else {
            debug!("No more received messages to process");
            return;
        };
        debug!(from = %batch.address, count = batch.messages.len(), "Decrypting batch");
        self.cipher.decrypt(batch.address, batch.messages.clone());
        self.current = Some(batch);
        self.phase = Phase::Decrypting;
    }

    fn on_decrypted(&mut self, result: DecryptionResult) {
        let Some(current) = self.current.as_ref() else {
            debug!(from = %result.address, "Decryption result with no batch in flight");
            return;
        };
        if self.phase != Phase::Decrypting {
            debug!(from = %result.address, "Decryption result while storing batch");
            return;
        }
        if current.address != result.address {
            error!(
                expected = %current.address,
                received = %result.address,
                "Decryption result for another sender"
            );
            self.finish();
            return;
        }

        let address = result.address;
        let received_at = now_millis();
        let mut outcome = BatchOutcome {
            address,
            texts: Vec::new(),
            text_ids: Vec::new(),
            group_events: Vec::new(),
            discarded: Vec::new(),
        };

        for failure in result.failed {
            warn!(
                from = %address,
                message_id = %failure.message_id,
                cause = %failure.cause,
                "Unable to decrypt message"
            );
            outcome
                .discarded
                .push(PackageId::new(address, failure.message_id));
        }

        for decrypted in result.succeeded {
            let id = PackageId::new(address, decrypted.message_id.clone());
            match deserialize_message(&decrypted.data) {
                Ok(WireMessage::Text(text)) if text.group_id.is_none() => {
                    outcome.texts.push(MessageInfo::new_received(
                        decrypted.message_id,
                        text.message,
                        text.timestamp,
                        received_at,
                        0,
                    ));
                    outcome.text_ids.push(id);
                }
                Ok(WireMessage::Text(_)) => {
                    info!(message_id = %decrypted.message_id, "Dropping group text message");
                    outcome.discarded.push(id);
                }
                Ok(WireMessage::GroupEvent(event)) => {
                    outcome.group_events.push(ReceivedGroupEvent {
                        from: address,
                        message_id: decrypted.message_id,
                        event,
                    });
                    outcome.discarded.push(id);
                }
                Ok(other) => {
                    info!(
                        message_id = %decrypted.message_id,
                        kind = other.kind(),
                        "Dropping unhandled message type"
                    );
                    outcome.discarded.push(id);
                }
                Err(e) => {
                    warn!(
                        message_id = %decrypted.message_id,
                        error = %e,
                        "Discarding malformed message"
                    );
                    outcome.discarded.push(id);
                }
            }
        }

        self.phase = Phase::Storing;
        self.store(outcome);
    }

    fn store(&self, outcome: BatchOutcome) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let package_store = self.package_store.clone();
        let message_store = self.message_store.clone();
        let new_messages = self.new_messages.clone();
        let group_events = self.group_events.clone();

        tokio::spawn(async move {
            let BatchOutcome {
                address,
                texts,
                text_ids,
                group_events: events,
                discarded,
            } = outcome;

            for event in events {
                let _ = group_events.send(event);
            }
            if !discarded.is_empty() {
                if let Err(e) = package_store.remove_packages(&discarded).await {
                    error!(error = %e, "Unable to remove processed packages");
                }
            }
            if !texts.is_empty() {
                match message_store
                    .add_received_messages(address.user_id, texts)
                    .await
                {
                    Ok(stored) => {
                        if let Err(e) = package_store.remove_packages(&text_ids).await {
                            error!(error = %e, "Unable to remove stored packages");
                        }
                        if !stored.is_empty() {
                            let _ = new_messages.send(MessageBundle::new(address.user_id, stored));
                        }
                    }
                    Err(e) => {
                        error!(from = %address, error = %e, "Unable to store received messages");
                    }
                }
            }
            let _ = commands.send(ReceiverCommand::Stored(address));
        });
    }

    fn on_stored(&mut self, address: DeviceAddress) {
        if self.phase != Phase::Storing
            || self.current.as_ref().map(|c| c.address) != Some(address)
        {
            debug!(from = %address, "Unexpected storage completion");
            return;
        }
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(batch) = self.current.take() {
            for id in batch.package_ids() {
                self.admitted.remove(&id);
            }
        }
        self.phase = Phase::Idle;
        self.process();
    }

    fn snapshot(&self) -> ReceiverSnapshot {
        ReceiverSnapshot {
            queued: self.queue.iter().cloned().collect(),
            in_flight: self.current.as_ref().map(|c| c.address),
        }
    }
}

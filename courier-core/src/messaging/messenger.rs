// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Messenger Service
//!
//! Entry point for sending and receiving conversation messages. Outgoing
//! messages are stored as sent and queued on the [`MessageSender`]; messages
//! to our own account never touch the network and are echoed back locally.
//! Incoming packages, from the relay or fetched offline, are filtered through
//! [`ContactTrust`] before they reach the [`MessageReceiver`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::MessagingError;
use super::events::{MessageUpdateEvent, ReceivedGroupEvent};
use super::receiver::MessageReceiver;
use super::sender::MessageSender;
use crate::contacts::ContactTrust;
use crate::crypto::CipherService;
use crate::relay::{RelayClientEvent, RelayClientManager};
use crate::storage::{MessageStore, PackageQueueStore, SendQueueStore};
use crate::types::{now_millis, MessageBundle, MessageInfo, Package, PackageId, UserId};
use crate::wire::{serialize_message, TextMessage, WireMessage};

/// Tuning for the messenger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessengerOptions {
    /// Delay between storing a message to self and storing its echo.
    pub self_message_delay: Duration,
    pub event_capacity: usize,
}

impl Default for MessengerOptions {
    fn default() -> Self {
        MessengerOptions {
            self_message_delay: Duration::from_millis(30),
            event_capacity: 256,
        }
    }
}

/// Collaborators of the messenger.
#[derive(Clone)]
pub struct MessengerDeps {
    pub self_id: UserId,
    pub relay: RelayClientManager,
    pub cipher: Arc<dyn CipherService>,
    pub message_store: Arc<dyn MessageStore>,
    pub send_queue: Arc<dyn SendQueueStore>,
    pub package_queue: Arc<dyn PackageQueueStore>,
    pub contacts: Arc<dyn ContactTrust>,
}

#[derive(Clone)]
pub struct MessengerService {
    inner: Arc<MessengerInner>,
}

struct MessengerInner {
    self_id: UserId,
    sender: MessageSender,
    receiver: MessageReceiver,
    message_store: Arc<dyn MessageStore>,
    package_queue: Arc<dyn PackageQueueStore>,
    contacts: Arc<dyn ContactTrust>,
    new_messages: broadcast::Sender<MessageBundle>,
    self_message_delay: Duration,
    relay_task: Mutex<Option<JoinHandle<()>>>,
}

impl MessengerService {
    /// Starts the sender, the receiver and the relay listener. Must be called
    /// within a Tokio runtime.
    pub fn start(deps: MessengerDeps, options: MessengerOptions) -> Self {
        let (new_messages, _) = broadcast::channel(options.event_capacity.max(1));

        let sender = MessageSender::spawn(
            deps.cipher.clone(),
            deps.relay.clone(),
            deps.send_queue.clone(),
            deps.message_store.clone(),
            options.event_capacity,
        );
        let receiver = MessageReceiver::spawn(
            deps.cipher.clone(),
            deps.package_queue.clone(),
            deps.message_store.clone(),
            new_messages.clone(),
            options.event_capacity,
        );

        let service = MessengerService {
            inner: Arc::new(MessengerInner {
                self_id: deps.self_id,
                sender,
                receiver,
                message_store: deps.message_store,
                package_queue: deps.package_queue,
                contacts: deps.contacts,
                new_messages,
                self_message_delay: options.self_message_delay,
                relay_task: Mutex::new(None),
            }),
        };

        let task = tokio::spawn(listen_to_relay(
            Arc::downgrade(&service.inner),
            deps.relay.clone(),
        ));
        *service.inner.relay_task.lock() = Some(task);
        service
    }

    /// Recovers packages queued by a previous run.
    pub async fn init(&self) -> Result<(), MessagingError> {
        self.inner.receiver.init().await
    }

    /// Stores `message` as sent to `user_id` and queues it for delivery.
    ///
    /// Returns the stored record once the message is durably queued.
    pub async fn send_message_to(
        &self,
        user_id: UserId,
        message: impl Into<String>,
    ) -> Result<MessageInfo, MessagingError> {
        let message = message.into();
        if user_id == self.inner.self_id {
            return self.send_to_self(message).await;
        }

        let info = self
            .inner
            .message_store
            .add_message(user_id, MessageInfo::new_sent(message, 0))
            .await?;
        let payload = serialize_message(&WireMessage::Text(TextMessage::new(
            info.timestamp,
            info.message.clone(),
            None,
        )))?;
        self.inner
            .sender
            .enqueue(user_id, info.id.clone(), payload)
            .await?;
        Ok(info)
    }

    async fn send_to_self(&self, message: String) -> Result<MessageInfo, MessagingError> {
        let self_id = self.inner.self_id;
        let sent = self
            .inner
            .message_store
            .add_message(self_id, MessageInfo::new_self_sent(message, 0))
            .await?;

        let message_store = self.inner.message_store.clone();
        let new_messages = self.inner.new_messages.clone();
        let delay = self.inner.self_message_delay;
        let text = sent.message.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let now = now_millis();
            let echo = MessageInfo::new_received(uuid::Uuid::new_v4().to_string(), text, now, now, 0);
            match message_store.add_message(self_id, echo).await {
                Ok(received) => {
                    let _ = new_messages.send(MessageBundle::new(self_id, vec![received]));
                }
                Err(e) => error!(error = %e, "Unable to store message to self"),
            }
        });

        Ok(sent)
    }

    /// Filters packages through the contact list and hands the rest to the
    /// receiver. Resolves once the accepted packages are durably queued.
    pub async fn process_packages(&self, packages: Vec<Package>) -> Result<(), MessagingError> {
        self.inner.process_packages(packages).await
    }

    /// Processes packages fetched from the relay's offline store.
    pub async fn add_offline_messages(&self, packages: Vec<Package>) -> Result<(), MessagingError> {
        self.inner.process_packages(packages).await
    }

    pub async fn last_messages(
        &self,
        user_id: UserId,
        start: usize,
        count: usize,
    ) -> Result<Vec<MessageInfo>, MessagingError> {
        Ok(self
            .inner
            .message_store
            .last_messages(user_id, start, count)
            .await?)
    }

    /// Deletes messages and cancels their delivery if still queued.
    pub async fn delete_messages(
        &self,
        user_id: UserId,
        message_ids: &[String],
    ) -> Result<(), MessagingError> {
        self.inner
            .message_store
            .delete_messages(user_id, message_ids)
            .await?;
        self.inner.sender.remove_queued(user_id, message_ids).await
    }

    pub async fn delete_all_messages(&self, user_id: UserId) -> Result<(), MessagingError> {
        self.inner.message_store.delete_all_messages(user_id).await?;
        self.inner.sender.remove_all_queued(user_id).await
    }

    pub fn new_messages(&self) -> broadcast::Receiver<MessageBundle> {
        self.inner.new_messages.subscribe()
    }

    pub fn message_updates(&self) -> broadcast::Receiver<MessageUpdateEvent> {
        self.inner.sender.updates()
    }

    pub fn group_events(&self) -> broadcast::Receiver<ReceivedGroupEvent> {
        self.inner.receiver.group_events()
    }

    pub fn sender(&self) -> &MessageSender {
        &self.inner.sender
    }

    pub fn receiver(&self) -> &MessageReceiver {
        &self.inner.receiver
    }

    pub fn shutdown(&self) {
        if let Some(task) = self.inner.relay_task.lock().take() {
            task.abort();
        }
        self.inner.sender.shutdown();
        self.inner.receiver.shutdown();
    }
}

impl MessengerInner {
    async fn process_packages(&self, packages: Vec<Package>) -> Result<(), MessagingError> {
        let packages = self.filter_blacklisted(packages).await?;
        let packages = self.fetch_missing_contact_info(packages).await?;
        if packages.is_empty() {
            return Ok(());
        }
        self.receiver.process_packages(packages).await
    }

    async fn filter_blacklisted(
        &self,
        mut packages: Vec<Package>,
    ) -> Result<Vec<Package>, MessagingError> {
        if packages.is_empty() {
            return Ok(packages);
        }
        let users: HashSet<UserId> = packages.iter().map(Package::user_id).collect();
        let allowed = self.contacts.allow_messages_from(users.clone()).await?;

        let rejected: Vec<&UserId> = users.difference(&allowed).collect();
        if !rejected.is_empty() {
            info!(?rejected, "Rejecting messages from users");
        }
        packages.retain(|p| allowed.contains(&p.user_id()));
        Ok(packages)
    }

    async fn fetch_missing_contact_info(
        &self,
        mut packages: Vec<Package>,
    ) -> Result<Vec<Package>, MessagingError> {
        if packages.is_empty() {
            return Ok(packages);
        }
        let users: HashSet<UserId> = packages.iter().map(Package::user_id).collect();
        let invalid = self.contacts.add_missing_contacts(users).await?;
        if !invalid.is_empty() {
            warn!(?invalid, "Dropping messages from unknown users");
            packages.retain(|p| !invalid.contains(&p.user_id()));
            let users: Vec<UserId> = invalid.into_iter().collect();
            self.package_queue.remove_packages_for_users(&users).await?;
        }
        Ok(packages)
    }
}

/// Queues messages pushed by the relay and acknowledges each one once it is
/// durably queued.
async fn listen_to_relay(inner: std::sync::Weak<MessengerInner>, relay: RelayClientManager) {
    let mut events = relay.events();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Messenger lagged behind relay events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let RelayClientEvent::ReceivedMessage {
            from,
            message_id,
            content,
        } = event
        else {
            continue;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };

        debug!(%from, %message_id, "Message pushed by relay");
        let package = Package::new(PackageId::new(from, message_id.clone()), now_millis(), content);
        match inner.process_packages(vec![package]).await {
            Ok(()) => relay.send_message_received_ack(&message_id),
            Err(e) => error!(%message_id, error = %e, "Unable to queue pushed message, not acknowledging"),
        }
    }
}

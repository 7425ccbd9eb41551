// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Persistence contracts used by the delivery pipeline and contact sync.
//!
//! Every call is atomic. Implementations decide where the data lives; the
//! pipeline treats them as the single source of truth.

use std::collections::HashSet;

use async_trait::async_trait;

use super::{Storage, StorageError};
use crate::types::{
    AddressBookUpdate, ContactInfo, MessageInfo, Package, PackageId, PlatformContact, UserId,
};

/// A durable outbound message awaiting a relay acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendQueueEntry {
    pub user_id: UserId,
    pub message_id: String,
    /// Serialized plaintext envelope.
    pub payload: Vec<u8>,
}

impl SendQueueEntry {
    pub fn new(user_id: UserId, message_id: impl Into<String>, payload: Vec<u8>) -> Self {
        SendQueueEntry {
            user_id,
            message_id: message_id.into(),
            payload,
        }
    }
}

/// Conversation message log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn add_message(
        &self,
        user_id: UserId,
        message: MessageInfo,
    ) -> Result<MessageInfo, StorageError>;

    /// Stores received messages, skipping ids already present. Returns the
    /// records that were newly written.
    async fn add_received_messages(
        &self,
        user_id: UserId,
        messages: Vec<MessageInfo>,
    ) -> Result<Vec<MessageInfo>, StorageError>;

    async fn mark_delivered(
        &self,
        user_id: UserId,
        message_id: &str,
    ) -> Result<MessageInfo, StorageError>;

    /// Newest first, skipping `start` messages.
    async fn last_messages(
        &self,
        user_id: UserId,
        start: usize,
        count: usize,
    ) -> Result<Vec<MessageInfo>, StorageError>;

    async fn delete_messages(
        &self,
        user_id: UserId,
        message_ids: &[String],
    ) -> Result<(), StorageError>;

    async fn delete_all_messages(&self, user_id: UserId) -> Result<(), StorageError>;
}

/// Outbound messages not yet acknowledged by the relay.
#[async_trait]
pub trait SendQueueStore: Send + Sync {
    async fn add(&self, entry: SendQueueEntry) -> Result<(), StorageError>;

    async fn add_all(&self, entries: Vec<SendQueueEntry>) -> Result<(), StorageError>;

    async fn remove(&self, user_id: UserId, message_id: &str) -> Result<(), StorageError>;

    async fn remove_all(&self, user_id: UserId, message_ids: &[String])
        -> Result<(), StorageError>;

    async fn remove_all_for_user(&self, user_id: UserId) -> Result<(), StorageError>;

    /// All entries in insertion order.
    async fn get_undelivered(&self) -> Result<Vec<SendQueueEntry>, StorageError>;
}

/// Received packages waiting for decryption.
#[async_trait]
pub trait PackageQueueStore: Send + Sync {
    /// Adds packages, ignoring ids already queued.
    async fn add_packages(&self, packages: &[Package]) -> Result<(), StorageError>;

    async fn remove_packages(&self, ids: &[PackageId]) -> Result<(), StorageError>;

    async fn remove_packages_for_users(&self, users: &[UserId]) -> Result<(), StorageError>;

    /// All queued packages ordered by timestamp.
    async fn get_queued(&self) -> Result<Vec<Package>, StorageError>;
}

/// Local address book.
///
/// Local edits (`add`, `add_all`, `update` with a new level, `remove`) also
/// record a pending remote update. Changes pulled from the remote address
/// book go through `apply_remote_diff` and record nothing.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Returns false if the contact already existed.
    async fn add(&self, contact: ContactInfo) -> Result<bool, StorageError>;

    /// Returns the contacts that were newly added.
    async fn add_all(&self, contacts: Vec<ContactInfo>) -> Result<Vec<ContactInfo>, StorageError>;

    async fn update(&self, contact: ContactInfo) -> Result<(), StorageError>;

    /// Returns false if there was nothing to remove.
    async fn remove(&self, user_id: UserId) -> Result<bool, StorageError>;

    async fn get(&self, user_id: UserId) -> Result<Option<ContactInfo>, StorageError>;

    async fn get_all(&self) -> Result<Vec<ContactInfo>, StorageError>;

    /// Returns the subset of `ids` with a local record.
    async fn exists(&self, ids: &HashSet<UserId>) -> Result<HashSet<UserId>, StorageError>;

    /// Returns the subset of `ids` not marked as blocked. Unknown ids pass.
    async fn filter_blocked(&self, ids: &HashSet<UserId>)
        -> Result<HashSet<UserId>, StorageError>;

    /// Platform contacts matching no local contact by email or phone number.
    async fn find_missing(
        &self,
        platform_contacts: Vec<PlatformContact>,
    ) -> Result<Vec<PlatformContact>, StorageError>;

    async fn apply_remote_diff(
        &self,
        new_contacts: Vec<ContactInfo>,
        updates: Vec<AddressBookUpdate>,
    ) -> Result<(), StorageError>;

    async fn get_remote_updates(&self) -> Result<Vec<AddressBookUpdate>, StorageError>;

    async fn remove_remote_updates(&self, user_ids: &[UserId]) -> Result<(), StorageError>;
}

#[async_trait]
impl MessageStore for Storage {
    async fn add_message(
        &self,
        user_id: UserId,
        message: MessageInfo,
    ) -> Result<MessageInfo, StorageError> {
        self.insert_message(user_id, &message)?;
        Ok(message)
    }

    async fn add_received_messages(
        &self,
        user_id: UserId,
        messages: Vec<MessageInfo>,
    ) -> Result<Vec<MessageInfo>, StorageError> {
        self.insert_received_messages(user_id, messages)
    }

    async fn mark_delivered(
        &self,
        user_id: UserId,
        message_id: &str,
    ) -> Result<MessageInfo, StorageError> {
        self.mark_message_delivered(user_id, message_id)
    }

    async fn last_messages(
        &self,
        user_id: UserId,
        start: usize,
        count: usize,
    ) -> Result<Vec<MessageInfo>, StorageError> {
        self.load_last_messages(user_id, start, count)
    }

    async fn delete_messages(
        &self,
        user_id: UserId,
        message_ids: &[String],
    ) -> Result<(), StorageError> {
        self.remove_messages(user_id, message_ids)
    }

    async fn delete_all_messages(&self, user_id: UserId) -> Result<(), StorageError> {
        self.remove_all_messages(user_id)
    }
}

#[async_trait]
impl SendQueueStore for Storage {
    async fn add(&self, entry: SendQueueEntry) -> Result<(), StorageError> {
        self.enqueue_sends(std::slice::from_ref(&entry))
    }

    async fn add_all(&self, entries: Vec<SendQueueEntry>) -> Result<(), StorageError> {
        self.enqueue_sends(&entries)
    }

    async fn remove(&self, user_id: UserId, message_id: &str) -> Result<(), StorageError> {
        self.dequeue_sends(user_id, &[message_id.to_string()])
    }

    async fn remove_all(
        &self,
        user_id: UserId,
        message_ids: &[String],
    ) -> Result<(), StorageError> {
        self.dequeue_sends(user_id, message_ids)
    }

    async fn remove_all_for_user(&self, user_id: UserId) -> Result<(), StorageError> {
        self.dequeue_sends_for_user(user_id)
    }

    async fn get_undelivered(&self) -> Result<Vec<SendQueueEntry>, StorageError> {
        self.load_send_queue()
    }
}

#[async_trait]
impl PackageQueueStore for Storage {
    async fn add_packages(&self, packages: &[Package]) -> Result<(), StorageError> {
        self.enqueue_packages(packages)
    }

    async fn remove_packages(&self, ids: &[PackageId]) -> Result<(), StorageError> {
        self.dequeue_packages(ids)
    }

    async fn remove_packages_for_users(&self, users: &[UserId]) -> Result<(), StorageError> {
        self.dequeue_packages_for_users(users)
    }

    async fn get_queued(&self) -> Result<Vec<Package>, StorageError> {
        self.load_package_queue()
    }
}

#[async_trait]
impl ContactStore for Storage {
    async fn add(&self, contact: ContactInfo) -> Result<bool, StorageError> {
        Ok(!self.insert_contacts(vec![contact], true)?.is_empty())
    }

    async fn add_all(&self, contacts: Vec<ContactInfo>) -> Result<Vec<ContactInfo>, StorageError> {
        self.insert_contacts(contacts, true)
    }

    async fn update(&self, contact: ContactInfo) -> Result<(), StorageError> {
        self.update_contact(&contact)
    }

    async fn remove(&self, user_id: UserId) -> Result<bool, StorageError> {
        self.delete_contact(user_id)
    }

    async fn get(&self, user_id: UserId) -> Result<Option<ContactInfo>, StorageError> {
        self.load_contact(user_id)
    }

    async fn get_all(&self) -> Result<Vec<ContactInfo>, StorageError> {
        self.load_contacts()
    }

    async fn exists(&self, ids: &HashSet<UserId>) -> Result<HashSet<UserId>, StorageError> {
        self.existing_contacts(ids)
    }

    async fn filter_blocked(
        &self,
        ids: &HashSet<UserId>,
    ) -> Result<HashSet<UserId>, StorageError> {
        self.unblocked_contacts(ids)
    }

    async fn find_missing(
        &self,
        platform_contacts: Vec<PlatformContact>,
    ) -> Result<Vec<PlatformContact>, StorageError> {
        self.missing_platform_contacts(platform_contacts)
    }

    async fn apply_remote_diff(
        &self,
        new_contacts: Vec<ContactInfo>,
        updates: Vec<AddressBookUpdate>,
    ) -> Result<(), StorageError> {
        self.apply_remote_contact_diff(new_contacts, &updates)
    }

    async fn get_remote_updates(&self) -> Result<Vec<AddressBookUpdate>, StorageError> {
        self.load_remote_updates()
    }

    async fn remove_remote_updates(&self, user_ids: &[UserId]) -> Result<(), StorageError> {
        self.clear_remote_updates(user_ids)
    }
}

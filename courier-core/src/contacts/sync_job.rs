// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Contact Sync Job
//!
//! Runs the steps a [`ContactSyncJobDescription`] asks for, in order:
//! platform contact lookup, push of pending local changes, pull of the
//! remote address book. The first failing step fails the job.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::client::{AddressBookClient, ContactClient, PlatformContacts};
use super::error::ContactsError;
use super::job::{ContactSyncJob, ContactSyncJobDescription, ContactSyncJobFactory};
use crate::storage::ContactStore;
use crate::types::{AddressBookUpdate, AllowedMessageLevel, UserId};

#[derive(Clone)]
pub struct ContactSyncJobImpl {
    contact_client: Arc<dyn ContactClient>,
    address_book: Arc<dyn AddressBookClient>,
    store: Arc<dyn ContactStore>,
    platform_contacts: Arc<dyn PlatformContacts>,
}

impl ContactSyncJobImpl {
    pub fn new(
        contact_client: Arc<dyn ContactClient>,
        address_book: Arc<dyn AddressBookClient>,
        store: Arc<dyn ContactStore>,
        platform_contacts: Arc<dyn PlatformContacts>,
    ) -> Self {
        ContactSyncJobImpl {
            contact_client,
            address_book,
            store,
            platform_contacts,
        }
    }

    async fn sync_platform_contacts(&self) -> Result<(), ContactsError> {
        info!("Beginning platform contact sync");

        let contacts = self.platform_contacts.fetch_contacts().await?;
        let missing = self.store.find_missing(contacts).await?;
        if missing.is_empty() {
            debug!("No missing platform contacts");
            return Ok(());
        }

        debug!(count = missing.len(), "Looking up missing platform contacts");
        let found = self.contact_client.find_platform_contacts(missing).await?;
        let contacts = found
            .into_iter()
            .map(|c| c.with_message_level(AllowedMessageLevel::All))
            .collect();
        let added = self.store.add_all(contacts).await?;
        info!(count = added.len(), "Added platform contacts");
        Ok(())
    }

    async fn update_remote(&self) -> Result<(), ContactsError> {
        info!("Beginning remote address book update");

        let updates = self.store.get_remote_updates().await?;
        if updates.is_empty() {
            info!("No pending updates");
            return Ok(());
        }

        let user_ids: Vec<UserId> = updates.iter().map(|u| u.user_id).collect();
        debug!(?user_ids, "Pushing address book updates");
        self.address_book.update(updates).await?;
        self.store.remove_remote_updates(&user_ids).await?;
        Ok(())
    }

    async fn sync_remote(&self) -> Result<(), ContactsError> {
        debug!("Beginning remote address book sync");

        let updates = self.address_book.get().await?;
        if updates.is_empty() {
            return Ok(());
        }

        let levels: HashMap<UserId, Option<AllowedMessageLevel>> = updates
            .iter()
            .map(|u| (u.user_id, u.allowed_message_level))
            .collect();
        let all: HashSet<UserId> = levels.keys().copied().collect();
        let existing = self.store.exists(&all).await?;

        // A removal for a contact we never had needs no lookup.
        let missing: Vec<UserId> = levels
            .iter()
            .filter(|(id, level)| level.is_some() && !existing.contains(*id))
            .map(|(id, _)| *id)
            .collect();
        debug!(?existing, ?missing, "Applying remote address book");

        let new_contacts = if missing.is_empty() {
            Vec::new()
        } else {
            self.contact_client
                .fetch_contact_info_by_id(missing)
                .await?
                .into_iter()
                .filter_map(|c| match levels.get(&c.id) {
                    Some(Some(level)) => Some(c.with_message_level(*level)),
                    _ => None,
                })
                .collect()
        };

        let existing_updates: Vec<AddressBookUpdate> = updates
            .into_iter()
            .filter(|u| existing.contains(&u.user_id))
            .collect();

        self.store
            .apply_remote_diff(new_contacts, existing_updates)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ContactSyncJob for ContactSyncJobImpl {
    async fn run(&self, description: ContactSyncJobDescription) -> Result<(), ContactsError> {
        if description.local_sync {
            self.sync_platform_contacts().await?;
        }
        if description.update_remote {
            self.update_remote().await?;
        }
        if description.remote_sync {
            self.sync_remote().await?;
        }
        Ok(())
    }
}

impl ContactSyncJobFactory for ContactSyncJobImpl {
    fn create(&self) -> Box<dyn ContactSyncJob> {
        Box::new(self.clone())
    }
}

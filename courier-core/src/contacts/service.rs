// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Contacts Service
//!
//! Local contact edits and trust queries. Every store access runs as an
//! operation on the [`ContactJobRunner`], so it never overlaps a sync job.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::client::ContactClient;
use super::error::ContactsError;
use super::job::ContactSyncEvent;
use super::runner::ContactJobRunner;
use crate::storage::ContactStore;
use crate::types::{AllowedMessageLevel, ContactInfo, UserId};

/// Contact list changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactEvent {
    Added(Vec<ContactInfo>),
    Removed(Vec<ContactInfo>),
    Updated(Vec<ContactInfo>),
    /// Users the contact service does not know.
    InvalidContacts(HashSet<UserId>),
    /// A job that pulls the remote address book started or finished.
    Sync(bool),
}

/// Trust decisions for incoming messages.
#[async_trait]
pub trait ContactTrust: Send + Sync {
    /// Returns the subset of `users` whose messages may be processed.
    async fn allow_messages_from(
        &self,
        users: HashSet<UserId>,
    ) -> Result<HashSet<UserId>, ContactsError>;

    /// Fetches and stores contact info for users without a local record.
    /// Returns the ids the contact service does not know.
    async fn add_missing_contacts(
        &self,
        users: HashSet<UserId>,
    ) -> Result<HashSet<UserId>, ContactsError>;
}

#[derive(Clone)]
pub struct ContactsService {
    runner: ContactJobRunner,
    store: Arc<dyn ContactStore>,
    client: Arc<dyn ContactClient>,
    events: broadcast::Sender<ContactEvent>,
}

impl ContactsService {
    /// Must be called within a Tokio runtime.
    pub fn new(
        runner: ContactJobRunner,
        store: Arc<dyn ContactStore>,
        client: Arc<dyn ContactClient>,
        event_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        tokio::spawn(forward_sync_events(runner.events(), events.clone()));

        ContactsService {
            runner,
            store,
            client,
            events,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<ContactEvent> {
        self.events.subscribe()
    }

    pub fn runner(&self) -> &ContactJobRunner {
        &self.runner
    }

    /// Returns false if the contact already existed.
    pub async fn add_contact(&self, contact: ContactInfo) -> Result<bool, ContactsError> {
        let store = self.store.clone();
        let runner = self.runner.clone();
        let events = self.events.clone();

        self.runner
            .run_operation(move || async move {
                let added = store.add(contact.clone()).await?;
                if added {
                    runner.with_current_job(|job| {
                        job.do_update_remote();
                    });
                    let _ = events.send(ContactEvent::Added(vec![contact]));
                }
                Ok(added)
            })
            .await
    }

    /// Returns false if there was no such contact.
    pub async fn remove_contact(&self, contact: ContactInfo) -> Result<bool, ContactsError> {
        let store = self.store.clone();
        let runner = self.runner.clone();
        let events = self.events.clone();

        self.runner
            .run_operation(move || async move {
                let removed = store.remove(contact.id).await?;
                if removed {
                    runner.with_current_job(|job| {
                        job.do_update_remote();
                    });
                    let _ = events.send(ContactEvent::Removed(vec![contact]));
                }
                Ok(removed)
            })
            .await
    }

    pub async fn update_contact(&self, contact: ContactInfo) -> Result<(), ContactsError> {
        let store = self.store.clone();
        let runner = self.runner.clone();
        let events = self.events.clone();

        self.runner
            .run_operation(move || async move {
                let previous = store.get(contact.id).await?;
                store.update(contact.clone()).await?;
                let level_changed = previous
                    .map(|p| p.allowed_message_level != contact.allowed_message_level)
                    .unwrap_or(false);
                if level_changed {
                    runner.with_current_job(|job| {
                        job.do_update_remote();
                    });
                }
                let _ = events.send(ContactEvent::Updated(vec![contact]));
                Ok(())
            })
            .await
    }

    pub async fn get_contact(&self, user_id: UserId) -> Result<Option<ContactInfo>, ContactsError> {
        let store = self.store.clone();
        self.runner
            .run_operation(move || async move { Ok(store.get(user_id).await?) })
            .await
    }

    pub async fn get_contacts(&self) -> Result<Vec<ContactInfo>, ContactsError> {
        let store = self.store.clone();
        self.runner
            .run_operation(move || async move { Ok(store.get_all().await?) })
            .await
    }

    pub fn do_local_sync(&self) {
        self.runner.with_current_job(|job| {
            job.do_local_sync();
        });
    }

    pub fn do_remote_sync(&self) {
        self.runner.with_current_job(|job| {
            job.do_remote_sync();
        });
    }

    pub fn do_update_remote(&self) {
        self.runner.with_current_job(|job| {
            job.do_update_remote();
        });
    }

    pub fn shutdown(&self) {
        self.runner.shutdown();
    }
}

#[async_trait]
impl ContactTrust for ContactsService {
    async fn allow_messages_from(
        &self,
        users: HashSet<UserId>,
    ) -> Result<HashSet<UserId>, ContactsError> {
        let store = self.store.clone();
        self.runner
            .run_operation(move || async move { Ok(store.filter_blocked(&users).await?) })
            .await
    }

    async fn add_missing_contacts(
        &self,
        users: HashSet<UserId>,
    ) -> Result<HashSet<UserId>, ContactsError> {
        if users.is_empty() {
            return Ok(HashSet::new());
        }

        let store = self.store.clone();
        let client = self.client.clone();
        let runner = self.runner.clone();
        let events = self.events.clone();

        self.runner
            .run_operation(move || async move {
                let existing = store.exists(&users).await?;
                let missing: Vec<UserId> = users.difference(&existing).copied().collect();
                if missing.is_empty() {
                    return Ok(HashSet::new());
                }

                debug!(?missing, "Fetching missing contact info");
                let found = client
                    .fetch_contact_info_by_id(missing.clone())
                    .await
                    .map_err(|e| {
                        error!(error = %e, "Unable to fetch contact info");
                        e
                    })?;

                let found_ids: HashSet<UserId> = found.iter().map(|c| c.id).collect();
                let invalid: HashSet<UserId> = missing
                    .into_iter()
                    .filter(|id| !found_ids.contains(id))
                    .collect();

                let contacts = found
                    .into_iter()
                    .map(|c| c.with_message_level(AllowedMessageLevel::GroupOnly))
                    .collect();
                let added = store.add_all(contacts).await?;
                if !added.is_empty() {
                    info!(count = added.len(), "Added missing contacts");
                    runner.with_current_job(|job| {
                        job.do_update_remote();
                    });
                    let _ = events.send(ContactEvent::Added(added));
                }
                if !invalid.is_empty() {
                    info!(?invalid, "Unknown users");
                    let _ = events.send(ContactEvent::InvalidContacts(invalid.clone()));
                }
                Ok(invalid)
            })
            .await
    }
}

async fn forward_sync_events(
    mut sync_events: broadcast::Receiver<ContactSyncEvent>,
    events: broadcast::Sender<ContactEvent>,
) {
    loop {
        match sync_events.recv().await {
            Ok(event) if event.description().remote_sync => {
                let _ = events.send(ContactEvent::Sync(event.is_running()));
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

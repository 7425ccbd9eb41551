// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Test Helpers
//!
//! Polling helpers and recording fakes for the remote contact services and
//! sync jobs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Semaphore};

use courier_core::contacts::{
    AddressBookClient, ContactClient, ContactSyncJob, ContactSyncJobDescription,
    ContactSyncJobFactory, ContactsError, PlatformContacts,
};
use courier_core::types::{AddressBookUpdate, ContactInfo, PlatformContact, UserId};

const POLL_INTERVAL: Duration = Duration::from_millis(5);
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls `condition` until it holds. Returns false on timeout.
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    condition()
}

/// Like [`wait_until`] for conditions that have to await.
pub async fn wait_for<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + POLL_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    condition().await
}

/// Receives the next broadcast event, failing the test on timeout.
pub async fn next_event<T: Clone>(events: &mut broadcast::Receiver<T>) -> T {
    tokio::time::timeout(POLL_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Asserts that no event arrives within `window`.
pub async fn assert_no_event<T: Clone + std::fmt::Debug>(
    events: &mut broadcast::Receiver<T>,
    window: Duration,
) {
    if let Ok(Ok(event)) = tokio::time::timeout(window, events.recv()).await {
        panic!("unexpected event: {:?}", event);
    }
}

// ============================================================
// Contact Services
// ============================================================

/// Contact lookup service backed by a fixed directory of users.
#[derive(Default)]
pub struct FakeContactClient {
    directory: Mutex<HashMap<UserId, ContactInfo>>,
    fetch_calls: Mutex<Vec<Vec<UserId>>>,
    platform_calls: Mutex<Vec<Vec<PlatformContact>>>,
    fail: Mutex<bool>,
}

impl FakeContactClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(contacts: Vec<ContactInfo>) -> Self {
        let client = Self::new();
        for contact in contacts {
            client.register(contact);
        }
        client
    }

    pub fn register(&self, contact: ContactInfo) {
        self.directory.lock().insert(contact.id, contact);
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }

    pub fn fetch_calls(&self) -> Vec<Vec<UserId>> {
        self.fetch_calls.lock().clone()
    }

    pub fn platform_calls(&self) -> Vec<Vec<PlatformContact>> {
        self.platform_calls.lock().clone()
    }

    fn check(&self) -> Result<(), ContactsError> {
        if *self.fail.lock() {
            Err(ContactsError::Remote("contact service unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContactClient for FakeContactClient {
    async fn find_platform_contacts(
        &self,
        contacts: Vec<PlatformContact>,
    ) -> Result<Vec<ContactInfo>, ContactsError> {
        self.platform_calls.lock().push(contacts.clone());
        self.check()?;
        let directory = self.directory.lock();
        let mut found: Vec<ContactInfo> = directory
            .values()
            .filter(|info| {
                contacts.iter().any(|p| {
                    p.emails.contains(&info.email)
                        || info
                            .phone_number
                            .as_ref()
                            .is_some_and(|phone| p.phone_numbers.contains(phone))
                })
            })
            .cloned()
            .collect();
        found.sort_by_key(|c| c.id);
        Ok(found)
    }

    async fn fetch_contact_info_by_id(
        &self,
        ids: Vec<UserId>,
    ) -> Result<Vec<ContactInfo>, ContactsError> {
        self.fetch_calls.lock().push(ids.clone());
        self.check()?;
        let directory = self.directory.lock();
        Ok(ids
            .iter()
            .filter_map(|id| directory.get(id).cloned())
            .collect())
    }
}

/// Remote address book holding a fixed diff and recording pushes.
#[derive(Default)]
pub struct FakeAddressBook {
    remote: Mutex<Vec<AddressBookUpdate>>,
    pushed: Mutex<Vec<Vec<AddressBookUpdate>>>,
    fail_updates: Mutex<bool>,
}

impl FakeAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_remote(&self, updates: Vec<AddressBookUpdate>) {
        *self.remote.lock() = updates;
    }

    pub fn set_failing_updates(&self, fail: bool) {
        *self.fail_updates.lock() = fail;
    }

    pub fn pushed(&self) -> Vec<Vec<AddressBookUpdate>> {
        self.pushed.lock().clone()
    }
}

#[async_trait]
impl AddressBookClient for FakeAddressBook {
    async fn get(&self) -> Result<Vec<AddressBookUpdate>, ContactsError> {
        Ok(self.remote.lock().clone())
    }

    async fn update(&self, updates: Vec<AddressBookUpdate>) -> Result<(), ContactsError> {
        if *self.fail_updates.lock() {
            return Err(ContactsError::Remote("address book unavailable".into()));
        }
        self.pushed.lock().push(updates);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePlatformContacts {
    contacts: Mutex<Vec<PlatformContact>>,
}

impl FakePlatformContacts {
    pub fn new(contacts: Vec<PlatformContact>) -> Self {
        FakePlatformContacts {
            contacts: Mutex::new(contacts),
        }
    }
}

#[async_trait]
impl PlatformContacts for FakePlatformContacts {
    async fn fetch_contacts(&self) -> Result<Vec<PlatformContact>, ContactsError> {
        Ok(self.contacts.lock().clone())
    }
}

// ============================================================
// Sync Jobs
// ============================================================

/// How a [`ScriptedJobFactory`] job ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeed,
    Fail,
    Panic,
}

/// Job factory that records every run and, when gated, holds each job until
/// the test releases it.
pub struct ScriptedJobFactory {
    runs: Arc<Mutex<Vec<ContactSyncJobDescription>>>,
    outcome: Arc<Mutex<JobOutcome>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedJobFactory {
    pub fn new() -> Self {
        ScriptedJobFactory {
            runs: Arc::new(Mutex::new(Vec::new())),
            outcome: Arc::new(Mutex::new(JobOutcome::Succeed)),
            gate: None,
        }
    }

    /// Jobs block until [`ScriptedJobFactory::release`] is called.
    pub fn gated() -> Self {
        ScriptedJobFactory {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new()
        }
    }

    pub fn set_outcome(&self, outcome: JobOutcome) {
        *self.outcome.lock() = outcome;
    }

    /// Lets one blocked job finish.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn runs(&self) -> Vec<ContactSyncJobDescription> {
        self.runs.lock().clone()
    }
}

impl Default for ScriptedJobFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactSyncJobFactory for ScriptedJobFactory {
    fn create(&self) -> Box<dyn ContactSyncJob> {
        Box::new(ScriptedJob {
            runs: self.runs.clone(),
            outcome: self.outcome.clone(),
            gate: self.gate.clone(),
        })
    }
}

struct ScriptedJob {
    runs: Arc<Mutex<Vec<ContactSyncJobDescription>>>,
    outcome: Arc<Mutex<JobOutcome>>,
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl ContactSyncJob for ScriptedJob {
    async fn run(&self, description: ContactSyncJobDescription) -> Result<(), ContactsError> {
        self.runs.lock().push(description);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        let outcome = *self.outcome.lock();
        match outcome {
            JobOutcome::Succeed => Ok(()),
            JobOutcome::Fail => Err(ContactsError::Remote("sync failed".into())),
            JobOutcome::Panic => panic!("sync job panicked"),
        }
    }
}

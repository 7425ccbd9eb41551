// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for contacts::service
//! Local edits, trust queries, missing contact lookup and sync status events.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::fixtures::*;
use common::helpers::{assert_no_event, next_event, FakeContactClient, ScriptedJobFactory};
use courier_core::contacts::{ContactEvent, ContactJobRunner, ContactTrust, ContactsError, ContactsService};
use courier_core::storage::{ContactStore, Storage, StorageError};
use courier_core::types::{AddressBookUpdate, AllowedMessageLevel, UserId};
use tokio::sync::watch;

struct Harness {
    storage: Arc<Storage>,
    client: Arc<FakeContactClient>,
    factory: Arc<ScriptedJobFactory>,
    service: ContactsService,
    network: watch::Sender<bool>,
}

impl Harness {
    fn new() -> Self {
        let storage = test_storage();
        let client = Arc::new(FakeContactClient::with_users(vec![
            contact(BOB, AllowedMessageLevel::All),
            contact(CAROL, AllowedMessageLevel::All),
        ]));
        let factory = Arc::new(ScriptedJobFactory::new());
        let (network, network_rx) = watch::channel(false);
        let runner = ContactJobRunner::spawn(factory.clone(), network_rx, 16);
        let service = ContactsService::new(runner, storage.clone(), client.clone(), 16);

        Harness {
            storage,
            client,
            factory,
            service,
            network,
        }
    }

    async fn queued_update_remote(&self) -> bool {
        self.service
            .runner()
            .inspect()
            .await
            .unwrap()
            .queued_job
            .is_some_and(|job| job.update_remote)
    }
}

fn users(ids: &[UserId]) -> HashSet<UserId> {
    ids.iter().copied().collect()
}

// === Local Edits ===

#[tokio::test]
async fn test_add_contact_publishes_and_requests_remote_update() {
    let harness = Harness::new();
    let mut events = harness.service.events();
    let bob = contact(BOB, AllowedMessageLevel::All);

    assert!(harness.service.add_contact(bob.clone()).await.unwrap());

    assert_eq!(next_event(&mut events).await, ContactEvent::Added(vec![bob.clone()]));
    assert!(harness.queued_update_remote().await);
    assert_eq!(
        harness.storage.get_remote_updates().await.unwrap(),
        vec![AddressBookUpdate::level(BOB, AllowedMessageLevel::All)]
    );
}

#[tokio::test]
async fn test_adding_existing_contact_is_a_no_op() {
    let harness = Harness::new();
    let bob = contact(BOB, AllowedMessageLevel::All);
    harness.service.add_contact(bob.clone()).await.unwrap();
    let mut events = harness.service.events();

    assert!(!harness.service.add_contact(bob).await.unwrap());
    assert_no_event(&mut events, Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_remove_contact() {
    let harness = Harness::new();
    let bob = contact(BOB, AllowedMessageLevel::All);
    harness.service.add_contact(bob.clone()).await.unwrap();
    let mut events = harness.service.events();

    assert!(harness.service.remove_contact(bob.clone()).await.unwrap());
    assert_eq!(next_event(&mut events).await, ContactEvent::Removed(vec![bob.clone()]));
    assert_eq!(harness.service.get_contact(BOB).await.unwrap(), None);
    assert_eq!(
        harness.storage.get_remote_updates().await.unwrap(),
        vec![AddressBookUpdate::removed(BOB)]
    );

    assert!(!harness.service.remove_contact(bob).await.unwrap());
}

#[tokio::test]
async fn test_level_change_requests_remote_update() {
    let harness = Harness::new();
    ContactStore::add(&*harness.storage, contact(BOB, AllowedMessageLevel::All))
        .await
        .unwrap();
    harness.storage.remove_remote_updates(&[BOB]).await.unwrap();
    let mut events = harness.service.events();

    let blocked = contact(BOB, AllowedMessageLevel::Blocked);
    harness.service.update_contact(blocked.clone()).await.unwrap();

    assert_eq!(next_event(&mut events).await, ContactEvent::Updated(vec![blocked]));
    assert!(harness.queued_update_remote().await);
}

#[tokio::test]
async fn test_rename_does_not_request_remote_update() {
    let harness = Harness::new();
    ContactStore::add(&*harness.storage, contact(BOB, AllowedMessageLevel::All))
        .await
        .unwrap();
    harness.storage.remove_remote_updates(&[BOB]).await.unwrap();
    let mut events = harness.service.events();

    let mut renamed = contact(BOB, AllowedMessageLevel::All);
    renamed.name = "Robert".into();
    harness.service.update_contact(renamed.clone()).await.unwrap();

    assert_eq!(next_event(&mut events).await, ContactEvent::Updated(vec![renamed]));
    assert!(!harness.queued_update_remote().await);
    assert!(harness.storage.get_remote_updates().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_unknown_contact_fails() {
    let harness = Harness::new();

    let result = harness
        .service
        .update_contact(contact(BOB, AllowedMessageLevel::All))
        .await;
    assert!(matches!(
        result,
        Err(ContactsError::Storage(StorageError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_get_contacts_sorted_by_name() {
    let harness = Harness::new();
    let mut zed = contact(CAROL, AllowedMessageLevel::All);
    zed.name = "Zed".into();
    let mut anna = contact(BOB, AllowedMessageLevel::All);
    anna.name = "Anna".into();
    harness.service.add_contact(zed.clone()).await.unwrap();
    harness.service.add_contact(anna.clone()).await.unwrap();

    assert_eq!(harness.service.get_contacts().await.unwrap(), vec![anna, zed]);
}

// === Trust ===

#[tokio::test]
async fn test_allow_messages_from_filters_blocked() {
    let harness = Harness::new();
    ContactStore::add(&*harness.storage, contact(BOB, AllowedMessageLevel::All))
        .await
        .unwrap();
    ContactStore::add(&*harness.storage, contact(CAROL, AllowedMessageLevel::GroupOnly))
        .await
        .unwrap();
    ContactStore::add(&*harness.storage, contact(MALLORY, AllowedMessageLevel::Blocked))
        .await
        .unwrap();
    let stranger = UserId(5);

    let allowed = harness
        .service
        .allow_messages_from(users(&[BOB, CAROL, MALLORY, stranger]))
        .await
        .unwrap();
    assert_eq!(allowed, users(&[BOB, CAROL, stranger]));
}

#[tokio::test]
async fn test_add_missing_contacts_fetches_only_unknown_users() {
    let harness = Harness::new();
    ContactStore::add(&*harness.storage, contact(BOB, AllowedMessageLevel::All))
        .await
        .unwrap();
    let stranger = UserId(5);
    let mut events = harness.service.events();

    let invalid = harness
        .service
        .add_missing_contacts(users(&[BOB, CAROL, stranger]))
        .await
        .unwrap();

    assert_eq!(invalid, users(&[stranger]));
    let fetched: HashSet<UserId> = harness.client.fetch_calls()[0].iter().copied().collect();
    assert_eq!(fetched, users(&[CAROL, stranger]));

    assert_eq!(
        next_event(&mut events).await,
        ContactEvent::Added(vec![contact(CAROL, AllowedMessageLevel::GroupOnly)])
    );
    assert_eq!(
        next_event(&mut events).await,
        ContactEvent::InvalidContacts(users(&[stranger]))
    );
    assert!(harness.queued_update_remote().await);
}

#[tokio::test]
async fn test_add_missing_contacts_skips_known_users() {
    let harness = Harness::new();
    ContactStore::add(&*harness.storage, contact(BOB, AllowedMessageLevel::All))
        .await
        .unwrap();

    let invalid = harness
        .service
        .add_missing_contacts(users(&[BOB]))
        .await
        .unwrap();
    assert!(invalid.is_empty());

    assert!(harness
        .service
        .add_missing_contacts(HashSet::new())
        .await
        .unwrap()
        .is_empty());
    assert!(harness.client.fetch_calls().is_empty());
}

#[tokio::test]
async fn test_add_missing_contacts_propagates_lookup_failure() {
    let harness = Harness::new();
    harness.client.set_failing(true);

    let result = harness.service.add_missing_contacts(users(&[CAROL])).await;
    assert!(matches!(result, Err(ContactsError::Remote(_))));
    assert_eq!(harness.service.get_contact(CAROL).await.unwrap(), None);
}

// === Sync Requests ===

#[tokio::test]
async fn test_remote_sync_reports_sync_status() {
    let harness = Harness::new();
    let mut events = harness.service.events();

    harness.service.do_remote_sync();
    harness.network.send(true).unwrap();

    assert_eq!(next_event(&mut events).await, ContactEvent::Sync(true));
    assert_eq!(next_event(&mut events).await, ContactEvent::Sync(false));
    assert!(harness.factory.runs()[0].remote_sync);
}

#[tokio::test]
async fn test_local_sync_has_no_sync_status() {
    let harness = Harness::new();
    let mut events = harness.service.events();
    let mut sync_events = harness.service.runner().events();

    harness.service.do_local_sync();
    harness.network.send(true).unwrap();

    next_event(&mut sync_events).await;
    next_event(&mut sync_events).await;
    assert_no_event(&mut events, Duration::from_millis(50)).await;
    assert!(harness.factory.runs()[0].local_sync);
}

#[tokio::test]
async fn test_sync_requests_merge_into_one_job() {
    let harness = Harness::new();
    let mut sync_events = harness.service.runner().events();

    harness.service.do_local_sync();
    harness.service.do_update_remote();
    harness.service.do_remote_sync();
    harness.network.send(true).unwrap();

    next_event(&mut sync_events).await;
    next_event(&mut sync_events).await;
    let runs = harness.factory.runs();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].local_sync && runs[0].update_remote && runs[0].remote_sync);
}

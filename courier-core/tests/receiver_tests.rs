// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for messaging::receiver
//! Durable admission, per-device batching, crash recovery and the handling
//! of undecryptable or unsupported packages.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::fixtures::*;
use common::helpers::{assert_no_event, next_event, wait_for, wait_until};
use courier_core::crypto::{DecryptedMessage, DecryptionFailure, DecryptionResult, MockCipherService};
use courier_core::messaging::MessageReceiver;
use courier_core::storage::{MessageStore, PackageQueueStore, Storage};
use courier_core::types::{DeviceAddress, MessageBundle, Package, PackageId};
use courier_core::wire::{
    serialize_message, EncryptedPackagePayload, GroupEventMessage, TextMessage, WireMessage,
};
use courier_core::SymmetricKey;
use tempfile::TempDir;
use tokio::sync::broadcast;

struct Harness {
    storage: Arc<Storage>,
    cipher: Arc<MockCipherService>,
    receiver: MessageReceiver,
    new_messages: broadcast::Receiver<MessageBundle>,
}

impl Harness {
    fn with_storage(storage: Arc<Storage>, cipher: MockCipherService) -> Self {
        let cipher = Arc::new(cipher);
        let (new_messages_tx, new_messages) = broadcast::channel(64);
        let receiver = MessageReceiver::spawn(
            cipher.clone(),
            storage.clone(),
            storage.clone(),
            new_messages_tx,
            64,
        );
        Harness {
            storage,
            cipher,
            receiver,
            new_messages,
        }
    }

    fn loopback() -> Self {
        Self::with_storage(test_storage(), MockCipherService::loopback())
    }

    fn manual() -> Self {
        Self::with_storage(test_storage(), MockCipherService::new())
    }

    fn decrypt_calls(&self) -> Vec<(DeviceAddress, Vec<String>)> {
        self.cipher
            .decrypt_calls()
            .into_iter()
            .map(|(address, messages)| {
                (
                    address,
                    messages.into_iter().map(|m| m.message_id).collect(),
                )
            })
            .collect()
    }

    async fn queued_ids(&self) -> Vec<String> {
        self.storage
            .get_queued()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id.message_id)
            .collect()
    }

    /// Waits until the package queue is empty.
    async fn wait_drained(&self) {
        let storage = self.storage.clone();
        assert!(
            wait_for(|| {
                let storage = storage.clone();
                async move { storage.get_queued().await.unwrap().is_empty() }
            })
            .await
        );
    }

    async fn wait_idle(&self) {
        let receiver = self.receiver.clone();
        assert!(
            wait_for(|| {
                let receiver = receiver.clone();
                async move {
                    let snapshot = receiver.inspect().await.unwrap();
                    snapshot.in_flight.is_none() && snapshot.queued.is_empty()
                }
            })
            .await
        );
    }
}

fn succeed(from: DeviceAddress, packages: &[&Package]) -> DecryptionResult {
    DecryptionResult {
        address: from,
        succeeded: packages
            .iter()
            .map(|p| DecryptedMessage {
                message_id: p.id.message_id.clone(),
                data: EncryptedPackagePayload::from_json(&p.payload)
                    .unwrap()
                    .payload,
            })
            .collect(),
        failed: Vec::new(),
    }
}

// === Admission ===

#[tokio::test]
async fn test_packages_are_durable_before_processing() {
    let harness = Harness::manual();
    let package = text_package(address(BOB, 1), "m1", 100, "hello");

    harness
        .receiver
        .process_packages(vec![package.clone()])
        .await
        .unwrap();

    assert_eq!(harness.storage.get_queued().await.unwrap(), vec![package]);
    assert!(wait_until(|| harness.decrypt_calls().len() == 1).await);
}

#[tokio::test]
async fn test_empty_input_is_noop() {
    let harness = Harness::manual();
    harness.receiver.process_packages(Vec::new()).await.unwrap();
    assert!(harness.storage.get_queued().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_adjacent_packages_from_one_device_share_a_batch() {
    let harness = Harness::manual();
    let bob = address(BOB, 1);
    let carol = address(CAROL, 1);
    let a = text_package(bob, "a", 1, "a");
    let b = text_package(bob, "b", 2, "b");
    let c = text_package(carol, "c", 3, "c");
    let d = text_package(bob, "d", 4, "d");

    harness
        .receiver
        .process_packages(vec![d.clone(), c.clone(), b.clone(), a.clone()])
        .await
        .unwrap();

    assert!(wait_until(|| harness.decrypt_calls().len() == 1).await);
    assert_eq!(
        harness.decrypt_calls()[0],
        (bob, vec!["a".to_string(), "b".to_string()])
    );

    let snapshot = harness.receiver.inspect().await.unwrap();
    assert_eq!(snapshot.in_flight, Some(bob));
    let queued: Vec<DeviceAddress> = snapshot.queued.iter().map(|q| q.address).collect();
    assert_eq!(queued, vec![carol, bob]);
}

#[tokio::test]
async fn test_one_batch_at_a_time() {
    let mut harness = Harness::manual();
    let bob = address(BOB, 1);
    let carol = address(CAROL, 1);
    let a = text_package(bob, "a", 1, "from bob");
    let c = text_package(carol, "c", 2, "from carol");

    harness
        .receiver
        .process_packages(vec![a.clone(), c.clone()])
        .await
        .unwrap();
    assert!(wait_until(|| harness.decrypt_calls().len() == 1).await);

    harness.cipher.publish_decryption(succeed(bob, &[&a]));
    let bundle = next_event(&mut harness.new_messages).await;
    assert_eq!(bundle.user_id, BOB);
    assert_eq!(bundle.messages[0].message, "from bob");

    assert!(wait_until(|| harness.decrypt_calls().len() == 2).await);
    assert_eq!(harness.decrypt_calls()[1], (carol, vec!["c".to_string()]));
}

#[tokio::test]
async fn test_duplicate_package_not_admitted_twice() {
    let harness = Harness::manual();
    let package = text_package(address(BOB, 1), "m1", 100, "hello");

    harness
        .receiver
        .process_packages(vec![package.clone()])
        .await
        .unwrap();
    harness
        .receiver
        .process_packages(vec![package.clone()])
        .await
        .unwrap();

    let snapshot = harness.receiver.inspect().await.unwrap();
    assert!(snapshot.queued.is_empty());
    assert_eq!(harness.decrypt_calls().len(), 1);
}

// === Storing ===

#[tokio::test]
async fn test_text_message_stored_and_published() {
    let mut harness = Harness::loopback();
    let package = text_package(address(BOB, 2), "m1", 1234, "hello bob here");

    harness
        .receiver
        .process_packages(vec![package])
        .await
        .unwrap();

    let bundle = next_event(&mut harness.new_messages).await;
    assert_eq!(bundle.user_id, BOB);
    assert_eq!(bundle.messages.len(), 1);
    let message = &bundle.messages[0];
    assert_eq!(message.id, "m1");
    assert_eq!(message.message, "hello bob here");
    assert_eq!(message.timestamp, 1234);
    assert!(!message.is_sent);
    assert!(message.received_timestamp > 0);

    assert_eq!(
        harness.storage.last_messages(BOB, 0, 10).await.unwrap(),
        bundle.messages
    );
    harness.wait_drained().await;
}

#[tokio::test]
async fn test_redelivered_message_is_not_published_again() {
    let mut harness = Harness::loopback();
    let package = text_package(address(BOB, 1), "m1", 1, "once");

    harness
        .receiver
        .process_packages(vec![package.clone()])
        .await
        .unwrap();
    next_event(&mut harness.new_messages).await;
    harness.wait_idle().await;

    harness
        .receiver
        .process_packages(vec![package])
        .await
        .unwrap();
    assert_no_event(&mut harness.new_messages, Duration::from_millis(100)).await;
    assert_eq!(harness.storage.last_messages(BOB, 0, 10).await.unwrap().len(), 1);
    harness.wait_drained().await;
}

#[tokio::test]
async fn test_undecryptable_package_is_discarded() {
    let mut harness = Harness::manual();
    let bob = address(BOB, 1);
    let bad = text_package(bob, "bad", 1, "poison");
    let good = text_package(bob, "good", 2, "fine");

    harness
        .receiver
        .process_packages(vec![bad.clone(), good.clone()])
        .await
        .unwrap();
    assert!(wait_until(|| harness.decrypt_calls().len() == 1).await);

    let mut result = succeed(bob, &[&good]);
    result.failed.push(DecryptionFailure {
        message_id: "bad".into(),
        cause: "bad mac".into(),
    });
    harness.cipher.publish_decryption(result);

    let bundle = next_event(&mut harness.new_messages).await;
    assert_eq!(bundle.messages.len(), 1);
    assert_eq!(bundle.messages[0].id, "good");
    harness.wait_drained().await;
}

#[tokio::test]
async fn test_malformed_payload_is_discarded_without_decrypting() {
    let mut harness = Harness::loopback();
    let bob = address(BOB, 1);
    let broken = malformed_package(bob, "broken", 1);
    let fine = text_package(bob, "fine", 2, "fine");

    harness
        .receiver
        .process_packages(vec![broken, fine])
        .await
        .unwrap();

    let bundle = next_event(&mut harness.new_messages).await;
    assert_eq!(bundle.messages[0].id, "fine");
    let decrypted: Vec<String> = harness
        .decrypt_calls()
        .into_iter()
        .flat_map(|(_, ids)| ids)
        .collect();
    assert_eq!(decrypted, vec!["fine".to_string()]);
    harness.wait_drained().await;
}

#[tokio::test]
async fn test_group_event_is_published_not_stored() {
    let harness = Harness::loopback();
    let mut events = harness.receiver.group_events();
    let event = GroupEventMessage::Part { id: "g1".into() };
    let package = group_event_package(address(BOB, 1), "g-msg", 1, event.clone());

    harness
        .receiver
        .process_packages(vec![package])
        .await
        .unwrap();

    let received = next_event(&mut events).await;
    assert_eq!(received.from, address(BOB, 1));
    assert_eq!(received.message_id, "g-msg");
    assert_eq!(received.event, event);
    harness.wait_idle().await;
    assert!(harness.storage.last_messages(BOB, 0, 10).await.unwrap().is_empty());
    harness.wait_drained().await;
}

#[tokio::test]
async fn test_group_text_is_dropped() {
    let mut harness = Harness::loopback();
    let bytes = serialize_message(&WireMessage::Text(TextMessage::new(
        1,
        "to the group",
        Some("g1".into()),
    )))
    .unwrap();
    let package = Package::new(
        PackageId::new(address(BOB, 1), "gt"),
        1,
        loopback_payload(&bytes),
    );

    harness
        .receiver
        .process_packages(vec![package])
        .await
        .unwrap();

    harness.wait_idle().await;
    assert_no_event(&mut harness.new_messages, Duration::from_millis(50)).await;
    harness.wait_drained().await;
}

#[tokio::test]
async fn test_result_for_other_sender_releases_batch() {
    let harness = Harness::manual();
    let bob = address(BOB, 1);
    let carol = address(CAROL, 1);
    let a = text_package(bob, "a", 1, "a");
    let c = text_package(carol, "c", 2, "c");

    harness
        .receiver
        .process_packages(vec![a.clone(), c])
        .await
        .unwrap();
    assert!(wait_until(|| harness.decrypt_calls().len() == 1).await);

    harness
        .cipher
        .publish_decryption(succeed(address(MALLORY, 1), &[&a]));
    assert!(wait_until(|| harness.decrypt_calls().len() == 2).await);
    // The unprocessed package stays queued for the next start.
    assert!(harness.queued_ids().await.contains(&"a".to_string()));
}

// === Recovery ===

#[tokio::test]
async fn test_init_recovers_packages_after_restart() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("courier.db");
    let key = SymmetricKey::generate().unwrap();

    {
        let storage = Arc::new(Storage::open(&path, key.clone()).unwrap());
        let harness = Harness::with_storage(storage, MockCipherService::new());
        harness
            .receiver
            .process_packages(vec![text_package(address(BOB, 1), "m1", 5, "survivor")])
            .await
            .unwrap();
        harness.receiver.shutdown();
    }

    let storage = Arc::new(Storage::open(&path, key).unwrap());
    let mut harness = Harness::with_storage(storage, MockCipherService::loopback());
    harness.receiver.init().await.unwrap();

    let bundle = next_event(&mut harness.new_messages).await;
    assert_eq!(bundle.messages[0].message, "survivor");
    harness.wait_drained().await;
}

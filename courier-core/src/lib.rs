// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Courier Core Library
//!
//! End-to-end encrypted message delivery pipeline: durable send and receive
//! queues, relay connection management and contact synchronization.
//! All cryptographic operations use audited crates (`ring`,
//! `chacha20poly1305`).

pub mod api;
pub mod contacts;
pub mod crypto;
pub mod logging;
pub mod messaging;
pub mod relay;
pub mod storage;
pub mod types;
pub mod wire;

pub use api::{Courier, CourierBuilder, CourierConfig, CourierError, CourierResult};
pub use contacts::{
    AddressBookClient, ContactClient, ContactEvent, ContactJobRunner, ContactSyncEvent,
    ContactSyncJobDescription, ContactTrust, ContactsError, ContactsService, PlatformContacts,
};
pub use crypto::{CipherService, MockCipherService, SessionCipherService, SymmetricKey};
pub use messaging::{
    MessageReceiver, MessageSender, MessageUpdateEvent, MessagingError, MessengerService,
};
pub use relay::{MockRelayClientFactory, RelayClientEvent, RelayClientManager, RelayStatus};
pub use storage::{Storage, StorageError};
pub use types::{
    AllowedMessageLevel, ConnectionTag, ContactInfo, DeviceAddress, MessageBundle, MessageInfo,
    Package, PackageId, UserCredentials, UserId,
};

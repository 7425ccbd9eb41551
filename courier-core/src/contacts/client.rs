// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Remote Contact Services
//!
//! Interfaces to the contact lookup service, the remote address book and the
//! device's own address book. Authentication is the implementor's concern.

use async_trait::async_trait;

use super::error::ContactsError;
use crate::types::{AddressBookUpdate, ContactInfo, PlatformContact, UserId};

/// Looks up registered users.
#[async_trait]
pub trait ContactClient: Send + Sync {
    /// Registered users matching any email or phone number of the given
    /// platform contacts.
    async fn find_platform_contacts(
        &self,
        contacts: Vec<PlatformContact>,
    ) -> Result<Vec<ContactInfo>, ContactsError>;

    /// Contact info for the given ids. Unknown ids are omitted.
    async fn fetch_contact_info_by_id(
        &self,
        ids: Vec<UserId>,
    ) -> Result<Vec<ContactInfo>, ContactsError>;
}

/// The account's address book as stored on the server.
#[async_trait]
pub trait AddressBookClient: Send + Sync {
    async fn get(&self) -> Result<Vec<AddressBookUpdate>, ContactsError>;

    async fn update(&self, updates: Vec<AddressBookUpdate>) -> Result<(), ContactsError>;
}

/// The device's address book.
#[async_trait]
pub trait PlatformContacts: Send + Sync {
    async fn fetch_contacts(&self) -> Result<Vec<PlatformContact>, ContactsError>;
}

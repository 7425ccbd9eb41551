// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Contacts Module
//!
//! Local contact list, trust filtering for incoming messages and the
//! synchronization of contacts with the platform address book and the
//! account's remote address book.

mod client;
mod error;
mod job;
mod runner;
mod service;
mod sync_job;

pub use client::{AddressBookClient, ContactClient, PlatformContacts};
pub use error::ContactsError;
pub use job::{ContactSyncEvent, ContactSyncJob, ContactSyncJobDescription, ContactSyncJobFactory};
pub use runner::{ContactJobRunner, RunnerSnapshot};
pub use service::{ContactEvent, ContactTrust, ContactsService};
pub use sync_job::ContactSyncJobImpl;

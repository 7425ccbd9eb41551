// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Contact sync job description and contracts.

use async_trait::async_trait;

use super::error::ContactsError;

/// What the next sync job should do.
///
/// Requests made before a job starts are merged into one description.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ContactSyncJobDescription {
    /// Look up registered users among the platform contacts.
    pub local_sync: bool,
    /// Pull the remote address book.
    pub remote_sync: bool,
    /// Push pending local changes to the remote address book.
    pub update_remote: bool,
}

impl ContactSyncJobDescription {
    pub fn do_local_sync(&mut self) -> &mut Self {
        self.local_sync = true;
        self
    }

    pub fn do_remote_sync(&mut self) -> &mut Self {
        self.remote_sync = true;
        self
    }

    pub fn do_update_remote(&mut self) -> &mut Self {
        self.update_remote = true;
        self
    }

    pub fn merge(&mut self, other: &ContactSyncJobDescription) {
        self.local_sync |= other.local_sync;
        self.remote_sync |= other.remote_sync;
        self.update_remote |= other.update_remote;
    }

    pub fn is_empty(&self) -> bool {
        !(self.local_sync || self.remote_sync || self.update_remote)
    }
}

/// Published by the job runner around each sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactSyncEvent {
    Begin(ContactSyncJobDescription),
    End {
        description: ContactSyncJobDescription,
        succeeded: bool,
    },
}

impl ContactSyncEvent {
    pub fn description(&self) -> &ContactSyncJobDescription {
        match self {
            ContactSyncEvent::Begin(description) => description,
            ContactSyncEvent::End { description, .. } => description,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContactSyncEvent::Begin(_))
    }
}

#[async_trait]
pub trait ContactSyncJob: Send + Sync {
    async fn run(&self, description: ContactSyncJobDescription) -> Result<(), ContactsError>;
}

/// Creates one job instance per dispatch.
pub trait ContactSyncJobFactory: Send + Sync {
    fn create(&self) -> Box<dyn ContactSyncJob>;
}

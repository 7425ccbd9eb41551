// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Contacts error types.

use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum ContactsError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A remote contact or address book request failed.
    #[error("remote request failed: {0}")]
    Remote(String),

    #[error("platform contacts unavailable: {0}")]
    Platform(String),

    /// The operation was dropped before it completed, usually because it
    /// panicked or the runner stopped.
    #[error("operation aborted")]
    Aborted,

    #[error("contact job runner has stopped")]
    Stopped,
}

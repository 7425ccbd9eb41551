// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Messaging error types.

use thiserror::Error;

use crate::contacts::ContactsError;
use crate::storage::StorageError;
use crate::wire::WireError;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("wire format error: {0}")]
    Wire(#[from] WireError),

    #[error("contacts error: {0}")]
    Contacts(#[from] ContactsError),

    /// The component's task has shut down.
    #[error("{0} has stopped")]
    Stopped(&'static str),
}

// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! API Error Types
//!
//! Unified error type for the Courier API layer.

use thiserror::Error;

use crate::contacts::ContactsError;
use crate::crypto::EncryptionError;
use crate::messaging::MessagingError;
use crate::relay::RelayError;
use crate::storage::StorageError;

/// Unified error type for Courier operations.
#[derive(Error, Debug)]
pub enum CourierError {
    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Sending or receiving messages failed.
    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// Contact operation failed.
    #[error("contacts error: {0}")]
    Contacts(#[from] ContactsError),

    /// Relay connection failed.
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    /// Cryptographic operation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] EncryptionError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A required component was not provided to the builder.
    #[error("missing component: {0}")]
    MissingComponent(&'static str),
}

/// Result type for Courier operations.
pub type CourierResult<T> = Result<T, CourierError>;

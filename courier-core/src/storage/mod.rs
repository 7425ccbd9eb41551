// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Persistent Storage Module
//!
//! Durable stores for conversation messages, the outbound send queue, the
//! inbound package queue, and contacts. The delivery pipeline only talks to
//! the traits in [`traits`]; [`Storage`] is the SQLite implementation, with
//! message bodies and queued payloads encrypted at rest.

mod contacts;
mod error;
mod messages;
mod package_queue;
mod send_queue;

pub mod migration;
pub mod traits;

pub use error::StorageError;
pub use traits::{ContactStore, MessageStore, PackageQueueStore, SendQueueEntry, SendQueueStore};

use std::path::Path;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection};

use crate::crypto::{self, SymmetricKey};

/// SQLite-based storage implementation.
///
/// Each public operation runs under the connection lock, so every call is
/// atomic with respect to the others.
pub struct Storage {
    conn: Mutex<Connection>,
    /// Key sealing message bodies and queued payloads.
    encryption_key: SymmetricKey,
}

impl Storage {
    /// Opens or creates a storage database at the given path.
    pub fn open<P: AsRef<Path>>(
        path: P,
        encryption_key: SymmetricKey,
    ) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?, encryption_key)
    }

    /// Creates an in-memory storage (for testing).
    pub fn in_memory(encryption_key: SymmetricKey) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?, encryption_key)
    }

    fn with_connection(
        mut conn: Connection,
        encryption_key: SymmetricKey,
    ) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migration::MigrationRunner::run(&mut conn, &migration::all_migrations())?;
        Ok(Storage {
            conn: Mutex::new(conn),
            encryption_key,
        })
    }

    /// Returns the current schema version.
    pub fn schema_version(&self) -> Result<u32, StorageError> {
        migration::MigrationRunner::current_version(&self.conn())
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    pub(crate) fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        crypto::encrypt(&self.encryption_key, plaintext)
            .map_err(|e| StorageError::Encryption(e.to_string()))
    }

    pub(crate) fn unseal(&self, ciphertext: &[u8]) -> Result<Vec<u8>, StorageError> {
        crypto::decrypt(&self.encryption_key, ciphertext)
            .map_err(|e| StorageError::Encryption(e.to_string()))
    }

    /// Deletes rows of a queue table by rowid.
    pub(crate) fn delete_rows(&self, table: &'static str, rowids: &[i64]) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!("DELETE FROM {} WHERE rowid = ?1", table))?;
            for rowid in rowids {
                stmt.execute(params![rowid])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn unseal_string(&self, ciphertext: &[u8]) -> Result<String, StorageError> {
        String::from_utf8(self.unseal(ciphertext)?)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

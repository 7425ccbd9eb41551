// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Received package queue storage operations.

use rusqlite::params;
use tracing::warn;

use super::{Storage, StorageError};
use crate::types::{DeviceAddress, Package, PackageId, UserId};

impl Storage {
    // === Package Queue Operations ===

    pub(crate) fn enqueue_packages(&self, packages: &[Package]) -> Result<(), StorageError> {
        let sealed = packages
            .iter()
            .map(|p| self.seal(p.payload.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for (package, payload) in packages.iter().zip(sealed) {
            tx.execute(
                "INSERT OR IGNORE INTO package_queue
                 (user_id, device_id, message_id, timestamp, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    package.id.address.user_id.long() as i64,
                    package.id.address.device_id,
                    package.id.message_id,
                    package.timestamp as i64,
                    payload,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn dequeue_packages(&self, ids: &[PackageId]) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for id in ids {
            tx.execute(
                "DELETE FROM package_queue
                 WHERE user_id = ?1 AND device_id = ?2 AND message_id = ?3",
                params![
                    id.address.user_id.long() as i64,
                    id.address.device_id,
                    id.message_id
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn dequeue_packages_for_users(&self, users: &[UserId]) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for user in users {
            tx.execute(
                "DELETE FROM package_queue WHERE user_id = ?1",
                params![user.long() as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Loads the queue ordered by timestamp. Rows that no longer unseal are
    /// logged and deleted.
    pub(crate) fn load_package_queue(&self) -> Result<Vec<Package>, StorageError> {
        let rows: Vec<(i64, i64, u32, String, i64, Vec<u8>)> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT rowid, user_id, device_id, message_id, timestamp, payload
                 FROM package_queue ORDER BY timestamp, rowid",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut packages = Vec::with_capacity(rows.len());
        let mut corrupt = Vec::new();
        for (rowid, user_id, device_id, message_id, timestamp, sealed) in rows {
            let address = DeviceAddress::new(UserId(user_id as u64), device_id);
            match self.unseal_string(&sealed) {
                Ok(payload) => packages.push(Package {
                    id: PackageId::new(address, message_id),
                    timestamp: timestamp as u64,
                    payload,
                }),
                Err(e) => {
                    warn!(
                        %address,
                        %message_id,
                        error = %e,
                        "Discarding unreadable queued package"
                    );
                    corrupt.push(rowid);
                }
            }
        }

        if !corrupt.is_empty() {
            self.delete_rows("package_queue", &corrupt)?;
        }
        Ok(packages)
    }
}

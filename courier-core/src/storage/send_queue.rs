// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Outbound send queue storage operations.

use rusqlite::params;
use tracing::warn;

use super::traits::SendQueueEntry;
use super::{Storage, StorageError};
use crate::types::UserId;

impl Storage {
    // === Send Queue Operations ===

    /// Appends entries. Re-adding an entry already queued keeps its position.
    pub(crate) fn enqueue_sends(&self, entries: &[SendQueueEntry]) -> Result<(), StorageError> {
        let sealed = entries
            .iter()
            .map(|e| self.seal(&e.payload))
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for (entry, payload) in entries.iter().zip(sealed) {
            tx.execute(
                "INSERT OR IGNORE INTO send_queue (user_id, message_id, payload)
                 VALUES (?1, ?2, ?3)",
                params![entry.user_id.long() as i64, entry.message_id, payload],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn dequeue_sends(
        &self,
        user_id: UserId,
        message_ids: &[String],
    ) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for id in message_ids {
            tx.execute(
                "DELETE FROM send_queue WHERE user_id = ?1 AND message_id = ?2",
                params![user_id.long() as i64, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn dequeue_sends_for_user(&self, user_id: UserId) -> Result<(), StorageError> {
        self.conn().execute(
            "DELETE FROM send_queue WHERE user_id = ?1",
            params![user_id.long() as i64],
        )?;
        Ok(())
    }

    /// Loads the queue in insertion order. Rows that no longer unseal are
    /// logged and deleted.
    pub(crate) fn load_send_queue(&self) -> Result<Vec<SendQueueEntry>, StorageError> {
        let rows: Vec<(i64, i64, String, Vec<u8>)> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT seq, user_id, message_id, payload FROM send_queue ORDER BY seq",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut entries = Vec::with_capacity(rows.len());
        let mut corrupt = Vec::new();
        for (seq, user_id, message_id, sealed) in rows {
            let user_id = UserId(user_id as u64);
            match self.unseal(&sealed) {
                Ok(payload) => entries.push(SendQueueEntry {
                    user_id,
                    message_id,
                    payload,
                }),
                Err(e) => {
                    warn!(
                        %user_id,
                        %message_id,
                        error = %e,
                        "Discarding unreadable queued message"
                    );
                    corrupt.push(seq);
                }
            }
        }

        if !corrupt.is_empty() {
            self.delete_rows("send_queue", &corrupt)?;
        }
        Ok(entries)
    }
}

// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Conversation message storage operations.

use rusqlite::{params, Connection, OptionalExtension};

use super::{Storage, StorageError};
use crate::types::{MessageInfo, UserId};

/// Raw message row, body still sealed.
struct MessageRow {
    id: String,
    sealed: Vec<u8>,
    timestamp: i64,
    received_timestamp: i64,
    is_sent: bool,
    is_delivered: bool,
    ttl: i64,
}

const SELECT_COLUMNS: &str =
    "id, message, timestamp, received_timestamp, is_sent, is_delivered, ttl";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sealed: row.get(1)?,
        timestamp: row.get(2)?,
        received_timestamp: row.get(3)?,
        is_sent: row.get(4)?,
        is_delivered: row.get(5)?,
        ttl: row.get(6)?,
    })
}

impl Storage {
    // === Message Operations ===

    fn insert_message_with(
        &self,
        conn: &Connection,
        user_id: UserId,
        message: &MessageInfo,
    ) -> Result<bool, StorageError> {
        let sealed = self.seal(message.message.as_bytes())?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO messages
             (user_id, id, message, timestamp, received_timestamp, is_sent, is_delivered, ttl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user_id.long() as i64,
                message.id,
                sealed,
                message.timestamp as i64,
                message.received_timestamp as i64,
                message.is_sent,
                message.is_delivered,
                message.ttl as i64,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Stores a single message. Fails if the id is already used.
    pub(crate) fn insert_message(
        &self,
        user_id: UserId,
        message: &MessageInfo,
    ) -> Result<(), StorageError> {
        let conn = self.conn();
        if !self.insert_message_with(&conn, user_id, message)? {
            return Err(StorageError::AlreadyExists(format!(
                "message {} for user {}",
                message.id, user_id
            )));
        }
        Ok(())
    }

    pub(crate) fn insert_received_messages(
        &self,
        user_id: UserId,
        messages: Vec<MessageInfo>,
    ) -> Result<Vec<MessageInfo>, StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut stored = Vec::with_capacity(messages.len());
        for message in messages {
            if self.insert_message_with(&tx, user_id, &message)? {
                stored.push(message);
            }
        }
        tx.commit()?;
        Ok(stored)
    }

    pub(crate) fn mark_message_delivered(
        &self,
        user_id: UserId,
        message_id: &str,
    ) -> Result<MessageInfo, StorageError> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE messages SET is_delivered = 1 WHERE user_id = ?1 AND id = ?2",
            params![user_id.long() as i64, message_id],
        )?;
        if updated == 0 {
            return Err(StorageError::NotFound(format!(
                "message {} for user {}",
                message_id, user_id
            )));
        }

        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM messages WHERE user_id = ?1 AND id = ?2",
                    SELECT_COLUMNS
                ),
                params![user_id.long() as i64, message_id],
                read_row,
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(message_id.to_string()))?;
        self.open_message(row)
    }

    pub(crate) fn load_last_messages(
        &self,
        user_id: UserId,
        start: usize,
        count: usize,
    ) -> Result<Vec<MessageInfo>, StorageError> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE user_id = ?1
                 ORDER BY seq DESC LIMIT ?2 OFFSET ?3",
                SELECT_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![user_id.long() as i64, count as i64, start as i64],
                read_row,
            )?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        rows.into_iter().map(|r| self.open_message(r)).collect()
    }

    pub(crate) fn remove_messages(
        &self,
        user_id: UserId,
        message_ids: &[String],
    ) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for id in message_ids {
            tx.execute(
                "DELETE FROM messages WHERE user_id = ?1 AND id = ?2",
                params![user_id.long() as i64, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn remove_all_messages(&self, user_id: UserId) -> Result<(), StorageError> {
        self.conn().execute(
            "DELETE FROM messages WHERE user_id = ?1",
            params![user_id.long() as i64],
        )?;
        Ok(())
    }

    fn open_message(&self, row: MessageRow) -> Result<MessageInfo, StorageError> {
        Ok(MessageInfo {
            message: self.unseal_string(&row.sealed)?,
            id: row.id,
            timestamp: row.timestamp as u64,
            received_timestamp: row.received_timestamp as u64,
            is_sent: row.is_sent,
            is_delivered: row.is_delivered,
            ttl: row.ttl as u64,
        })
    }
}

// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Contact storage operations.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension};

use super::{Storage, StorageError};
use crate::types::{AddressBookUpdate, AllowedMessageLevel, ContactInfo, PlatformContact, UserId};

const CONTACT_COLUMNS: &str = "id, email, name, allowed_message_level, phone_number, public_key";

fn parse_level(idx: usize, s: &str) -> rusqlite::Result<AllowedMessageLevel> {
    AllowedMessageLevel::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown message level: {}", s).into(),
        )
    })
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContactInfo> {
    let id: i64 = row.get(0)?;
    let level: String = row.get(3)?;
    Ok(ContactInfo {
        id: UserId(id as u64),
        email: row.get(1)?,
        name: row.get(2)?,
        allowed_message_level: parse_level(3, &level)?,
        phone_number: row.get(4)?,
        public_key: row.get(5)?,
    })
}

fn record_remote_update(
    conn: &Connection,
    user_id: UserId,
    level: Option<AllowedMessageLevel>,
) -> Result<(), StorageError> {
    conn.execute(
        "INSERT OR REPLACE INTO remote_contact_updates (user_id, allowed_message_level)
         VALUES (?1, ?2)",
        params![user_id.long() as i64, level.map(|l| l.as_str())],
    )?;
    Ok(())
}

fn contact_level(
    conn: &Connection,
    user_id: UserId,
) -> Result<Option<AllowedMessageLevel>, StorageError> {
    let level: Option<String> = conn
        .query_row(
            "SELECT allowed_message_level FROM contacts WHERE id = ?1",
            params![user_id.long() as i64],
            |row| row.get(0),
        )
        .optional()?;
    match level {
        Some(s) => Ok(Some(parse_level(0, &s)?)),
        None => Ok(None),
    }
}

impl Storage {
    // === Contact Operations ===

    /// Inserts contacts not already present; returns those that were added.
    pub(crate) fn insert_contacts(
        &self,
        contacts: Vec<ContactInfo>,
        record_remote: bool,
    ) -> Result<Vec<ContactInfo>, StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut added = Vec::new();
        for contact in contacts {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO contacts
                 (id, email, name, allowed_message_level, phone_number, public_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    contact.id.long() as i64,
                    contact.email,
                    contact.name,
                    contact.allowed_message_level.as_str(),
                    contact.phone_number,
                    contact.public_key,
                ],
            )?;
            if inserted > 0 {
                if record_remote {
                    record_remote_update(&tx, contact.id, Some(contact.allowed_message_level))?;
                }
                added.push(contact);
            }
        }
        tx.commit()?;
        Ok(added)
    }

    pub(crate) fn update_contact(&self, contact: &ContactInfo) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let previous = contact_level(&tx, contact.id)?
            .ok_or_else(|| StorageError::NotFound(format!("contact {}", contact.id)))?;

        tx.execute(
            "UPDATE contacts SET email = ?2, name = ?3, allowed_message_level = ?4,
             phone_number = ?5, public_key = ?6 WHERE id = ?1",
            params![
                contact.id.long() as i64,
                contact.email,
                contact.name,
                contact.allowed_message_level.as_str(),
                contact.phone_number,
                contact.public_key,
            ],
        )?;
        if previous != contact.allowed_message_level {
            record_remote_update(&tx, contact.id, Some(contact.allowed_message_level))?;
        }
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn delete_contact(&self, user_id: UserId) -> Result<bool, StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM contacts WHERE id = ?1",
            params![user_id.long() as i64],
        )?;
        if deleted > 0 {
            record_remote_update(&tx, user_id, None)?;
        }
        tx.commit()?;
        Ok(deleted > 0)
    }

    pub(crate) fn load_contact(&self, user_id: UserId) -> Result<Option<ContactInfo>, StorageError> {
        let conn = self.conn();
        let contact = conn
            .query_row(
                &format!("SELECT {} FROM contacts WHERE id = ?1", CONTACT_COLUMNS),
                params![user_id.long() as i64],
                row_to_contact,
            )
            .optional()?;
        Ok(contact)
    }

    pub(crate) fn load_contacts(&self) -> Result<Vec<ContactInfo>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM contacts ORDER BY name, id",
            CONTACT_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_contact)?;
        let contacts = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(contacts)
    }

    pub(crate) fn existing_contacts(
        &self,
        ids: &HashSet<UserId>,
    ) -> Result<HashSet<UserId>, StorageError> {
        let conn = self.conn();
        let mut found = HashSet::new();
        for id in ids {
            if contact_level(&conn, *id)?.is_some() {
                found.insert(*id);
            }
        }
        Ok(found)
    }

    pub(crate) fn unblocked_contacts(
        &self,
        ids: &HashSet<UserId>,
    ) -> Result<HashSet<UserId>, StorageError> {
        let conn = self.conn();
        let mut allowed = HashSet::new();
        for id in ids {
            if contact_level(&conn, *id)? != Some(AllowedMessageLevel::Blocked) {
                allowed.insert(*id);
            }
        }
        Ok(allowed)
    }

    pub(crate) fn missing_platform_contacts(
        &self,
        platform_contacts: Vec<PlatformContact>,
    ) -> Result<Vec<PlatformContact>, StorageError> {
        let conn = self.conn();
        let mut by_email = conn.prepare("SELECT COUNT(*) FROM contacts WHERE email = ?1")?;
        let mut by_phone = conn.prepare("SELECT COUNT(*) FROM contacts WHERE phone_number = ?1")?;

        let mut missing = Vec::new();
        for contact in platform_contacts {
            let mut known = false;
            for email in &contact.emails {
                let count: i64 = by_email.query_row(params![email], |row| row.get(0))?;
                known |= count > 0;
            }
            for phone in &contact.phone_numbers {
                let count: i64 = by_phone.query_row(params![phone], |row| row.get(0))?;
                known |= count > 0;
            }
            if !known {
                missing.push(contact);
            }
        }
        Ok(missing)
    }

    pub(crate) fn apply_remote_contact_diff(
        &self,
        new_contacts: Vec<ContactInfo>,
        updates: &[AddressBookUpdate],
    ) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for contact in new_contacts {
            tx.execute(
                "INSERT OR REPLACE INTO contacts
                 (id, email, name, allowed_message_level, phone_number, public_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    contact.id.long() as i64,
                    contact.email,
                    contact.name,
                    contact.allowed_message_level.as_str(),
                    contact.phone_number,
                    contact.public_key,
                ],
            )?;
        }
        for update in updates {
            match update.allowed_message_level {
                Some(level) => tx.execute(
                    "UPDATE contacts SET allowed_message_level = ?2 WHERE id = ?1",
                    params![update.user_id.long() as i64, level.as_str()],
                )?,
                None => tx.execute(
                    "DELETE FROM contacts WHERE id = ?1",
                    params![update.user_id.long() as i64],
                )?,
            };
        }
        tx.commit()?;
        Ok(())
    }

    // === Remote Update Operations ===

    pub(crate) fn load_remote_updates(&self) -> Result<Vec<AddressBookUpdate>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, allowed_message_level FROM remote_contact_updates ORDER BY user_id",
        )?;
        let rows = stmt.query_map([], |row| {
            let user_id: i64 = row.get(0)?;
            let level: Option<String> = row.get(1)?;
            let level = match level {
                Some(s) => Some(parse_level(1, &s)?),
                None => None,
            };
            Ok(AddressBookUpdate {
                user_id: UserId(user_id as u64),
                allowed_message_level: level,
            })
        })?;
        let updates = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(updates)
    }

    pub(crate) fn clear_remote_updates(&self, user_ids: &[UserId]) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for id in user_ids {
            tx.execute(
                "DELETE FROM remote_contact_updates WHERE user_id = ?1",
                params![id.long() as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

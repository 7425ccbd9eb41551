// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Database Schema Migrations
//!
//! Versioned schema steps applied in order inside one transaction. Applied
//! versions are tracked in a `schema_version` table.

use rusqlite::{params, Connection};

use super::StorageError;
use crate::types::now_millis;

/// A single schema migration step.
pub struct Migration {
    /// Monotonically increasing version number (starting at 1).
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Runs schema migrations against a database connection.
pub struct MigrationRunner;

impl MigrationRunner {
    /// Applies every migration newer than the current schema version.
    ///
    /// All pending steps share one transaction; a failing step rolls back the
    /// whole batch.
    pub fn run(conn: &mut Connection, migrations: &[Migration]) -> Result<(), StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );",
        )?;

        let current = Self::current_version(conn)?;
        let pending: Vec<&Migration> = migrations.iter().filter(|m| m.version > current).collect();
        if pending.is_empty() {
            return Ok(());
        }

        if let Some(w) = pending.windows(2).find(|w| w[0].version >= w[1].version) {
            return Err(StorageError::Migration(format!(
                "Migrations are not in order: v{} before v{}",
                w[0].version, w[1].version
            )));
        }

        let tx = conn.transaction()?;
        for migration in pending {
            tx.execute_batch(migration.sql).map_err(|e| {
                StorageError::Migration(format!(
                    "Migration v{} '{}' failed: {}",
                    migration.version, migration.name, e
                ))
            })?;
            tx.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![migration.version, now_millis() as i64],
            )?;
            tracing::debug!(version = migration.version, name = migration.name, "applied migration");
        }
        tx.commit()?;
        Ok(())
    }

    /// Returns the current schema version, or 0 if no migrations have been applied.
    pub fn current_version(conn: &Connection) -> Result<u32, StorageError> {
        let version: Option<u32> =
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
        Ok(version.unwrap_or(0))
    }
}

/// Returns all registered migrations in version order.
///
/// New migrations are appended to the end of this list.
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "baseline_schema",
            sql: MIGRATION_V1_BASELINE,
        },
        Migration {
            version: 2,
            name: "address_book_remote_updates",
            sql: MIGRATION_V2_REMOTE_UPDATES,
        },
    ]
}

const MIGRATION_V1_BASELINE: &str = "
CREATE TABLE messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    id TEXT NOT NULL,
    message BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    received_timestamp INTEGER NOT NULL,
    is_sent INTEGER NOT NULL,
    is_delivered INTEGER NOT NULL,
    ttl INTEGER NOT NULL,
    UNIQUE (user_id, id)
);

CREATE TABLE send_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    message_id TEXT NOT NULL,
    payload BLOB NOT NULL,
    UNIQUE (user_id, message_id)
);

CREATE TABLE package_queue (
    user_id INTEGER NOT NULL,
    device_id INTEGER NOT NULL,
    message_id TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    payload BLOB NOT NULL,
    PRIMARY KEY (user_id, device_id, message_id)
);

CREATE TABLE contacts (
    id INTEGER PRIMARY KEY,
    email TEXT NOT NULL,
    name TEXT NOT NULL,
    allowed_message_level TEXT NOT NULL,
    phone_number TEXT,
    public_key TEXT NOT NULL
);

CREATE INDEX idx_package_queue_timestamp ON package_queue(timestamp);
";

const MIGRATION_V2_REMOTE_UPDATES: &str = "
CREATE TABLE remote_contact_updates (
    user_id INTEGER PRIMARY KEY,
    allowed_message_level TEXT
);

CREATE INDEX idx_contacts_email ON contacts(email);
CREATE INDEX idx_contacts_phone ON contacts(phone_number);
";

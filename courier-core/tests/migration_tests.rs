// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for storage::migration
//! Verifies the schema produced by the migration runner and that versioning
//! is tracked and idempotent.

use courier_core::storage::migration::{all_migrations, Migration, MigrationRunner};
use courier_core::storage::{Storage, StorageError};
use courier_core::SymmetricKey;
use rusqlite::Connection;
use tempfile::TempDir;

fn migrated_connection() -> Connection {
    let mut conn = Connection::open_in_memory().unwrap();
    MigrationRunner::run(&mut conn, &all_migrations()).unwrap();
    conn
}

fn table_exists(conn: &Connection, table: &str) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .unwrap()
        > 0
}

fn index_exists(conn: &Connection, index: &str) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
        [index],
        |row| row.get::<_, i64>(0),
    )
    .unwrap()
        > 0
}

fn columns(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .unwrap();
    stmt.query_map([], |row| row.get::<_, String>(1))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

// === Schema ===

#[test]
fn test_all_tables_created() {
    let conn = migrated_connection();
    for table in [
        "schema_version",
        "messages",
        "send_queue",
        "package_queue",
        "contacts",
        "remote_contact_updates",
    ] {
        assert!(table_exists(&conn, table), "missing table {}", table);
    }
}

#[test]
fn test_indexes_created() {
    let conn = migrated_connection();
    for index in [
        "idx_package_queue_timestamp",
        "idx_contacts_email",
        "idx_contacts_phone",
    ] {
        assert!(index_exists(&conn, index), "missing index {}", index);
    }
}

#[test]
fn test_package_queue_columns() {
    let conn = migrated_connection();
    assert_eq!(
        columns(&conn, "package_queue"),
        vec!["user_id", "device_id", "message_id", "timestamp", "payload"]
    );
}

#[test]
fn test_remote_updates_level_is_nullable() {
    let conn = migrated_connection();
    conn.execute(
        "INSERT INTO remote_contact_updates (user_id, allowed_message_level) VALUES (7, NULL)",
        [],
    )
    .unwrap();
}

// === Versioning ===

#[test]
fn test_version_matches_latest_migration() {
    let conn = migrated_connection();
    let latest = all_migrations().last().map(|m| m.version).unwrap();
    assert_eq!(MigrationRunner::current_version(&conn).unwrap(), latest);
}

#[test]
fn test_rerun_is_noop() {
    let mut conn = migrated_connection();
    MigrationRunner::run(&mut conn, &all_migrations()).unwrap();

    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows as usize, all_migrations().len());
}

#[test]
fn test_out_of_order_migrations_rejected() {
    let mut conn = Connection::open_in_memory().unwrap();
    let migrations = vec![
        Migration {
            version: 2,
            name: "second",
            sql: "CREATE TABLE b (x INTEGER);",
        },
        Migration {
            version: 1,
            name: "first",
            sql: "CREATE TABLE a (x INTEGER);",
        },
    ];

    let result = MigrationRunner::run(&mut conn, &migrations);
    assert!(matches!(result, Err(StorageError::Migration(_))));
}

#[test]
fn test_failing_migration_rolls_back_batch() {
    let mut conn = Connection::open_in_memory().unwrap();
    let migrations = vec![
        Migration {
            version: 1,
            name: "good",
            sql: "CREATE TABLE a (x INTEGER);",
        },
        Migration {
            version: 2,
            name: "bad",
            sql: "CREATE TABLE broken (",
        },
    ];

    assert!(MigrationRunner::run(&mut conn, &migrations).is_err());
    assert!(!table_exists(&conn, "a"));
    assert_eq!(MigrationRunner::current_version(&conn).unwrap(), 0);
}

#[test]
fn test_storage_reports_schema_version_after_reopen() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("courier.db");
    let key = SymmetricKey::generate().unwrap();

    let storage = Storage::open(&path, key.clone()).unwrap();
    let version = storage.schema_version().unwrap();
    drop(storage);

    let reopened = Storage::open(&path, key).unwrap();
    assert_eq!(reopened.schema_version().unwrap(), version);
    assert_eq!(version, 2);
}

//! SQLite schema migrations.
//!
//! `MIGRATIONS[n]` moves the schema from version `n` to `n + 1`. Applied
//! versions are recorded in `schema_migrations`; pending ones run in a single
//! transaction.

use rusqlite::{params, Connection};

use crate::error::{Result, StoreError};

const MIGRATIONS: &[&str] = &[
    // v1: capability entries and document snapshots
    r#"
    CREATE TABLE capabilities (
        kind INTEGER NOT NULL,            -- 0=label, 1=policy fingerprint
        key BLOB NOT NULL,                -- label text or 32-byte fingerprint
        value BLOB NOT NULL,              -- CBOR CapabilityValue
        updated_at INTEGER NOT NULL,      -- Unix ms
        PRIMARY KEY (kind, key)
    );

    CREATE TABLE document_snapshots (
        document_id TEXT PRIMARY KEY,
        snapshot BLOB NOT NULL,           -- full change set
        saved_at INTEGER NOT NULL
    );
    "#,
];

/// Schema version this build writes.
pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

/// Bring the schema up to [`CURRENT_VERSION`]. No-op when already there.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
    )?;

    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if applied > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{applied} is newer than supported v{CURRENT_VERSION}"
        )));
    }

    let pending = &MIGRATIONS[applied as usize..];
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (version, sql) in (applied + 1..).zip(pending) {
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, now_millis()],
        )?;
        tracing::debug!(version, "applied schema migration");
    }
    tx.commit()?;

    Ok(())
}

/// Current time in milliseconds. A clock before the epoch reads as zero.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

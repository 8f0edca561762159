//! Database migrations.
//!
//! This module contains all SQL migrations for the database schema.
//! Migrations are run in order and tracked in the `migrations` table.

use crate::DatabaseResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> DatabaseResult<()> {
    // Create migrations tracking table
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_report_records(conn)?;
    }
    if current_version < 2 {
        migrate_v2_delivery_telemetry(conn)?;
    }

    info!("Migrations complete");
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> DatabaseResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: Report records - the outbox for bookkeeping report delivery.
fn migrate_v1_report_records(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v1: report records");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS report_records (
            id TEXT PRIMARY KEY,
            ack_status TEXT NOT NULL DEFAULT 'sent',
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            sent_at TEXT,
            confirmed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_report_records_ack_status
            ON report_records(ack_status);
        CREATE INDEX IF NOT EXISTS idx_report_records_created_at
            ON report_records(created_at);
        ",
    )?;

    record_migration(conn, 1, "report_records")?;
    Ok(())
}

/// V2: Delivery telemetry - resend attempts and last failure per record.
fn migrate_v2_delivery_telemetry(conn: &Connection) -> DatabaseResult<()> {
    info!("Applying migration v2: delivery telemetry");

    conn.execute_batch(
        "
        ALTER TABLE report_records ADD COLUMN last_attempt_at TEXT;
        ALTER TABLE report_records ADD COLUMN resend_count INTEGER NOT NULL DEFAULT 0;
        ALTER TABLE report_records ADD COLUMN last_error TEXT;
        ",
    )?;

    record_migration(conn, 2, "delivery_telemetry")?;
    Ok(())
}

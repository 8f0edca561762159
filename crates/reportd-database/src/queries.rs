//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&rusqlite::Connection` as its first parameter so
//! it can run on the async executor or directly against a test connection.
//!
//! Status writes made by the delivery path are conditional: they only apply
//! while the record is not already `confirmed`. That single guard is what
//! makes `confirmed` terminal under every interleaving of producer, resend
//! and confirmation.

use crate::{AckStatus, DatabaseError, DatabaseResult, NewReportRecord, ReportRecord};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

// ==========================================
// Report records
// ==========================================

/// Insert a new report record. New records always land in `sent`.
///
/// Fails with [`DatabaseError::Duplicate`] when the id already exists; a
/// report id is never reused and never overwritten.
pub fn insert_report(conn: &Connection, record: &NewReportRecord) -> DatabaseResult<ReportRecord> {
    let now = Utc::now().to_rfc3339();
    let result = conn.execute(
        "INSERT INTO report_records (id, ack_status, payload, created_at)
         VALUES (?1, 'sent', ?2, ?3)",
        params![record.id, record.payload, now],
    );

    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(DatabaseError::Duplicate(record.id.clone()));
        }
        Err(e) => return Err(e.into()),
    }

    debug!(report_id = %record.id, "Report record inserted");
    get_report(conn, &record.id)?
        .ok_or_else(|| DatabaseError::NotFound("Report not found after insert".to_string()))
}

/// Get a report record by id.
pub fn get_report(conn: &Connection, id: &str) -> DatabaseResult<Option<ReportRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, ack_status, payload, created_at, sent_at, confirmed_at, last_attempt_at, resend_count, last_error
         FROM report_records WHERE id = ?1",
    )?;

    let result = stmt.query_row(params![id], |row| {
        Ok(ReportRecord {
            id: row.get(0)?,
            ack_status: AckStatus::from_str(&row.get::<_, String>(1)?),
            payload: row.get(2)?,
            created_at: parse_datetime(row.get::<_, String>(3)?),
            sent_at: row.get::<_, Option<String>>(4)?.map(parse_datetime),
            confirmed_at: row.get::<_, Option<String>>(5)?.map(parse_datetime),
            last_attempt_at: row.get::<_, Option<String>>(6)?.map(parse_datetime),
            resend_count: row.get(7)?,
            last_error: row.get(8)?,
        })
    });

    match result {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Get every report record whose status is not the given one.
///
/// This is the resend work set when called with `AckStatus::Confirmed`.
/// Order is unspecified.
pub fn get_reports_with_status_not(
    conn: &Connection,
    status: AckStatus,
) -> DatabaseResult<Vec<ReportRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, ack_status, payload, created_at, sent_at, confirmed_at, last_attempt_at, resend_count, last_error
         FROM report_records WHERE ack_status != ?1",
    )?;

    let records = stmt
        .query_map(params![status.as_str()], |row| {
            Ok(ReportRecord {
                id: row.get(0)?,
                ack_status: AckStatus::from_str(&row.get::<_, String>(1)?),
                payload: row.get(2)?,
                created_at: parse_datetime(row.get::<_, String>(3)?),
                sent_at: row.get::<_, Option<String>>(4)?.map(parse_datetime),
                confirmed_at: row.get::<_, Option<String>>(5)?.map(parse_datetime),
                last_attempt_at: row.get::<_, Option<String>>(6)?.map(parse_datetime),
                resend_count: row.get(7)?,
                last_error: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

/// Update a record's ack status unless the record is already `confirmed`.
///
/// Returns whether the row changed. A `false` on an existing record means
/// the record is confirmed and the write was refused.
pub fn update_ack_status(
    conn: &Connection,
    id: &str,
    new_status: AckStatus,
) -> DatabaseResult<bool> {
    let count = conn.execute(
        "UPDATE report_records SET ack_status = ?1
         WHERE id = ?2 AND ack_status != 'confirmed'",
        params![new_status.as_str(), id],
    )?;
    Ok(count > 0)
}

/// Transition a record to `confirmed` and stamp `confirmed_at`.
///
/// Idempotent: confirming an already-confirmed record changes nothing and
/// returns `false`. Returns `true` only for the transition that actually
/// happened.
pub fn confirm_report(conn: &Connection, id: &str) -> DatabaseResult<bool> {
    let now = Utc::now().to_rfc3339();
    let count = conn.execute(
        "UPDATE report_records SET ack_status = 'confirmed', confirmed_at = ?1
         WHERE id = ?2 AND ack_status != 'confirmed'",
        params![now, id],
    )?;
    Ok(count > 0)
}

/// Record a successful publish: status back to `sent`, failure telemetry
/// cleared. Refused when the record is already confirmed.
pub fn mark_report_sent(conn: &Connection, id: &str) -> DatabaseResult<bool> {
    let now = Utc::now().to_rfc3339();
    let count = conn.execute(
        "UPDATE report_records
         SET ack_status = 'sent', sent_at = ?1, last_attempt_at = ?1, last_error = NULL
         WHERE id = ?2 AND ack_status != 'confirmed'",
        params![now, id],
    )?;
    Ok(count > 0)
}

/// Record a failed publish: status `error`, resend counter incremented,
/// failure reason kept. Refused when the record is already confirmed.
pub fn mark_report_send_failed(
    conn: &Connection,
    id: &str,
    error: &str,
) -> DatabaseResult<bool> {
    let now = Utc::now().to_rfc3339();
    let count = conn.execute(
        "UPDATE report_records
         SET ack_status = 'error', resend_count = resend_count + 1,
             last_attempt_at = ?1, last_error = ?2
         WHERE id = ?3 AND ack_status != 'confirmed'",
        params![now, error, id],
    )?;
    Ok(count > 0)
}

/// Delete every record with the given status. Returns the count removed.
pub fn delete_reports_with_status(conn: &Connection, status: AckStatus) -> DatabaseResult<usize> {
    let count = conn.execute(
        "DELETE FROM report_records WHERE ack_status = ?1",
        params![status.as_str()],
    )?;
    Ok(count)
}

/// Delete confirmed records whose confirmation is older than the cutoff.
/// Returns the count removed.
pub fn delete_confirmed_reports_older_than(
    conn: &Connection,
    cutoff: DateTime<Utc>,
) -> DatabaseResult<usize> {
    let count = conn.execute(
        "DELETE FROM report_records
         WHERE ack_status = 'confirmed' AND confirmed_at IS NOT NULL AND confirmed_at < ?1",
        params![cutoff.to_rfc3339()],
    )?;
    Ok(count)
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_migrations;

    fn create_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn new_record(id: &str) -> NewReportRecord {
        NewReportRecord {
            id: id.to_string(),
            payload: format!("{{\"report\":\"{id}\"}}"),
        }
    }

    #[test]
    fn test_insert_and_get_report() {
        let conn = create_test_conn();

        let inserted = insert_report(&conn, &new_record("r-1")).unwrap();
        assert_eq!(inserted.id, "r-1");
        assert_eq!(inserted.ack_status, AckStatus::Sent);
        assert_eq!(inserted.resend_count, 0);
        assert!(inserted.sent_at.is_none());
        assert!(inserted.confirmed_at.is_none());
        assert!(inserted.last_error.is_none());

        let fetched = get_report(&conn, "r-1").unwrap().unwrap();
        assert_eq!(fetched.id, "r-1");
        assert_eq!(fetched.payload, inserted.payload);
    }

    #[test]
    fn test_get_missing_report_returns_none() {
        let conn = create_test_conn();
        assert!(get_report(&conn, "nope").unwrap().is_none());
    }

    #[test]
    fn test_insert_duplicate_id_fails() {
        let conn = create_test_conn();
        insert_report(&conn, &new_record("r-1")).unwrap();

        let err = insert_report(&conn, &new_record("r-1")).unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate(ref id) if id == "r-1"));

        // Original record untouched
        let record = get_report(&conn, "r-1").unwrap().unwrap();
        assert_eq!(record.ack_status, AckStatus::Sent);
    }

    #[test]
    fn test_status_not_selects_unconfirmed_only() {
        let conn = create_test_conn();
        insert_report(&conn, &new_record("r-sent")).unwrap();
        insert_report(&conn, &new_record("r-error")).unwrap();
        insert_report(&conn, &new_record("r-confirmed")).unwrap();

        mark_report_send_failed(&conn, "r-error", "broker down").unwrap();
        confirm_report(&conn, "r-confirmed").unwrap();

        let mut ids: Vec<String> = get_reports_with_status_not(&conn, AckStatus::Confirmed)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        ids.sort();

        assert_eq!(ids, vec!["r-error".to_string(), "r-sent".to_string()]);
    }

    #[test]
    fn test_confirm_is_idempotent() {
        let conn = create_test_conn();
        insert_report(&conn, &new_record("r-1")).unwrap();

        assert!(confirm_report(&conn, "r-1").unwrap());
        let first = get_report(&conn, "r-1").unwrap().unwrap();
        assert_eq!(first.ack_status, AckStatus::Confirmed);
        assert!(first.confirmed_at.is_some());

        // Second confirm is a no-op
        assert!(!confirm_report(&conn, "r-1").unwrap());
        let second = get_report(&conn, "r-1").unwrap().unwrap();
        assert_eq!(second.ack_status, AckStatus::Confirmed);
        assert_eq!(second.confirmed_at, first.confirmed_at);
    }

    #[test]
    fn test_confirm_missing_report_is_false() {
        let conn = create_test_conn();
        assert!(!confirm_report(&conn, "nope").unwrap());
    }

    #[test]
    fn test_send_failure_tracks_telemetry() {
        let conn = create_test_conn();
        insert_report(&conn, &new_record("r-1")).unwrap();

        assert!(mark_report_send_failed(&conn, "r-1", "timeout").unwrap());
        let record = get_report(&conn, "r-1").unwrap().unwrap();
        assert_eq!(record.ack_status, AckStatus::Error);
        assert_eq!(record.resend_count, 1);
        assert_eq!(record.last_error.as_deref(), Some("timeout"));
        assert!(record.last_attempt_at.is_some());

        assert!(mark_report_send_failed(&conn, "r-1", "refused").unwrap());
        let record = get_report(&conn, "r-1").unwrap().unwrap();
        assert_eq!(record.resend_count, 2);
        assert_eq!(record.last_error.as_deref(), Some("refused"));
    }

    #[test]
    fn test_successful_resend_recovers_from_error() {
        let conn = create_test_conn();
        insert_report(&conn, &new_record("r-1")).unwrap();
        mark_report_send_failed(&conn, "r-1", "timeout").unwrap();

        assert!(mark_report_sent(&conn, "r-1").unwrap());
        let record = get_report(&conn, "r-1").unwrap().unwrap();
        assert_eq!(record.ack_status, AckStatus::Sent);
        assert!(record.sent_at.is_some());
        assert!(record.last_error.is_none());
        // The failed attempt stays counted
        assert_eq!(record.resend_count, 1);
    }

    #[test]
    fn test_no_status_write_leaves_confirmed() {
        let conn = create_test_conn();
        insert_report(&conn, &new_record("r-1")).unwrap();
        confirm_report(&conn, "r-1").unwrap();

        assert!(!mark_report_sent(&conn, "r-1").unwrap());
        assert!(!mark_report_send_failed(&conn, "r-1", "late failure").unwrap());
        assert!(!update_ack_status(&conn, "r-1", AckStatus::Error).unwrap());

        let record = get_report(&conn, "r-1").unwrap().unwrap();
        assert_eq!(record.ack_status, AckStatus::Confirmed);
        assert_eq!(record.resend_count, 0);
        assert!(record.last_error.is_none());
    }

    #[test]
    fn test_update_ack_status_applies_when_unconfirmed() {
        let conn = create_test_conn();
        insert_report(&conn, &new_record("r-1")).unwrap();

        assert!(update_ack_status(&conn, "r-1", AckStatus::Error).unwrap());
        let record = get_report(&conn, "r-1").unwrap().unwrap();
        assert_eq!(record.ack_status, AckStatus::Error);

        assert!(update_ack_status(&conn, "r-1", AckStatus::Sent).unwrap());
        let record = get_report(&conn, "r-1").unwrap().unwrap();
        assert_eq!(record.ack_status, AckStatus::Sent);
    }

    #[test]
    fn test_delete_reports_with_status() {
        let conn = create_test_conn();
        insert_report(&conn, &new_record("r-1")).unwrap();
        insert_report(&conn, &new_record("r-2")).unwrap();
        insert_report(&conn, &new_record("r-3")).unwrap();
        confirm_report(&conn, "r-1").unwrap();
        confirm_report(&conn, "r-2").unwrap();
        mark_report_send_failed(&conn, "r-3", "down").unwrap();

        let removed = delete_reports_with_status(&conn, AckStatus::Confirmed).unwrap();
        assert_eq!(removed, 2);

        assert!(get_report(&conn, "r-1").unwrap().is_none());
        assert!(get_report(&conn, "r-2").unwrap().is_none());
        // Unconfirmed records survive the purge
        assert!(get_report(&conn, "r-3").unwrap().is_some());
    }

    #[test]
    fn test_delete_confirmed_respects_cutoff() {
        let conn = create_test_conn();
        insert_report(&conn, &new_record("r-old")).unwrap();
        insert_report(&conn, &new_record("r-new")).unwrap();
        confirm_report(&conn, "r-old").unwrap();
        confirm_report(&conn, "r-new").unwrap();

        // Backdate one confirmation past the cutoff
        let old = (Utc::now() - chrono::Duration::hours(48)).to_rfc3339();
        conn.execute(
            "UPDATE report_records SET confirmed_at = ?1 WHERE id = 'r-old'",
            params![old],
        )
        .unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let removed = delete_confirmed_reports_older_than(&conn, cutoff).unwrap();
        assert_eq!(removed, 1);

        assert!(get_report(&conn, "r-old").unwrap().is_none());
        assert!(get_report(&conn, "r-new").unwrap().is_some());
    }

    #[test]
    fn test_unknown_stored_status_reads_as_sent() {
        let conn = create_test_conn();
        insert_report(&conn, &new_record("r-1")).unwrap();
        conn.execute(
            "UPDATE report_records SET ack_status = 'queued' WHERE id = 'r-1'",
            [],
        )
        .unwrap();

        let record = get_report(&conn, "r-1").unwrap().unwrap();
        assert_eq!(record.ack_status, AckStatus::Sent);

        // Still part of the resend work set
        let unconfirmed = get_reports_with_status_not(&conn, AckStatus::Confirmed).unwrap();
        assert_eq!(unconfirmed.len(), 1);
    }
}

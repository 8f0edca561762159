//! Outbound report sender.
//!
//! Publishes one stream entry per call against the configured report
//! stream. The boundary is a `bool`: any transport failure is logged here
//! and reported as `false`, never raised to the caller. Callers own the
//! consequence (the record goes to `error` and the resend schedule picks
//! it up).

use crate::config::TransportConfig;
use crate::error::TransportResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use reportd_database::ReportRecord;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One publish attempt per call, outcome as a value.
///
/// Implementations must not retry internally and must not propagate
/// transport errors; `false` covers every failure mode.
#[async_trait]
pub trait ReportSender: Send + Sync {
    async fn send(&self, record: &ReportRecord) -> bool;
}

/// Redis Streams report sender.
pub struct RedisReportSender {
    client: Client,
    conn: Mutex<MultiplexedConnection>,
    config: TransportConfig,
}

impl RedisReportSender {
    /// Create a new RedisReportSender and connect to Redis.
    pub async fn connect(config: TransportConfig) -> TransportResult<Self> {
        let client = Client::open(config.redis_url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;

        info!(stream = %config.report_stream, "Report sender connected");

        Ok(Self {
            client,
            conn: Mutex::new(conn),
            config,
        })
    }

    /// Publish the record as one stream entry, trimming expired entries
    /// first. Returns the new entry id.
    async fn try_publish(&self, record: &ReportRecord) -> TransportResult<String> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::milliseconds(self.config.message_ttl.as_millis() as i64);
        let fields = build_report_fields(record, expires_at);

        let mut conn = self.conn.lock().await;

        // Stream entry ids are millisecond-timestamped, so MINID with the
        // expiry cutoff drops every entry past its lifetime.
        let cutoff = expired_entries_cutoff_ms(now, self.config.message_ttl);
        let trimmed: i64 = redis::cmd("XTRIM")
            .arg(&self.config.report_stream)
            .arg("MINID")
            .arg(cutoff)
            .query_async(&mut *conn)
            .await?;
        if trimmed > 0 {
            debug!(trimmed, stream = %self.config.report_stream, "Dropped expired report messages");
        }

        let entry_id: String = conn
            .xadd(&self.config.report_stream, "*", &fields)
            .await?;

        Ok(entry_id)
    }

    /// Replace the cached connection. Called after a failed publish so the
    /// next attempt starts from a fresh connection.
    async fn reconnect(&self) -> TransportResult<()> {
        let mut conn = self.conn.lock().await;
        *conn = self.client.get_multiplexed_async_connection().await?;
        info!("Report sender reconnected to Redis");
        Ok(())
    }
}

#[async_trait]
impl ReportSender for RedisReportSender {
    async fn send(&self, record: &ReportRecord) -> bool {
        match self.try_publish(record).await {
            Ok(entry_id) => {
                debug!(
                    report_id = %record.id,
                    entry_id = %entry_id,
                    stream = %self.config.report_stream,
                    "Report published"
                );
                true
            }
            Err(e) => {
                warn!(
                    report_id = %record.id,
                    error = %e,
                    "Failed to publish report"
                );
                if let Err(reconnect_err) = self.reconnect().await {
                    warn!(error = %reconnect_err, "Report sender reconnect failed");
                }
                false
            }
        }
    }
}

/// Build the flat field list for an outbound report entry.
fn build_report_fields(
    record: &ReportRecord,
    expires_at: DateTime<Utc>,
) -> Vec<(&'static str, String)> {
    vec![
        ("report_id", record.id.clone()),
        ("ack_status", record.ack_status.as_str().to_string()),
        ("payload", record.payload.clone()),
        ("expires_at", expires_at.to_rfc3339()),
    ]
}

/// Millisecond entry-id cutoff below which stream entries have outlived the
/// message TTL.
fn expired_entries_cutoff_ms(now: DateTime<Utc>, ttl: Duration) -> i64 {
    now.timestamp_millis().saturating_sub(ttl.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reportd_database::AckStatus;

    fn record() -> ReportRecord {
        ReportRecord {
            id: "r-1".to_string(),
            ack_status: AckStatus::Sent,
            payload: "{\"total_cents\":1200}".to_string(),
            created_at: Utc::now(),
            sent_at: None,
            confirmed_at: None,
            last_attempt_at: None,
            resend_count: 0,
            last_error: None,
        }
    }

    #[test]
    fn test_build_report_fields() {
        let expires = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 30).unwrap();
        let fields = build_report_fields(&record(), expires);

        assert_eq!(
            fields,
            vec![
                ("report_id", "r-1".to_string()),
                ("ack_status", "sent".to_string()),
                ("payload", "{\"total_cents\":1200}".to_string()),
                ("expires_at", expires.to_rfc3339()),
            ]
        );
    }

    #[test]
    fn test_expired_entries_cutoff() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 30).unwrap();
        let cutoff = expired_entries_cutoff_ms(now, Duration::from_secs(30));
        assert_eq!(cutoff, now.timestamp_millis() - 30_000);
    }
}

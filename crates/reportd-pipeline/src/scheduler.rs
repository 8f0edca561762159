//! Resend scheduler.
//!
//! Two independently gated periodic operations over the record store:
//! re-publishing everything not yet confirmed, and purging confirmed
//! records past retention. Ticks are fire-and-forget; a failed cycle is
//! logged and the next tick proceeds. Overlap between the two operations is
//! harmless because every status write carries its own
//! not-already-confirmed guard in the store.

use crate::PipelineResult;
use chrono::Utc;
use reportd_database::{queries, AckStatus, AsyncDatabase};
use reportd_transport::ReportSender;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Scheduler configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Whether the resend schedule runs at all.
    pub resend_enabled: bool,
    /// Time between resend cycles.
    pub resend_interval: Duration,
    /// Whether the purge schedule runs at all.
    pub purge_enabled: bool,
    /// Time between purge cycles.
    pub purge_interval: Duration,
    /// How long confirmed records are kept before a purge removes them.
    /// Zero purges every confirmed record immediately.
    pub purge_retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            resend_enabled: true,
            resend_interval: Duration::from_secs(60),
            purge_enabled: true,
            purge_interval: Duration::from_secs(3600),
            purge_retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// Summary of one resend cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResendOutcome {
    /// Records in the work set this cycle.
    pub attempted: usize,
    /// Publishes that succeeded and were recorded as `sent`.
    pub resent: usize,
    /// Publishes that failed (recorded as `error`) or whose store write
    /// failed; retried next cycle either way.
    pub failed: usize,
}

/// Periodic resend and purge over the record store.
pub struct ResendScheduler {
    db: AsyncDatabase,
    sender: Arc<dyn ReportSender>,
    config: SchedulerConfig,
}

impl ResendScheduler {
    /// Create a new ResendScheduler.
    pub fn new(db: AsyncDatabase, sender: Arc<dyn ReportSender>, config: SchedulerConfig) -> Self {
        Self { db, sender, config }
    }

    /// Re-publish every record whose status is not `confirmed`.
    ///
    /// Each record gets exactly one publish attempt this cycle. The outcome
    /// writes are conditional in the store, so a confirmation landing
    /// mid-cycle wins over whatever this cycle records.
    pub async fn resend_unconfirmed(&self) -> PipelineResult<ResendOutcome> {
        let records = self
            .db
            .call(|conn| queries::get_reports_with_status_not(conn, AckStatus::Confirmed))
            .await?;

        if records.is_empty() {
            debug!("No unconfirmed reports to resend");
            return Ok(ResendOutcome::default());
        }

        let mut outcome = ResendOutcome::default();

        for record in records {
            outcome.attempted += 1;
            let report_id = record.id.clone();

            if self.sender.send(&record).await {
                let id = report_id.clone();
                match self
                    .db
                    .call(move |conn| queries::mark_report_sent(conn, &id))
                    .await
                {
                    Ok(true) => {
                        debug!(report_id = %report_id, "Report resent");
                        outcome.resent += 1;
                    }
                    Ok(false) => {
                        // Confirmed while the publish was in flight; the
                        // confirmation write stands.
                        debug!(report_id = %report_id, "Report confirmed during resend");
                        outcome.resent += 1;
                    }
                    Err(e) => {
                        error!(report_id = %report_id, error = %e, "Failed to record resend");
                        outcome.failed += 1;
                    }
                }
            } else {
                outcome.failed += 1;
                let id = report_id.clone();
                if let Err(e) = self
                    .db
                    .call(move |conn| {
                        queries::mark_report_send_failed(conn, &id, "publish failed")
                    })
                    .await
                {
                    error!(report_id = %report_id, error = %e, "Failed to record send failure");
                }
            }
        }

        info!(
            attempted = outcome.attempted,
            resent = outcome.resent,
            failed = outcome.failed,
            "Resend cycle complete"
        );
        Ok(outcome)
    }

    /// Delete confirmed records past retention. Returns the count removed.
    ///
    /// Touches only terminal records, so it is safe to run concurrently
    /// with production, confirmation and resend.
    pub async fn purge_confirmed(&self) -> PipelineResult<usize> {
        let retention = self.config.purge_retention;

        let removed = if retention.is_zero() {
            self.db
                .call(|conn| queries::delete_reports_with_status(conn, AckStatus::Confirmed))
                .await?
        } else {
            let cutoff = Utc::now() - chrono::Duration::seconds(retention.as_secs() as i64);
            self.db
                .call(move |conn| queries::delete_confirmed_reports_older_than(conn, cutoff))
                .await?
        };

        if removed > 0 {
            info!(removed, "Purged confirmed reports");
        } else {
            debug!("No confirmed reports eligible for purge");
        }
        Ok(removed)
    }

    /// Spawn one interval loop per enabled operation.
    ///
    /// Returns the spawned task handles so the caller can abort them on
    /// shutdown. Disabled operations spawn nothing.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if self.config.resend_enabled {
            let scheduler = self.clone();
            info!(
                interval_secs = scheduler.config.resend_interval.as_secs(),
                "Resend schedule enabled"
            );
            handles.push(tokio::spawn(async move {
                let mut ticker = interval(scheduler.config.resend_interval);
                ticker.tick().await; // first tick fires immediately, skip it
                loop {
                    ticker.tick().await;
                    if let Err(e) = scheduler.resend_unconfirmed().await {
                        warn!(error = %e, "Resend cycle failed");
                    }
                }
            }));
        } else {
            info!("Resend schedule disabled");
        }

        if self.config.purge_enabled {
            let scheduler = self.clone();
            info!(
                interval_secs = scheduler.config.purge_interval.as_secs(),
                retention_secs = scheduler.config.purge_retention.as_secs(),
                "Purge schedule enabled"
            );
            handles.push(tokio::spawn(async move {
                let mut ticker = interval(scheduler.config.purge_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = scheduler.purge_confirmed().await {
                        warn!(error = %e, "Purge cycle failed");
                    }
                }
            }));
        } else {
            info!("Purge schedule disabled");
        }

        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reportd_database::{NewReportRecord, ReportRecord};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct MockSender {
        succeed: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    impl MockSender {
        fn new(succeed: bool) -> Self {
            Self {
                succeed: AtomicBool::new(succeed),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent_ids(&self) -> Vec<String> {
            let mut ids = self.sent.lock().unwrap().clone();
            ids.sort();
            ids
        }
    }

    #[async_trait]
    impl ReportSender for MockSender {
        async fn send(&self, record: &ReportRecord) -> bool {
            self.sent.lock().unwrap().push(record.id.clone());
            self.succeed.load(Ordering::SeqCst)
        }
    }

    async fn insert(db: &AsyncDatabase, id: &str) {
        let record = NewReportRecord {
            id: id.to_string(),
            payload: "{}".to_string(),
        };
        db.call(move |conn| queries::insert_report(conn, &record))
            .await
            .unwrap();
    }

    async fn status_of(db: &AsyncDatabase, id: &str) -> AckStatus {
        let id = id.to_string();
        db.call(move |conn| queries::get_report(conn, &id))
            .await
            .unwrap()
            .unwrap()
            .ack_status
    }

    fn config_with_zero_retention() -> SchedulerConfig {
        SchedulerConfig {
            purge_retention: Duration::ZERO,
            ..SchedulerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_resend_selects_only_unconfirmed() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        insert(&db, "r-sent").await;
        insert(&db, "r-error").await;
        insert(&db, "r-confirmed").await;
        db.call(|conn| queries::mark_report_send_failed(conn, "r-error", "down"))
            .await
            .unwrap();
        db.call(|conn| queries::confirm_report(conn, "r-confirmed"))
            .await
            .unwrap();

        let sender = Arc::new(MockSender::new(true));
        let scheduler =
            ResendScheduler::new(db.clone(), sender.clone(), SchedulerConfig::default());

        let outcome = scheduler.resend_unconfirmed().await.unwrap();

        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.resent, 2);
        assert_eq!(outcome.failed, 0);
        assert_eq!(sender.sent_ids(), vec!["r-error".to_string(), "r-sent".to_string()]);

        // The successful resend recovers the errored record
        assert_eq!(status_of(&db, "r-error").await, AckStatus::Sent);
        assert_eq!(status_of(&db, "r-confirmed").await, AckStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_failed_resend_marks_error() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        insert(&db, "r-1").await;

        let sender = Arc::new(MockSender::new(false));
        let scheduler = ResendScheduler::new(db.clone(), sender, SchedulerConfig::default());

        let outcome = scheduler.resend_unconfirmed().await.unwrap();
        assert_eq!(outcome.attempted, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(status_of(&db, "r-1").await, AckStatus::Error);
    }

    #[tokio::test]
    async fn test_resend_never_disturbs_confirmed_records() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        insert(&db, "r-1").await;
        db.call(|conn| queries::confirm_report(conn, "r-1"))
            .await
            .unwrap();

        let sender = Arc::new(MockSender::new(false));
        let scheduler = ResendScheduler::new(db.clone(), sender.clone(), SchedulerConfig::default());

        for _ in 0..3 {
            let outcome = scheduler.resend_unconfirmed().await.unwrap();
            assert_eq!(outcome.attempted, 0);
        }

        assert!(sender.sent_ids().is_empty());
        assert_eq!(status_of(&db, "r-1").await, AckStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_empty_work_set_is_a_noop() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let sender = Arc::new(MockSender::new(true));
        let scheduler = ResendScheduler::new(db, sender, SchedulerConfig::default());

        let outcome = scheduler.resend_unconfirmed().await.unwrap();
        assert_eq!(outcome, ResendOutcome::default());
    }

    #[tokio::test]
    async fn test_purge_zero_retention_removes_all_confirmed() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        insert(&db, "r-confirmed").await;
        insert(&db, "r-pending").await;
        db.call(|conn| queries::confirm_report(conn, "r-confirmed"))
            .await
            .unwrap();

        let sender = Arc::new(MockSender::new(true));
        let scheduler = ResendScheduler::new(db.clone(), sender, config_with_zero_retention());

        let removed = scheduler.purge_confirmed().await.unwrap();
        assert_eq!(removed, 1);

        let gone = db
            .call(|conn| queries::get_report(conn, "r-confirmed"))
            .await
            .unwrap();
        assert!(gone.is_none());
        assert_eq!(status_of(&db, "r-pending").await, AckStatus::Sent);
    }

    #[tokio::test]
    async fn test_purge_retention_keeps_recent_confirmations() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        insert(&db, "r-1").await;
        db.call(|conn| queries::confirm_report(conn, "r-1"))
            .await
            .unwrap();

        let sender = Arc::new(MockSender::new(true));
        let config = SchedulerConfig {
            purge_retention: Duration::from_secs(3600),
            ..SchedulerConfig::default()
        };
        let scheduler = ResendScheduler::new(db.clone(), sender, config);

        // Confirmed seconds ago, retention is an hour
        let removed = scheduler.purge_confirmed().await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(status_of(&db, "r-1").await, AckStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_disabled_operations_spawn_nothing() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let sender = Arc::new(MockSender::new(true));

        let config = SchedulerConfig {
            resend_enabled: false,
            purge_enabled: false,
            ..SchedulerConfig::default()
        };
        let scheduler = Arc::new(ResendScheduler::new(db.clone(), sender.clone(), config));
        assert!(scheduler.start().is_empty());

        let scheduler = Arc::new(ResendScheduler::new(
            db,
            sender,
            SchedulerConfig::default(),
        ));
        let handles = scheduler.start();
        assert_eq!(handles.len(), 2);
        for handle in handles {
            handle.abort();
        }
    }
}

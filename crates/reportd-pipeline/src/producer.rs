//! Report producer.
//!
//! Aggregates completed contracts into one report record, persists it, and
//! makes the first publish attempt. The record is never rolled back on a
//! failed send: it stays in the store in `error` so the resend schedule is
//! the recovery path.

use crate::{ContractSource, PipelineError, PipelineResult, ReportPayload};
use reportd_database::{queries, AsyncDatabase, NewReportRecord, ReportRecord};
use reportd_transport::ReportSender;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Produces report records from completed contracts.
pub struct ReportProducer {
    db: AsyncDatabase,
    sender: Arc<dyn ReportSender>,
}

impl ReportProducer {
    /// Create a new ReportProducer.
    pub fn new(db: AsyncDatabase, sender: Arc<dyn ReportSender>) -> Self {
        Self { db, sender }
    }

    /// Produce one report from the source's current contract batch.
    ///
    /// Returns the record in its post-send state (`sent` or `error`), or
    /// `None` when the source had nothing to report. Insert and send are
    /// deliberately not one transaction: once the insert lands the record
    /// exists regardless of how the publish attempt goes.
    pub async fn produce_report(
        &self,
        source: &dyn ContractSource,
    ) -> PipelineResult<Option<ReportRecord>> {
        let contracts = source.completed_unreported().await?;
        if contracts.is_empty() {
            debug!("No completed contracts to report");
            return Ok(None);
        }

        let report_id = uuid::Uuid::new_v4().to_string();
        let entry_count = contracts.len();
        let payload = ReportPayload::build(&report_id, contracts);
        let payload_json = serde_json::to_string(&payload)?;

        let new_record = NewReportRecord {
            id: report_id.clone(),
            payload: payload_json,
        };
        let record = self
            .db
            .call(move |conn| queries::insert_report(conn, &new_record))
            .await?;

        info!(
            report_id = %record.id,
            entries = entry_count,
            "Report record created"
        );

        if self.sender.send(&record).await {
            let id = record.id.clone();
            self.db
                .call(move |conn| queries::mark_report_sent(conn, &id))
                .await?;
        } else {
            warn!(report_id = %record.id, "Initial report publish failed");
            let id = record.id.clone();
            self.db
                .call(move |conn| {
                    queries::mark_report_send_failed(conn, &id, "publish failed")
                })
                .await?;
        }

        let id = record.id.clone();
        let final_record = self
            .db
            .call(move |conn| queries::get_report(conn, &id))
            .await?
            .ok_or_else(|| {
                PipelineError::Database(reportd_database::DatabaseError::NotFound(format!(
                    "Report {} missing after produce",
                    record.id
                )))
            })?;

        Ok(Some(final_record))
    }
}

//! Store-backed confirmation handling.
//!
//! Implements the transport's [`ConfirmationHandler`] seam against the
//! record store. Everything here absorbs its own failures: a confirmation
//! that cannot be applied is logged and dropped, never propagated into the
//! listener loop.

use async_trait::async_trait;
use reportd_database::{queries, AsyncDatabase};
use reportd_transport::{Confirmation, ConfirmationHandler};
use tracing::{debug, error, info, warn};

/// What applying a confirmation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The record transitioned to `confirmed`.
    Confirmed,
    /// The record was already `confirmed`; duplicate delivery, no-op.
    AlreadyConfirmed,
    /// No record with that id exists.
    Unknown,
}

/// Applies accounting confirmations to report records.
pub struct ConfirmationProcessor {
    db: AsyncDatabase,
}

impl ConfirmationProcessor {
    /// Create a new ConfirmationProcessor.
    pub fn new(db: AsyncDatabase) -> Self {
        Self { db }
    }

    /// Apply one confirmation by report id.
    ///
    /// Idempotent: confirming an already-confirmed record reports
    /// [`ConfirmOutcome::AlreadyConfirmed`] and changes nothing.
    pub async fn apply(&self, report_id: &str) -> reportd_database::DatabaseResult<ConfirmOutcome> {
        let id = report_id.to_string();
        self.db
            .call(move |conn| {
                if queries::get_report(conn, &id)?.is_none() {
                    return Ok(ConfirmOutcome::Unknown);
                }
                if queries::confirm_report(conn, &id)? {
                    Ok(ConfirmOutcome::Confirmed)
                } else {
                    Ok(ConfirmOutcome::AlreadyConfirmed)
                }
            })
            .await
    }
}

#[async_trait]
impl ConfirmationHandler for ConfirmationProcessor {
    async fn on_confirmation(&self, confirmation: &Confirmation) {
        match self.apply(&confirmation.report_id).await {
            Ok(ConfirmOutcome::Confirmed) => {
                info!(report_id = %confirmation.report_id, "Report confirmed");
            }
            Ok(ConfirmOutcome::AlreadyConfirmed) => {
                debug!(
                    report_id = %confirmation.report_id,
                    "Duplicate confirmation, record already confirmed"
                );
            }
            Ok(ConfirmOutcome::Unknown) => {
                warn!(
                    report_id = %confirmation.report_id,
                    entry_id = %confirmation.entry_id,
                    "Confirmation for unknown report id, discarding"
                );
            }
            Err(e) => {
                // Absorbed: the entry gets acked and the record stays
                // unconfirmed, so the next resend cycle re-delivers it and
                // the accounting system confirms again.
                error!(
                    report_id = %confirmation.report_id,
                    error = %e,
                    "Failed to apply confirmation"
                );
            }
        }
    }
}

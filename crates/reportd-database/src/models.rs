//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Acknowledgement status of a report record.
///
/// `Confirmed` is terminal: no status write made by the delivery path may
/// move a record out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Sent,
    Confirmed,
    Error,
}

impl Default for AckStatus {
    fn default() -> Self {
        Self::Sent
    }
}

impl AckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Confirmed => "confirmed",
            Self::Error => "error",
        }
    }

    /// Unknown values fall back to `Sent` so the record stays in the
    /// resend work set instead of dropping out of delivery.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "confirmed" => Self::Confirmed,
            "error" => Self::Error,
            _ => Self::Sent,
        }
    }
}

/// Report record - one bookkeeping report awaiting confirmation.
///
/// `id` is the idempotency key end to end: it travels inside every outbound
/// message and comes back inside the confirmation. `payload` and
/// `created_at` are write-once; the telemetry fields are maintained by the
/// delivery path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: String,
    pub ack_status: AckStatus,
    /// Opaque report document (JSON), produced once and never rewritten.
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub resend_count: i32,
    pub last_error: Option<String>,
}

/// New report record for insertion. Inserts always land in `sent`.
#[derive(Debug, Clone)]
pub struct NewReportRecord {
    pub id: String,
    pub payload: String,
}

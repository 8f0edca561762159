//! Configuration for the report transport.

use std::time::Duration;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Redis connection URL
    pub redis_url: String,

    /// Stream the accounting system consumes reports from
    pub report_stream: String,

    /// Stream the accounting system publishes confirmations to
    pub confirmation_stream: String,

    /// Maximum lifetime of a published report message
    pub message_ttl: Duration,

    /// XREADGROUP block timeout in milliseconds
    pub block_timeout_ms: u64,

    /// Consumer group name
    pub consumer_group: String,

    /// Consumer name (unique per instance)
    pub consumer_name: String,
}

impl TransportConfig {
    /// Create a new TransportConfig from environment variables, falling
    /// back to defaults. Callers (the CLI) may override fields afterwards.
    pub fn new() -> Self {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

        let report_stream = std::env::var("REPORTD_REPORT_STREAM")
            .unwrap_or_else(|_| "bookkeeping:reports".to_string());

        let confirmation_stream = std::env::var("REPORTD_CONFIRMATION_STREAM")
            .unwrap_or_else(|_| "bookkeeping:confirmations".to_string());

        let message_ttl_secs: u64 = std::env::var("REPORTD_MESSAGE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let block_timeout_ms: u64 = std::env::var("REPORTD_BLOCK_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);

        let consumer_name = format!("reportd-{}", uuid::Uuid::new_v4());

        Self {
            redis_url,
            report_stream,
            confirmation_stream,
            message_ttl: Duration::from_secs(message_ttl_secs),
            block_timeout_ms,
            consumer_group: "reportd".to_string(),
            consumer_name,
        }
    }
}

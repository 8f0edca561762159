//! Redis Streams consumer for accounting confirmations.
//!
//! Handles XREADGROUP and XACK operations against the confirmation stream.

use crate::config::TransportConfig;
use crate::error::{TransportError, TransportResult};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult};
use tracing::{debug, info, warn};

/// A confirmation read from the stream.
#[derive(Debug, Clone)]
pub struct Confirmation {
    /// The Redis entry id (e.g., "1234567890-0").
    pub entry_id: String,
    /// The originating report id embedded by the accounting system.
    pub report_id: String,
}

/// A raw stream entry before the report id check.
#[derive(Debug)]
struct StreamEntry {
    entry_id: String,
    report_id: Option<String>,
}

/// Redis Streams confirmation consumer.
pub struct ConfirmationConsumer {
    client: Client,
    conn: MultiplexedConnection,
    config: TransportConfig,
}

impl ConfirmationConsumer {
    /// Create a new ConfirmationConsumer and connect to Redis.
    pub async fn connect(config: TransportConfig) -> TransportResult<Self> {
        let client = Client::open(config.redis_url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;

        let consumer = Self { client, conn, config };

        // Ensure the consumer group exists
        consumer.ensure_consumer_group().await?;

        Ok(consumer)
    }

    /// Ensure the consumer group exists, creating it if necessary.
    async fn ensure_consumer_group(&self) -> TransportResult<()> {
        // XGROUP CREATE key groupname id [MKSTREAM]
        // Use $ so only confirmations published after group creation are read
        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.confirmation_stream)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut self.conn.clone())
            .await;

        match result {
            Ok(()) => {
                info!(
                    stream = %self.config.confirmation_stream,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
            }
            Err(e) => {
                // BUSYGROUP means the group already exists, which is fine
                if e.to_string().contains("BUSYGROUP") {
                    debug!(
                        stream = %self.config.confirmation_stream,
                        group = %self.config.consumer_group,
                        "Consumer group already exists"
                    );
                } else {
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    /// Read the next confirmation from the stream.
    ///
    /// This performs a blocking XREADGROUP with COUNT=1.
    /// Returns `None` if the block timeout expires with no messages.
    pub async fn read_next(&mut self) -> TransportResult<Option<Confirmation>> {
        // XREADGROUP GROUP groupname consumername [COUNT count] [BLOCK milliseconds] STREAMS key id
        // Using ">" to get only entries not yet delivered to this consumer
        let result: RedisResult<redis::Value> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.config.block_timeout_ms)
            .arg("STREAMS")
            .arg(&self.config.confirmation_stream)
            .arg(">")
            .query_async(&mut self.conn)
            .await;

        match result {
            Ok(redis::Value::Nil) => {
                // Block timeout expired, no messages
                Ok(None)
            }
            Ok(value) => {
                let entry = match parse_xreadgroup_response(value)? {
                    Some(entry) => entry,
                    None => return Ok(None),
                };

                match entry.report_id {
                    Some(report_id) => Ok(Some(Confirmation {
                        entry_id: entry.entry_id,
                        report_id,
                    })),
                    None => {
                        // A confirmation without a report id can never match a
                        // record. Ack it away so it cannot wedge the group.
                        warn!(
                            entry_id = %entry.entry_id,
                            "Confirmation missing report_id field, dropping"
                        );
                        self.ack(&entry.entry_id).await?;
                        Ok(None)
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Acknowledge a confirmation, removing it from the PEL.
    pub async fn ack(&mut self, entry_id: &str) -> TransportResult<()> {
        let result: i64 = self
            .conn
            .xack(
                &self.config.confirmation_stream,
                &self.config.consumer_group,
                &[entry_id],
            )
            .await?;

        if result == 1 {
            debug!(
                entry_id = %entry_id,
                stream = %self.config.confirmation_stream,
                "Acknowledged confirmation"
            );
        } else {
            warn!(
                entry_id = %entry_id,
                stream = %self.config.confirmation_stream,
                "XACK returned {}, entry may not exist",
                result
            );
        }

        Ok(())
    }

    /// Reconnect to Redis.
    pub async fn reconnect(&mut self) -> TransportResult<()> {
        info!("Reconnecting to Redis...");
        self.conn = self.client.get_multiplexed_async_connection().await?;
        self.ensure_consumer_group().await?;
        Ok(())
    }
}

/// Parse an XREADGROUP response to extract the first entry.
fn parse_xreadgroup_response(value: redis::Value) -> TransportResult<Option<StreamEntry>> {
    // Response format:
    // [[stream_key, [[entry_id, [field1, value1, field2, value2, ...]]]]]

    let streams = match value {
        redis::Value::Array(streams) => streams,
        redis::Value::Nil => return Ok(None),
        _ => {
            return Err(TransportError::Protocol(format!(
                "Unexpected XREADGROUP response type: {:?}",
                value
            )))
        }
    };

    if streams.is_empty() {
        return Ok(None);
    }

    // Get the first stream
    let stream = match &streams[0] {
        redis::Value::Array(s) => s,
        _ => {
            return Err(TransportError::Protocol(
                "Expected array for stream entry".to_string(),
            ))
        }
    };

    if stream.len() < 2 {
        return Err(TransportError::Protocol("Stream entry too short".to_string()));
    }

    // Get entries array
    let entries = match &stream[1] {
        redis::Value::Array(m) => m,
        _ => {
            return Err(TransportError::Protocol(
                "Expected array for entries".to_string(),
            ))
        }
    };

    if entries.is_empty() {
        return Ok(None);
    }

    // Get first entry
    let entry = match &entries[0] {
        redis::Value::Array(m) => m,
        _ => {
            return Err(TransportError::Protocol(
                "Expected array for entry".to_string(),
            ))
        }
    };

    if entry.len() < 2 {
        return Err(TransportError::Protocol("Entry too short".to_string()));
    }

    // Extract entry id
    let entry_id = match &entry[0] {
        redis::Value::BulkString(s) => String::from_utf8_lossy(s).to_string(),
        redis::Value::SimpleString(s) => s.clone(),
        _ => {
            return Err(TransportError::Protocol(format!(
                "Expected string for entry id, got {:?}",
                entry[0]
            )))
        }
    };

    // Extract fields
    let fields = match &entry[1] {
        redis::Value::Array(f) => f,
        _ => {
            return Err(TransportError::Protocol(
                "Expected array for fields".to_string(),
            ))
        }
    };

    // Find the report_id field
    let mut report_id = None;
    let mut i = 0;
    while i + 1 < fields.len() {
        let field_name = match &fields[i] {
            redis::Value::BulkString(s) => String::from_utf8_lossy(s).to_string(),
            redis::Value::SimpleString(s) => s.clone(),
            _ => {
                i += 2;
                continue;
            }
        };

        if field_name == "report_id" {
            report_id = match &fields[i + 1] {
                redis::Value::BulkString(s) => Some(String::from_utf8_lossy(s).to_string()),
                redis::Value::SimpleString(s) => Some(s.clone()),
                _ => None,
            };
            break;
        }
        i += 2;
    }

    debug!(
        entry_id = %entry_id,
        report_id = ?report_id,
        "Read entry from confirmation stream"
    );

    Ok(Some(StreamEntry { entry_id, report_id }))
}

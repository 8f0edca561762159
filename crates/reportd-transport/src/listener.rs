//! Confirmation listener loop.
//!
//! Bridges the confirmation stream to a [`ConfirmationHandler`]. The loop
//! never exits on its own: transport errors trigger a reconnect, anything
//! else gets a brief pause, and processing continues with the next entry.

use crate::consumer::{Confirmation, ConfirmationConsumer};
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Single-method handler invoked for every delivered confirmation.
///
/// Delivery is at-least-once: the same confirmation may be handed over
/// again after a crash or an ack failure, and confirmations for different
/// entries may be handled concurrently by multiple listener instances. A
/// handler is never invoked re-entrantly for the same entry. Implementations
/// must absorb their own failures; nothing they do may take the listener
/// down.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn on_confirmation(&self, confirmation: &Confirmation);
}

/// The confirmation listener.
///
/// Reads entries one at a time, hands each to the handler, then
/// acknowledges. An entry is only acked after the handler returns, so a
/// crash in between leads to redelivery, not loss.
pub struct ConfirmationListener {
    consumer: ConfirmationConsumer,
    handler: Arc<dyn ConfirmationHandler>,
}

impl ConfirmationListener {
    /// Create a new ConfirmationListener.
    pub fn new(consumer: ConfirmationConsumer, handler: Arc<dyn ConfirmationHandler>) -> Self {
        Self { consumer, handler }
    }

    /// Run the listener loop.
    pub async fn run(&mut self) -> TransportResult<()> {
        info!("Starting confirmation listener loop");

        loop {
            if let Err(e) = self.process_one().await {
                error!(error = %e, "Error processing confirmation");

                match &e {
                    TransportError::Redis(_) => {
                        warn!("Redis error, attempting to reconnect...");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        if let Err(reconnect_err) = self.consumer.reconnect().await {
                            error!(error = %reconnect_err, "Failed to reconnect to Redis");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                    _ => {
                        // For other errors, brief pause before continuing
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }

    /// Process one confirmation from the stream.
    async fn process_one(&mut self) -> TransportResult<()> {
        let confirmation = match self.consumer.read_next().await? {
            Some(c) => c,
            None => {
                // Block timeout expired, no confirmations available
                debug!("No confirmations available, continuing to poll...");
                return Ok(());
            }
        };

        info!(
            entry_id = %confirmation.entry_id,
            report_id = %confirmation.report_id,
            "Processing confirmation"
        );

        self.handler.on_confirmation(&confirmation).await;
        self.consumer.ack(&confirmation.entry_id).await?;

        Ok(())
    }
}

//! Redis Streams transport for report delivery and confirmations.
//!
//! The outbound side publishes report records to the report stream, one
//! publish attempt per call, with a bounded message lifetime. The inbound
//! side consumes accounting confirmations through a consumer group and
//! hands them to a single-method handler.
//!
//! # Core Invariants
//!
//! 1. **One Attempt Per Call**: The sender never retries; the outcome is a bool
//! 2. **Bounded Lifetime**: Expired report entries are trimmed from the stream
//! 3. **ACK After Handling**: Confirmations are ACKed only after the handler returns
//! 4. **Crash-Safe**: Unacked confirmations are redelivered by Redis
//!
//! # Architecture
//!
//! ```text
//! report_records -> sender -> report stream -> accounting system
//!                                                     |
//! handler <- listener <- confirmation stream <--------
//! ```

pub mod config;
pub mod consumer;
pub mod error;
pub mod listener;
pub mod sender;

pub use config::TransportConfig;
pub use consumer::{Confirmation, ConfirmationConsumer};
pub use error::{TransportError, TransportResult};
pub use listener::{ConfirmationHandler, ConfirmationListener};
pub use sender::{RedisReportSender, ReportSender};

//! Report delivery pipeline: production, confirmation and resend.
//!
//! Bridges the marketplace's completed contracts to the external accounting
//! system with an at-least-once guarantee:
//!
//! - [`ReportProducer`] aggregates completed contracts into one persisted
//!   report record and makes the first publish attempt.
//! - [`ConfirmationProcessor`] applies accounting confirmations to records,
//!   idempotently, behind the transport's handler seam.
//! - [`ResendScheduler`] periodically re-publishes everything unconfirmed
//!   and purges confirmed records past retention.
//!
//! There is no in-process coordination between the three: every status
//! write is conditional in the store (`confirmed` is terminal), which is
//! the only ordering guarantee the pipeline needs. Duplicate deliveries
//! are expected; the accounting system deduplicates by report id.

mod confirm;
mod contracts;
mod error;
mod producer;
mod scheduler;

pub use confirm::{ConfirmOutcome, ConfirmationProcessor};
pub use contracts::{CompletedContract, ContractSource, ReportPayload};
pub use error::{PipelineError, PipelineResult};
pub use producer::ReportProducer;
pub use scheduler::{ResendOutcome, ResendScheduler, SchedulerConfig};

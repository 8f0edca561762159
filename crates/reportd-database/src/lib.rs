//! SQLite persistence for the report delivery pipeline.
//!
//! This crate provides:
//! - Async SQLite executor with a dedicated thread
//! - Database migrations
//! - The `report_records` model types
//! - Query helpers for the record lifecycle
//!
//! # Architecture
//!
//! The store is the single source of truth for record state: no component
//! caches a record's ack status across operations. The `AsyncDatabase`
//! executor runs every query on one background thread in FIFO order, and
//! each status write carries its own not-already-confirmed guard in SQL,
//! so `confirmed` is terminal no matter how callers interleave.
//!
//! ```ignore
//! let db = AsyncDatabase::open(path).await?;
//! let record = db.call(|conn| queries::get_report(conn, "r-1")).await?;
//! ```

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;

pub use error::{DatabaseError, DatabaseResult};
pub use executor::AsyncDatabase;
pub use migrations::run_migrations;
pub use models::*;

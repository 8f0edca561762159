//! Completed-contract source and report payload aggregation.
//!
//! The contract-completion query belongs to the marketplace backend and is
//! consumed here as an interface only. Whatever it returns for one call is
//! aggregated into a single report payload.

use crate::PipelineResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One completed, not-yet-reported contract as the marketplace hands it over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedContract {
    pub contract_id: String,
    pub title: String,
    pub client_id: String,
    pub contractor_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub completed_at: DateTime<Utc>,
}

/// Source of completed-but-unreported contracts.
///
/// External collaborator boundary: implementations live outside this crate
/// (a live service query, a file, a test fixture).
#[async_trait]
pub trait ContractSource: Send + Sync {
    async fn completed_unreported(&self) -> PipelineResult<Vec<CompletedContract>>;
}

/// The aggregated report document stored as the record payload and shipped
/// to the accounting system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportPayload {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub entry_count: usize,
    /// Sum of contract amounts per currency code.
    pub totals_cents: BTreeMap<String, i64>,
    pub contracts: Vec<CompletedContract>,
}

impl ReportPayload {
    /// Aggregate a contract batch into one report document.
    pub fn build(report_id: &str, contracts: Vec<CompletedContract>) -> Self {
        let mut totals_cents: BTreeMap<String, i64> = BTreeMap::new();
        for contract in &contracts {
            *totals_cents.entry(contract.currency.clone()).or_insert(0) +=
                contract.amount_cents;
        }

        Self {
            report_id: report_id.to_string(),
            generated_at: Utc::now(),
            entry_count: contracts.len(),
            totals_cents,
            contracts,
        }
    }
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! Service Layer for the Quota Ledger
//!
//! # Architecture
//!
//! ```text
//! Calling service (VM create, volume attach, ...)
//!     ↓
//! QuotaService (this module)          ← Ledger in process
//!     ↓                               ← RemoteLedger over NATS
//! Commission Protocol → Operation Primitives
//!     ↓
//! Holding Store + Provision Log
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use cim_quota::service::{Ledger, QuotaService};
//!
//! let ledger = Ledger::in_memory(&LedgerConfig::default());
//! ledger.register_resource("cyclades.cpu", Limit::new(8)).await?;
//!
//! let serial = ledger
//!     .issue_commission(
//!         IssueRequest::new("cyclades", "server create")
//!             .provision(HoldingKey::new("alice", "cyclades.cpu"), 2),
//!     )
//!     .await?;
//!
//! // ... create the VM ...
//!
//! ledger.resolve_commission(serial, true).await?;
//! ```

use async_trait::async_trait;

use crate::domain::{Holding, HoldingKey, IssueRequest, ResolveOutcome, Serial};
use crate::errors::QuotaResult;

pub mod ledger;

pub use ledger::Ledger;

/// Operations the ledger exposes to calling services
#[async_trait]
pub trait QuotaService: Send + Sync {
    /// Reserve the quota impact of one business operation
    ///
    /// # Returns
    /// - Serial of the new pending commission
    async fn issue_commission(&self, request: IssueRequest) -> QuotaResult<Serial>;

    /// Accept or reject a pending commission (idempotent)
    async fn resolve_commission(&self, serial: Serial, accept: bool) -> QuotaResult<ResolveOutcome>;

    /// Current counters of one holding
    async fn get_holding(&self, key: &HoldingKey) -> QuotaResult<Holding>;
}

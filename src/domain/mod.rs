// Copyright (c) 2025 - Cowboy AI, Inc.
//! Quota Domain Models
//!
//! Core ledger concepts: holdings, commissions with their provisions, and the
//! provision log, plus the pure invariant checks applied to them.
//!
//! # Value Objects
//!
//! - [`HoldingKey`] - (holder, source, resource) identity, totally ordered
//! - [`Limit`] - capacity bound with an unlimited sentinel
//! - [`Serial`] - store-assigned commission identifier
//!
//! # Records
//!
//! - [`Holding`] - committed/reserved counters against a limit
//! - [`Commission`] - pending or resolved batch of [`Provision`]s
//! - [`ProvisionLogEntry`] - audit record written on resolution

pub mod commission;
pub mod holding;
pub mod invariants;
pub mod provision_log;

pub use commission::{
    Commission, IssueRequest, PendingResolution, Provision, Resolution, ResolveOutcome, Serial,
};
pub use holding::{Holding, HoldingFilter, HoldingKey, Limit};
pub use provision_log::ProvisionLogEntry;

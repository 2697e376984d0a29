// Copyright (c) 2025 - Cowboy AI, Inc.
//! Holding Store
//!
//! Durable keyed storage for the ledger: holdings, commissions and serial
//! allocation, plus the append-only provision log.
//!
//! # Locking
//!
//! ```text
//! resolve:  commission row ──► holding rows (ascending key order)
//! issue:                        holding rows (ascending key order)
//! ```
//!
//! Issue never holds a commission row while waiting for holdings, so the two
//! paths cannot deadlock. Every wait is bounded (see [`lock`]).
//!
//! Scans (`scan_holdings`, `scan_pending`) never wait: a row locked by a
//! mutation in flight is reported as busy instead of read.
//!
//! # Durability
//!
//! Mutations are made on locked rows and then handed to `save_holdings` /
//! `save_commission` before the locks are released. Issue saves holdings
//! before the commission, so a crash in between leaves an over-reservation
//! and never a commission without its reservation.
//!
//! # Implementations
//!
//! - [`MemoryLedgerStore`] - in-process tables behind per-row async mutexes
//! - [`KvLedgerStore`] - the same tables written through to a JetStream
//!   key-value bucket and reloaded on start
//! - [`ProvisionLog`] implementations: [`MemoryProvisionLog`] and
//!   [`NatsProvisionLog`] on JetStream

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use crate::domain::{Commission, Holding, HoldingFilter, HoldingKey, Limit, Serial};
use crate::errors::QuotaResult;

pub mod kv;
pub mod lock;
pub mod memory;
pub mod nats;
pub mod provision_log;

pub use kv::KvLedgerStore;
pub use lock::HoldingLocks;
pub use memory::MemoryLedgerStore;
pub use nats::NatsProvisionLog;
pub use provision_log::{MemoryProvisionLog, ProvisionLog};

/// Exclusive access to one commission row
pub type CommissionLock = OwnedMutexGuard<Commission>;

/// Rows read by a scan, and the keys of rows that were locked at the time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan<T, K> {
    pub rows: Vec<T>,
    pub busy: Vec<K>,
}

impl<T, K> Default for Scan<T, K> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            busy: Vec::new(),
        }
    }
}

/// Storage of holdings and commissions
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Register a resource and the limit new holdings of it start with
    async fn register_resource(&self, resource: &str, default_limit: Limit) -> QuotaResult<()>;

    /// Set the limit of a holding, creating it when missing
    async fn set_limit(&self, key: &HoldingKey, limit: Limit) -> QuotaResult<Holding>;

    /// Snapshot of one holding
    async fn get_holding(&self, key: &HoldingKey) -> QuotaResult<Holding>;

    /// Snapshots of every holding matching the filter, in key order
    async fn list_holdings(&self, filter: &HoldingFilter) -> QuotaResult<Vec<Holding>>;

    /// Lock holdings for mutation, creating missing ones from resource defaults
    ///
    /// # Errors
    ///
    /// - `UnknownHolding` if a holding is missing and its resource is not registered
    /// - `LockTimeout` if the rows cannot be acquired within the retry budget
    async fn lock_holdings(&self, keys: &[HoldingKey]) -> QuotaResult<HoldingLocks>;

    /// Allocate the next commission serial
    ///
    /// Serials increase strictly and are never handed out twice, including
    /// across restarts of a durable store.
    async fn next_serial(&self) -> QuotaResult<Serial>;

    /// Store a new commission record
    async fn insert_commission(&self, commission: Commission) -> QuotaResult<()>;

    /// Write holdings mutated under their row locks through to storage
    async fn save_holdings(&self, _holdings: &[Holding]) -> QuotaResult<()> {
        Ok(())
    }

    /// Write a commission mutated under its row lock through to storage
    async fn save_commission(&self, _commission: &Commission) -> QuotaResult<()> {
        Ok(())
    }

    /// Lock a commission row for resolution
    ///
    /// # Errors
    ///
    /// - `UnknownCommission` if no commission has this serial
    async fn lock_commission(&self, serial: Serial) -> QuotaResult<CommissionLock>;

    /// Snapshot of one commission
    async fn get_commission(&self, serial: Serial) -> QuotaResult<Commission>;

    /// Pending commissions, optionally restricted to one client, in serial order
    async fn pending_commissions(&self, client_key: Option<&str>) -> QuotaResult<Vec<Commission>>;

    /// Holdings matching the filter, without waiting on row locks
    async fn scan_holdings(&self, filter: &HoldingFilter) -> QuotaResult<Scan<Holding, HoldingKey>>;

    /// Pending commissions of every client, without waiting on row locks
    async fn scan_pending(&self) -> QuotaResult<Scan<Commission, Serial>>;
}

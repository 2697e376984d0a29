// Copyright (c) 2025 - Cowboy AI, Inc.
//! Test Fixtures for cim-quota
//!
//! Ledgers with registered resources and a fixed inventory source.
//!
//! # Design Principles
//! - Holders and resources are named constants shared across suites
//! - Every ledger is in-memory and independent
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use cim_quota::store::{
    CommissionLock, HoldingLocks, LedgerStore, MemoryLedgerStore, MemoryProvisionLog, Scan,
};
use cim_quota::{
    Commission, Holding, HoldingFilter, HoldingKey, InventorySource, InventoryUsage, IssueRequest,
    Ledger, LedgerConfig, Limit, LockConfig, QuotaResult, Serial,
};

pub const HOLDER_1: &str = "h1";
pub const HOLDER_2: &str = "h2";
pub const CPU: &str = "cyclades.cpu";
pub const RAM: &str = "cyclades.ram";
pub const CLIENT: &str = "cyclades";

pub fn cpu(holder: &str) -> HoldingKey {
    HoldingKey::new(holder, CPU)
}

pub fn ram(holder: &str) -> HoldingKey {
    HoldingKey::new(holder, RAM)
}

/// Ledger with cpu limited to `cpu_limit` and ram to 1024
pub async fn ledger(cpu_limit: i64) -> Ledger {
    ledger_with(LedgerConfig::default(), cpu_limit).await
}

pub async fn ledger_with(config: LedgerConfig, cpu_limit: i64) -> Ledger {
    let ledger = Ledger::in_memory(&config);
    ledger
        .register_resource(CPU, Limit::new(cpu_limit))
        .await
        .expect("register cpu");
    ledger
        .register_resource(RAM, Limit::new(1024))
        .await
        .expect("register ram");
    ledger
}

/// Issue a single-provision commission
pub async fn issue(ledger: &Ledger, key: HoldingKey, quantity: i64) -> QuotaResult<Serial> {
    ledger
        .issue(IssueRequest::new(CLIENT, "test").provision(key, quantity))
        .await
}

/// Issue and accept a single-provision commission
pub async fn commit(ledger: &Ledger, key: HoldingKey, quantity: i64) -> Serial {
    let serial = issue(ledger, key, quantity).await.expect("issue");
    ledger.resolve(serial, true).await.expect("resolve");
    serial
}

/// Inventory source with settable usage
#[derive(Clone, Default)]
pub struct FixedInventory {
    resources: Vec<String>,
    usage: Arc<RwLock<Vec<InventoryUsage>>>,
}

impl FixedInventory {
    pub fn new<I, S>(resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resources: resources.into_iter().map(Into::into).collect(),
            usage: Arc::default(),
        }
    }

    pub async fn set(&self, key: HoldingKey, quantity: i64) {
        let mut usage = self.usage.write().await;
        usage.retain(|u| u.key != key);
        usage.push(InventoryUsage::new(key, quantity));
    }

    /// Report one more row for `key`, as a per-VM listing would
    pub async fn add(&self, key: HoldingKey, quantity: i64) {
        self.usage.write().await.push(InventoryUsage::new(key, quantity));
    }
}

#[async_trait]
impl InventorySource for FixedInventory {
    fn resources(&self) -> Vec<String> {
        self.resources.clone()
    }

    async fn usage(&self, holder: Option<&str>) -> QuotaResult<Vec<InventoryUsage>> {
        Ok(self
            .usage
            .read()
            .await
            .iter()
            .filter(|u| holder.map_or(true, |h| u.key.holder == h))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct Persisted {
    resources: BTreeMap<String, Limit>,
    holdings: BTreeMap<HoldingKey, Holding>,
    commissions: BTreeMap<Serial, Commission>,
}

/// Store that keeps only what was written through, like a durable bucket
///
/// `restart` drops the in-memory tables and rebuilds them from the
/// persisted rows, the way a restarted service reloads its bucket.
#[derive(Clone)]
pub struct PersistedStore {
    tables: Arc<MemoryLedgerStore>,
    persisted: Arc<RwLock<Persisted>>,
}

impl PersistedStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(MemoryLedgerStore::default()),
            persisted: Arc::default(),
        }
    }

    pub async fn restart(&self) -> Self {
        let tables = MemoryLedgerStore::new(LockConfig::default());
        {
            let persisted = self.persisted.read().await;
            tables
                .restore(
                    persisted
                        .resources
                        .iter()
                        .map(|(name, limit)| (name.clone(), *limit))
                        .collect(),
                    persisted.holdings.values().cloned().collect(),
                    persisted.commissions.values().cloned().collect(),
                )
                .await;
        }
        Self {
            tables: Arc::new(tables),
            persisted: self.persisted.clone(),
        }
    }

    pub fn ledger(&self) -> Ledger {
        Ledger::new(Arc::new(self.clone()), Arc::new(MemoryProvisionLog::new()))
    }

    pub async fn persisted_holding(&self, key: &HoldingKey) -> Option<Holding> {
        self.persisted.read().await.holdings.get(key).cloned()
    }
}

#[async_trait]
impl LedgerStore for PersistedStore {
    async fn register_resource(&self, resource: &str, default_limit: Limit) -> QuotaResult<()> {
        self.tables.register_resource(resource, default_limit).await?;
        self.persisted
            .write()
            .await
            .resources
            .insert(resource.to_string(), default_limit);
        Ok(())
    }

    async fn set_limit(&self, key: &HoldingKey, limit: Limit) -> QuotaResult<Holding> {
        let holding = self.tables.set_limit(key, limit).await?;
        self.save_holdings(std::slice::from_ref(&holding)).await?;
        Ok(holding)
    }

    async fn get_holding(&self, key: &HoldingKey) -> QuotaResult<Holding> {
        self.tables.get_holding(key).await
    }

    async fn list_holdings(&self, filter: &HoldingFilter) -> QuotaResult<Vec<Holding>> {
        self.tables.list_holdings(filter).await
    }

    async fn lock_holdings(&self, keys: &[HoldingKey]) -> QuotaResult<HoldingLocks> {
        self.tables.lock_holdings(keys).await
    }

    async fn next_serial(&self) -> QuotaResult<Serial> {
        self.tables.next_serial().await
    }

    async fn insert_commission(&self, commission: Commission) -> QuotaResult<()> {
        self.save_commission(&commission).await?;
        self.tables.insert_commission(commission).await
    }

    async fn save_holdings(&self, holdings: &[Holding]) -> QuotaResult<()> {
        let mut persisted = self.persisted.write().await;
        for holding in holdings {
            persisted.holdings.insert(holding.key.clone(), holding.clone());
        }
        Ok(())
    }

    async fn save_commission(&self, commission: &Commission) -> QuotaResult<()> {
        self.persisted
            .write()
            .await
            .commissions
            .insert(commission.serial, commission.clone());
        Ok(())
    }

    async fn lock_commission(&self, serial: Serial) -> QuotaResult<CommissionLock> {
        self.tables.lock_commission(serial).await
    }

    async fn get_commission(&self, serial: Serial) -> QuotaResult<Commission> {
        self.tables.get_commission(serial).await
    }

    async fn pending_commissions(&self, client_key: Option<&str>) -> QuotaResult<Vec<Commission>> {
        self.tables.pending_commissions(client_key).await
    }

    async fn scan_holdings(&self, filter: &HoldingFilter) -> QuotaResult<Scan<Holding, HoldingKey>> {
        self.tables.scan_holdings(filter).await
    }

    async fn scan_pending(&self) -> QuotaResult<Scan<Commission, Serial>> {
        self.tables.scan_pending().await
    }
}

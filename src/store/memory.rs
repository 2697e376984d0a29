// Copyright (c) 2025 - Cowboy AI, Inc.
//! In-memory Holding Store
//!
//! Tables are maps of row handles; the map locks are only held long enough
//! to find or insert a row, never while waiting on a row.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::lock::{acquire_one, acquire_ordered, HoldingLocks};
use super::{CommissionLock, LedgerStore, Scan};
use crate::config::LockConfig;
use crate::domain::{Commission, Holding, HoldingFilter, HoldingKey, Limit, Serial};
use crate::errors::{QuotaError, QuotaResult};

type Row<T> = Arc<Mutex<T>>;

/// In-process ledger tables
pub struct MemoryLedgerStore {
    lock_config: LockConfig,
    resources: RwLock<HashMap<String, Limit>>,
    holdings: RwLock<BTreeMap<HoldingKey, Row<Holding>>>,
    commissions: RwLock<BTreeMap<Serial, Row<Commission>>>,
    last_serial: AtomicU64,
}

impl MemoryLedgerStore {
    pub fn new(lock_config: LockConfig) -> Self {
        Self {
            lock_config,
            resources: RwLock::new(HashMap::new()),
            holdings: RwLock::new(BTreeMap::new()),
            commissions: RwLock::new(BTreeMap::new()),
            last_serial: AtomicU64::new(0),
        }
    }

    /// Highest serial handed out or restored
    pub fn last_serial(&self) -> Serial {
        Serial(self.last_serial.load(Ordering::SeqCst))
    }

    /// Never hand out `serial` or anything below it
    pub fn observe_serial(&self, serial: Serial) {
        self.last_serial.fetch_max(serial.value(), Ordering::SeqCst);
    }

    /// Load rows read back from durable storage
    ///
    /// Existing rows with the same keys are replaced. The serial floor is
    /// raised to the highest restored commission.
    pub async fn restore(
        &self,
        resources: Vec<(String, Limit)>,
        holdings: Vec<Holding>,
        commissions: Vec<Commission>,
    ) {
        self.resources.write().await.extend(resources);

        let mut table = self.holdings.write().await;
        for holding in holdings {
            table.insert(holding.key.clone(), Arc::new(Mutex::new(holding)));
        }
        drop(table);

        let mut table = self.commissions.write().await;
        for commission in commissions {
            self.observe_serial(commission.serial);
            table.insert(commission.serial, Arc::new(Mutex::new(commission)));
        }
    }

    async fn holding_row(&self, key: &HoldingKey) -> QuotaResult<Row<Holding>> {
        self.holdings
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| QuotaError::UnknownHolding(key.clone()))
    }

    async fn commission_row(&self, serial: Serial) -> QuotaResult<Row<Commission>> {
        self.commissions
            .read()
            .await
            .get(&serial)
            .cloned()
            .ok_or(QuotaError::UnknownCommission(serial))
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn register_resource(&self, resource: &str, default_limit: Limit) -> QuotaResult<()> {
        if resource.is_empty() {
            return Err(QuotaError::InvalidRequest(
                "resource name cannot be empty".to_string(),
            ));
        }
        self.resources
            .write()
            .await
            .insert(resource.to_string(), default_limit);
        debug!(resource, limit = %default_limit, "Registered resource");
        Ok(())
    }

    async fn set_limit(&self, key: &HoldingKey, limit: Limit) -> QuotaResult<Holding> {
        let row = {
            let mut holdings = self.holdings.write().await;
            holdings
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Holding::new(key.clone(), limit))))
                .clone()
        };

        let mut guard = acquire_one(key.clone(), row, &self.lock_config).await?;
        guard.limit = limit;
        Ok(guard.clone())
    }

    async fn get_holding(&self, key: &HoldingKey) -> QuotaResult<Holding> {
        let row = self.holding_row(key).await?;
        let guard = acquire_one(key.clone(), row, &self.lock_config).await?;
        Ok(guard.clone())
    }

    async fn list_holdings(&self, filter: &HoldingFilter) -> QuotaResult<Vec<Holding>> {
        let rows: Vec<(HoldingKey, Row<Holding>)> = self
            .holdings
            .read()
            .await
            .iter()
            .filter(|(key, _)| filter.matches(key))
            .map(|(key, row)| (key.clone(), row.clone()))
            .collect();

        let mut snapshots = Vec::with_capacity(rows.len());
        for (key, row) in rows {
            let guard = acquire_one(key, row, &self.lock_config).await?;
            snapshots.push(guard.clone());
        }
        Ok(snapshots)
    }

    async fn lock_holdings(&self, keys: &[HoldingKey]) -> QuotaResult<HoldingLocks> {
        let rows = {
            let resources = self.resources.read().await;
            let mut holdings = self.holdings.write().await;
            let mut rows = BTreeMap::new();

            for key in keys {
                let row = match holdings.get(key) {
                    Some(row) => row.clone(),
                    None => {
                        let limit = resources
                            .get(&key.resource)
                            .copied()
                            .ok_or_else(|| QuotaError::UnknownHolding(key.clone()))?;
                        debug!(holding = %key, limit = %limit, "Creating holding");
                        let row = Arc::new(Mutex::new(Holding::new(key.clone(), limit)));
                        holdings.insert(key.clone(), row.clone());
                        row
                    }
                };
                rows.insert(key.clone(), row);
            }
            rows
        };

        let guards = acquire_ordered(rows, &self.lock_config).await?;
        Ok(HoldingLocks::new(guards))
    }

    async fn next_serial(&self) -> QuotaResult<Serial> {
        Ok(Serial(self.last_serial.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn insert_commission(&self, commission: Commission) -> QuotaResult<()> {
        let mut commissions = self.commissions.write().await;
        if commissions.contains_key(&commission.serial) {
            return Err(QuotaError::InvalidRequest(format!(
                "commission {} already exists",
                commission.serial
            )));
        }
        commissions.insert(commission.serial, Arc::new(Mutex::new(commission)));
        Ok(())
    }

    async fn lock_commission(&self, serial: Serial) -> QuotaResult<CommissionLock> {
        let row = self.commission_row(serial).await?;
        acquire_one(serial, row, &self.lock_config).await
    }

    async fn get_commission(&self, serial: Serial) -> QuotaResult<Commission> {
        let guard = self.lock_commission(serial).await?;
        Ok(guard.clone())
    }

    async fn pending_commissions(&self, client_key: Option<&str>) -> QuotaResult<Vec<Commission>> {
        let rows: Vec<(Serial, Row<Commission>)> = self
            .commissions
            .read()
            .await
            .iter()
            .map(|(serial, row)| (*serial, row.clone()))
            .collect();

        let mut pending = Vec::new();
        for (serial, row) in rows {
            let guard = acquire_one(serial, row, &self.lock_config).await?;
            let client_matches = client_key.map_or(true, |client| guard.client_key == client);
            if guard.is_pending() && client_matches {
                pending.push(guard.clone());
            }
        }
        Ok(pending)
    }

    async fn scan_holdings(&self, filter: &HoldingFilter) -> QuotaResult<Scan<Holding, HoldingKey>> {
        let holdings = self.holdings.read().await;
        let mut scan = Scan::default();
        for (key, row) in holdings.iter().filter(|(key, _)| filter.matches(key)) {
            match row.try_lock() {
                Ok(guard) => scan.rows.push(guard.clone()),
                Err(_) => scan.busy.push(key.clone()),
            }
        }
        Ok(scan)
    }

    async fn scan_pending(&self) -> QuotaResult<Scan<Commission, Serial>> {
        let commissions = self.commissions.read().await;
        let mut scan = Scan::default();
        for (serial, row) in commissions.iter() {
            match row.try_lock() {
                Ok(guard) if guard.is_pending() => scan.rows.push(guard.clone()),
                Ok(_) => {}
                Err(_) => scan.busy.push(*serial),
            }
        }
        Ok(scan)
    }
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! JetStream Key-Value Holding Store
//!
//! The in-memory tables stay the working set: row locks, snapshots and scans
//! are served by [`MemoryLedgerStore`]. Every mutation is written through to
//! one KV bucket before its row locks are released, and the bucket is read
//! back when the store opens.
//!
//! ```text
//! serial                  last allocated serial (compare-and-set)
//! resource.<hex name>     { resource, limit }
//! holding.<hex key>       Holding
//! commission.<serial>     Commission
//! ```
//!
//! Free-form names are hex-encoded: KV keys only allow `[-/_=.a-zA-Z0-9]`.

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::lock::HoldingLocks;
use super::memory::MemoryLedgerStore;
use super::{CommissionLock, LedgerStore, Scan};
use crate::config::LockConfig;
use crate::domain::{Commission, Holding, HoldingFilter, HoldingKey, Limit, Serial};
use crate::errors::{QuotaError, QuotaResult};
use crate::nats::NatsClient;

const SERIAL_KEY: &str = "serial";
const RESOURCE_PREFIX: &str = "resource.";
const HOLDING_PREFIX: &str = "holding.";
const COMMISSION_PREFIX: &str = "commission.";

/// Compare-and-set rounds before serial allocation gives up
const SERIAL_ATTEMPTS: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
struct ResourceRecord {
    resource: String,
    limit: Limit,
}

/// Holding store persisted in a JetStream KV bucket
pub struct KvLedgerStore {
    tables: MemoryLedgerStore,
    bucket: kv::Store,
    serial_lock: Mutex<()>,
}

impl KvLedgerStore {
    /// Open or create the bucket and load every persisted row
    pub async fn from_client(
        client: &NatsClient,
        bucket: &str,
        lock_config: LockConfig,
    ) -> QuotaResult<Self> {
        let jetstream = jetstream::new(client.inner().clone());

        let store = match jetstream.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => {
                info!(bucket, "Creating ledger bucket");
                jetstream
                    .create_key_value(kv::Config {
                        bucket: bucket.to_string(),
                        history: 1,
                        storage: jetstream::stream::StorageType::File,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| QuotaError::Nats(e.to_string()))?
            }
        };

        let ledger_store = Self {
            tables: MemoryLedgerStore::new(lock_config),
            bucket: store,
            serial_lock: Mutex::new(()),
        };
        ledger_store.load().await?;
        Ok(ledger_store)
    }

    async fn load(&self) -> QuotaResult<()> {
        let mut resources = Vec::new();
        let mut holdings = Vec::new();
        let mut commissions = Vec::new();

        let mut keys = self
            .bucket
            .keys()
            .await
            .map_err(|e| QuotaError::Nats(e.to_string()))?;

        while let Some(key) = keys.next().await {
            let key = key.map_err(|e| QuotaError::Nats(e.to_string()))?;
            let value = match self
                .bucket
                .get(&key)
                .await
                .map_err(|e| QuotaError::Nats(e.to_string()))?
            {
                Some(value) => value,
                None => continue,
            };

            if key.starts_with(RESOURCE_PREFIX) {
                let record: ResourceRecord = serde_json::from_slice(&value)?;
                resources.push((record.resource, record.limit));
            } else if key.starts_with(HOLDING_PREFIX) {
                holdings.push(serde_json::from_slice::<Holding>(&value)?);
            } else if key.starts_with(COMMISSION_PREFIX) {
                commissions.push(serde_json::from_slice::<Commission>(&value)?);
            } else if key == SERIAL_KEY {
                self.tables.observe_serial(Serial(parse_serial(&value)?));
            }
        }

        info!(
            resources = resources.len(),
            holdings = holdings.len(),
            commissions = commissions.len(),
            last_serial = %self.tables.last_serial(),
            "Loaded ledger bucket"
        );
        self.tables.restore(resources, holdings, commissions).await;
        Ok(())
    }

    async fn put<T: Serialize>(&self, key: String, value: &T) -> QuotaResult<()> {
        let payload = serde_json::to_vec(value)?;
        self.bucket
            .put(key, payload.into())
            .await
            .map_err(|e| QuotaError::Nats(e.to_string()))?;
        Ok(())
    }

    /// One compare-and-set round on the serial counter
    async fn try_advance_serial(&self) -> QuotaResult<Option<Serial>> {
        let entry = self
            .bucket
            .entry(SERIAL_KEY)
            .await
            .map_err(|e| QuotaError::Nats(e.to_string()))?;

        let (stored, revision) = match entry {
            Some(entry) if matches!(entry.operation, kv::Operation::Put) => {
                (parse_serial(&entry.value)?, Some(entry.revision))
            }
            _ => (0, None),
        };

        // Restored commissions set a floor the counter may lag behind
        let next = stored
            .max(self.tables.last_serial().value())
            .checked_add(1)
            .ok_or_else(|| QuotaError::InvalidRequest("serial space exhausted".to_string()))?;
        let payload: Vec<u8> = next.to_string().into_bytes();

        let written = match revision {
            Some(revision) => self
                .bucket
                .update(SERIAL_KEY, payload.into(), revision)
                .await
                .map_err(|e| e.to_string()),
            None => self
                .bucket
                .create(SERIAL_KEY, payload.into())
                .await
                .map_err(|e| e.to_string()),
        };

        match written {
            Ok(_) => Ok(Some(Serial(next))),
            Err(e) => {
                warn!(serial = next, error = %e, "Serial counter moved, retrying");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl LedgerStore for KvLedgerStore {
    async fn register_resource(&self, resource: &str, default_limit: Limit) -> QuotaResult<()> {
        self.tables.register_resource(resource, default_limit).await?;
        self.put(
            resource_key(resource),
            &ResourceRecord {
                resource: resource.to_string(),
                limit: default_limit,
            },
        )
        .await
    }

    async fn set_limit(&self, key: &HoldingKey, limit: Limit) -> QuotaResult<Holding> {
        self.tables.set_limit(key, limit).await?;

        // Persist under the row lock so a concurrent commission cannot interleave
        let locks = self.tables.lock_holdings(std::slice::from_ref(key)).await?;
        let holding = locks.get(key)?.clone();
        self.put(holding_key(key)?, &holding).await?;
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
        let _guard = self.serial_lock.lock().await;

        for _ in 0..SERIAL_ATTEMPTS {
            if let Some(serial) = self.try_advance_serial().await? {
                self.tables.observe_serial(serial);
                debug!(serial = %serial, "Allocated serial");
                return Ok(serial);
            }
        }

        Err(QuotaError::Nats(format!(
            "serial counter still contended after {} attempts",
            SERIAL_ATTEMPTS
        )))
    }

    async fn insert_commission(&self, commission: Commission) -> QuotaResult<()> {
        // Durable first: a commission only the tables know of could be
        // resolved against reservations that were never persisted
        self.put(commission_key(commission.serial), &commission).await?;
        self.tables.insert_commission(commission).await
    }

    async fn save_holdings(&self, holdings: &[Holding]) -> QuotaResult<()> {
        for holding in holdings {
            self.put(holding_key(&holding.key)?, holding).await?;
        }
        Ok(())
    }

    async fn save_commission(&self, commission: &Commission) -> QuotaResult<()> {
        self.put(commission_key(commission.serial), commission).await
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

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn resource_key(resource: &str) -> String {
    format!("{}{}", RESOURCE_PREFIX, hex(resource.as_bytes()))
}

fn holding_key(key: &HoldingKey) -> QuotaResult<String> {
    Ok(format!("{}{}", HOLDING_PREFIX, hex(&serde_json::to_vec(key)?)))
}

fn commission_key(serial: Serial) -> String {
    format!("{}{}", COMMISSION_PREFIX, serial)
}

fn parse_serial(value: &[u8]) -> QuotaResult<u64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .ok_or_else(|| QuotaError::Serialization(format!("bad serial counter {:?}", value)))
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! Row locks with deterministic ordering and bounded waits
//!
//! Every row is an `Arc<Mutex<T>>`. A caller needing several rows acquires
//! them in ascending key order, so two commissions touching overlapping
//! holdings can never wait on each other in a cycle. Each wait is bounded by
//! [`LockConfig::wait`]; on timeout every held row is released and the whole
//! set is retried after an exponential backoff.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::config::LockConfig;
use crate::domain::{Holding, HoldingKey};
use crate::errors::{QuotaError, QuotaResult};

/// Acquire every row in ascending key order
///
/// The map's ordering is the acquisition order.
pub async fn acquire_ordered<K, T>(
    rows: BTreeMap<K, Arc<Mutex<T>>>,
    config: &LockConfig,
) -> QuotaResult<BTreeMap<K, OwnedMutexGuard<T>>>
where
    K: Ord + Clone + Display,
{
    let attempts = config.retries + 1;
    let mut blocked_on = String::new();

    'attempt: for attempt in 0..attempts {
        let mut guards = BTreeMap::new();

        for (key, row) in &rows {
            match tokio::time::timeout(config.wait, row.clone().lock_owned()).await {
                Ok(guard) => {
                    guards.insert(key.clone(), guard);
                }
                Err(_) => {
                    blocked_on = key.to_string();
                    drop(guards);

                    if attempt + 1 < attempts {
                        let delay = config.backoff(attempt);
                        warn!(
                            row = %blocked_on,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Row lock wait expired, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    continue 'attempt;
                }
            }
        }

        debug!(rows = guards.len(), "Acquired row locks");
        return Ok(guards);
    }

    Err(QuotaError::LockTimeout {
        target: blocked_on,
        attempts,
    })
}

/// Acquire a single row
pub async fn acquire_one<K, T>(
    key: K,
    row: Arc<Mutex<T>>,
    config: &LockConfig,
) -> QuotaResult<OwnedMutexGuard<T>>
where
    K: Ord + Clone + Display,
{
    let mut rows = BTreeMap::new();
    rows.insert(key.clone(), row);
    let mut guards = acquire_ordered(rows, config).await?;
    guards.remove(&key).ok_or_else(|| QuotaError::LockTimeout {
        target: key.to_string(),
        attempts: 0,
    })
}

/// Exclusive access to a set of holdings for the duration of one call
///
/// Dropping the value releases every row.
pub struct HoldingLocks {
    rows: BTreeMap<HoldingKey, OwnedMutexGuard<Holding>>,
}

impl HoldingLocks {
    pub fn new(rows: BTreeMap<HoldingKey, OwnedMutexGuard<Holding>>) -> Self {
        Self { rows }
    }

    pub fn get(&self, key: &HoldingKey) -> QuotaResult<&Holding> {
        self.rows
            .get(key)
            .map(|guard| &**guard)
            .ok_or_else(|| QuotaError::UnknownHolding(key.clone()))
    }

    pub fn get_mut(&mut self, key: &HoldingKey) -> QuotaResult<&mut Holding> {
        self.rows
            .get_mut(key)
            .map(|guard| &mut **guard)
            .ok_or_else(|| QuotaError::UnknownHolding(key.clone()))
    }

    /// Locked keys in acquisition order
    pub fn keys(&self) -> impl Iterator<Item = &HoldingKey> {
        self.rows.keys()
    }

    /// Copies of the locked holdings in key order
    pub fn snapshots(&self) -> Vec<Holding> {
        self.rows.values().map(|guard| (**guard).clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Limit;
    use std::time::Duration;

    fn fast_config() -> LockConfig {
        LockConfig {
            wait: Duration::from_millis(10),
            retries: 1,
            backoff_base: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_acquire_in_key_order() {
        let mut rows = BTreeMap::new();
        rows.insert("b".to_string(), Arc::new(Mutex::new(2)));
        rows.insert("a".to_string(), Arc::new(Mutex::new(1)));

        let guards = acquire_ordered(rows, &fast_config()).await.unwrap();
        let order: Vec<_> = guards.keys().cloned().collect();
        assert_eq!(order, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_timeout_after_retries() {
        let row = Arc::new(Mutex::new(0));
        let _held = row.clone().lock_owned().await;

        let result = acquire_one("row".to_string(), row, &fast_config()).await;
        assert_eq!(
            result.err(),
            Some(QuotaError::LockTimeout {
                target: "row".to_string(),
                attempts: 2,
            })
        );
    }

    #[tokio::test]
    async fn test_released_rows_can_be_reacquired() {
        let row = Arc::new(Mutex::new(0));
        {
            let mut guard = acquire_one("row".to_string(), row.clone(), &fast_config())
                .await
                .unwrap();
            *guard = 7;
        }
        let guard = acquire_one("row".to_string(), row, &fast_config()).await.unwrap();
        assert_eq!(*guard, 7);
    }

    #[tokio::test]
    async fn test_holding_locks_lookup() {
        let key = HoldingKey::new("alice", "cpu");
        let mut rows = BTreeMap::new();
        rows.insert(
            key.clone(),
            Arc::new(Mutex::new(Holding::new(key.clone(), Limit::new(4)))),
        );
        let guards = acquire_ordered(rows, &fast_config()).await.unwrap();
        let mut locks = HoldingLocks::new(guards);

        locks.get_mut(&key).unwrap().usage_reserved = 2;
        assert_eq!(locks.get(&key).unwrap().usage_reserved, 2);
        assert_eq!(locks.snapshots()[0].usage_reserved, 2);
        assert!(matches!(
            locks.get(&HoldingKey::new("bob", "cpu")),
            Err(QuotaError::UnknownHolding(_))
        ));
    }
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! Provision Log storage
//!
//! Append-only. Entries are written once per resolved provision and are
//! never updated or deleted.
//!
//! An append is not atomic across entries: a failed append may leave a
//! prefix of the batch behind, and the retried resolution appends the batch
//! again. Stores keep the first entry per [`ProvisionLogEntry::entry_id`].

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{HoldingKey, ProvisionLogEntry};
use crate::errors::QuotaResult;

/// Append-only audit trail of resolved provisions
#[async_trait]
pub trait ProvisionLog: Send + Sync {
    /// Append entries in order, skipping ids already in the log
    async fn append(&self, entries: Vec<ProvisionLogEntry>) -> QuotaResult<()>;

    /// All entries for a holder, in log order
    async fn entries_for(&self, holder: &str) -> QuotaResult<Vec<ProvisionLogEntry>>;

    /// Most recent entry for one holding
    async fn last_entry(&self, key: &HoldingKey) -> QuotaResult<Option<ProvisionLogEntry>> {
        let entries = self.entries_for(&key.holder).await?;
        Ok(entries.into_iter().rev().find(|entry| entry.key == *key))
    }
}

/// In-process provision log
#[derive(Debug, Default)]
pub struct MemoryProvisionLog {
    entries: RwLock<Vec<ProvisionLogEntry>>,
}

impl MemoryProvisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry, in log order
    pub async fn all(&self) -> Vec<ProvisionLogEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl ProvisionLog for MemoryProvisionLog {
    async fn append(&self, entries: Vec<ProvisionLogEntry>) -> QuotaResult<()> {
        let mut log = self.entries.write().await;
        let mut seen: HashSet<String> = log.iter().map(ProvisionLogEntry::entry_id).collect();
        for entry in entries {
            if seen.insert(entry.entry_id()) {
                log.push(entry);
            }
        }
        Ok(())
    }

    async fn entries_for(&self, holder: &str) -> QuotaResult<Vec<ProvisionLogEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.key.holder == holder)
            .cloned()
            .collect())
    }
}

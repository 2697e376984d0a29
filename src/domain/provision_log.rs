// Copyright (c) 2025 - Cowboy AI, Inc.
//! Provision Log entries - the append-only audit trail of resolutions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::commission::{Commission, Resolution, Serial};
use super::holding::{Holding, HoldingKey, Limit};

/// One resolved provision, with the holding's counters right after resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionLogEntry {
    pub serial: Serial,
    pub client_key: String,
    pub name: String,
    pub issue_time: DateTime<Utc>,
    pub log_time: DateTime<Utc>,
    pub key: HoldingKey,
    pub delta: i64,
    pub usage_committed: i64,
    pub usage_reserved: i64,
    pub limit: Limit,
    pub resolution: Resolution,
    pub reason: String,
}

impl ProvisionLogEntry {
    /// Entry for `delta` of `commission` against `holding`
    pub fn record(
        commission: &Commission,
        holding: &Holding,
        delta: i64,
        reason: impl Into<String>,
        log_time: DateTime<Utc>,
    ) -> Self {
        Self {
            serial: commission.serial,
            client_key: commission.client_key.clone(),
            name: commission.name.clone(),
            issue_time: commission.issued_at,
            log_time,
            key: holding.key.clone(),
            delta,
            usage_committed: holding.usage_committed,
            usage_reserved: holding.usage_reserved,
            limit: holding.limit,
            resolution: commission.resolution,
            reason: reason.into(),
        }
    }

    /// Identity of the entry: one per provision of a commission
    ///
    /// A retried append carries the same id, letting stores drop the copy.
    pub fn entry_id(&self) -> String {
        format!("{}:{}", self.serial, self.key)
    }
}

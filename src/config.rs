// Copyright (c) 2025 - Cowboy AI, Inc.
//! Ledger configuration
//!
//! Defaults suit an in-process ledger; `from_env` overrides them for the
//! `quota-ledger` service.

use std::time::Duration;

use crate::domain::Limit;
use crate::errors::{QuotaError, QuotaResult};

/// Row lock acquisition policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Maximum wait for a single row lock
    pub wait: Duration,

    /// Retries after releasing every held row on timeout
    pub retries: u32,

    /// Base delay between retries, doubled per attempt
    pub backoff_base: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_millis(250),
            retries: 4,
            backoff_base: Duration::from_millis(20),
        }
    }
}

impl LockConfig {
    /// Delay before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(1u32 << attempt.min(10))
    }
}

/// Reconciliation policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Pending commissions older than this are reported as stale
    pub stale_pending_after: Duration,

    /// Client key used for correcting commissions
    pub client_key: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stale_pending_after: Duration::from_secs(60 * 60),
            client_key: "reconciler".to_string(),
        }
    }
}

/// NATS transport settings for the ledger service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsSettings {
    /// NATS server URL
    pub url: String,

    /// Request-reply subject of the ledger RPC
    pub rpc_subject: String,

    /// JetStream KV bucket holding resources, holdings and commissions
    pub kv_bucket: String,

    /// JetStream stream holding the provision log
    pub log_stream: String,

    /// JetStream stream holding the resolution outbox
    pub outbox_stream: String,

    /// Outbox worker poll interval
    pub outbox_poll: Duration,
}

impl Default for NatsSettings {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            rpc_subject: "quota.rpc".to_string(),
            kv_bucket: "QUOTA_LEDGER".to_string(),
            log_stream: "QUOTA_PROVISION_LOG".to_string(),
            outbox_stream: "QUOTA_OUTBOX".to_string(),
            outbox_poll: Duration::from_millis(500),
        }
    }
}

/// Complete ledger configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerConfig {
    pub lock: LockConfig,
    pub reconcile: ReconcileConfig,
    pub nats: NatsSettings,

    /// Resources registered at startup with their default limits
    pub resources: Vec<(String, Limit)>,
}

impl LedgerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> QuotaResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> QuotaResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, "QUOTA_LOCK_WAIT_MS")? {
            config.lock.wait = Duration::from_millis(ms);
        }
        if let Some(retries) = parse_var::<u32>(&lookup, "QUOTA_LOCK_RETRIES")? {
            config.lock.retries = retries;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "QUOTA_LOCK_BACKOFF_MS")? {
            config.lock.backoff_base = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "QUOTA_STALE_PENDING_SECS")? {
            config.reconcile.stale_pending_after = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "QUOTA_OUTBOX_POLL_MS")? {
            if ms == 0 {
                return Err(QuotaError::Configuration(
                    "QUOTA_OUTBOX_POLL_MS must be greater than zero".to_string(),
                ));
            }
            config.nats.outbox_poll = Duration::from_millis(ms);
        }
        if let Some(url) = lookup("NATS_URL") {
            config.nats.url = url;
        }
        if let Some(subject) = lookup("QUOTA_RPC_SUBJECT") {
            config.nats.rpc_subject = subject;
        }
        if let Some(bucket) = lookup("QUOTA_LEDGER_BUCKET") {
            config.nats.kv_bucket = bucket;
        }
        if let Some(stream) = lookup("QUOTA_LOG_STREAM") {
            config.nats.log_stream = stream;
        }
        if let Some(stream) = lookup("QUOTA_OUTBOX_STREAM") {
            config.nats.outbox_stream = stream;
        }
        if let Some(raw) = lookup("QUOTA_RESOURCES") {
            config.resources = parse_resources(&raw)?;
        }

        Ok(config)
    }
}

/// Parse `name=limit` pairs separated by commas; `unlimited` is accepted
fn parse_resources(raw: &str) -> QuotaResult<Vec<(String, Limit)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (name, limit) = item.split_once('=').ok_or_else(|| {
                QuotaError::Configuration(format!("QUOTA_RESOURCES entry {:?} is not name=limit", item))
            })?;
            let limit = match limit.trim() {
                "unlimited" => Limit::UNLIMITED,
                value => value.parse::<i64>().map(Limit::new).map_err(|e| {
                    QuotaError::Configuration(format!("QUOTA_RESOURCES limit for {}: {}", name, e))
                })?,
            };
            Ok((name.trim().to_string(), limit))
        })
        .collect()
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> QuotaResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| QuotaError::Configuration(format!("{}={:?}: {}", name, raw, e))),
    }
}

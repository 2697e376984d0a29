// Copyright (c) 2025 - Cowboy AI, Inc.
//! Reconciliation Engine
//!
//! Compares ledger holdings with the authoritative usage reported by the
//! business layer and, on request, corrects the ledger.
//!
//! # Classification
//!
//! ```text
//! holding ──► invariant broken?        ──► Corrupt
//!         ──► reserved != committed?   ──► Pending   (not compared)
//!         ──► committed != inventory?  ──► Mismatch
//!
//! independently: reserved > limit      ──► OverLimit (reported, never corrected)
//! ```
//!
//! Pending commissions older than `stale_pending_after` are listed as stale.
//!
//! Scans read rows without waiting on their locks. A holding locked by a
//! commission in flight is listed as busy and compared on the next run.
//!
//! # Correction
//!
//! All mismatches are fixed by one forced commission carrying exactly their
//! deltas, accepted immediately. Corrupt holdings are repaired to the
//! authoritative value. Stale commissions are rejected only when asked.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ReconcileConfig;
use crate::domain::invariants::check_holding;
use crate::domain::{
    Commission, Holding, HoldingFilter, HoldingKey, IssueRequest, ProvisionLogEntry, Serial,
};
use crate::errors::{QuotaError, QuotaResult};
use crate::service::Ledger;
use crate::store::Scan;

/// Authoritative usage of one holding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUsage {
    pub key: HoldingKey,
    pub quantity: i64,
}

impl InventoryUsage {
    pub fn new(key: HoldingKey, quantity: i64) -> Self {
        Self { key, quantity }
    }
}

/// Ground truth for the resources a business service owns
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Resources this source is authoritative for
    fn resources(&self) -> Vec<String>;

    /// Actual usage, restricted to `holder` when given
    async fn usage(&self, holder: Option<&str>) -> QuotaResult<Vec<InventoryUsage>>;
}

/// What a reconciliation run may change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Correct mismatches and repair corrupt holdings
    pub fix: bool,

    /// With `fix`, also reject stale pending commissions
    pub reject_stale: bool,
}

impl ReconcileOptions {
    pub fn report_only() -> Self {
        Self::default()
    }

    pub fn fix() -> Self {
        Self {
            fix: true,
            reject_stale: false,
        }
    }

    pub fn with_reject_stale(mut self) -> Self {
        self.reject_stale = true;
        self
    }
}

/// Committed usage differing from the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub key: HoldingKey,
    pub authoritative: i64,
    pub ledger: i64,
    pub last_entry: Option<ProvisionLogEntry>,
}

impl Mismatch {
    /// Correction bringing the ledger to the inventory value
    pub fn delta(&self) -> QuotaResult<i64> {
        self.authoritative
            .checked_sub(self.ledger)
            .ok_or_else(|| QuotaError::Overflow(self.key.clone()))
    }
}

/// Outcome of one reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Holder scope, `None` for every holder
    pub holder: Option<String>,

    /// Keys compared
    pub checked: usize,

    /// Holdings with unresolved provisions
    pub pending: Vec<Holding>,

    pub mismatches: Vec<Mismatch>,

    /// Holdings whose reserved usage exceeds the limit
    pub over_limit: Vec<Holding>,

    /// Holdings outside `0 <= committed <= reserved`
    pub corrupt: Vec<Holding>,

    /// Holdings locked by a commission in flight, not compared
    pub busy: Vec<HoldingKey>,

    /// Pending commissions older than the configured threshold
    pub stale_pending: Vec<Serial>,

    /// Serial of the correcting commission
    pub correction: Option<Serial>,

    /// Serials of repair commissions
    pub repaired: Vec<Serial>,

    /// Stale commissions rejected during this run
    pub rejected_stale: Vec<Serial>,

    /// Authoritative and ledger values per compared key
    #[serde(skip)]
    rows: Vec<(HoldingKey, i64, i64)>,
}

impl ReconciliationReport {
    /// Nothing to correct or investigate
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
            && self.over_limit.is_empty()
            && self.corrupt.is_empty()
            && self.stale_pending.is_empty()
    }

    /// Table of (holder, source, resource, authoritative, ledger) for every
    /// key that needs attention
    pub fn render_table(&self) -> String {
        let flagged: BTreeSet<&HoldingKey> = self
            .mismatches
            .iter()
            .map(|m| &m.key)
            .chain(self.corrupt.iter().map(|h| &h.key))
            .chain(self.over_limit.iter().map(|h| &h.key))
            .collect();

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<24} {:<16} {:<24} {:>14} {:>14}",
            "holder", "source", "resource", "authoritative", "ledger"
        );
        for (key, authoritative, ledger) in &self.rows {
            if !flagged.contains(key) {
                continue;
            }
            let _ = writeln!(
                out,
                "{:<24} {:<16} {:<24} {:>14} {:>14}",
                key.holder,
                key.source.as_deref().unwrap_or("-"),
                key.resource,
                authoritative,
                ledger
            );
        }
        out
    }
}

/// Runs reconciliation against a set of inventory sources
pub struct Reconciler {
    ledger: Ledger,
    sources: Vec<Box<dyn InventorySource>>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(ledger: Ledger, sources: Vec<Box<dyn InventorySource>>, config: ReconcileConfig) -> Self {
        Self {
            ledger,
            sources,
            config,
        }
    }

    /// Compare the ledger with every source, optionally scoped to one holder
    pub async fn reconcile(
        &self,
        holder: Option<&str>,
        options: ReconcileOptions,
    ) -> QuotaResult<ReconciliationReport> {
        let mut report = ReconciliationReport {
            holder: holder.map(str::to_string),
            ..Default::default()
        };

        let authoritative = self.collect_usage(holder).await?;
        let resources: BTreeSet<String> =
            self.sources.iter().flat_map(|s| s.resources()).collect();

        let scan = if resources.is_empty() {
            Scan::default()
        } else {
            let filter = HoldingFilter {
                holder: holder.map(str::to_string),
                resources: resources.iter().cloned().collect(),
            };
            self.ledger.store().scan_holdings(&filter).await?
        };
        let holdings: BTreeMap<HoldingKey, Holding> = scan
            .rows
            .into_iter()
            .map(|h| (h.key.clone(), h))
            .collect();
        report.busy = scan.busy;

        let busy: BTreeSet<&HoldingKey> = report.busy.iter().collect();
        let keys: BTreeSet<HoldingKey> = authoritative
            .keys()
            .chain(holdings.keys())
            .filter(|key| !busy.contains(key))
            .cloned()
            .collect();
        report.checked = keys.len();

        for key in &keys {
            let actual = authoritative.get(key).copied().unwrap_or(0);
            let holding = holdings.get(key);
            let committed = holding.map_or(0, |h| h.usage_committed);
            report.rows.push((key.clone(), actual, committed));

            if let Some(holding) = holding {
                if holding.is_over_limit() {
                    warn!(
                        holding = %key,
                        reserved = holding.usage_reserved,
                        limit = %holding.limit,
                        "Holding over limit"
                    );
                    report.over_limit.push(holding.clone());
                }
                if check_holding(holding).is_err() {
                    warn!(
                        holding = %key,
                        committed = holding.usage_committed,
                        reserved = holding.usage_reserved,
                        "Corrupt holding"
                    );
                    report.corrupt.push(holding.clone());
                    continue;
                }
                if holding.has_pending() {
                    report.pending.push(holding.clone());
                    continue;
                }
            }

            if committed != actual {
                let last_entry = self.ledger.provision_log().last_entry(key).await?;
                info!(holding = %key, authoritative = actual, ledger = committed, "Usage mismatch");
                report.mismatches.push(Mismatch {
                    key: key.clone(),
                    authoritative: actual,
                    ledger: committed,
                    last_entry,
                });
            }
        }

        let stale = self.stale_pending(holder).await?;
        report.stale_pending = stale.iter().map(|c| c.serial).collect();

        if options.fix {
            self.apply_fixes(&mut report, &authoritative, options).await?;
        }

        info!(
            holder = holder.unwrap_or("*"),
            checked = report.checked,
            pending = report.pending.len(),
            mismatches = report.mismatches.len(),
            over_limit = report.over_limit.len(),
            corrupt = report.corrupt.len(),
            busy = report.busy.len(),
            stale = report.stale_pending.len(),
            fixed = options.fix,
            "Reconciliation finished"
        );
        Ok(report)
    }

    async fn collect_usage(&self, holder: Option<&str>) -> QuotaResult<BTreeMap<HoldingKey, i64>> {
        let mut usage = BTreeMap::new();
        for source in &self.sources {
            let owned = source.resources();
            for item in source.usage(holder).await? {
                if !owned.contains(&item.key.resource) {
                    continue;
                }
                if holder.is_some_and(|h| h != item.key.holder) {
                    continue;
                }
                if item.quantity < 0 {
                    return Err(QuotaError::InvalidRequest(format!(
                        "negative inventory usage {} for {}",
                        item.quantity, item.key
                    )));
                }
                // Sources may report one row per allocation
                let total = usage.entry(item.key.clone()).or_insert(0i64);
                *total = total
                    .checked_add(item.quantity)
                    .ok_or(QuotaError::Overflow(item.key))?;
            }
        }
        Ok(usage)
    }

    async fn stale_pending(&self, holder: Option<&str>) -> QuotaResult<Vec<Commission>> {
        let threshold = chrono::Duration::from_std(self.config.stale_pending_after)
            .map_err(|e| QuotaError::Configuration(e.to_string()))?;
        let cutoff = Utc::now() - threshold;

        let scan = self.ledger.store().scan_pending().await?;
        if !scan.busy.is_empty() {
            debug!(busy = scan.busy.len(), "Skipping commissions being resolved");
        }

        Ok(scan
            .rows
            .into_iter()
            .filter(|c| c.issued_at < cutoff)
            .filter(|c| holder.map_or(true, |h| c.provisions.iter().any(|p| p.key.holder == h)))
            .collect())
    }

    async fn apply_fixes(
        &self,
        report: &mut ReconciliationReport,
        authoritative: &BTreeMap<HoldingKey, i64>,
        options: ReconcileOptions,
    ) -> QuotaResult<()> {
        let client_key = self.config.client_key.as_str();

        if !report.mismatches.is_empty() {
            let mut request =
                IssueRequest::new(client_key, "reconciliation correction").forced();
            for mismatch in &report.mismatches {
                request = request.provision(mismatch.key.clone(), mismatch.delta()?);
            }
            let serial = self.ledger.issue(request).await?;
            self.ledger.resolve(serial, true).await?;
            warn!(
                serial = %serial,
                corrections = report.mismatches.len(),
                "Applied reconciliation correction"
            );
            report.correction = Some(serial);
        }

        for holding in &report.corrupt {
            let target = authoritative.get(&holding.key).copied().unwrap_or(0);
            let serial = self.ledger.repair(&holding.key, target, client_key).await?;
            report.repaired.push(serial);
        }

        if options.reject_stale {
            for serial in &report.stale_pending {
                let outcome = self.ledger.resolve(*serial, false).await?;
                if !outcome.already_resolved {
                    warn!(serial = %serial, "Rejected stale pending commission");
                    report.rejected_stale.push(*serial);
                }
            }
        }

        Ok(())
    }
}

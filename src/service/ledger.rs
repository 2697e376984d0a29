// Copyright (c) 2025 - Cowboy AI, Inc.
//! Commission Protocol
//!
//! The ledger drives every provision of a commission through the operation
//! primitives under the row locks of the holding store.
//!
//! # Issue
//!
//! ```text
//! lock holdings (key order) → prepare each provision (check = !force)
//!     ├─ all ok   → save holdings, store Pending commission, return serial
//!     └─ failure  → undo prepared in reverse, store Rejected, return error
//! ```
//!
//! # Resolve
//!
//! ```text
//! lock commission → FSM transition → lock holdings → stage finalize/undo
//!     → append provision log → save resolution, then holdings
//!     → write back holdings and resolution
//! ```
//!
//! Resolution is staged on copies and written back only after every
//! provision succeeded and the log entries are durable, so a failing
//! resolution leaves both the holdings and the commission untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::QuotaService;
use crate::config::LedgerConfig;
use crate::domain::invariants::{check_holding, validate_issue_request};
use crate::domain::{
    Commission, Holding, HoldingFilter, HoldingKey, IssueRequest, Limit, PendingResolution,
    Provision, ProvisionLogEntry, Resolution, ResolveOutcome, Serial,
};
use crate::errors::{QuotaError, QuotaResult};
use crate::operations::OperationKind;
use crate::state_machine::{ResolutionEffect, ResolveCommand, StateMachine};
use crate::store::{
    HoldingLocks, LedgerStore, MemoryLedgerStore, MemoryProvisionLog, ProvisionLog,
};

/// Quota commissioning ledger
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    log: Arc<dyn ProvisionLog>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, log: Arc<dyn ProvisionLog>) -> Self {
        Self { store, log }
    }

    /// Ledger on in-process tables and log
    pub fn in_memory(config: &LedgerConfig) -> Self {
        Self::new(
            Arc::new(MemoryLedgerStore::new(config.lock.clone())),
            Arc::new(MemoryProvisionLog::new()),
        )
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn provision_log(&self) -> &Arc<dyn ProvisionLog> {
        &self.log
    }

    /// Register a resource and the limit its holdings start with
    pub async fn register_resource(&self, resource: &str, default_limit: Limit) -> QuotaResult<()> {
        self.store.register_resource(resource, default_limit).await
    }

    /// Set a holding's limit, creating the holding when missing
    pub async fn set_limit(&self, key: &HoldingKey, limit: Limit) -> QuotaResult<Holding> {
        let holding = self.store.set_limit(key, limit).await?;
        info!(holding = %key, limit = %limit, "Limit set");
        Ok(holding)
    }

    pub async fn list_holdings(&self, filter: &HoldingFilter) -> QuotaResult<Vec<Holding>> {
        self.store.list_holdings(filter).await
    }

    /// Issue a commission
    ///
    /// # Errors
    ///
    /// - `NoCapacity` / `NoQuantity` when a checked provision does not fit
    /// - `UnknownHolding` for a missing holding of an unregistered resource
    /// - `DuplicateProvision` / `InvalidRequest` for malformed requests
    /// - `InvariantViolation` when a holding is corrupt
    pub async fn issue(&self, request: IssueRequest) -> QuotaResult<Serial> {
        validate_issue_request(&request)?;

        let check = !request.force;
        let keys: Vec<HoldingKey> = request.provisions.iter().map(|p| p.key.clone()).collect();
        let mut locks = self.store.lock_holdings(&keys).await?;

        let mut prepared: Vec<(HoldingKey, OperationKind, i64)> = Vec::new();
        let mut failure = None;

        for provision in &request.provisions {
            match prepare_provision(&mut locks, provision, check) {
                Ok((kind, quantity)) => prepared.push((provision.key.clone(), kind, quantity)),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(cause) = failure {
            rollback(&mut locks, &prepared)?;
            drop(locks);
            self.record_rejected_issue(request, &cause).await?;
            return Err(cause);
        }

        let serial = match self.store.next_serial().await {
            Ok(serial) => serial,
            Err(e) => {
                rollback(&mut locks, &prepared)?;
                return Err(e);
            }
        };

        let client_key = request.client_key.clone();
        let provisions = request.provisions.len();
        let force = request.force;
        let commission = Commission::pending(serial, request, Utc::now());

        let stored = match self.store.save_holdings(&locks.snapshots()).await {
            Ok(()) => self.store.insert_commission(commission).await,
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            rollback(&mut locks, &prepared)?;
            if let Err(restore) = self.store.save_holdings(&locks.snapshots()).await {
                error!(
                    serial = %serial,
                    error = %restore,
                    "Saved reservation could not be withdrawn"
                );
            }
            return Err(e);
        }
        drop(locks);

        info!(
            serial = %serial,
            client_key = %client_key,
            provisions,
            force,
            "Issued commission"
        );
        Ok(serial)
    }

    async fn record_rejected_issue(
        &self,
        request: IssueRequest,
        cause: &QuotaError,
    ) -> QuotaResult<()> {
        let serial = self.store.next_serial().await?;
        let now = Utc::now();
        let mut commission = Commission::pending(serial, request, now);
        commission.resolution = Resolution::Rejected;
        commission.resolved_at = Some(now);

        if cause.is_fatal() {
            error!(
                serial = %serial,
                client_key = %commission.client_key,
                error = %cause,
                "Commission aborted on invariant failure"
            );
        } else {
            info!(
                serial = %serial,
                client_key = %commission.client_key,
                error = %cause,
                "Commission rejected at issue"
            );
        }

        self.store.insert_commission(commission).await
    }

    /// Resolve a commission, accepting or rejecting every provision
    ///
    /// Resolving an already resolved commission is a no-op that reports the
    /// recorded outcome; a conflicting request is logged, never applied.
    pub async fn resolve(&self, serial: Serial, accept: bool) -> QuotaResult<ResolveOutcome> {
        let mut commission = self.store.lock_commission(serial).await?;
        let command = ResolveCommand::from_accept(accept);

        let (next, effect) = match commission.resolution.transition(&command) {
            Ok(transition) => transition,
            Err(_) => return Ok(already_resolved(&commission, command)),
        };

        let mut locks = self.store.lock_holdings(&commission.holding_keys()).await?;

        let mut staged: BTreeMap<HoldingKey, Holding> = BTreeMap::new();
        for key in locks.keys() {
            staged.insert(key.clone(), locks.get(key)?.clone());
        }

        for provision in &commission.provisions {
            let (kind, quantity) = OperationKind::classify(provision)?;
            let holding = staged
                .get_mut(&provision.key)
                .ok_or_else(|| QuotaError::UnknownHolding(provision.key.clone()))?;

            let applied = match effect {
                ResolutionEffect::Finalize => kind.finalize(holding, quantity),
                ResolutionEffect::Undo => kind.undo(holding, quantity),
            };

            if let Err(e) = applied {
                error!(
                    serial = %serial,
                    holding = %provision.key,
                    operation = kind.name(),
                    error = %e,
                    "Resolution halted"
                );
                return Err(e);
            }
        }

        let now = Utc::now();
        let mut resolved = commission.clone();
        resolved.resolution = next;
        resolved.resolved_at = Some(now);

        let reason = match effect {
            ResolutionEffect::Finalize => "accept",
            ResolutionEffect::Undo => "reject",
        };
        let entries = resolved
            .provisions
            .iter()
            .map(|provision| -> QuotaResult<ProvisionLogEntry> {
                let holding = staged
                    .get(&provision.key)
                    .ok_or_else(|| QuotaError::UnknownHolding(provision.key.clone()))?;
                Ok(ProvisionLogEntry::record(
                    &resolved,
                    holding,
                    provision.quantity,
                    reason,
                    now,
                ))
            })
            .collect::<QuotaResult<Vec<_>>>()?;
        self.log.append(entries).await?;

        // Resolution first: a crash before the holdings are saved leaves a
        // reservation behind, never a resolution applied twice
        self.store.save_commission(&resolved).await?;
        let holdings: Vec<Holding> = staged.values().cloned().collect();
        if let Err(e) = self.store.save_holdings(&holdings).await {
            error!(
                serial = %serial,
                error = %e,
                "Resolution saved without its holdings"
            );
            return Err(e);
        }

        for (key, holding) in staged {
            *locks.get_mut(&key)? = holding;
        }
        *commission = resolved;

        info!(serial = %serial, resolution = %next, "Resolved commission");
        Ok(ResolveOutcome {
            serial,
            resolution: next,
            already_resolved: false,
            conflicting: false,
        })
    }

    /// Resolve a batch of one client's pending commissions
    ///
    /// Serials in both sets are conflicting and left untouched; serials of
    /// other clients are reported as not found.
    pub async fn resolve_pending(
        &self,
        client_key: &str,
        accept: &[Serial],
        reject: &[Serial],
    ) -> QuotaResult<PendingResolution> {
        let accept: BTreeSet<Serial> = accept.iter().copied().collect();
        let reject: BTreeSet<Serial> = reject.iter().copied().collect();
        let mut result = PendingResolution::default();

        for serial in accept.union(&reject) {
            let serial = *serial;
            if accept.contains(&serial) && reject.contains(&serial) {
                result.conflicting.push(serial);
                continue;
            }

            match self.get_commission(client_key, serial).await {
                Ok(_) => {}
                Err(QuotaError::UnknownCommission(_)) => {
                    result.not_found.push(serial);
                    continue;
                }
                Err(e) => return Err(e),
            }

            let outcome = self.resolve(serial, accept.contains(&serial)).await?;
            if outcome.conflicting {
                result.conflicting.push(serial);
            } else if outcome.resolution == Resolution::Accepted {
                result.accepted.push(serial);
            } else {
                result.rejected.push(serial);
            }
        }

        Ok(result)
    }

    /// Serials of a client's pending commissions
    pub async fn pending_commissions(&self, client_key: &str) -> QuotaResult<Vec<Serial>> {
        Ok(self
            .store
            .pending_commissions(Some(client_key))
            .await?
            .into_iter()
            .map(|commission| commission.serial)
            .collect())
    }

    /// A commission issued by `client_key`
    pub async fn get_commission(&self, client_key: &str, serial: Serial) -> QuotaResult<Commission> {
        let commission = self.store.get_commission(serial).await?;
        if commission.client_key != client_key {
            return Err(QuotaError::UnknownCommission(serial));
        }
        Ok(commission)
    }

    /// Drive a holding's committed and reserved usage to `target`
    ///
    /// Works on holdings outside the invariant window, which forced
    /// commissions cannot touch. The result must satisfy the invariant. The
    /// repair is recorded as an accepted commission with a log entry.
    pub async fn repair(
        &self,
        key: &HoldingKey,
        target: i64,
        client_key: &str,
    ) -> QuotaResult<Serial> {
        if target < 0 {
            return Err(QuotaError::InvalidRequest(format!(
                "repair target {} for {} is negative",
                target, key
            )));
        }

        let mut locks = self.store.lock_holdings(std::slice::from_ref(key)).await?;
        let before = locks.get(key)?.clone();

        let mut staged = before.clone();
        let reserved_excess = checked_delta(key, staged.usage_reserved, target)?;
        OperationKind::Import.revert(&mut staged, reserved_excess)?;
        let committed_shortfall = checked_delta(key, target, staged.usage_committed)?;
        OperationKind::Release.revert(&mut staged, committed_shortfall)?;
        check_holding(&staged)?;

        let serial = self.store.next_serial().await?;
        let now = Utc::now();
        let request = IssueRequest::new(client_key, format!("repair {}", key))
            .provision(key.clone(), committed_shortfall)
            .forced();
        let mut commission = Commission::pending(serial, request, now);
        commission.resolution = Resolution::Accepted;
        commission.resolved_at = Some(now);

        self.log
            .append(vec![ProvisionLogEntry::record(
                &commission,
                &staged,
                committed_shortfall,
                "repair",
                now,
            )])
            .await?;

        self.store.save_holdings(std::slice::from_ref(&staged)).await?;
        *locks.get_mut(key)? = staged;
        drop(locks);
        self.store.insert_commission(commission).await?;

        warn!(
            serial = %serial,
            holding = %key,
            committed = before.usage_committed,
            reserved = before.usage_reserved,
            target,
            "Repaired holding"
        );
        Ok(serial)
    }
}

fn prepare_provision(
    locks: &mut HoldingLocks,
    provision: &Provision,
    check: bool,
) -> QuotaResult<(OperationKind, i64)> {
    let (kind, quantity) = OperationKind::classify(provision)?;
    let holding = locks.get_mut(&provision.key)?;
    kind.prepare(holding, quantity, check)?;
    debug!(
        holding = %provision.key,
        operation = kind.name(),
        quantity,
        "Prepared provision"
    );
    Ok((kind, quantity))
}

/// Undo prepared provisions, newest first
fn rollback(
    locks: &mut HoldingLocks,
    prepared: &[(HoldingKey, OperationKind, i64)],
) -> QuotaResult<()> {
    for (key, kind, quantity) in prepared.iter().rev() {
        let holding = locks.get_mut(key)?;
        if let Err(e) = kind.undo(holding, *quantity) {
            error!(holding = %key, error = %e, "Rollback of prepared provision failed");
            return Err(e);
        }
    }
    Ok(())
}

fn already_resolved(commission: &Commission, command: ResolveCommand) -> ResolveOutcome {
    let requested = command.target();
    let conflicting = commission.resolution != requested;

    if conflicting {
        let conflict = QuotaError::AlreadyResolved {
            serial: commission.serial,
            resolution: commission.resolution,
            requested,
        };
        warn!(serial = %commission.serial, "{}", conflict);
    } else {
        debug!(serial = %commission.serial, resolution = %requested, "Repeated resolution ignored");
    }

    ResolveOutcome {
        serial: commission.serial,
        resolution: commission.resolution,
        already_resolved: true,
        conflicting,
    }
}

fn checked_delta(key: &HoldingKey, minuend: i64, subtrahend: i64) -> QuotaResult<i64> {
    minuend
        .checked_sub(subtrahend)
        .ok_or_else(|| QuotaError::Overflow(key.clone()))
}

#[async_trait]
impl QuotaService for Ledger {
    async fn issue_commission(&self, request: IssueRequest) -> QuotaResult<Serial> {
        self.issue(request).await
    }

    async fn resolve_commission(&self, serial: Serial, accept: bool) -> QuotaResult<ResolveOutcome> {
        self.resolve(serial, accept).await
    }

    async fn get_holding(&self, key: &HoldingKey) -> QuotaResult<Holding> {
        self.store.get_holding(key).await
    }
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! Operation Primitives
//!
//! `Import` and `Release` mutate a [`Holding`]'s counters in two phases:
//!
//! ```text
//!              prepare                 finalize
//! Import   reserved  += q          committed += q
//! Release  committed -= q          reserved  -= q
//! ```
//!
//! `prepare` moves the pessimistic counter first: reserved grows before a
//! risky action, committed shrinks before capacity is handed back. `undo` is
//! the exact inverse of a not-yet-finalized `prepare`. `revert` performs the
//! same arithmetic without any invariant assertion and is reserved for repair
//! of holdings that are already outside the invariant window.

use crate::domain::invariants::check_holding;
use crate::domain::{Holding, Provision};
use crate::errors::{QuotaError, QuotaResult};

/// Two-phase mutation of a holding
///
/// Implementors supply the raw arithmetic; the provided methods wrap it with
/// invariant assertions. A failing `prepare` or `finalize` leaves the holding
/// untouched.
pub trait Operation {
    /// Name used in logs
    const NAME: &'static str;

    /// Raw prepare arithmetic, capacity-checked when `check` is set
    fn apply_prepare(holding: &mut Holding, quantity: i64, check: bool) -> QuotaResult<()>;

    /// Raw finalize arithmetic
    fn apply_finalize(holding: &mut Holding, quantity: i64) -> QuotaResult<()>;

    fn prepare(holding: &mut Holding, quantity: i64, check: bool) -> QuotaResult<()> {
        check_holding(holding)?;
        let mut next = holding.clone();
        Self::apply_prepare(&mut next, quantity, check)?;
        check_holding(&next)?;
        *holding = next;
        Ok(())
    }

    fn finalize(holding: &mut Holding, quantity: i64) -> QuotaResult<()> {
        check_holding(holding)?;
        let mut next = holding.clone();
        Self::apply_finalize(&mut next, quantity)?;
        check_holding(&next)?;
        *holding = next;
        Ok(())
    }

    fn undo(holding: &mut Holding, quantity: i64) -> QuotaResult<()> {
        Self::prepare(holding, negate(holding, quantity)?, false)
    }

    fn revert(holding: &mut Holding, quantity: i64) -> QuotaResult<()> {
        let negated = negate(holding, quantity)?;
        Self::apply_prepare(holding, negated, false)
    }
}

fn negate(holding: &Holding, quantity: i64) -> QuotaResult<i64> {
    quantity
        .checked_neg()
        .ok_or_else(|| QuotaError::Overflow(holding.key.clone()))
}

/// Consume capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Import;

/// Return capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release;

impl Operation for Import {
    const NAME: &'static str = "import";

    fn apply_prepare(holding: &mut Holding, quantity: i64, check: bool) -> QuotaResult<()> {
        let new_reserved = holding
            .usage_reserved
            .checked_add(quantity)
            .ok_or_else(|| QuotaError::Overflow(holding.key.clone()))?;

        if check && !holding.limit.admits(new_reserved) {
            return Err(QuotaError::NoCapacity {
                key: holding.key.clone(),
                quantity,
                usage_reserved: holding.usage_reserved,
                limit: holding.limit,
            });
        }

        holding.usage_reserved = new_reserved;
        Ok(())
    }

    fn apply_finalize(holding: &mut Holding, quantity: i64) -> QuotaResult<()> {
        holding.usage_committed = holding
            .usage_committed
            .checked_add(quantity)
            .ok_or_else(|| QuotaError::Overflow(holding.key.clone()))?;
        Ok(())
    }
}

impl Operation for Release {
    const NAME: &'static str = "release";

    fn apply_prepare(holding: &mut Holding, quantity: i64, check: bool) -> QuotaResult<()> {
        let new_committed = holding
            .usage_committed
            .checked_sub(quantity)
            .ok_or_else(|| QuotaError::Overflow(holding.key.clone()))?;

        if check && new_committed < 0 {
            return Err(QuotaError::NoQuantity {
                key: holding.key.clone(),
                quantity,
                usage_committed: holding.usage_committed,
            });
        }

        holding.usage_committed = new_committed;
        Ok(())
    }

    fn apply_finalize(holding: &mut Holding, quantity: i64) -> QuotaResult<()> {
        holding.usage_reserved = holding
            .usage_reserved
            .checked_sub(quantity)
            .ok_or_else(|| QuotaError::Overflow(holding.key.clone()))?;
        Ok(())
    }
}

/// Operation selected for a provision by the sign of its quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Import,
    Release,
}

impl OperationKind {
    /// Operation and magnitude for a provision
    ///
    /// Non-negative quantities import, negative ones release `|quantity|`.
    pub fn classify(provision: &Provision) -> QuotaResult<(Self, i64)> {
        if provision.quantity >= 0 {
            Ok((OperationKind::Import, provision.quantity))
        } else {
            let magnitude = provision
                .quantity
                .checked_neg()
                .ok_or_else(|| QuotaError::Overflow(provision.key.clone()))?;
            Ok((OperationKind::Release, magnitude))
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OperationKind::Import => Import::NAME,
            OperationKind::Release => Release::NAME,
        }
    }

    pub fn prepare(self, holding: &mut Holding, quantity: i64, check: bool) -> QuotaResult<()> {
        match self {
            OperationKind::Import => Import::prepare(holding, quantity, check),
            OperationKind::Release => Release::prepare(holding, quantity, check),
        }
    }

    pub fn finalize(self, holding: &mut Holding, quantity: i64) -> QuotaResult<()> {
        match self {
            OperationKind::Import => Import::finalize(holding, quantity),
            OperationKind::Release => Release::finalize(holding, quantity),
        }
    }

    pub fn undo(self, holding: &mut Holding, quantity: i64) -> QuotaResult<()> {
        match self {
            OperationKind::Import => Import::undo(holding, quantity),
            OperationKind::Release => Release::undo(holding, quantity),
        }
    }

    pub fn revert(self, holding: &mut Holding, quantity: i64) -> QuotaResult<()> {
        match self {
            OperationKind::Import => Import::revert(holding, quantity),
            OperationKind::Release => Release::revert(holding, quantity),
        }
    }
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Operation Primitives
//!
//! These tests prove properties of `Import`/`Release` that must hold for every
//! valid holding and quantity: undo is the exact inverse of prepare, prepared
//! provisions can be undone in any order, and checked operations keep the
//! holding inside its invariant window.

use cim_quota::domain::invariants::check_holding;
use cim_quota::{Holding, HoldingKey, Import, Limit, Operation, OperationKind, Release};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

/// Holding with 0 <= committed <= reserved <= limit
fn valid_holding() -> impl Strategy<Value = Holding> {
    (0i64..1000, 0i64..1000, 0i64..1000).prop_map(|(a, b, headroom)| {
        let (committed, reserved) = if a <= b { (a, b) } else { (b, a) };
        Holding {
            key: HoldingKey::new("h1", "cyclades.cpu"),
            usage_committed: committed,
            usage_reserved: reserved,
            limit: Limit::new(reserved + headroom),
        }
    })
}

/// Signed provision quantity
fn quantity() -> impl Strategy<Value = i64> {
    -500i64..500
}

/// A resolution step: accept or reject a previously prepared provision
#[derive(Debug, Clone, Copy)]
enum Step {
    Prepare(i64),
    Accept,
    Reject,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        quantity().prop_map(Step::Prepare),
        Just(Step::Accept),
        Just(Step::Reject),
    ]
}

fn kind_of(quantity: i64) -> (OperationKind, i64) {
    if quantity >= 0 {
        (OperationKind::Import, quantity)
    } else {
        (OperationKind::Release, -quantity)
    }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Property: Import.prepare then undo restores the holding exactly
    #[test]
    fn prop_import_undo_roundtrip(holding in valid_holding(), q in 0i64..1000, check in any::<bool>()) {
        let mut working = holding.clone();
        if Import::prepare(&mut working, q, check).is_ok() {
            Import::undo(&mut working, q).unwrap();
        }
        prop_assert_eq!(working, holding);
    }

    /// Property: Release.prepare then undo restores the holding exactly
    #[test]
    fn prop_release_undo_roundtrip(holding in valid_holding(), q in 0i64..1000) {
        let mut working = holding.clone();
        if Release::prepare(&mut working, q, true).is_ok() {
            Release::undo(&mut working, q).unwrap();
        }
        prop_assert_eq!(working, holding);
    }

    /// Property: A failed prepare leaves the holding untouched
    #[test]
    fn prop_failed_prepare_is_noop(holding in valid_holding(), q in quantity()) {
        let (kind, magnitude) = kind_of(q);
        let mut working = holding.clone();
        if kind.prepare(&mut working, magnitude, true).is_err() {
            prop_assert_eq!(working, holding);
        }
    }

    /// Property: Interleaved prepares undo in any order
    ///
    /// Provisions prepared on the same holding commute: undoing them in
    /// reverse, forward or rotated order restores the start state.
    #[test]
    fn prop_interleaved_undo_restores(
        holding in valid_holding(),
        quantities in prop::collection::vec(quantity(), 1..20),
        rotation in 0usize..20,
    ) {
        let mut working = holding.clone();
        let mut prepared = Vec::new();
        for q in quantities {
            let (kind, magnitude) = kind_of(q);
            if kind.prepare(&mut working, magnitude, true).is_ok() {
                prepared.push((kind, magnitude));
            }
        }

        let rotation = rotation % prepared.len().max(1);
        prepared.rotate_left(rotation);
        for (kind, magnitude) in prepared {
            kind.undo(&mut working, magnitude).unwrap();
        }

        prop_assert_eq!(working, holding);
    }

    /// Property: Checked operations never leave the invariant window
    #[test]
    fn prop_checked_steps_keep_invariant(
        holding in valid_holding(),
        steps in prop::collection::vec(step(), 0..50),
    ) {
        let initial_gap = holding.usage_reserved - holding.usage_committed;
        let mut working = holding;
        let mut outstanding: Vec<(OperationKind, i64)> = Vec::new();

        for step in steps {
            match step {
                Step::Prepare(q) => {
                    let (kind, magnitude) = kind_of(q);
                    if kind.prepare(&mut working, magnitude, true).is_ok() {
                        outstanding.push((kind, magnitude));
                    }
                }
                Step::Accept => {
                    if let Some((kind, magnitude)) = outstanding.pop() {
                        kind.finalize(&mut working, magnitude).unwrap();
                    }
                }
                Step::Reject => {
                    if let Some((kind, magnitude)) = outstanding.pop() {
                        kind.undo(&mut working, magnitude).unwrap();
                    }
                }
            }

            prop_assert!(check_holding(&working).is_ok());
            prop_assert!(working.limit.admits(working.usage_reserved));
        }

        // Resolving everything leaves only the starting difference
        while let Some((kind, magnitude)) = outstanding.pop() {
            kind.finalize(&mut working, magnitude).unwrap();
        }
        prop_assert_eq!(working.usage_reserved - working.usage_committed, initial_gap);
    }

    /// Property: revert performs undo's arithmetic even outside the window
    #[test]
    fn prop_revert_matches_undo(holding in valid_holding(), q in 0i64..1000) {
        let mut prepared = holding.clone();
        if Import::prepare(&mut prepared, q, false).is_ok() {
            let mut undone = prepared.clone();
            let mut reverted = prepared.clone();
            Import::undo(&mut undone, q).unwrap();
            Import::revert(&mut reverted, q).unwrap();
            prop_assert_eq!(undone, reverted);
        }
    }
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for the Commission Protocol
//!
//! Random sequences of issue/resolve against an in-memory ledger, driven with
//! `tokio_test::block_on`.

use cim_quota::{
    HoldingKey, IssueRequest, Ledger, LedgerConfig, Limit, QuotaService, Serial,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Action {
    Issue { cpu: i64, ram: i64, force: bool },
    Resolve { index: usize, accept: bool },
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => (-6i64..8, -64i64..128, prop::bool::weighted(0.1))
            .prop_map(|(cpu, ram, force)| Action::Issue { cpu, ram, force }),
        2 => (0usize..32, any::<bool>())
            .prop_map(|(index, accept)| Action::Resolve { index, accept }),
    ]
}

fn cpu() -> HoldingKey {
    HoldingKey::new("h1", "cpu")
}

fn ram() -> HoldingKey {
    HoldingKey::new("h1", "ram")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: Holdings stay within 0 <= committed <= reserved, and the
    /// limit holds unless a forced commission was issued
    #[test]
    fn prop_ledger_keeps_invariants(actions in prop::collection::vec(action(), 1..40)) {
        tokio_test::block_on(async {
            let ledger = Ledger::in_memory(&LedgerConfig::default());
            ledger.register_resource("cpu", Limit::new(8)).await.unwrap();
            ledger.register_resource("ram", Limit::new(256)).await.unwrap();

            let mut issued: Vec<Serial> = Vec::new();
            let mut forced = false;

            for action in actions {
                match action {
                    Action::Issue { cpu: c, ram: r, force } => {
                        let mut request = IssueRequest::new("prop", "step")
                            .provision(cpu(), c)
                            .provision(ram(), r);
                        if force {
                            request = request.forced();
                        }
                        if let Ok(serial) = ledger.issue(request).await {
                            forced |= force;
                            issued.push(serial);
                        }
                    }
                    Action::Resolve { index, accept } => {
                        if !issued.is_empty() {
                            let serial = issued[index % issued.len()];
                            ledger.resolve(serial, accept).await.unwrap();
                        }
                    }
                }

                for key in [cpu(), ram()] {
                    if let Ok(holding) = ledger.get_holding(&key).await {
                        prop_assert!(holding.usage_committed >= 0);
                        prop_assert!(holding.usage_committed <= holding.usage_reserved);
                        if !forced {
                            prop_assert!(!holding.is_over_limit());
                        }
                    }
                }
            }

            // Rejecting everything still pending leaves no reservation behind
            for serial in ledger.pending_commissions("prop").await.unwrap() {
                ledger.resolve(serial, false).await.unwrap();
            }
            for key in [cpu(), ram()] {
                if let Ok(holding) = ledger.get_holding(&key).await {
                    prop_assert_eq!(holding.usage_committed, holding.usage_reserved);
                }
            }
            Ok(())
        })?;
    }
}

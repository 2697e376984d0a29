// Copyright (c) 2025 - Cowboy AI, Inc.
//! Integration tests for the outbox coupling
//!
//! These tests verify the complete flow:
//! 1. CommissionJob issues a commission and runs the caller's work
//! 2. The outcome is written to the outbox
//! 3. OutboxWorker resolves the commission from the outbox

mod fixtures;

use std::sync::Arc;

use cim_quota::outbox::JobError;
use cim_quota::{
    CommissionJob, IssueRequest, Limit, MemoryOutbox, Outbox, OutboxMessage, OutboxWorker,
    QuotaService, ReconcileConfig, ReconcileOptions, Reconciler, Resolution,
};
use fixtures::*;
use pretty_assertions::assert_eq;

fn create_vm_request(cores: i64) -> IssueRequest {
    IssueRequest::new(CLIENT, "server create")
        .provision(cpu(HOLDER_1), cores)
        .provision(ram(HOLDER_1), 512)
}

#[tokio::test]
async fn test_successful_work_is_accepted_by_worker() {
    let ledger = Arc::new(ledger(4).await);
    let outbox = Arc::new(MemoryOutbox::new());

    let vm: Result<String, JobError<String>> =
        CommissionJob::new(ledger.clone(), outbox.clone(), create_vm_request(2))
            .run(|context| async move { Ok(format!("vm-{}", context.serial)) })
            .await;
    let vm = vm.unwrap();

    // Reserved, not yet committed
    let holding = ledger.get_holding(&cpu(HOLDER_1)).await.unwrap();
    assert_eq!((holding.usage_committed, holding.usage_reserved), (0, 2));

    let worker = OutboxWorker::new(ledger.clone(), outbox.clone());
    let report = worker.run_once().await.unwrap();
    assert_eq!(report.resolved, 1);

    let holding = ledger.get_holding(&cpu(HOLDER_1)).await.unwrap();
    assert_eq!((holding.usage_committed, holding.usage_reserved), (2, 2));
    assert!(vm.starts_with("vm-"));
}

#[tokio::test]
async fn test_failed_work_is_rejected_by_worker() {
    let ledger = Arc::new(ledger(4).await);
    let outbox = Arc::new(MemoryOutbox::new());

    let result: Result<(), JobError<&str>> =
        CommissionJob::new(ledger.clone(), outbox.clone(), create_vm_request(2))
            .run(|_| async { Err("hypervisor refused") })
            .await;
    assert!(matches!(result, Err(JobError::Operation("hypervisor refused"))));

    OutboxWorker::new(ledger.clone(), outbox.clone())
        .run_once()
        .await
        .unwrap();

    let holding = ledger.get_holding(&ram(HOLDER_1)).await.unwrap();
    assert_eq!((holding.usage_committed, holding.usage_reserved), (0, 0));
    assert!(ledger.pending_commissions(CLIENT).await.unwrap().is_empty());
}

/// Work finished but the resolution never reached the outbox
#[tokio::test]
async fn test_lost_resolution_is_found_by_reconciliation() {
    let ledger = ledger(4).await;
    let serial = ledger.issue(create_vm_request(2)).await.unwrap();

    let inventory = FixedInventory::new([CPU, RAM]);
    inventory.set(cpu(HOLDER_1), 2).await;
    inventory.set(ram(HOLDER_1), 512).await;

    let report = Reconciler::new(
        ledger.clone(),
        vec![Box::new(inventory)],
        ReconcileConfig::default(),
    )
    .reconcile(Some(HOLDER_1), ReconcileOptions::report_only())
    .await
    .unwrap();

    assert_eq!(report.pending.len(), 2);
    assert!(report.mismatches.is_empty());
    assert_eq!(ledger.pending_commissions(CLIENT).await.unwrap(), vec![serial]);
}

#[tokio::test]
async fn test_redelivered_resolution_is_harmless() {
    let ledger = Arc::new(ledger(4).await);
    let outbox = Arc::new(MemoryOutbox::new());
    let serial = ledger.issue(create_vm_request(3)).await.unwrap();

    outbox.enqueue(OutboxMessage::new(serial, true)).await.unwrap();
    outbox.enqueue(OutboxMessage::new(serial, true)).await.unwrap();
    outbox.enqueue(OutboxMessage::new(serial, false)).await.unwrap();

    let report = OutboxWorker::new(ledger.clone(), outbox.clone())
        .run_once()
        .await
        .unwrap();

    assert_eq!(report.resolved, 3);
    assert_eq!(report.conflicting, 1);
    assert!(outbox.is_empty().await);

    let commission = ledger.get_commission(CLIENT, serial).await.unwrap();
    assert_eq!(commission.resolution, Resolution::Accepted);
    let holding = ledger.get_holding(&cpu(HOLDER_1)).await.unwrap();
    assert_eq!((holding.usage_committed, holding.usage_reserved), (3, 3));
}

#[tokio::test]
async fn test_rejected_issue_never_runs_work() {
    let ledger = Arc::new(ledger(4).await);
    let outbox = Arc::new(MemoryOutbox::new());

    let result: Result<(), JobError<String>> =
        CommissionJob::new(ledger.clone(), outbox.clone(), create_vm_request(8))
            .run(|_| async { Err("work ran".to_string()) })
            .await;

    // An Operation error would mean the work ran
    assert!(matches!(result, Err(JobError::Quota(ref e)) if e.is_capacity_error()));
    assert!(outbox.is_empty().await);
}

/// A resolution written before a restart applies to its own commission,
/// never to one issued after the restart
#[tokio::test]
async fn test_outbox_resolution_survives_restart() {
    let store = PersistedStore::new();
    let outbox = Arc::new(MemoryOutbox::new());

    let serial = {
        let before = store.ledger();
        before.register_resource(CPU, Limit::new(4)).await.unwrap();
        let serial = before
            .issue(IssueRequest::new(CLIENT, "server create").provision(cpu(HOLDER_1), 2))
            .await
            .unwrap();
        outbox.enqueue(OutboxMessage::new(serial, true)).await.unwrap();
        serial
    };

    let restarted = store.restart().await;
    let after = Arc::new(restarted.ledger());
    let unrelated = after
        .issue(IssueRequest::new("pithos", "upload").provision(cpu(HOLDER_2), 3))
        .await
        .unwrap();
    assert!(unrelated > serial);

    let report = OutboxWorker::new(after.clone(), outbox.clone())
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.resolved, 1);

    let original = after.get_commission(CLIENT, serial).await.unwrap();
    assert_eq!(original.resolution, Resolution::Accepted);
    let untouched = after.get_commission("pithos", unrelated).await.unwrap();
    assert_eq!(untouched.resolution, Resolution::Pending);

    let accepted = after.get_holding(&cpu(HOLDER_1)).await.unwrap();
    assert_eq!((accepted.usage_committed, accepted.usage_reserved), (2, 2));
    let reserved = after.get_holding(&cpu(HOLDER_2)).await.unwrap();
    assert_eq!((reserved.usage_committed, reserved.usage_reserved), (0, 3));
    assert_eq!(restarted.persisted_holding(&cpu(HOLDER_1)).await, Some(accepted));
}

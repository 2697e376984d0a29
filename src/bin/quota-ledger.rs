// Copyright (c) 2025 - Cowboy AI, Inc.
//! Quota Ledger Service
//!
//! Runs the commissioning ledger behind NATS:
//! - Requests → `quota.rpc` → LedgerResponder → Ledger
//! - Resolutions → JetStream outbox → OutboxWorker → Ledger
//! - Resolved provisions → JetStream provision log
//! - Resources, holdings and commissions → JetStream KV bucket
//!
//! Run with: cargo run --bin quota-ledger
//!
//! Prerequisites:
//! 1. NATS server with JetStream running (default: localhost:4222)
//! 2. Resources to register in QUOTA_RESOURCES, e.g. `cyclades.cpu=8,cyclades.ram=16384`

use std::sync::Arc;

use anyhow::{Context, Result};
use cim_quota::{
    outbox::NatsOutbox,
    store::{KvLedgerStore, NatsProvisionLog},
    Ledger, LedgerConfig, LedgerResponder, NatsClient, NatsConfig, OutboxWorker,
};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting quota ledger");

    let config = LedgerConfig::from_env().context("Failed to load configuration")?;
    info!(
        nats_url = %config.nats.url,
        rpc_subject = %config.nats.rpc_subject,
        kv_bucket = %config.nats.kv_bucket,
        log_stream = %config.nats.log_stream,
        outbox_stream = %config.nats.outbox_stream,
        resources = config.resources.len(),
        "Configuration loaded"
    );

    let client = NatsClient::new(NatsConfig::with_url(config.nats.url.clone()))
        .await
        .context("Failed to connect to NATS")?;

    let store = KvLedgerStore::from_client(&client, &config.nats.kv_bucket, config.lock.clone())
        .await
        .context("Failed to open ledger bucket")?;
    let log = NatsProvisionLog::from_client(&client, &config.nats.log_stream)
        .await
        .context("Failed to open provision log stream")?;
    let outbox = NatsOutbox::from_client(&client, &config.nats.outbox_stream)
        .await
        .context("Failed to open outbox stream")?;

    let ledger = Arc::new(Ledger::new(Arc::new(store), Arc::new(log)));
    for (resource, limit) in &config.resources {
        ledger
            .register_resource(resource, *limit)
            .await
            .with_context(|| format!("Failed to register resource {}", resource))?;
        info!(resource = %resource, limit = %limit, "Registered resource");
    }

    let responder = LedgerResponder::new(client.clone(), ledger.clone(), config.nats.rpc_subject.clone());
    let worker = OutboxWorker::new(ledger.clone(), Arc::new(outbox))
        .with_poll_interval(config.nats.outbox_poll);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let responder_task = tokio::spawn(async move {
        if let Err(e) = responder.serve().await {
            error!(error = %e, "Ledger responder failed");
        }
    });
    let worker_task = tokio::spawn(async move {
        if let Err(e) = worker.run(shutdown_rx).await {
            error!(error = %e, "Outbox worker failed");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    responder_task.abort();
    worker_task.await.context("Outbox worker panicked")?;

    info!("Quota ledger stopped");
    Ok(())
}

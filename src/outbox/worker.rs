// Copyright (c) 2025 - Cowboy AI, Inc.
//! Outbox worker - applies recorded resolutions to the ledger

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::Outbox;
use crate::errors::{QuotaError, QuotaResult};
use crate::service::QuotaService;

/// Messages taken per drain
const DEFAULT_BATCH_SIZE: usize = 100;

/// `tokio::time::interval` rejects a zero period
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Result of one drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub resolved: usize,
    pub conflicting: usize,
    pub dropped: usize,
    pub retried: usize,
    pub parked: usize,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.resolved + self.dropped + self.retried + self.parked == 0
    }
}

/// Polls an outbox and resolves each message through a quota service
pub struct OutboxWorker {
    service: Arc<dyn QuotaService>,
    outbox: Arc<dyn Outbox>,
    batch_size: usize,
    poll_interval: Duration,
}

impl OutboxWorker {
    pub fn new(service: Arc<dyn QuotaService>, outbox: Arc<dyn Outbox>) -> Self {
        Self {
            service,
            outbox,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Poll period, at least one millisecond
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Resolve one batch of messages
    ///
    /// Resolution is idempotent, so a message delivered twice is harmless.
    /// Messages naming an unknown commission are dropped. Fatal errors
    /// (invariant violation, overflow) park the message: retrying cannot
    /// succeed until the holding is repaired. Any other failure returns the
    /// message to the outbox.
    pub async fn run_once(&self) -> QuotaResult<DrainReport> {
        let messages = self.outbox.fetch(self.batch_size).await?;
        let mut report = DrainReport::default();

        for message in messages {
            match self
                .service
                .resolve_commission(message.serial, message.accept)
                .await
            {
                Ok(outcome) => {
                    if outcome.conflicting {
                        warn!(
                            serial = %message.serial,
                            requested_accept = message.accept,
                            resolution = %outcome.resolution,
                            "Outbox resolution conflicts with recorded outcome"
                        );
                        report.conflicting += 1;
                    }
                    self.outbox.acknowledge(message.id).await?;
                    report.resolved += 1;
                }
                Err(QuotaError::UnknownCommission(serial)) => {
                    error!(serial = %serial, "Dropping outbox message for unknown commission");
                    self.outbox.acknowledge(message.id).await?;
                    report.dropped += 1;
                }
                Err(e) if e.is_fatal() => {
                    error!(
                        serial = %message.serial,
                        message_id = %message.id,
                        accept = message.accept,
                        error = %e,
                        "Resolution halted, parking outbox message"
                    );
                    self.outbox.park(message.id).await?;
                    report.parked += 1;
                }
                Err(e) => {
                    warn!(serial = %message.serial, error = %e, "Resolution failed, will retry");
                    self.outbox.release(message.id).await?;
                    report.retried += 1;
                }
            }
        }

        if !report.is_empty() {
            debug!(?report, "Outbox drained");
        }
        Ok(report)
    }

    /// Drain the outbox until `shutdown` flips to `true` or its sender drops
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> QuotaResult<()> {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "Outbox worker started");
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Outbox drain failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Outbox worker stopped");
        Ok(())
    }
}

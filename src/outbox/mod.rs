// Copyright (c) 2025 - Cowboy AI, Inc.
//! Outbox / Transaction Coupling
//!
//! A commission is issued before the calling service performs its own write.
//! The outcome of that write decides the resolution, which is recorded as an
//! [`OutboxMessage`] and applied later by the [`OutboxWorker`]:
//!
//! ```text
//! CommissionJob::run
//!     issue ──► work(context) ──► Ok  ──► outbox(accept) ──► on_success actions
//!                             └─► Err ──► outbox(reject) ──► on_failure actions
//!
//! OutboxWorker
//!     fetch ──► resolve_commission ──► acknowledge
//!                                  ├─► release (retried later)
//!                                  └─► park    (fatal, never retried)
//! ```
//!
//! A crash before the outbox write leaves the commission pending; its
//! reservation is bounded by the capacity check at issue time and is found by
//! reconciliation.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::Serial;
use crate::errors::QuotaResult;

pub mod job;
pub mod nats;
pub mod worker;

pub use job::{CommissionContext, CommissionJob, JobError};
pub use nats::NatsOutbox;
pub use worker::{DrainReport, OutboxWorker};

/// Pending resolution of one commission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub serial: Serial,
    pub accept: bool,
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    pub fn new(serial: Serial, accept: bool) -> Self {
        Self {
            id: Uuid::now_v7(),
            serial,
            accept,
            created_at: Utc::now(),
        }
    }
}

/// Durable queue of resolution messages
///
/// Delivery is at-least-once: a fetched message stays in flight until it is
/// acknowledged or released.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Durably record a resolution
    async fn enqueue(&self, message: OutboxMessage) -> QuotaResult<()>;

    /// Take up to `max` messages for processing
    async fn fetch(&self, max: usize) -> QuotaResult<Vec<OutboxMessage>>;

    /// Remove a processed message
    async fn acknowledge(&self, id: Uuid) -> QuotaResult<()>;

    /// Return a message for a later retry
    async fn release(&self, id: Uuid) -> QuotaResult<()>;

    /// Take a message out of delivery for good, keeping it for inspection
    /// where the outbox can
    async fn park(&self, id: Uuid) -> QuotaResult<()>;
}

#[derive(Debug, Default)]
struct MemoryOutboxState {
    queued: VecDeque<OutboxMessage>,
    in_flight: HashMap<Uuid, OutboxMessage>,
    parked: Vec<OutboxMessage>,
}

/// In-process outbox
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    state: Mutex<MemoryOutboxState>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages queued or in flight
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.queued.len() + state.in_flight.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Messages taken out of delivery by [`Outbox::park`]
    pub async fn parked(&self) -> Vec<OutboxMessage> {
        self.state.lock().await.parked.clone()
    }
}

#[async_trait]
impl Outbox for MemoryOutbox {
    async fn enqueue(&self, message: OutboxMessage) -> QuotaResult<()> {
        self.state.lock().await.queued.push_back(message);
        Ok(())
    }

    async fn fetch(&self, max: usize) -> QuotaResult<Vec<OutboxMessage>> {
        let mut state = self.state.lock().await;
        let count = max.min(state.queued.len());
        let batch: Vec<OutboxMessage> = state.queued.drain(..count).collect();
        for message in &batch {
            state.in_flight.insert(message.id, message.clone());
        }
        Ok(batch)
    }

    async fn acknowledge(&self, id: Uuid) -> QuotaResult<()> {
        self.state.lock().await.in_flight.remove(&id);
        Ok(())
    }

    async fn release(&self, id: Uuid) -> QuotaResult<()> {
        let mut state = self.state.lock().await;
        if let Some(message) = state.in_flight.remove(&id) {
            state.queued.push_back(message);
        }
        Ok(())
    }

    async fn park(&self, id: Uuid) -> QuotaResult<()> {
        let mut state = self.state.lock().await;
        if let Some(message) = state.in_flight.remove(&id) {
            state.parked.push(message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_moves_messages_in_flight() {
        let outbox = MemoryOutbox::new();
        outbox.enqueue(OutboxMessage::new(Serial(1), true)).await.unwrap();
        outbox.enqueue(OutboxMessage::new(Serial(2), false)).await.unwrap();

        let batch = outbox.fetch(1).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].serial, Serial(1));
        assert_eq!(outbox.len().await, 2);

        outbox.acknowledge(batch[0].id).await.unwrap();
        assert_eq!(outbox.len().await, 1);
    }

    #[tokio::test]
    async fn test_released_message_is_redelivered() {
        let outbox = MemoryOutbox::new();
        outbox.enqueue(OutboxMessage::new(Serial(7), true)).await.unwrap();

        let first = outbox.fetch(10).await.unwrap();
        assert!(outbox.fetch(10).await.unwrap().is_empty());

        outbox.release(first[0].id).await.unwrap();
        let again = outbox.fetch(10).await.unwrap();
        assert_eq!(again, first);
    }

    #[tokio::test]
    async fn test_parked_message_is_never_redelivered() {
        let outbox = MemoryOutbox::new();
        outbox.enqueue(OutboxMessage::new(Serial(3), true)).await.unwrap();

        let batch = outbox.fetch(10).await.unwrap();
        outbox.park(batch[0].id).await.unwrap();

        assert!(outbox.is_empty().await);
        assert!(outbox.fetch(10).await.unwrap().is_empty());
        assert_eq!(outbox.parked().await, batch);
    }
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! NATS JetStream Outbox
//!
//! Resolution messages are published to `quota.outbox.<serial>` on a
//! work-queue stream and consumed through one durable pull consumer. A
//! fetched message is held until the worker acknowledges or releases it; an
//! unacknowledged message is redelivered after the consumer's ack wait.

use std::collections::HashMap;
use std::time::Duration;

use async_nats::jetstream::{self, consumer::pull::Config as PullConfig, consumer::AckPolicy, AckKind};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Outbox, OutboxMessage};
use crate::errors::{QuotaError, QuotaResult};
use crate::jetstream::{create_stream, JetStreamConfig};
use crate::nats::NatsClient;
use crate::subjects;

/// Durable consumer shared by every outbox worker
const CONSUMER_NAME: &str = "quota-outbox-worker";

/// JetStream-backed outbox
pub struct NatsOutbox {
    jetstream: jetstream::Context,
    consumer: jetstream::consumer::Consumer<PullConfig>,
    fetch_timeout: Duration,
    in_flight: Mutex<HashMap<Uuid, jetstream::Message>>,
}

impl NatsOutbox {
    /// Create or fetch the outbox stream and its durable consumer
    pub async fn from_client(client: &NatsClient, stream_name: &str) -> QuotaResult<Self> {
        let jetstream = jetstream::new(client.inner().clone());
        let stream = create_stream(&jetstream, JetStreamConfig::outbox(stream_name)).await?;

        let consumer = match stream.get_consumer::<PullConfig>(CONSUMER_NAME).await {
            Ok(consumer) => consumer,
            Err(_) => {
                info!(consumer = CONSUMER_NAME, "Creating outbox consumer");
                stream
                    .create_consumer(PullConfig {
                        durable_name: Some(CONSUMER_NAME.to_string()),
                        filter_subject: subjects::outbox_wildcard(),
                        ack_policy: AckPolicy::Explicit,
                        ..Default::default()
                    })
                    .await
                    .map_err(|e| QuotaError::Nats(e.to_string()))?
            }
        };

        Ok(Self {
            jetstream,
            consumer,
            fetch_timeout: Duration::from_secs(1),
            in_flight: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl Outbox for NatsOutbox {
    async fn enqueue(&self, message: OutboxMessage) -> QuotaResult<()> {
        let subject = subjects::outbox_subject(message.serial.value());
        let payload = serde_json::to_vec(&message)?;

        self.jetstream
            .publish(subject, payload.into())
            .await
            .map_err(|e| QuotaError::Nats(e.to_string()))?
            .await
            .map_err(|e| QuotaError::Nats(e.to_string()))?;
        Ok(())
    }

    async fn fetch(&self, max: usize) -> QuotaResult<Vec<OutboxMessage>> {
        let batch = self
            .consumer
            .fetch()
            .max_messages(max)
            .expires(self.fetch_timeout)
            .messages()
            .await;

        let mut messages = match batch {
            Ok(messages) => messages,
            Err(e) => {
                let err_msg = e.to_string().to_lowercase();
                if err_msg.contains("timeout") || err_msg.contains("timed out") {
                    return Ok(Vec::new());
                }
                return Err(QuotaError::Nats(e.to_string()));
            }
        };

        let mut fetched = Vec::new();
        let mut in_flight = self.in_flight.lock().await;

        while let Some(message) = messages.next().await {
            let msg = message.map_err(|e| QuotaError::Nats(e.to_string()))?;
            match serde_json::from_slice::<OutboxMessage>(&msg.payload) {
                Ok(outbox_message) => {
                    in_flight.insert(outbox_message.id, msg);
                    fetched.push(outbox_message);
                }
                Err(e) => {
                    // Bad message format, retry won't help
                    warn!(subject = %msg.subject, error = %e, "Terminating malformed outbox message");
                    msg.ack_with(AckKind::Term)
                        .await
                        .map_err(|e| QuotaError::Nats(e.to_string()))?;
                }
            }
        }

        Ok(fetched)
    }

    async fn acknowledge(&self, id: Uuid) -> QuotaResult<()> {
        if let Some(msg) = self.in_flight.lock().await.remove(&id) {
            msg.ack()
                .await
                .map_err(|e| QuotaError::Nats(e.to_string()))?;
        }
        Ok(())
    }

    async fn release(&self, id: Uuid) -> QuotaResult<()> {
        if let Some(msg) = self.in_flight.lock().await.remove(&id) {
            msg.ack_with(AckKind::Nak(None))
                .await
                .map_err(|e| QuotaError::Nats(e.to_string()))?;
        }
        Ok(())
    }

    async fn park(&self, id: Uuid) -> QuotaResult<()> {
        // Term stops redelivery; the worker logged the message at error
        if let Some(msg) = self.in_flight.lock().await.remove(&id) {
            msg.ack_with(AckKind::Term)
                .await
                .map_err(|e| QuotaError::Nats(e.to_string()))?;
        }
        Ok(())
    }
}

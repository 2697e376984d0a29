// Copyright (c) 2025 - Cowboy AI, Inc.
//! NATS JetStream Provision Log
//!
//! Each entry is published to `quota.provisions.<holder>.<resource>` on a
//! limits-retention stream. Publishing waits for the JetStream ack, so an
//! `append` that returns `Ok` is durable.
//!
//! Each message carries the entry id as `Nats-Msg-Id`; JetStream drops a
//! republished entry inside its duplicate window, and replay drops any copy
//! older than that.

use async_nats::jetstream::{self, context::Publish, stream::Stream};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;

use super::provision_log::ProvisionLog;
use crate::domain::ProvisionLogEntry;
use crate::errors::{QuotaError, QuotaResult};
use crate::jetstream::{create_stream, JetStreamConfig};
use crate::nats::NatsClient;
use crate::subjects;

/// Fetch batch size when replaying a holder's entries
const BATCH_SIZE: usize = 1000;

/// JetStream-backed provision log
pub struct NatsProvisionLog {
    jetstream: jetstream::Context,
    stream: Stream,
}

impl NatsProvisionLog {
    /// Connect to NATS and create or fetch the provision log stream
    pub async fn connect(nats_url: &str, stream_name: &str) -> QuotaResult<Self> {
        let client = async_nats::connect(nats_url)
            .await
            .map_err(|e| QuotaError::Nats(e.to_string()))?;
        Self::with_context(jetstream::new(client), stream_name).await
    }

    /// Reuse an existing client connection
    pub async fn from_client(client: &NatsClient, stream_name: &str) -> QuotaResult<Self> {
        Self::with_context(jetstream::new(client.inner().clone()), stream_name).await
    }

    async fn with_context(jetstream: jetstream::Context, stream_name: &str) -> QuotaResult<Self> {
        let stream = create_stream(&jetstream, JetStreamConfig::provision_log(stream_name)).await?;
        Ok(Self { jetstream, stream })
    }
}

#[async_trait]
impl ProvisionLog for NatsProvisionLog {
    async fn append(&self, entries: Vec<ProvisionLogEntry>) -> QuotaResult<()> {
        for entry in entries {
            let subject = subjects::provision_subject(&entry.key.holder, &entry.key.resource);
            let payload = serde_json::to_vec(&entry)?;
            let publish = Publish::build()
                .message_id(entry.entry_id())
                .payload(payload.into());

            self.jetstream
                .send_publish(subject, publish)
                .await
                .map_err(|e| QuotaError::Nats(e.to_string()))?
                .await
                .map_err(|e| QuotaError::Nats(e.to_string()))?;
        }
        Ok(())
    }

    async fn entries_for(&self, holder: &str) -> QuotaResult<Vec<ProvisionLogEntry>> {
        let consumer = self
            .stream
            .create_consumer(jetstream::consumer::pull::Config {
                filter_subject: subjects::provision_holder_filter(holder),
                ..Default::default()
            })
            .await
            .map_err(|e| QuotaError::Nats(e.to_string()))?;

        let mut entries = Vec::new();
        let mut seen = HashSet::new();

        loop {
            let batch = consumer
                .fetch()
                .max_messages(BATCH_SIZE)
                .expires(Duration::from_secs(2))
                .messages()
                .await;

            // An expired fetch means the stream has nothing more for us
            let mut messages = match batch {
                Ok(messages) => messages,
                Err(e) => {
                    let err_msg = e.to_string().to_lowercase();
                    if err_msg.contains("timeout")
                        || err_msg.contains("timed out")
                        || err_msg.contains("no messages")
                    {
                        break;
                    }
                    return Err(QuotaError::Nats(e.to_string()));
                }
            };

            let mut batch_count = 0;
            while let Some(message) = messages.next().await {
                let msg = message.map_err(|e| QuotaError::Nats(e.to_string()))?;
                let entry: ProvisionLogEntry = serde_json::from_slice(&msg.payload)?;

                // Escaped subject tokens can collide
                if entry.key.holder == holder && seen.insert(entry.entry_id()) {
                    entries.push(entry);
                }

                msg.ack()
                    .await
                    .map_err(|e| QuotaError::Nats(e.to_string()))?;
                batch_count += 1;
            }

            if batch_count < BATCH_SIZE {
                break;
            }
        }

        Ok(entries)
    }
}

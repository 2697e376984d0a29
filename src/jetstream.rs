// Copyright (c) 2025 - Cowboy AI, Inc.

//! JetStream configuration and setup for the quota ledger
//!
//! Two streams back the ledger service:
//!
//! - **Provision log**: limits retention, file storage, never trimmed by
//!   consumers; replayed by reconciliation and audit
//! - **Outbox**: work-queue retention; a message disappears once the worker
//!   acknowledges the resolution it carries
//!
//! # Example
//!
//! ```rust,no_run
//! use cim_quota::jetstream::{create_stream, JetStreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = async_nats::connect("nats://localhost:4222").await?;
//!     let jetstream = async_nats::jetstream::new(client);
//!
//!     let config = JetStreamConfig::provision_log("QUOTA_PROVISION_LOG");
//!     let stream = create_stream(&jetstream, config).await?;
//!
//!     Ok(())
//! }
//! ```

use async_nats::jetstream::{self, stream::Stream};
use std::time::Duration;

use crate::errors::{QuotaError, QuotaResult};
use crate::subjects;

/// Configuration for a ledger stream
#[derive(Debug, Clone)]
pub struct JetStreamConfig {
    /// Stream name
    pub stream_name: String,

    /// Subjects this stream will capture
    pub subjects: Vec<String>,

    /// Maximum age of messages (zero = unbounded)
    pub max_age: Duration,

    /// Storage type (File or Memory)
    pub storage: StorageType,

    /// Number of replicas (for clustered NATS)
    pub replicas: usize,

    /// Retention policy
    pub retention: RetentionPolicy,
}

impl JetStreamConfig {
    /// Append-only provision log, kept indefinitely
    pub fn provision_log(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            subjects: vec![subjects::provision_wildcard()],
            max_age: Duration::ZERO,
            storage: StorageType::File,
            replicas: 1,
            retention: RetentionPolicy::Limits,
        }
    }

    /// Resolution outbox, drained by acknowledgement
    pub fn outbox(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            subjects: vec![subjects::outbox_wildcard()],
            max_age: Duration::ZERO,
            storage: StorageType::File,
            replicas: 1,
            retention: RetentionPolicy::WorkQueue,
        }
    }
}

/// Storage type for JetStream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// File-based storage (persistent across restarts)
    File,
    /// Memory-based storage (faster, but lost on restart)
    Memory,
}

/// Retention policy for stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Limits-based retention (based on max_age)
    Limits,
    /// Work queue retention (messages deleted after acknowledgment)
    WorkQueue,
}

/// Create or fetch a ledger stream
///
/// Idempotent: an existing stream with the same name is returned.
pub async fn create_stream(
    jetstream: &jetstream::Context,
    config: JetStreamConfig,
) -> QuotaResult<Stream> {
    let storage = match config.storage {
        StorageType::File => jetstream::stream::StorageType::File,
        StorageType::Memory => jetstream::stream::StorageType::Memory,
    };

    let retention = match config.retention {
        RetentionPolicy::Limits => jetstream::stream::RetentionPolicy::Limits,
        RetentionPolicy::WorkQueue => jetstream::stream::RetentionPolicy::WorkQueue,
    };

    let stream_config = jetstream::stream::Config {
        name: config.stream_name.clone(),
        subjects: config.subjects,
        max_age: config.max_age,
        storage,
        num_replicas: config.replicas,
        retention,
        ..Default::default()
    };

    jetstream
        .get_or_create_stream(stream_config)
        .await
        .map_err(|e| QuotaError::Nats(e.to_string()))
}

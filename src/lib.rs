//! Quota commissioning ledger
//!
//! Tracks committed and reserved usage per (holder, source, resource) and
//! exposes a two-phase commission protocol that calling services use to
//! reserve quota before a risky operation and accept or reject it afterwards.
//! Includes the outbox coupling for resolutions, reconciliation against
//! authoritative inventory, and a NATS transport for running the ledger as a
//! service.

pub mod config;
pub mod domain;
pub mod errors;
pub mod jetstream;
pub mod nats;
pub mod operations;
pub mod outbox;
pub mod reconcile;
pub mod rpc;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod subjects;

// Re-export commonly used types
pub use config::{LedgerConfig, LockConfig, NatsSettings, ReconcileConfig};
pub use domain::{
    Commission, Holding, HoldingFilter, HoldingKey, IssueRequest, Limit, PendingResolution,
    Provision, ProvisionLogEntry, Resolution, ResolveOutcome, Serial,
};
pub use errors::{ErrorKind, QuotaError, QuotaResult};
pub use nats::{NatsClient, NatsConfig};
pub use operations::{Import, Operation, OperationKind, Release};
pub use outbox::{CommissionContext, CommissionJob, MemoryOutbox, Outbox, OutboxMessage, OutboxWorker};
pub use reconcile::{InventorySource, InventoryUsage, ReconcileOptions, Reconciler, ReconciliationReport};
pub use rpc::{LedgerRequest, LedgerResponder, LedgerResponse, RemoteLedger, WireError};
pub use service::{Ledger, QuotaService};

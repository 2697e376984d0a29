//! Error types for quota ledger operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{HoldingKey, Limit, Resolution, Serial};

/// Errors that can occur in ledger operations
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaError {
    /// An import would push reserved usage above the limit
    #[error("No capacity on {key}: requested {quantity}, reserved {usage_reserved}, limit {limit}")]
    NoCapacity {
        key: HoldingKey,
        quantity: i64,
        usage_reserved: i64,
        limit: Limit,
    },

    /// A release would drive committed usage below zero
    #[error("Not enough quantity on {key}: releasing {quantity}, committed {usage_committed}")]
    NoQuantity {
        key: HoldingKey,
        quantity: i64,
        usage_committed: i64,
    },

    /// Referenced holding does not exist and cannot be created
    #[error("Unknown holding: {0}")]
    UnknownHolding(HoldingKey),

    /// Referenced commission does not exist (or belongs to another client)
    #[error("Unknown commission: {0}")]
    UnknownCommission(Serial),

    /// Commission was resolved before, with a different outcome
    #[error("Commission {serial} already {resolution}, cannot be {requested}")]
    AlreadyResolved {
        serial: Serial,
        resolution: Resolution,
        requested: Resolution,
    },

    /// Holding counters broke the structural invariant
    #[error("Invariant violation on {key}: {detail}")]
    InvariantViolation { key: HoldingKey, detail: String },

    /// Two provisions of one commission target the same holding
    #[error("Duplicate provision for {0}")]
    DuplicateProvision(HoldingKey),

    /// Malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Counter arithmetic overflowed
    #[error("Arithmetic overflow on {0}")]
    Overflow(HoldingKey),

    /// Row lock not acquired within the retry budget
    #[error("Lock timeout on {target} after {attempts} attempts")]
    LockTimeout { target: String, attempts: u32 },

    /// NATS transport error
    #[error("NATS error: {0}")]
    Nats(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for ledger operations
pub type QuotaResult<T> = Result<T, QuotaError>;

/// Fieldless mirror of [`QuotaError`] variants, used on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoCapacity,
    NoQuantity,
    UnknownHolding,
    UnknownCommission,
    AlreadyResolved,
    InvariantViolation,
    DuplicateProvision,
    InvalidRequest,
    Overflow,
    LockTimeout,
    Nats,
    Serialization,
    Configuration,
}

impl QuotaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuotaError::NoCapacity { .. } => ErrorKind::NoCapacity,
            QuotaError::NoQuantity { .. } => ErrorKind::NoQuantity,
            QuotaError::UnknownHolding(_) => ErrorKind::UnknownHolding,
            QuotaError::UnknownCommission(_) => ErrorKind::UnknownCommission,
            QuotaError::AlreadyResolved { .. } => ErrorKind::AlreadyResolved,
            QuotaError::InvariantViolation { .. } => ErrorKind::InvariantViolation,
            QuotaError::DuplicateProvision(_) => ErrorKind::DuplicateProvision,
            QuotaError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            QuotaError::Overflow(_) => ErrorKind::Overflow,
            QuotaError::LockTimeout { .. } => ErrorKind::LockTimeout,
            QuotaError::Nats(_) => ErrorKind::Nats,
            QuotaError::Serialization(_) => ErrorKind::Serialization,
            QuotaError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Expected business condition the caller should surface as "quota exceeded"
    pub fn is_capacity_error(&self) -> bool {
        matches!(
            self,
            QuotaError::NoCapacity { .. } | QuotaError::NoQuantity { .. }
        )
    }

    /// Bug or data corruption; processing of the commission must stop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            QuotaError::InvariantViolation { .. } | QuotaError::Overflow(_)
        )
    }
}

impl From<async_nats::Error> for QuotaError {
    fn from(err: async_nats::Error) -> Self {
        QuotaError::Nats(err.to_string())
    }
}

impl From<serde_json::Error> for QuotaError {
    fn from(err: serde_json::Error) -> Self {
        QuotaError::Serialization(err.to_string())
    }
}

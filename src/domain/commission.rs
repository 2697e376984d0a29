// Copyright (c) 2025 - Cowboy AI, Inc.
//! Commissions and Provisions
//!
//! A Commission is an atomically issued batch of Provisions representing the
//! quota impact of one business operation. It is created `Pending` and is
//! resolved exactly once to `Accepted` or `Rejected`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::holding::HoldingKey;

/// Store-assigned, strictly increasing commission identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serial(pub u64);

impl Serial {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolution state of a Commission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Pending,
    Accepted,
    Rejected,
}

impl Resolution {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Resolution::Pending)
    }

    /// Terminal state reached by resolving with `accept`
    pub fn from_accept(accept: bool) -> Self {
        if accept {
            Resolution::Accepted
        } else {
            Resolution::Rejected
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resolution::Pending => "pending",
            Resolution::Accepted => "accepted",
            Resolution::Rejected => "rejected",
        };
        write!(f, "{}", name)
    }
}

/// Signed quantity delta against one Holding
///
/// Positive quantities import (consume) capacity, negative ones release it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provision {
    pub key: HoldingKey,
    pub quantity: i64,
}

impl Provision {
    pub fn new(key: HoldingKey, quantity: i64) -> Self {
        Self { key, quantity }
    }
}

/// Caller request for a new Commission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRequest {
    /// Identifier of the issuing service
    pub client_key: String,

    /// Human-readable description (e.g. "server create vm-42")
    pub name: String,

    /// Bypass capacity and quantity checks
    #[serde(default)]
    pub force: bool,

    pub provisions: Vec<Provision>,
}

impl IssueRequest {
    pub fn new(client_key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            client_key: client_key.into(),
            name: name.into(),
            force: false,
            provisions: Vec::new(),
        }
    }

    /// Append a provision
    pub fn provision(mut self, key: HoldingKey, quantity: i64) -> Self {
        self.provisions.push(Provision::new(key, quantity));
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Stored Commission record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commission {
    pub serial: Serial,
    pub client_key: String,
    pub name: String,
    pub issued_at: DateTime<Utc>,
    pub resolution: Resolution,
    pub resolved_at: Option<DateTime<Utc>>,
    pub provisions: Vec<Provision>,
}

impl Commission {
    /// New pending commission
    pub fn pending(serial: Serial, request: IssueRequest, issued_at: DateTime<Utc>) -> Self {
        Self {
            serial,
            client_key: request.client_key,
            name: request.name,
            issued_at,
            resolution: Resolution::Pending,
            resolved_at: None,
            provisions: request.provisions,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.resolution == Resolution::Pending
    }

    /// Keys touched by this commission, sorted and deduplicated
    pub fn holding_keys(&self) -> Vec<HoldingKey> {
        let mut keys: Vec<HoldingKey> = self.provisions.iter().map(|p| p.key.clone()).collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Result of resolving a single commission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveOutcome {
    pub serial: Serial,

    /// Authoritative resolution (the first one applied)
    pub resolution: Resolution,

    /// Commission was already resolved before this call
    pub already_resolved: bool,

    /// The call asked for the opposite outcome of the recorded one
    pub conflicting: bool,
}

/// Result of resolving a batch of a client's pending commissions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingResolution {
    pub accepted: Vec<Serial>,
    pub rejected: Vec<Serial>,
    pub not_found: Vec<Serial>,
    pub conflicting: Vec<Serial>,
}

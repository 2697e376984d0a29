// Copyright (c) 2025 - Cowboy AI, Inc.
//! Holding - per (holder, source, resource) usage counters
//!
//! A Holding tracks two counters against a limit:
//!
//! ```text
//! 0 <= usage_committed <= usage_reserved <= limit
//!      └─ certainly in use   └─ may end up in use
//! ```
//!
//! `usage_reserved` grows pessimistically before a risky operation, and
//! `usage_committed` only shrinks once capacity is certainly returned.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a Holding
///
/// Ordering is lexicographic over (holder, source, resource) with a `None`
/// source sorting first. Lock acquisition relies on this order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HoldingKey {
    /// Entity the allocation is attributed to (user, project)
    pub holder: String,

    /// Where capacity is drawn from; `None` is the holder's own allocation
    pub source: Option<String>,

    /// Capacity dimension (e.g. "cyclades.cpu")
    pub resource: String,
}

impl HoldingKey {
    /// Key drawing from the holder's own global allocation
    pub fn new(holder: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            holder: holder.into(),
            source: None,
            resource: resource.into(),
        }
    }

    /// Key drawing from a named source
    pub fn with_source(
        holder: impl Into<String>,
        source: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            holder: holder.into(),
            source: Some(source.into()),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for HoldingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}/{}/{}", self.holder, source, self.resource),
            None => write!(f, "{}/-/{}", self.holder, self.resource),
        }
    }
}

/// Upper bound of a Holding's reserved usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Limit(i64);

impl Limit {
    /// Sentinel for "no limit"
    pub const UNLIMITED: Limit = Limit(i64::MAX);

    /// Zero capacity
    pub const ZERO: Limit = Limit(0);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(self) -> i64 {
        self.0
    }

    pub fn is_unlimited(self) -> bool {
        self == Self::UNLIMITED
    }

    /// Whether `usage` fits under this limit
    pub fn admits(self, usage: i64) -> bool {
        usage <= self.0
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unlimited() {
            write!(f, "unlimited")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<i64> for Limit {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Ledger row for one (holder, source, resource) triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub key: HoldingKey,
    pub usage_committed: i64,
    pub usage_reserved: i64,
    pub limit: Limit,
}

impl Holding {
    /// Fresh holding with zero usage
    pub fn new(key: HoldingKey, limit: Limit) -> Self {
        Self {
            key,
            usage_committed: 0,
            usage_reserved: 0,
            limit,
        }
    }

    /// Whether an unresolved provision is outstanding against this holding
    pub fn has_pending(&self) -> bool {
        self.usage_reserved != self.usage_committed
    }

    /// Whether reserved usage exceeds the limit (only reachable by force)
    pub fn is_over_limit(&self) -> bool {
        !self.limit.admits(self.usage_reserved)
    }

    /// Capacity still available for imports
    pub fn available(&self) -> i64 {
        if self.limit.is_unlimited() {
            return i64::MAX;
        }
        self.limit.value().saturating_sub(self.usage_reserved).max(0)
    }
}

/// Selection of holdings for listing and reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HoldingFilter {
    /// Restrict to one holder
    pub holder: Option<String>,

    /// Restrict to these resources (empty = all)
    pub resources: Vec<String>,
}

impl HoldingFilter {
    pub fn for_holder(holder: impl Into<String>) -> Self {
        Self {
            holder: Some(holder.into()),
            resources: Vec::new(),
        }
    }

    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn matches(&self, key: &HoldingKey) -> bool {
        let holder_ok = self.holder.as_ref().map_or(true, |h| *h == key.holder);
        let resource_ok = self.resources.is_empty() || self.resources.contains(&key.resource);
        holder_ok && resource_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_order_puts_global_source_first() {
        let global = HoldingKey::new("alice", "cpu");
        let sourced = HoldingKey::with_source("alice", "project-1", "cpu");
        assert!(global < sourced);
    }

    #[test]
    fn test_key_display() {
        assert_eq!(HoldingKey::new("alice", "cpu").to_string(), "alice/-/cpu");
        assert_eq!(
            HoldingKey::with_source("alice", "p1", "ram").to_string(),
            "alice/p1/ram"
        );
    }

    #[test]
    fn test_available_capacity() {
        let mut holding = Holding::new(HoldingKey::new("alice", "cpu"), Limit::new(4));
        holding.usage_reserved = 3;
        assert_eq!(holding.available(), 1);

        holding.usage_reserved = 6;
        assert!(holding.is_over_limit());
        assert_eq!(holding.available(), 0);

        holding.limit = Limit::UNLIMITED;
        assert!(!holding.is_over_limit());
        assert_eq!(holding.available(), i64::MAX);
    }

    #[test]
    fn test_filter_matching() {
        let filter = HoldingFilter::for_holder("alice").with_resources(["cpu"]);
        assert!(filter.matches(&HoldingKey::new("alice", "cpu")));
        assert!(!filter.matches(&HoldingKey::new("alice", "ram")));
        assert!(!filter.matches(&HoldingKey::new("bob", "cpu")));
        assert!(HoldingFilter::default().matches(&HoldingKey::new("bob", "ram")));
    }
}

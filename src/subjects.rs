// Copyright (c) 2025 - Cowboy AI, Inc.

//! NATS subject hierarchy for the quota ledger
//!
//! ```text
//! quota.provisions.{holder}.{resource}   provision log entries
//! quota.outbox.{serial}                  pending resolution messages
//! quota.rpc                              ledger request-reply (configurable)
//! ```
//!
//! Holder and resource names are free-form; characters NATS reserves inside a
//! token (`.`, `*`, `>`, whitespace) are replaced by `_`. Consumers that need
//! exact matches filter on the payload.

/// Root namespace for all quota subjects
pub const QUOTA_ROOT: &str = "quota";

/// Escape a free-form name into a single subject token
pub fn token(name: &str) -> String {
    if name.is_empty() {
        return "_".to_string();
    }
    name.chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// Subject for a provision log entry
pub fn provision_subject(holder: &str, resource: &str) -> String {
    format!("{}.provisions.{}.{}", QUOTA_ROOT, token(holder), token(resource))
}

/// Filter for every provision log entry of a holder
pub fn provision_holder_filter(holder: &str) -> String {
    format!("{}.provisions.{}.>", QUOTA_ROOT, token(holder))
}

/// Wildcard for the provision log stream
pub fn provision_wildcard() -> String {
    format!("{}.provisions.>", QUOTA_ROOT)
}

/// Subject for an outbox message
pub fn outbox_subject(serial: u64) -> String {
    format!("{}.outbox.{}", QUOTA_ROOT, serial)
}

/// Wildcard for the outbox stream
pub fn outbox_wildcard() -> String {
    format!("{}.outbox.>", QUOTA_ROOT)
}

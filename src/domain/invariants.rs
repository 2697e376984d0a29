// Copyright (c) 2025 - Cowboy AI, Inc.
//! Pure Validation Functions - Ledger Invariants
//!
//! All functions are pure (no side effects) and return detailed errors.
//!
//! # Invariant Categories
//!
//! 1. **Structural**: `0 <= usage_committed <= usage_reserved` on every holding
//! 2. **Capacity**: `usage_reserved <= limit`, enforced when checking and
//!    bypassed only by forced commissions
//! 3. **Request**: well-formed commission requests

use std::collections::HashSet;

use crate::domain::{Holding, IssueRequest};
use crate::errors::{QuotaError, QuotaResult};

/// Assert the structural invariant of a holding
pub fn check_holding(holding: &Holding) -> QuotaResult<()> {
    if holding.usage_committed < 0 {
        return Err(QuotaError::InvariantViolation {
            key: holding.key.clone(),
            detail: format!("usage_committed {} is negative", holding.usage_committed),
        });
    }

    if holding.usage_committed > holding.usage_reserved {
        return Err(QuotaError::InvariantViolation {
            key: holding.key.clone(),
            detail: format!(
                "usage_committed {} exceeds usage_reserved {}",
                holding.usage_committed, holding.usage_reserved
            ),
        });
    }

    Ok(())
}

/// Validate a commission request before any holding is touched
///
/// # Rules
/// - client key must be present; the name is free-form and may be empty
/// - at least one provision
/// - every holding key names a holder and a resource
/// - at most one provision per holding
pub fn validate_issue_request(request: &IssueRequest) -> QuotaResult<()> {
    if request.client_key.trim().is_empty() {
        return Err(QuotaError::InvalidRequest(
            "client key cannot be empty".to_string(),
        ));
    }

    if request.provisions.is_empty() {
        return Err(QuotaError::InvalidRequest(
            "commission has no provisions".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for provision in &request.provisions {
        if provision.key.holder.is_empty() || provision.key.resource.is_empty() {
            return Err(QuotaError::InvalidRequest(format!(
                "malformed holding key {}",
                provision.key
            )));
        }
        if !seen.insert(&provision.key) {
            return Err(QuotaError::DuplicateProvision(provision.key.clone()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HoldingKey, Limit};

    fn holding(committed: i64, reserved: i64, limit: i64) -> Holding {
        Holding {
            key: HoldingKey::new("alice", "cpu"),
            usage_committed: committed,
            usage_reserved: reserved,
            limit: Limit::new(limit),
        }
    }

    #[test]
    fn test_valid_holding() {
        assert!(check_holding(&holding(0, 0, 0)).is_ok());
        assert!(check_holding(&holding(2, 4, 4)).is_ok());
    }

    #[test]
    fn test_over_limit_is_structurally_valid() {
        let forced = holding(0, 6, 4);
        assert!(check_holding(&forced).is_ok());
        assert!(forced.is_over_limit());
    }

    #[test]
    fn test_negative_committed_rejected() {
        let result = check_holding(&holding(-1, 0, 4));
        assert!(matches!(result, Err(QuotaError::InvariantViolation { .. })));
    }

    #[test]
    fn test_committed_above_reserved_rejected() {
        let result = check_holding(&holding(3, 2, 4));
        assert!(matches!(result, Err(QuotaError::InvariantViolation { .. })));
    }

    #[test]
    fn test_duplicate_provision_rejected() {
        let key = HoldingKey::new("alice", "cpu");
        let request = IssueRequest::new("cyclades", "dup")
            .provision(key.clone(), 1)
            .provision(key.clone(), 2);
        assert_eq!(
            validate_issue_request(&request),
            Err(QuotaError::DuplicateProvision(key))
        );
    }

    #[test]
    fn test_empty_request_rejected() {
        let request = IssueRequest::new("cyclades", "nothing");
        assert!(matches!(
            validate_issue_request(&request),
            Err(QuotaError::InvalidRequest(_))
        ));

        let anonymous = IssueRequest::new(" ", "x").provision(HoldingKey::new("a", "cpu"), 1);
        assert!(matches!(
            validate_issue_request(&anonymous),
            Err(QuotaError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_empty_name_accepted() {
        let request = IssueRequest::new("cyclades", "").provision(HoldingKey::new("a", "cpu"), 1);
        assert_eq!(validate_issue_request(&request), Ok(()));
    }
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests Module
//!
//! This module contains property-based tests using proptest to verify
//! fundamental properties of the operation primitives and the ledger.

mod ledger_invariants;
mod operation_roundtrip;

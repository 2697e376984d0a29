// Copyright (c) 2025 - Cowboy AI, Inc.
//! Finite State Machine Abstractions
//!
//! Generic state machine types for ledger lifecycles. Transitions are pure,
//! deterministic functions with no side effects; the caller applies the
//! output.
//!
//! # Mealy Machine
//!
//! Output depends on both current state and input:
//! ```text
//! (State, Input) → (State, Output)
//! ```
//!
//! The commission resolution machine is a Mealy machine: its output names the
//! operation phase to run on every provision of the commission.

pub mod resolution;

pub use resolution::{ResolutionEffect, ResolveCommand};

/// Result of a state transition
pub type TransitionResult<S> = Result<S, TransitionError>;

/// Errors that can occur during state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Current state is terminal
    #[error("State {from} is terminal, cannot apply {input}")]
    Terminal { from: String, input: String },
}

/// Trait for finite state machines
pub trait StateMachine: Sized + Clone {
    /// Input type that triggers transitions
    type Input;

    /// Output type produced by transitions (use () if none)
    type Output;

    /// Attempt to transition to a new state given an input
    ///
    /// # Returns
    /// - Ok((new_state, output)) if transition is valid
    /// - Err(TransitionError) if transition is invalid
    fn transition(&self, input: &Self::Input) -> TransitionResult<(Self, Self::Output)>;

    /// Check if a transition is valid without performing it
    fn can_transition(&self, input: &Self::Input) -> bool {
        self.transition(input).is_ok()
    }

    /// Get all valid inputs from current state (if enumerable)
    fn valid_inputs(&self) -> Vec<Self::Input>
    where
        Self::Input: Clone,
    {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Latch {
        Open,
        Closed,
    }

    struct Close;

    impl StateMachine for Latch {
        type Input = Close;
        type Output = ();

        fn transition(&self, _input: &Self::Input) -> TransitionResult<(Self, Self::Output)> {
            match self {
                Latch::Open => Ok((Latch::Closed, ())),
                Latch::Closed => Err(TransitionError::Terminal {
                    from: "Closed".to_string(),
                    input: "Close".to_string(),
                }),
            }
        }
    }

    #[test]
    fn test_simple_transition() {
        let (state, _) = Latch::Open.transition(&Close).unwrap();
        assert_eq!(state, Latch::Closed);
    }

    #[test]
    fn test_can_transition() {
        assert!(Latch::Open.can_transition(&Close));
        assert!(!Latch::Closed.can_transition(&Close));
    }
}
